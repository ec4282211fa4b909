//! Drives one upgraded axum WebSocket through the hub.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use huddle_core::Payload;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::hub::Hub;
use crate::websocket::connection::RequestInfo;

/// How long the writer may keep flushing queued frames after close.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Map an inbound frame to a payload. Control frames yield `None`.
pub(crate) fn frame_to_payload(frame: Message) -> Option<Payload> {
    match frame {
        Message::Text(text) => Some(Payload::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(Payload::Binary(bytes)),
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
    }
}

/// Map an outbound payload to a frame.
pub(crate) fn payload_to_frame(payload: Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text.into()),
        Payload::Binary(bytes) => Message::Binary(bytes),
    }
}

/// Run a connection from admission to close.
///
/// A writer task forwards the outbound queue to the socket while this task
/// reads frames and hands them to [`Hub::dispatch`] one at a time. The loop
/// ends on a close frame, a read error, end of stream, or
/// [`Connection::close`](crate::Connection::close).
pub async fn run_session(hub: Hub, route_path: String, socket: WebSocket, request: RequestInfo) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Payload>(hub.server_settings().outbound_queue);

    let connection = match hub.connect(&route_path, request, out_tx).await {
        Ok(connection) => connection,
        Err(error) => {
            warn!(route = %route_path, %error, "admission failed, closing socket");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };

    let writer = tokio::spawn(async move {
        while let Some(payload) = out_rx.recv().await {
            if ws_tx.send(payload_to_frame(payload)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let close_requested = connection.close_token();
    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(error)) => {
                        debug!(connection_id = %connection.id(), %error, "socket read failed");
                        break;
                    }
                    None => break,
                };
                if matches!(frame, Message::Close(_)) {
                    break;
                }
                if let Some(payload) = frame_to_payload(frame) {
                    let _ = hub.dispatch(&connection, payload).await;
                }
            }
            () = close_requested.cancelled() => {
                debug!(connection_id = %connection.id(), "close requested");
                break;
            }
        }
    }

    let _ = hub.disconnect(&connection).await;
    // The transport dropped its sender on detach, so the writer ends once drained.
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!(connection_id = %connection.id(), "writer did not drain in time");
    }
}
