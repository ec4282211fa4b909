//! Chat relay: a lobby route listing rooms, and one route per chat room.
//!
//! Clients speak JSON objects tagged by `type`:
//! `get-rooms` on `/`; `send-message`, `get-clients`, `get-clients-size` on
//! `/:roomId`. Room members receive `join`, `leave` and `message` events.

use huddle_core::ConnectionId;
use huddle_server::{
    ClientQuery, Connection, Hub, HubError, MethodSet, Payload, Plugin, PluginBuilder,
    RouteContext, StoreField,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

/// Prefix separating chat rooms from the hub's built-in rooms.
pub const ROOM_PREFIX: &str = "rooms:";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum Request {
    GetRooms,
    GetClients,
    GetClientsSize,
    SendMessage { message: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum Event<'a> {
    Rooms { rooms: Vec<RoomEntry> },
    Join { username: &'a str },
    Leave { username: &'a str },
    Message { username: &'a str, message: &'a str },
    Clients { clients: Vec<String> },
    ClientsSize { size: usize },
    Error { message: &'a str },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RoomEntry {
    name: String,
    user_count: usize,
}

fn encode(event: &Event<'_>) -> Option<Payload> {
    serde_json::to_string(event).ok().map(Payload::Text)
}

fn decode(payload: &Payload) -> Option<Request> {
    serde_json::from_slice(payload.as_bytes()).ok()
}

fn username(connection: &Connection) -> String {
    connection
        .store()
        .get("username")
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| connection.id().to_string())
}

/// Chat room a connection on `/:roomId` belongs to.
fn chat_room(connection: &Connection) -> String {
    format!("{ROOM_PREFIX}{}", connection.request().param("roomId").unwrap_or_default())
}

/// Gives each connection a `username`, taken from `?username=` or generated.
pub fn profile_plugin() -> impl Plugin {
    PluginBuilder::new()
        .name("profile")
        .store(|| vec![StoreField::connection("username", Value::Null)])
        .on_pre_ready(|pending, _| {
            let name = pending
                .request()
                .query
                .get("username")
                .filter(|name| !name.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| {
                    let id = ConnectionId::generate();
                    format!("guest-{}", &id.as_str()[..8])
                });
            let _ = pending.store().set("username", name);
            Ok(())
        })
        .build()
}

/// Counts relayed messages hub-wide and exposes them as the `stats` method.
pub fn stats_plugin() -> impl Plugin {
    PluginBuilder::new()
        .name("stats")
        .store(|| vec![StoreField::global("messages", 0)])
        .on_message(|_, _, hub| {
            let _ = hub.global_store().increment("messages", 1);
            Ok(())
        })
        .methods(|_| {
            MethodSet::new().method("stats", |hub, _, _| {
                Ok(json!({
                    "connections": hub.connection_count(),
                    "messages": hub.global_store().get("messages").unwrap_or(Value::Null),
                    "rooms": hub.rooms().len(),
                }))
            })
        })
        .build()
}

fn lobby_message(cx: &RouteContext<'_>, payload: &Payload) {
    match decode(payload) {
        Some(Request::GetRooms) => {
            let rooms = cx
                .hub
                .rooms()
                .into_iter()
                .filter_map(|room| {
                    room.name.strip_prefix(ROOM_PREFIX).map(|name| RoomEntry {
                        name: name.to_owned(),
                        user_count: room.members,
                    })
                })
                .collect();
            reply(cx, &Event::Rooms { rooms });
        }
        Some(_) | None => reply(cx, &Event::Error { message: "unsupported request" }),
    }
}

fn room_open(cx: &RouteContext<'_>) {
    let room = chat_room(cx.connection);
    let _ = cx.connection.join_room(&room);
    let name = username(cx.connection);
    if let Some(event) = encode(&Event::Join { username: &name }) {
        let _ = cx.connection.broadcast_to_room(&room, event);
    }
}

fn room_message(cx: &RouteContext<'_>, payload: &Payload) {
    let room = chat_room(cx.connection);
    match decode(payload) {
        Some(Request::SendMessage { message }) => {
            let name = username(cx.connection);
            if let Some(event) = encode(&Event::Message { username: &name, message: &message }) {
                let _ = cx.connection.broadcast_to_room(&room, event);
            }
        }
        Some(Request::GetClients) => {
            let clients = cx
                .hub
                .get_clients(&ClientQuery::room(room))
                .into_list()
                .iter()
                .map(|c| username(c))
                .collect();
            reply(cx, &Event::Clients { clients });
        }
        Some(Request::GetClientsSize) => {
            let size = cx.hub.get_clients(&ClientQuery::room(room).only_size()).len();
            reply(cx, &Event::ClientsSize { size });
        }
        Some(Request::GetRooms) | None => {
            debug!(connection_id = %cx.connection.id(), "unrecognised room request");
            reply(cx, &Event::Error { message: "unsupported request" });
        }
    }
}

fn room_close(cx: &RouteContext<'_>) {
    let room = chat_room(cx.connection);
    let name = username(cx.connection);
    if let Some(event) = encode(&Event::Leave { username: &name }) {
        let _ = cx.hub.broadcast_to_room(&room, event);
    }
}

fn reply(cx: &RouteContext<'_>, event: &Event<'_>) {
    if let Some(payload) = encode(event) {
        let _ = cx.connection.send(payload);
    }
}

/// Create the relay's routes on `hub`.
pub fn install(hub: &Hub) -> Result<(), HubError> {
    let _ = hub.create_route("/", |route| {
        let _ = route.on_message(lobby_message);
    })?;
    let _ = hub.create_route("/:roomId", |route| {
        let _ = route
            .on_open(room_open)
            .on_message(room_message)
            .on_close(room_close);
    })?;
    Ok(())
}
