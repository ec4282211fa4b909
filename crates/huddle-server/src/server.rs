//! axum integration: routing, host mounting and standalone listening.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::Router;
use axum::extract::{Path, Query, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::errors::HubError;
use crate::hub::Hub;
use crate::websocket::connection::RequestInfo;
use crate::websocket::session::run_session;

/// Translate a `/:name` / `/*rest` route path into axum's `{name}` syntax.
pub fn axum_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.to_owned()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether `path` declares any path parameters.
pub fn has_params(path: &str) -> bool {
    path.split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
}

fn header_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_owned(), value.to_owned()))
        })
        .collect()
}

fn upgrade(hub: Hub, route_path: String, ws: WebSocketUpgrade, request: RequestInfo) -> Response {
    let max_message_size = hub.server_settings().max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| run_session(hub, route_path, socket, request))
}

/// Handle to a hub listening on its own port.
#[derive(Debug)]
pub struct ListenHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ListenHandle {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the server task to finish.
    pub async fn wait(self) {
        if let Err(error) = self.task.await {
            warn!(%error, "server task ended abnormally");
        }
    }

    /// Abort the server task.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Take the server task.
    pub fn into_task(self) -> JoinHandle<()> {
        self.task
    }
}

impl Hub {
    fn routes_into<S>(&self, mut router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        for route in self.routes() {
            let path = route.path().to_owned();
            let pattern = axum_path(&path);
            let hub = self.clone();
            router = if has_params(&path) {
                router.route(
                    &pattern,
                    get(
                        move |ws: WebSocketUpgrade,
                              Path(params): Path<HashMap<String, String>>,
                              Query(query): Query<HashMap<String, String>>,
                              headers: HeaderMap| {
                            let request = RequestInfo {
                                params,
                                headers: header_map(&headers),
                                query,
                            };
                            let response = upgrade(hub.clone(), path.clone(), ws, request);
                            async move { response }
                        },
                    ),
                )
            } else {
                router.route(
                    &pattern,
                    get(
                        move |ws: WebSocketUpgrade,
                              Query(query): Query<HashMap<String, String>>,
                              headers: HeaderMap| {
                            let request = RequestInfo {
                                params: HashMap::new(),
                                headers: header_map(&headers),
                                query,
                            };
                            let response = upgrade(hub.clone(), path.clone(), ws, request);
                            async move { response }
                        },
                    ),
                )
            };
        }
        router
    }

    /// A router serving every route created so far.
    pub fn router(&self) -> Router {
        self.routes_into(Router::new())
    }

    /// Merge the hub's routes into `host`.
    ///
    /// After mounting, [`listen`](Self::listen) refuses to start; the host
    /// application owns the listener.
    pub fn mount<S>(&self, host: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.mark_mounted();
        self.routes_into(host)
    }

    /// Bind `addr` and serve the hub until `shutdown` is cancelled.
    ///
    /// On shutdown every live connection is asked to close before the
    /// server drains.
    pub async fn listen(&self, addr: &str, shutdown: CancellationToken) -> Result<ListenHandle, HubError> {
        if self.is_mounted() {
            return Err(HubError::MountedOnHost);
        }
        let listener = TcpListener::bind(addr).await.map_err(|source| HubError::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        let router = self.router().layer(TraceLayer::new_for_http());
        let hub = self.clone();

        let task = tokio::spawn(async move {
            let signal = async move {
                shutdown.cancelled().await;
                let closing = hub.close_all();
                info!(connections = closing, "shutting down, closing connections");
            };
            if let Err(error) = axum::serve(listener, router)
                .with_graceful_shutdown(signal)
                .await
            {
                warn!(%error, "server stopped with error");
            }
        });

        info!(%local_addr, routes = self.routes().len(), "hub listening");
        Ok(ListenHandle { local_addr, task })
    }
}
