//! Routes: named endpoints with their own room and event listeners.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use huddle_core::Payload;
use parking_lot::RwLock;
use tracing::warn;

use crate::hub::Hub;
use crate::plugin::panic_message;
use crate::websocket::broadcast::BroadcastEngine;
use crate::websocket::connection::Connection;

/// Route-level events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A connection was admitted on the route.
    Open,
    /// A connection on the route sent a message.
    Message,
    /// A connection on the route disconnected.
    Close,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Message => "message",
            Self::Close => "close",
        })
    }
}

/// What a route listener sees.
pub struct RouteContext<'a> {
    /// The hub.
    pub hub: &'a Hub,
    /// The route the event fired on.
    pub route: &'a Route,
    /// The connection the event is about.
    pub connection: &'a Arc<Connection>,
}

impl RouteContext<'_> {
    /// Broadcast to the route's own room with the event's connection as publisher.
    pub fn broadcast(&self, payload: impl Into<Payload>) -> usize {
        self.connection.broadcast_to_room(self.route.room_id(), payload)
    }
}

type ConnectionListener = Arc<dyn Fn(&RouteContext<'_>) + Send + Sync>;
type MessageListener = Arc<dyn Fn(&RouteContext<'_>, &Payload) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    open: Vec<ConnectionListener>,
    message: Vec<MessageListener>,
    close: Vec<ConnectionListener>,
}

/// A WebSocket endpoint created with [`Hub::create_route`].
///
/// Every connection on the route joins a room named after the route path.
/// Listeners run after the plugin hooks for the same event, in the order they
/// were added; a panicking listener is logged and skipped.
pub struct Route {
    path: String,
    broadcaster: BroadcastEngine,
    listeners: RwLock<Listeners>,
}

impl Route {
    pub(crate) fn new(path: String, broadcaster: BroadcastEngine) -> Self {
        Self {
            path,
            broadcaster,
            listeners: RwLock::new(Listeners::default()),
        }
    }

    /// Route path, e.g. `/chat` or `/:roomId`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Name of the room every connection on this route joins.
    pub fn room_id(&self) -> &str {
        &self.path
    }

    /// Add an `open` listener.
    pub fn on_open<F>(&self, f: F) -> &Self
    where
        F: Fn(&RouteContext<'_>) + Send + Sync + 'static,
    {
        self.listeners.write().open.push(Arc::new(f));
        self
    }

    /// Add a `message` listener.
    pub fn on_message<F>(&self, f: F) -> &Self
    where
        F: Fn(&RouteContext<'_>, &Payload) + Send + Sync + 'static,
    {
        self.listeners.write().message.push(Arc::new(f));
        self
    }

    /// Add a `close` listener.
    pub fn on_close<F>(&self, f: F) -> &Self
    where
        F: Fn(&RouteContext<'_>) + Send + Sync + 'static,
    {
        self.listeners.write().close.push(Arc::new(f));
        self
    }

    /// Number of listeners for `event`.
    pub fn listener_count(&self, event: EventKind) -> usize {
        let listeners = self.listeners.read();
        match event {
            EventKind::Open => listeners.open.len(),
            EventKind::Message => listeners.message.len(),
            EventKind::Close => listeners.close.len(),
        }
    }

    /// Broadcast to every connection on this route.
    pub fn broadcast(&self, payload: impl Into<Payload>) -> usize {
        self.broadcaster
            .broadcast_to_room(&self.path, &payload.into())
    }

    /// Broadcast to any room.
    pub fn broadcast_to_room(&self, room: &str, payload: impl Into<Payload>) -> usize {
        self.broadcaster.broadcast_to_room(room, &payload.into())
    }

    pub(crate) fn emit_open(&self, cx: &RouteContext<'_>) -> usize {
        let listeners = self.listeners.read().open.clone();
        self.emit(EventKind::Open, &listeners, |f| f(cx))
    }

    pub(crate) fn emit_message(&self, cx: &RouteContext<'_>, payload: &Payload) -> usize {
        let listeners = self.listeners.read().message.clone();
        self.emit(EventKind::Message, &listeners, |f| f(cx, payload))
    }

    pub(crate) fn emit_close(&self, cx: &RouteContext<'_>) -> usize {
        let listeners = self.listeners.read().close.clone();
        self.emit(EventKind::Close, &listeners, |f| f(cx))
    }

    /// Invoke each listener, isolating panics. Returns how many panicked.
    fn emit<L>(&self, event: EventKind, listeners: &[L], invoke: impl Fn(&L)) -> usize {
        let mut failures = 0;
        for listener in listeners {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| invoke(listener))) {
                failures += 1;
                warn!(
                    route = %self.path,
                    %event,
                    error = %panic_message(panic.as_ref()),
                    "route listener panicked, continuing"
                );
            }
        }
        failures
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::TopicBus;

    use crate::websocket::registry::ConnectionRegistry;

    fn route(path: &str) -> Route {
        let engine = BroadcastEngine::new(
            Arc::new(TopicBus::new(false)),
            Arc::new(ConnectionRegistry::new()),
            false,
        );
        Route::new(path.to_owned(), engine)
    }

    #[test]
    fn room_id_is_the_path() {
        let route = route("/chat");
        assert_eq!(route.path(), "/chat");
        assert_eq!(route.room_id(), "/chat");
    }

    #[test]
    fn listeners_are_counted_per_event() {
        let route = route("/");
        let _ = route
            .on_open(|_| {})
            .on_message(|_, _| {})
            .on_message(|_, _| {});
        assert_eq!(route.listener_count(EventKind::Open), 1);
        assert_eq!(route.listener_count(EventKind::Message), 2);
        assert_eq!(route.listener_count(EventKind::Close), 0);
    }

    #[test]
    fn broadcast_without_connections_delivers_nothing() {
        let route = route("/");
        assert_eq!(route.broadcast("hello"), 0);
        assert_eq!(route.broadcast_to_room("elsewhere", "hello"), 0);
    }

    #[test]
    fn event_kind_display() {
        assert_eq!(EventKind::Message.to_string(), "message");
    }
}
