//! Admitted and pending connection state.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use huddle_core::{ConnectionId, Payload, Store, Transport};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::websocket::broadcast;
use crate::websocket::rooms::RoomIndex;

/// Data captured from the upgrade request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RequestInfo {
    /// Route path parameters, e.g. `roomId` for `/:roomId`.
    pub params: HashMap<String, String>,
    /// Request headers with valid UTF-8 values, keyed by lowercase name.
    pub headers: HashMap<String, String>,
    /// Query-string parameters.
    pub query: HashMap<String, String>,
}

impl RequestInfo {
    /// Add a path parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.params.insert(name.into(), value.into());
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.query.insert(name.into(), value.into());
        self
    }

    /// Path parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Header by name, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A connection that has completed the handshake but not yet been admitted.
///
/// It has a fresh connection-scoped store and the request data, but no ID
/// and no room membership.
pub struct PendingConnection {
    route: String,
    request: RequestInfo,
    store: Store,
}

impl PendingConnection {
    /// Create a pending connection on `route`.
    pub fn new(route: impl Into<String>, request: RequestInfo, store: Store) -> Self {
        Self {
            route: route.into(),
            request,
            store,
        }
    }

    /// Path of the route being connected to.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Upgrade request data.
    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// Connection-scoped store. Writes here carry over to the admitted connection.
    pub fn store(&self) -> &Store {
        &self.store
    }
}

/// Where a connection is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Registered but the open phase has not started.
    Admitted = 0,
    /// Serving messages.
    Open = 1,
    /// Close hooks are running or cleanup is in progress.
    Closing = 2,
    /// Removed from the registry and every room.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Admitted,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Whether the connection may still gain room memberships.
    pub fn accepts_joins(self) -> bool {
        matches!(self, Self::Admitted | Self::Open)
    }
}

/// An admitted connection.
///
/// Held behind `Arc` by the registry; handlers receive references. Room
/// membership is kept in both directions: `joined` here and the hub's
/// [`RoomIndex`], always updated together under the index lock.
pub struct Connection {
    id: ConnectionId,
    route: String,
    request: RequestInfo,
    store: Store,
    joined: Mutex<BTreeSet<String>>,
    rooms: Arc<RoomIndex>,
    transport: Arc<dyn Transport>,
    publish_to_self: bool,
    state: AtomicU8,
    turn: tokio::sync::Mutex<()>,
    close_requested: CancellationToken,
    connected_at: DateTime<Utc>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        pending: &PendingConnection,
        rooms: Arc<RoomIndex>,
        transport: Arc<dyn Transport>,
        publish_to_self: bool,
    ) -> Self {
        Self {
            id,
            route: pending.route.clone(),
            request: pending.request.clone(),
            store: pending.store.clone(),
            joined: Mutex::new(BTreeSet::new()),
            rooms,
            transport,
            publish_to_self,
            state: AtomicU8::new(ConnectionState::Admitted as u8),
            turn: tokio::sync::Mutex::new(()),
            close_requested: CancellationToken::new(),
            connected_at: Utc::now(),
        }
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Path of the route this connection came in on.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Upgrade request data.
    pub fn request(&self) -> &RequestInfo {
        &self.request
    }

    /// Connection-scoped store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// When the connection was admitted.
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the connection is serving messages.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Rooms this connection belongs to, sorted.
    pub fn rooms(&self) -> Vec<String> {
        self.joined.lock().iter().cloned().collect()
    }

    /// Whether this connection belongs to `room`.
    pub fn is_in_room(&self, room: &str) -> bool {
        self.joined.lock().contains(room)
    }

    /// Join `room`, creating it if needed. Returns `false` when already a
    /// member or when the connection is closing.
    pub fn join_room(&self, room: &str) -> bool {
        self.rooms.join(self, room)
    }

    /// Leave `room`. The room is deleted once its last member leaves.
    pub fn leave_room(&self, room: &str) -> bool {
        self.rooms.leave(self, room)
    }

    /// Send `payload` to this connection only.
    pub fn send(&self, payload: impl Into<Payload>) -> bool {
        self.transport.send(&self.id, payload.into())
    }

    /// Broadcast to every member of `room` with this connection as publisher.
    ///
    /// Every member, this connection included when it is one, receives the
    /// payload exactly once. Returns the number of deliveries.
    pub fn broadcast_to_room(&self, room: &str, payload: impl Into<Payload>) -> usize {
        broadcast::deliver(
            self.transport.as_ref(),
            &self.id,
            room,
            &payload.into(),
            self.publish_to_self,
        )
    }

    /// Ask the socket driver to end this connection.
    ///
    /// Cleanup then runs through the normal close sequence.
    pub fn close(&self) {
        self.close_requested.cancel();
    }

    /// Token cancelled once [`close`](Self::close) is requested.
    pub fn close_token(&self) -> CancellationToken {
        self.close_requested.clone()
    }

    pub(crate) fn joined(&self) -> &Mutex<BTreeSet<String>> {
        &self.joined
    }

    pub(crate) fn turn(&self) -> &tokio::sync::Mutex<()> {
        &self.turn
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move from `Admitted` to `Open`. Returns `false` if a close already started.
    pub(crate) fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Admitted as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closing`. Returns `false` if a close already started.
    pub(crate) fn begin_close(&self) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < ConnectionState::Closing as u8).then_some(ConnectionState::Closing as u8)
            })
            .is_ok()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("state", &self.state())
            .field("rooms", &self.rooms())
            .finish_non_exhaustive()
    }
}
