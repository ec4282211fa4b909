//! Live connections keyed by ID.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use huddle_core::ConnectionId;

use crate::errors::RegistryError;
use crate::websocket::connection::Connection;

/// The one place a connection ID is known to be live.
///
/// Insertion is an atomic check-and-insert, so two connections can never be
/// registered under the same ID.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` under its ID.
    pub fn try_register(&self, connection: Arc<Connection>) -> Result<(), RegistryError> {
        match self.connections.entry(connection.id().clone()) {
            Entry::Occupied(existing) => Err(RegistryError::IdentityConflict(existing.key().clone())),
            Entry::Vacant(slot) => {
                let _ = slot.insert(connection);
                Ok(())
            }
        }
    }

    /// Remove a connection, returning it.
    pub fn unregister(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.remove(id).map(|(_, conn)| conn)
    }

    /// Connection by ID.
    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Some live connection's ID, if any.
    pub fn any_id(&self) -> Option<ConnectionId> {
        self.connections.iter().next().map(|entry| entry.key().clone())
    }

    /// All live connections, sorted by ID.
    pub fn all(&self) -> Vec<Arc<Connection>> {
        let mut all: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are live.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, id: &str) {
        use crate::websocket::connection::{PendingConnection, RequestInfo};
        use crate::websocket::rooms::RoomIndex;
        use huddle_core::{Store, TopicBus, Transport};

        let transport: Arc<dyn Transport> = Arc::new(TopicBus::new(false));
        let pending = PendingConnection::new("/", RequestInfo::default(), Store::new());
        let connection = Connection::new(
            ConnectionId::from(id),
            &pending,
            Arc::new(RoomIndex::new(Arc::clone(&transport))),
            transport,
            false,
        );
        let _ = self.try_register(Arc::new(connection));
    }
}
