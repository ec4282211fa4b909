//! Room membership index.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use huddle_core::{ConnectionId, Transport};
use parking_lot::Mutex;
use tracing::debug;

use crate::websocket::connection::Connection;

/// Room name → member IDs, kept consistent with each connection's own
/// joined-set.
///
/// Both sides are updated while holding the index lock (index first, then
/// the connection's set), and the transport subscription follows the same
/// change. A room exists only while it has members.
pub struct RoomIndex {
    rooms: Mutex<HashMap<String, HashSet<ConnectionId>>>,
    transport: Arc<dyn Transport>,
}

impl RoomIndex {
    /// Create an empty index driving `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            transport,
        }
    }

    /// Add `connection` to `room`. Returns `true` if it was not already a member.
    ///
    /// Closing connections are refused so no membership outlives cleanup.
    pub fn join(&self, connection: &Connection, room: &str) -> bool {
        let mut rooms = self.rooms.lock();
        if !connection.state().accepts_joins() {
            debug!(connection_id = %connection.id(), room, "join refused, connection closing");
            return false;
        }
        let inserted = rooms
            .entry(room.to_owned())
            .or_default()
            .insert(connection.id().clone());
        let _ = connection.joined().lock().insert(room.to_owned());
        self.transport.subscribe(connection.id(), room);
        inserted
    }

    /// Remove `connection` from `room`. Returns `true` if it was a member.
    pub fn leave(&self, connection: &Connection, room: &str) -> bool {
        let mut rooms = self.rooms.lock();
        let was_member = connection.joined().lock().remove(room);
        Self::remove_member(&mut rooms, room, connection.id());
        self.transport.unsubscribe(connection.id(), room);
        was_member
    }

    /// Remove `connection` from every room it joined. Returns the rooms left.
    pub fn leave_all(&self, connection: &Connection) -> Vec<String> {
        let mut rooms = self.rooms.lock();
        let joined = std::mem::take(&mut *connection.joined().lock());
        for room in &joined {
            Self::remove_member(&mut rooms, room, connection.id());
            self.transport.unsubscribe(connection.id(), room);
        }
        joined.into_iter().collect()
    }

    fn remove_member(rooms: &mut HashMap<String, HashSet<ConnectionId>>, room: &str, id: &ConnectionId) {
        let now_empty = rooms.get_mut(room).is_some_and(|members| {
            let _ = members.remove(id);
            members.is_empty()
        });
        if now_empty {
            let _ = rooms.remove(room);
            debug!(room, "room emptied");
        }
    }

    /// Members of `room`, sorted. Empty for an absent room.
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        let mut members: Vec<ConnectionId> = self
            .rooms
            .lock()
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Union of every room's members, sorted and deduplicated.
    pub fn all_members(&self) -> Vec<ConnectionId> {
        let rooms = self.rooms.lock();
        let unique: HashSet<&ConnectionId> = rooms.values().flatten().collect();
        let mut members: Vec<ConnectionId> = unique.into_iter().cloned().collect();
        members.sort();
        members
    }

    /// Number of members in `room`.
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.lock().get(room).map_or(0, HashSet::len)
    }

    /// Whether `id` is a member of `room`.
    pub fn contains(&self, room: &str, id: &str) -> bool {
        self.rooms
            .lock()
            .get(room)
            .is_some_and(|members| members.contains(id))
    }

    /// Whether `room` exists.
    pub fn has_room(&self, room: &str) -> bool {
        self.rooms.lock().contains_key(room)
    }

    /// `(room, member count)` pairs sorted by room name.
    pub fn snapshot(&self) -> Vec<(String, usize)> {
        let mut rooms: Vec<(String, usize)> = self
            .rooms
            .lock()
            .iter()
            .map(|(name, members)| (name.clone(), members.len()))
            .collect();
        rooms.sort();
        rooms
    }

    /// Number of rooms.
    pub fn len(&self) -> usize {
        self.rooms.lock().len()
    }

    /// Whether there are no rooms.
    pub fn is_empty(&self) -> bool {
        self.rooms.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::{Store, TopicBus};

    use crate::websocket::connection::{PendingConnection, RequestInfo};

    fn setup() -> (Arc<RoomIndex>, Arc<dyn Transport>) {
        let transport: Arc<dyn Transport> = Arc::new(TopicBus::new(false));
        (Arc::new(RoomIndex::new(Arc::clone(&transport))), transport)
    }

    fn connection(index: &Arc<RoomIndex>, transport: &Arc<dyn Transport>, id: &str) -> Connection {
        let pending = PendingConnection::new("/", RequestInfo::default(), Store::new());
        Connection::new(
            ConnectionId::from(id),
            &pending,
            Arc::clone(index),
            Arc::clone(transport),
            false,
        )
    }

    /// Every room listing a connection appears in its joined-set and vice versa.
    fn assert_consistent(index: &RoomIndex, connections: &[&Connection]) {
        for conn in connections {
            for room in conn.rooms() {
                assert!(index.contains(&room, conn.id()), "{room} missing {}", conn.id());
            }
        }
        for (room, _) in index.snapshot() {
            for member in index.members(&room) {
                let conn = connections
                    .iter()
                    .find(|c| *c.id() == member)
                    .expect("member is a known connection");
                assert!(conn.is_in_room(&room));
            }
        }
    }

    #[test]
    fn join_creates_room_and_leave_deletes_it() {
        let (index, transport) = setup();
        let a = connection(&index, &transport, "a");
        assert!(index.join(&a, "lobby"));
        assert!(index.has_room("lobby"));
        assert_eq!(index.member_count("lobby"), 1);
        assert!(index.leave(&a, "lobby"));
        assert!(!index.has_room("lobby"));
        assert!(!index.leave(&a, "lobby"));
    }

    #[test]
    fn membership_stays_bidirectional() {
        let (index, transport) = setup();
        let a = connection(&index, &transport, "a");
        let b = connection(&index, &transport, "b");
        let _ = a.join_room("lobby");
        let _ = a.join_room("red");
        let _ = b.join_room("lobby");
        assert_consistent(&index, &[&a, &b]);
        let _ = a.leave_room("lobby");
        assert_consistent(&index, &[&a, &b]);
        assert_eq!(index.members("lobby"), vec![ConnectionId::from("b")]);
        let _ = b.leave_room("lobby");
        assert!(!index.has_room("lobby"));
        assert_consistent(&index, &[&a, &b]);
    }

    #[test]
    fn leave_all_clears_every_room() {
        let (index, transport) = setup();
        let a = connection(&index, &transport, "a");
        let b = connection(&index, &transport, "b");
        for room in ["global", "/chat", "a"] {
            let _ = a.join_room(room);
        }
        let _ = b.join_room("global");
        let mut left = index.leave_all(&a);
        left.sort();
        assert_eq!(left, vec!["/chat", "a", "global"]);
        assert!(a.rooms().is_empty());
        assert_eq!(index.snapshot(), vec![("global".to_owned(), 1)]);
        assert!(!transport.is_subscribed(a.id(), "global"));
    }

    #[test]
    fn all_members_deduplicates() {
        let (index, transport) = setup();
        let a = connection(&index, &transport, "a");
        let b = connection(&index, &transport, "b");
        let _ = a.join_room("x");
        let _ = a.join_room("y");
        let _ = b.join_room("y");
        assert_eq!(
            index.all_members(),
            vec![ConnectionId::from("a"), ConnectionId::from("b")]
        );
    }

    #[test]
    fn absent_room_is_empty() {
        let (index, _transport) = setup();
        assert!(index.members("nowhere").is_empty());
        assert_eq!(index.member_count("nowhere"), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn concurrent_join_leave_stays_consistent() {
        let (index, transport) = setup();
        let conns: Vec<Arc<Connection>> = (0..8)
            .map(|i| Arc::new(connection(&index, &transport, &format!("c{i}"))))
            .collect();
        std::thread::scope(|scope| {
            for conn in &conns {
                let _ = scope.spawn(move || {
                    for round in 0..200 {
                        let room = format!("r{}", round % 5);
                        let _ = conn.join_room(&room);
                        if round % 3 == 0 {
                            let _ = conn.leave_room(&room);
                        }
                    }
                });
            }
        });
        let refs: Vec<&Connection> = conns.iter().map(AsRef::as_ref).collect();
        assert_consistent(&index, &refs);
        for conn in &conns {
            let _ = index.leave_all(conn);
        }
        assert!(index.is_empty());
    }
}
