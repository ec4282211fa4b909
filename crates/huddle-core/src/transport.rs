//! Publish/subscribe transport contract and its in-process implementation.
//!
//! The hub never touches sockets. It attaches each admitted connection's
//! outbound queue to a [`Transport`] and then speaks in topics: subscribe,
//! unsubscribe, publish, and direct send.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ids::ConnectionId;
use crate::payload::Payload;

/// Sending half of a connection's outbound queue.
pub type Outbound = mpsc::Sender<Payload>;

/// Topic-based delivery the hub drives.
pub trait Transport: Send + Sync {
    /// Start delivering to `id` through `outbound`.
    fn attach(&self, id: &ConnectionId, outbound: Outbound);

    /// Stop delivering to `id` and drop all of its subscriptions.
    fn detach(&self, id: &ConnectionId);

    /// Subscribe `id` to `topic`.
    fn subscribe(&self, id: &ConnectionId, topic: &str);

    /// Unsubscribe `id` from `topic`.
    fn unsubscribe(&self, id: &ConnectionId, topic: &str);

    /// Whether `id` currently receives publications on `topic`.
    fn is_subscribed(&self, id: &ConnectionId, topic: &str) -> bool;

    /// Deliver `payload` to the subscribers of `topic` on behalf of `publisher`.
    ///
    /// Returns the number of subscribers the payload was queued for.
    fn publish(&self, publisher: &ConnectionId, topic: &str, payload: &Payload) -> usize;

    /// Deliver `payload` to exactly one connection.
    fn send(&self, id: &ConnectionId, payload: Payload) -> bool;
}

/// In-process topic bus backed by per-connection `mpsc` queues.
///
/// Unless built with `publish_to_self`, a publication skips its publisher,
/// matching the usual WebSocket server pub/sub behaviour.
pub struct TopicBus {
    outbound: DashMap<ConnectionId, Outbound>,
    topics: DashMap<String, HashSet<ConnectionId>>,
    subscriptions: DashMap<ConnectionId, HashSet<String>>,
    publish_to_self: bool,
}

impl TopicBus {
    /// Create a bus.
    pub fn new(publish_to_self: bool) -> Self {
        Self {
            outbound: DashMap::new(),
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            publish_to_self,
        }
    }

    /// Whether publications echo back to their publisher.
    pub fn publish_to_self(&self) -> bool {
        self.publish_to_self
    }

    /// Number of subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |subs| subs.len())
    }

    /// Number of attached connections.
    pub fn attached_count(&self) -> usize {
        self.outbound.len()
    }

    fn deliver(&self, id: &ConnectionId, payload: Payload) -> bool {
        let Some(tx) = self.outbound.get(id).map(|tx| tx.clone()) else {
            return false;
        };
        match tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(payload)) => {
                warn!(
                    connection_id = %id,
                    len = payload.len(),
                    "outbound queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn drop_subscriber(&self, topic: &str, id: &ConnectionId) {
        if let Some(mut subs) = self.topics.get_mut(topic) {
            let _ = subs.remove(id);
        }
        let _ = self.topics.remove_if(topic, |_, subs| subs.is_empty());
    }
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Transport for TopicBus {
    fn attach(&self, id: &ConnectionId, outbound: Outbound) {
        let _ = self.outbound.insert(id.clone(), outbound);
    }

    fn detach(&self, id: &ConnectionId) {
        let _ = self.outbound.remove(id);
        if let Some((_, topics)) = self.subscriptions.remove(id) {
            for topic in topics {
                self.drop_subscriber(&topic, id);
            }
        }
    }

    fn subscribe(&self, id: &ConnectionId, topic: &str) {
        let _ = self
            .topics
            .entry(topic.to_owned())
            .or_default()
            .insert(id.clone());
        let _ = self
            .subscriptions
            .entry(id.clone())
            .or_default()
            .insert(topic.to_owned());
    }

    fn unsubscribe(&self, id: &ConnectionId, topic: &str) {
        if let Some(mut topics) = self.subscriptions.get_mut(id) {
            let _ = topics.remove(topic);
        }
        self.drop_subscriber(topic, id);
    }

    fn is_subscribed(&self, id: &ConnectionId, topic: &str) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|subs| subs.contains(id))
    }

    fn publish(&self, publisher: &ConnectionId, topic: &str, payload: &Payload) -> usize {
        let recipients: Vec<ConnectionId> = match self.topics.get(topic) {
            Some(subs) => subs
                .iter()
                .filter(|id| self.publish_to_self || *id != publisher)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let delivered = recipients
            .iter()
            .filter(|id| self.deliver(id, payload.clone()))
            .count();
        debug!(topic, publisher = %publisher, delivered, "published to topic");
        delivered
    }

    fn send(&self, id: &ConnectionId, payload: Payload) -> bool {
        self.deliver(id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attach(bus: &TopicBus, id: &str) -> (ConnectionId, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(8);
        let id = ConnectionId::from(id);
        bus.attach(&id, tx);
        (id, rx)
    }

    #[test]
    fn subscribe_and_query() {
        let bus = TopicBus::default();
        let (a, _rx) = attach(&bus, "a");
        bus.subscribe(&a, "lobby");
        assert!(bus.is_subscribed(&a, "lobby"));
        assert!(!bus.is_subscribed(&a, "other"));
        assert_eq!(bus.subscriber_count("lobby"), 1);
    }

    #[test]
    fn unsubscribe_removes_empty_topic() {
        let bus = TopicBus::default();
        let (a, _rx) = attach(&bus, "a");
        bus.subscribe(&a, "lobby");
        bus.unsubscribe(&a, "lobby");
        assert!(!bus.is_subscribed(&a, "lobby"));
        assert_eq!(bus.subscriber_count("lobby"), 0);
        assert!(bus.topics.get("lobby").is_none());
    }

    #[test]
    fn publish_skips_publisher_by_default() {
        let bus = TopicBus::new(false);
        let (a, mut rx_a) = attach(&bus, "a");
        let (b, mut rx_b) = attach(&bus, "b");
        bus.subscribe(&a, "t");
        bus.subscribe(&b, "t");

        let delivered = bus.publish(&a, "t", &Payload::from("hi"));
        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), Payload::from("hi"));
    }

    #[test]
    fn publish_to_self_echoes() {
        let bus = TopicBus::new(true);
        let (a, mut rx_a) = attach(&bus, "a");
        bus.subscribe(&a, "t");
        assert_eq!(bus.publish(&a, "t", &Payload::from("echo")), 1);
        assert_eq!(rx_a.try_recv().unwrap(), Payload::from("echo"));
    }

    #[test]
    fn publish_to_unknown_topic_delivers_nothing() {
        let bus = TopicBus::default();
        let (a, _rx) = attach(&bus, "a");
        assert_eq!(bus.publish(&a, "nowhere", &Payload::from("x")), 0);
    }

    #[test]
    fn send_direct() {
        let bus = TopicBus::default();
        let (a, mut rx) = attach(&bus, "a");
        assert!(bus.send(&a, Payload::from("direct")));
        assert_eq!(rx.try_recv().unwrap(), Payload::from("direct"));
        assert!(!bus.send(&ConnectionId::from("ghost"), Payload::from("x")));
    }

    #[test]
    fn send_to_full_queue_fails() {
        let bus = TopicBus::default();
        let (tx, _rx) = mpsc::channel(1);
        let id = ConnectionId::from("slow");
        bus.attach(&id, tx);
        assert!(bus.send(&id, Payload::from("1")));
        assert!(!bus.send(&id, Payload::from("2")));
    }

    #[test]
    fn detach_drops_subscriptions() {
        let bus = TopicBus::default();
        let (a, _rx) = attach(&bus, "a");
        let (b, _rx_b) = attach(&bus, "b");
        bus.subscribe(&a, "t1");
        bus.subscribe(&a, "t2");
        bus.subscribe(&b, "t2");
        bus.detach(&a);

        assert!(!bus.is_subscribed(&a, "t1"));
        assert!(!bus.is_subscribed(&a, "t2"));
        assert!(bus.is_subscribed(&b, "t2"));
        assert_eq!(bus.subscriber_count("t1"), 0);
        assert_eq!(bus.attached_count(), 1);
    }
}
