//! Room broadcasting with exactly-once delivery per member.

use std::sync::Arc;

use huddle_core::{ConnectionId, GLOBAL_ROOM, Payload, Transport};
use tracing::debug;

use crate::websocket::registry::ConnectionRegistry;

/// Deliver `payload` to every subscriber of `room` on behalf of `publisher`.
///
/// A transport built without `publish_to_self` skips the publisher, so when
/// the publisher is itself a member it gets a direct send first. Either way
/// each member receives the payload exactly once.
pub(crate) fn deliver(
    transport: &dyn Transport,
    publisher: &ConnectionId,
    room: &str,
    payload: &Payload,
    publish_to_self: bool,
) -> usize {
    let mut delivered = 0;
    if !publish_to_self
        && transport.is_subscribed(publisher, room)
        && transport.send(publisher, payload.clone())
    {
        delivered += 1;
    }
    delivered + transport.publish(publisher, room, payload)
}

/// Server-originated broadcasts.
///
/// The transport's publish primitive needs a publisher, so the engine borrows
/// any live connection's ID. With no live connections there is nobody to
/// deliver to and the broadcast is a no-op.
#[derive(Clone)]
pub struct BroadcastEngine {
    transport: Arc<dyn Transport>,
    registry: Arc<ConnectionRegistry>,
    publish_to_self: bool,
}

impl BroadcastEngine {
    /// Create an engine.
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<ConnectionRegistry>,
        publish_to_self: bool,
    ) -> Self {
        Self {
            transport,
            registry,
            publish_to_self,
        }
    }

    /// Deliver to every member of `room`. Returns the number of deliveries.
    pub fn broadcast_to_room(&self, room: &str, payload: &Payload) -> usize {
        let Some(publisher) = self.registry.any_id() else {
            debug!(room, "no live connections, broadcast dropped");
            return 0;
        };
        self.broadcast_from(&publisher, room, payload)
    }

    /// Deliver to every member of `room` as `publisher`.
    pub fn broadcast_from(&self, publisher: &ConnectionId, room: &str, payload: &Payload) -> usize {
        deliver(
            self.transport.as_ref(),
            publisher,
            room,
            payload,
            self.publish_to_self,
        )
    }

    /// Deliver to every live connection through the `global` room.
    pub fn broadcast_global(&self, payload: &Payload) -> usize {
        self.broadcast_to_room(GLOBAL_ROOM, payload)
    }
}
