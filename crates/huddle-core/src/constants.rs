//! Protocol-level constants.

/// Topic every connection subscribes to when it opens.
pub const GLOBAL_ROOM: &str = "global";

/// Default capacity of a connection's outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 1024;
