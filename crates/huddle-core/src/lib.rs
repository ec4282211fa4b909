//! # huddle-core
//!
//! Foundation types shared by every huddle crate.
//!
//! - [`ConnectionId`]: branded identifier of a live connection
//! - [`Payload`]: opaque message body (text or binary)
//! - [`Store`] / [`StoreField`]: the key/value containers plugins declare
//! - [`Transport`]: the publish/subscribe contract the hub drives, with the
//!   in-process [`TopicBus`] implementation
//! - [`logging`]: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod logging;
pub mod payload;
pub mod store;
pub mod transport;

pub use constants::GLOBAL_ROOM;
pub use ids::ConnectionId;
pub use payload::Payload;
pub use store::{Store, StoreField, StoreScope};
pub use transport::{Outbound, TopicBus, Transport};
