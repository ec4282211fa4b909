//! Connection state, registry, rooms, broadcasting and the socket driver.

pub mod broadcast;
pub mod connection;
pub mod registry;
pub mod rooms;
pub mod session;
