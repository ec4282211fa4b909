//! # huddle-server
//!
//! Connection and room orchestration over axum WebSockets.
//!
//! - [`Hub`]: the root API. Owns the connection registry, the room index,
//!   the global store, the plugin pipeline and the exposed-method registry.
//! - [`Route`]: a named endpoint that implicitly owns a room named after its
//!   path and exposes `open` / `message` / `close` listeners.
//! - [`Plugin`]: extensions contributing store fields, lifecycle hooks and
//!   named methods, composed in registration order.
//!
//! ## Lifecycle
//!
//! pre-ready (store composition, `on_pre_ready`, identity allocation) →
//! admission into the registry and the `global`, route and self rooms →
//! `on_open` then route `open` → per message `on_message` then route
//! `message` → `on_close` then route `close` → leave every room → unregister.
//!
//! ## Fail-Open
//!
//! Plugin hooks and route listeners never take a connection down. Errors,
//! panics and timeouts are logged with the plugin name and the sequence
//! continues.

#![deny(unsafe_code)]

pub mod errors;
pub mod hub;
pub mod plugin;
pub mod route;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use errors::{HubError, RegistryError};
pub use hub::{ClientQuery, Clients, Hub, HubBuilder, RoomSummary};
pub use plugin::{
    HookError, HookKind, HookResult, MethodError, MethodSet, Plugin, PluginBuilder, PluginMethod,
};
pub use route::{EventKind, Route, RouteContext};
pub use server::ListenHandle;
pub use shutdown::ShutdownCoordinator;
pub use websocket::connection::{Connection, ConnectionState, PendingConnection, RequestInfo};

pub use huddle_core::{ConnectionId, GLOBAL_ROOM, Outbound, Payload, Store, StoreField, StoreScope};
