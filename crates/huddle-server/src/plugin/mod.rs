//! Plugin contract, composition and execution.
//!
//! A plugin is a bundle of optional contributions: store fields, lifecycle
//! hooks, a connection-ID proposal, and named methods. Plugins run in the
//! order they were registered on the [`HubBuilder`](crate::HubBuilder), and
//! a failing plugin never stops the ones after it.

pub mod builder;
pub mod errors;
pub mod identity;
pub mod methods;
pub mod pipeline;
pub mod store;

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use huddle_core::{ConnectionId, Payload, StoreField};

use crate::hub::Hub;
use crate::websocket::connection::{Connection, PendingConnection};

pub use builder::PluginBuilder;
pub use errors::{HookError, HookResult, MethodError};
pub use methods::{MethodRegistry, MethodSet, PluginMethod};
pub use pipeline::PluginPipeline;

/// Label used in diagnostics for plugins without a name.
pub const UNNAMED_PLUGIN: &str = "plugin";

/// Lifecycle points a plugin can hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// Once, when the hub is built.
    Init,
    /// Store field declaration.
    Store,
    /// Method factory.
    Methods,
    /// Connection-ID proposal.
    CustomId,
    /// Before the connection is admitted.
    PreReady,
    /// After admission.
    Open,
    /// Per inbound message.
    Message,
    /// On disconnect.
    Close,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Store => "store",
            Self::Methods => "methods",
            Self::CustomId => "custom_id",
            Self::PreReady => "pre_ready",
            Self::Open => "open",
            Self::Message => "message",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

/// Extension contract. Every method has a no-op default.
///
/// Hooks receive the [`Hub`] so they can broadcast, query clients or reach
/// the global store without holding a reference of their own.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Runs once while the hub is being built, after the global store exists.
    async fn init(&self, _hub: &Hub) -> HookResult {
        Ok(())
    }

    /// Fields to seed into the global and per-connection stores.
    fn store_fields(&self) -> Vec<StoreField> {
        Vec::new()
    }

    /// Methods to expose under the hub's method registry.
    fn methods(&self, _hub: &Hub) -> MethodSet {
        MethodSet::new()
    }

    /// Propose an ID for a connection about to be admitted.
    ///
    /// Runs after every `on_pre_ready` hook. Returning `None` or an empty
    /// string defers to later plugins and finally to `default_id`.
    fn custom_connection_id(
        &self,
        _pending: &PendingConnection,
        _default_id: &ConnectionId,
    ) -> HookResult<Option<String>> {
        Ok(None)
    }

    /// Runs before the connection has an ID or any room membership.
    async fn on_pre_ready(&self, _pending: &PendingConnection, _hub: &Hub) -> HookResult {
        Ok(())
    }

    /// Runs after the connection joined `global`, its route room and its own room.
    async fn on_open(&self, _connection: &Connection, _hub: &Hub) -> HookResult {
        Ok(())
    }

    /// Runs for each inbound message, before route listeners.
    async fn on_message(
        &self,
        _connection: &Connection,
        _payload: &Payload,
        _hub: &Hub,
    ) -> HookResult {
        Ok(())
    }

    /// Runs on disconnect, while the connection still holds its rooms.
    async fn on_close(&self, _connection: &Connection, _hub: &Hub) -> HookResult {
        Ok(())
    }
}

/// Diagnostic label for `plugin`.
pub fn plugin_label(plugin: &dyn Plugin) -> &str {
    plugin.name().unwrap_or(UNNAMED_PLUGIN)
}

/// Best-effort message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Anonymous;
    impl Plugin for Anonymous {}

    struct Named;
    impl Plugin for Named {
        fn name(&self) -> Option<&str> {
            Some("auth")
        }
    }

    #[test]
    fn label_falls_back_for_unnamed() {
        assert_eq!(plugin_label(&Anonymous), UNNAMED_PLUGIN);
        assert_eq!(plugin_label(&Named), "auth");
    }

    #[test]
    fn hook_kind_display() {
        assert_eq!(HookKind::CustomId.to_string(), "custom_id");
        assert_eq!(HookKind::PreReady.to_string(), "pre_ready");
        assert_eq!(HookKind::Close.to_string(), "close");
    }

    #[test]
    fn panic_message_downcasts() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
