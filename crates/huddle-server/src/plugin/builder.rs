//! Closure-based plugin construction.
//!
//! ```ignore
//! let counter = PluginBuilder::new()
//!     .name("counter")
//!     .store(|| vec![StoreField::global("count", 0)])
//!     .on_message(|_conn, _payload, hub| {
//!         let _ = hub.global_store().increment("count", 1);
//!         Ok(())
//!     })
//!     .build();
//! ```

use async_trait::async_trait;
use huddle_core::{ConnectionId, Payload, StoreField};

use crate::hub::Hub;
use crate::plugin::Plugin;
use crate::plugin::errors::HookResult;
use crate::plugin::methods::MethodSet;
use crate::websocket::connection::{Connection, PendingConnection};

type InitFn = Box<dyn Fn(&Hub) -> HookResult + Send + Sync>;
type StoreFn = Box<dyn Fn() -> Vec<StoreField> + Send + Sync>;
type MethodsFn = Box<dyn Fn(&Hub) -> MethodSet + Send + Sync>;
type CustomIdFn =
    Box<dyn Fn(&PendingConnection, &ConnectionId) -> HookResult<Option<String>> + Send + Sync>;
type PreReadyFn = Box<dyn Fn(&PendingConnection, &Hub) -> HookResult + Send + Sync>;
type ConnectionFn = Box<dyn Fn(&Connection, &Hub) -> HookResult + Send + Sync>;
type MessageFn = Box<dyn Fn(&Connection, &Payload, &Hub) -> HookResult + Send + Sync>;

/// Fluent builder for a [`Plugin`] made of closures.
///
/// Each setter replaces any closure previously set for the same hook.
#[derive(Default)]
#[must_use]
pub struct PluginBuilder {
    name: Option<String>,
    init: Option<InitFn>,
    store: Option<StoreFn>,
    methods: Option<MethodsFn>,
    custom_id: Option<CustomIdFn>,
    pre_ready: Option<PreReadyFn>,
    open: Option<ConnectionFn>,
    message: Option<MessageFn>,
    close: Option<ConnectionFn>,
}

impl PluginBuilder {
    /// Start an empty plugin.
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagnostic name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Runs once when the hub is built.
    pub fn on_init<F>(mut self, f: F) -> Self
    where
        F: Fn(&Hub) -> HookResult + Send + Sync + 'static,
    {
        self.init = Some(Box::new(f));
        self
    }

    /// Declares store fields. Called once for the global store and once per
    /// connection, so it must return fresh values each time.
    pub fn store<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Vec<StoreField> + Send + Sync + 'static,
    {
        self.store = Some(Box::new(f));
        self
    }

    /// Exposes methods on the hub.
    pub fn methods<F>(mut self, f: F) -> Self
    where
        F: Fn(&Hub) -> MethodSet + Send + Sync + 'static,
    {
        self.methods = Some(Box::new(f));
        self
    }

    /// Proposes a connection ID.
    pub fn custom_id<F>(mut self, f: F) -> Self
    where
        F: Fn(&PendingConnection, &ConnectionId) -> HookResult<Option<String>>
            + Send
            + Sync
            + 'static,
    {
        self.custom_id = Some(Box::new(f));
        self
    }

    /// Runs before admission.
    pub fn on_pre_ready<F>(mut self, f: F) -> Self
    where
        F: Fn(&PendingConnection, &Hub) -> HookResult + Send + Sync + 'static,
    {
        self.pre_ready = Some(Box::new(f));
        self
    }

    /// Runs after admission.
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection, &Hub) -> HookResult + Send + Sync + 'static,
    {
        self.open = Some(Box::new(f));
        self
    }

    /// Runs per inbound message.
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection, &Payload, &Hub) -> HookResult + Send + Sync + 'static,
    {
        self.message = Some(Box::new(f));
        self
    }

    /// Runs on disconnect.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection, &Hub) -> HookResult + Send + Sync + 'static,
    {
        self.close = Some(Box::new(f));
        self
    }

    /// Finish the plugin.
    pub fn build(self) -> BuiltPlugin {
        BuiltPlugin { hooks: self }
    }
}

/// Plugin produced by [`PluginBuilder::build`].
pub struct BuiltPlugin {
    hooks: PluginBuilder,
}

#[async_trait]
impl Plugin for BuiltPlugin {
    fn name(&self) -> Option<&str> {
        self.hooks.name.as_deref()
    }

    async fn init(&self, hub: &Hub) -> HookResult {
        self.hooks.init.as_ref().map_or(Ok(()), |f| f(hub))
    }

    fn store_fields(&self) -> Vec<StoreField> {
        self.hooks.store.as_ref().map(|f| f()).unwrap_or_default()
    }

    fn methods(&self, hub: &Hub) -> MethodSet {
        self.hooks.methods.as_ref().map(|f| f(hub)).unwrap_or_default()
    }

    fn custom_connection_id(
        &self,
        pending: &PendingConnection,
        default_id: &ConnectionId,
    ) -> HookResult<Option<String>> {
        self.hooks
            .custom_id
            .as_ref()
            .map_or(Ok(None), |f| f(pending, default_id))
    }

    async fn on_pre_ready(&self, pending: &PendingConnection, hub: &Hub) -> HookResult {
        self.hooks.pre_ready.as_ref().map_or(Ok(()), |f| f(pending, hub))
    }

    async fn on_open(&self, connection: &Connection, hub: &Hub) -> HookResult {
        self.hooks.open.as_ref().map_or(Ok(()), |f| f(connection, hub))
    }

    async fn on_message(&self, connection: &Connection, payload: &Payload, hub: &Hub) -> HookResult {
        self.hooks
            .message
            .as_ref()
            .map_or(Ok(()), |f| f(connection, payload, hub))
    }

    async fn on_close(&self, connection: &Connection, hub: &Hub) -> HookResult {
        self.hooks.close.as_ref().map_or(Ok(()), |f| f(connection, hub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::errors::HookError;
    use huddle_core::{StoreScope, Store};
    use serde_json::json;

    use crate::websocket::connection::RequestInfo;

    #[test]
    fn empty_builder_has_no_contributions() {
        let plugin = PluginBuilder::new().build();
        assert_eq!(plugin.name(), None);
        assert!(plugin.store_fields().is_empty());
        let pending = PendingConnection::new("/", RequestInfo::default(), Store::new());
        assert_eq!(
            plugin
                .custom_connection_id(&pending, &ConnectionId::from("d"))
                .ok()
                .flatten(),
            None
        );
    }

    #[test]
    fn name_and_store_are_exposed() {
        let plugin = PluginBuilder::new()
            .name("counter")
            .store(|| vec![StoreField::global("count", 0), StoreField::connection("seen", false)])
            .build();
        assert_eq!(plugin.name(), Some("counter"));
        let fields = plugin.store_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].scope, StoreScope::Global);
        assert_eq!(fields[1].value, json!(false));
    }

    #[test]
    fn custom_id_closure_is_used() {
        let plugin = PluginBuilder::new()
            .custom_id(|_, default| Ok(Some(format!("user-{default}"))))
            .build();
        let pending = PendingConnection::new("/", RequestInfo::default(), Store::new());
        let id = plugin
            .custom_connection_id(&pending, &ConnectionId::from("7"))
            .expect("hook ok");
        assert_eq!(id.as_deref(), Some("user-7"));
    }

    #[tokio::test]
    async fn hooks_delegate_to_closures() {
        let plugin = PluginBuilder::new()
            .on_pre_ready(|pending, _| {
                let _ = pending.store().set("ready", true);
                Ok(())
            })
            .on_init(|_| Err(HookError::failed("init refused")))
            .build();
        let hub = Hub::builder().build().await;
        let pending = PendingConnection::new("/", RequestInfo::default(), Store::new());
        plugin.on_pre_ready(&pending, &hub).await.expect("pre-ready ok");
        assert_eq!(pending.store().get("ready"), Some(json!(true)));
        assert!(plugin.init(&hub).await.is_err());
    }

    #[tokio::test]
    async fn later_setter_replaces_earlier() {
        let plugin = PluginBuilder::new()
            .on_init(|_| Err(HookError::failed("first")))
            .on_init(|_| Ok(()))
            .build();
        let hub = Hub::builder().build().await;
        assert!(plugin.init(&hub).await.is_ok());
    }
}
