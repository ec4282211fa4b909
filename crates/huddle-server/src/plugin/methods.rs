//! Named methods exposed by plugins.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::hub::Hub;
use crate::plugin::errors::HookResult;
use crate::websocket::connection::Connection;

/// A callable a plugin exposes on the hub.
///
/// The hub is passed at call time so a method never needs to hold one.
#[async_trait]
pub trait PluginMethod: Send + Sync {
    /// Run the method. `connection` is set when the call is made on behalf
    /// of a client.
    async fn call(
        &self,
        hub: &Hub,
        connection: Option<&Connection>,
        params: Value,
    ) -> HookResult<Value>;
}

/// Adapter turning a synchronous closure into a [`PluginMethod`].
struct FnMethod<F>(F);

#[async_trait]
impl<F> PluginMethod for FnMethod<F>
where
    F: Fn(&Hub, Option<&Connection>, Value) -> HookResult<Value> + Send + Sync,
{
    async fn call(
        &self,
        hub: &Hub,
        connection: Option<&Connection>,
        params: Value,
    ) -> HookResult<Value> {
        (self.0)(hub, connection, params)
    }
}

/// Methods one plugin contributes, in declaration order.
#[derive(Default)]
pub struct MethodSet {
    entries: Vec<(String, Arc<dyn PluginMethod>)>,
}

impl MethodSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a synchronous method.
    #[must_use]
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Hub, Option<&Connection>, Value) -> HookResult<Value> + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Arc::new(FnMethod(f))));
        self
    }

    /// Add a method implemented as a [`PluginMethod`].
    #[must_use]
    pub fn handler(mut self, name: impl Into<String>, handler: impl PluginMethod + 'static) -> Self {
        self.entries.push((name.into(), Arc::new(handler)));
        self
    }

    /// Number of methods.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume into `(name, method)` pairs.
    pub fn into_entries(self) -> Vec<(String, Arc<dyn PluginMethod>)> {
        self.entries
    }
}

struct RegisteredMethod {
    owner: String,
    handler: Arc<dyn PluginMethod>,
}

/// Flat namespace of every plugin's methods. Later registrations win.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<String, RegisteredMethod>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name` on behalf of `owner`.
    ///
    /// Returns the previous owner when a method was overridden.
    pub fn register(
        &mut self,
        owner: &str,
        name: String,
        handler: Arc<dyn PluginMethod>,
    ) -> Option<String> {
        let previous = self.methods.insert(
            name.clone(),
            RegisteredMethod {
                owner: owner.to_owned(),
                handler,
            },
        );
        previous.map(|prev| {
            debug!(method = %name, previous = %prev.owner, owner, "method overridden by later plugin");
            prev.owner
        })
    }

    /// Register every method of `set`. Returns how many were added.
    pub fn extend(&mut self, owner: &str, set: MethodSet) -> usize {
        let entries = set.into_entries();
        let count = entries.len();
        for (name, handler) in entries {
            let _ = self.register(owner, name, handler);
        }
        count
    }

    /// Handler registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn PluginMethod>> {
        self.methods.get(name).map(|m| Arc::clone(&m.handler))
    }

    /// Plugin that registered `name`.
    pub fn owner(&self, name: &str) -> Option<&str> {
        self.methods.get(name).map(|m| m.owner.as_str())
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Sorted method names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
