//! Key/value stores declared by plugins.
//!
//! A [`Store`] is a shared handle: cloning it yields another handle onto the
//! same map, so a mutation made through one connection's handler is visible
//! to every other holder immediately. The hub owns one global store; each
//! connection owns one connection-scoped store.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Which pool a declared field belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StoreScope {
    /// One value per connection, created at pre-ready.
    #[default]
    Connection,
    /// One value per hub, created at startup.
    Global,
}

/// A field a plugin declares, with its initial value.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreField {
    /// Key in the target store.
    pub key: String,
    /// Initial value.
    pub value: Value,
    /// Target pool.
    pub scope: StoreScope,
}

impl StoreField {
    /// Declare a connection-scoped field.
    pub fn connection(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            scope: StoreScope::Connection,
        }
    }

    /// Declare a hub-wide field.
    pub fn global(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            scope: StoreScope::Global,
        }
    }

    /// Whether this field targets the global pool.
    pub fn is_global(&self) -> bool {
        self.scope == StoreScope::Global
    }
}

/// Shared, concurrently mutable JSON map.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<RwLock<Map<String, Value>>>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `map`.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Clone of the value under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().get(key).cloned()
    }

    /// Insert `value`, returning the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.write().insert(key.into(), value.into())
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.write().remove(key)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().contains_key(key)
    }

    /// Mutate the value under `key` atomically with respect to other writers.
    ///
    /// A missing key starts as `Value::Null`. Returns the value after `f` ran.
    pub fn update<F>(&self, key: &str, f: F) -> Value
    where
        F: FnOnce(&mut Value),
    {
        let mut map = self.inner.write();
        let slot = map.entry(key.to_owned()).or_insert(Value::Null);
        f(slot);
        slot.clone()
    }

    /// Add `delta` to an integer field, treating a missing or non-integer value as 0.
    pub fn increment(&self, key: &str, delta: i64) -> i64 {
        let updated = self.update(key, |slot| {
            let current = slot.as_i64().unwrap_or(0);
            *slot = Value::from(current + delta);
        });
        updated.as_i64().unwrap_or_default()
    }

    /// Sorted list of keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Point-in-time copy of the whole map.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.inner.read().clone()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the store has no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Whether two handles point at the same underlying map.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("keys", &self.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_constructors_set_scope() {
        assert!(StoreField::global("count", 0).is_global());
        assert!(!StoreField::connection("username", Value::Null).is_global());
        assert_eq!(StoreScope::default(), StoreScope::Connection);
    }

    #[test]
    fn set_get_remove() {
        let store = Store::new();
        assert!(store.set("a", 1).is_none());
        assert_eq!(store.set("a", 2), Some(json!(1)));
        assert_eq!(store.get("a"), Some(json!(2)));
        assert_eq!(store.remove("a"), Some(json!(2)));
        assert!(!store.contains("a"));
        assert!(store.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let store = Store::new();
        let other = store.clone();
        let _ = other.set("shared", true);
        assert_eq!(store.get("shared"), Some(json!(true)));
        assert!(store.ptr_eq(&other));
        assert!(!store.ptr_eq(&Store::new()));
    }

    #[test]
    fn update_missing_key_starts_null() {
        let store = Store::new();
        let value = store.update("list", |slot| {
            assert!(slot.is_null());
            *slot = json!(["x"]);
        });
        assert_eq!(value, json!(["x"]));
    }

    #[test]
    fn increment_treats_non_integers_as_zero() {
        let store = Store::new();
        let _ = store.set("n", "text");
        assert_eq!(store.increment("n", 3), 3);
        assert_eq!(store.increment("n", -1), 2);
        assert_eq!(store.increment("fresh", 1), 1);
    }

    #[test]
    fn keys_are_sorted() {
        let store = Store::new();
        let _ = store.set("b", 1);
        let _ = store.set("a", 1);
        assert_eq!(store.keys(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let store = Store::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        let _ = store.increment("count", 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get("count"), Some(json!(2000)));
    }
}
