//! Store composition from plugin declarations.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use huddle_core::{Store, StoreScope};
use serde_json::Map;
use tracing::trace;

use crate::plugin::errors::HookError;
use crate::plugin::pipeline::log_hook_failure;
use crate::plugin::{HookKind, Plugin, panic_message, plugin_label};

/// Build a fresh per-connection store from every plugin's declarations.
pub fn compose_connection_store(plugins: &[Arc<dyn Plugin>]) -> Store {
    compose(plugins, StoreScope::Connection)
}

/// Build the hub-wide store from every plugin's declarations.
pub fn compose_global_store(plugins: &[Arc<dyn Plugin>]) -> Store {
    compose(plugins, StoreScope::Global)
}

/// Merge declared fields of `scope` in plugin order; later keys overwrite earlier ones.
fn compose(plugins: &[Arc<dyn Plugin>], scope: StoreScope) -> Store {
    let mut map = Map::new();
    for plugin in plugins {
        let fields = match catch_unwind(AssertUnwindSafe(|| plugin.store_fields())) {
            Ok(fields) => fields,
            Err(panic) => {
                let error = HookError::Panicked {
                    message: panic_message(panic.as_ref()),
                };
                log_hook_failure(plugin.as_ref(), HookKind::Store, &error);
                continue;
            }
        };
        for field in fields.into_iter().filter(|f| f.scope == scope) {
            if map.insert(field.key.clone(), field.value).is_some() {
                trace!(plugin = plugin_label(plugin.as_ref()), key = %field.key, "store key overwritten");
            }
        }
    }
    Store::from_map(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::StoreField;
    use serde_json::json;

    struct Fields(Vec<StoreField>);

    impl Plugin for Fields {
        fn store_fields(&self) -> Vec<StoreField> {
            self.0.clone()
        }
    }

    struct Broken;

    impl Plugin for Broken {
        fn store_fields(&self) -> Vec<StoreField> {
            panic!("cannot declare")
        }
    }

    #[test]
    fn scopes_are_split() {
        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(Fields(vec![
            StoreField::global("count", 0),
            StoreField::connection("name", "anon"),
        ]))];
        let global = compose_global_store(&plugins);
        let local = compose_connection_store(&plugins);
        assert_eq!(global.keys(), vec!["count"]);
        assert_eq!(local.keys(), vec!["name"]);
        assert_eq!(local.get("name"), Some(json!("anon")));
    }

    #[test]
    fn later_plugin_overwrites_key() {
        let plugins: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(Fields(vec![StoreField::global("count", 0)])),
            Arc::new(Fields(vec![StoreField::global("count", 10)])),
        ];
        assert_eq!(compose_global_store(&plugins).get("count"), Some(json!(10)));
    }

    #[test]
    fn each_connection_store_is_fresh() {
        let plugins: Vec<Arc<dyn Plugin>> =
            vec![Arc::new(Fields(vec![StoreField::connection("hits", 0)]))];
        let first = compose_connection_store(&plugins);
        let second = compose_connection_store(&plugins);
        let _ = first.increment("hits", 3);
        assert_eq!(first.get("hits"), Some(json!(3)));
        assert_eq!(second.get("hits"), Some(json!(0)));
        assert!(!first.ptr_eq(&second));
    }

    #[test]
    fn panicking_declaration_is_skipped() {
        let plugins: Vec<Arc<dyn Plugin>> = vec![
            Arc::new(Broken),
            Arc::new(Fields(vec![StoreField::global("ok", true)])),
        ];
        assert_eq!(compose_global_store(&plugins).get("ok"), Some(json!(true)));
    }
}
