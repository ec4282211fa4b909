//! Connection-ID allocation.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use huddle_core::ConnectionId;
use tracing::debug;

use crate::plugin::errors::HookError;
use crate::plugin::pipeline::log_hook_failure;
use crate::plugin::{HookKind, Plugin, panic_message, plugin_label};
use crate::websocket::connection::PendingConnection;
use crate::websocket::registry::ConnectionRegistry;

/// Pick the ID a pending connection will be admitted under.
///
/// Plugins are consulted in registration order. The first proposal that is
/// non-empty and not held by a live connection wins. Failed, panicking, empty
/// or colliding proposals are skipped, and `default_id` is used when none
/// qualifies.
///
/// The liveness check is advisory: the registry insert that follows is the
/// authority on uniqueness.
pub fn allocate_connection_id(
    plugins: &[Arc<dyn Plugin>],
    pending: &PendingConnection,
    default_id: ConnectionId,
    registry: &ConnectionRegistry,
) -> ConnectionId {
    for plugin in plugins {
        let proposal = catch_unwind(AssertUnwindSafe(|| {
            plugin.custom_connection_id(pending, &default_id)
        }));
        let candidate = match proposal {
            Ok(Ok(Some(candidate))) => candidate,
            Ok(Ok(None)) => continue,
            Ok(Err(error)) => {
                log_hook_failure(plugin.as_ref(), HookKind::CustomId, &error);
                continue;
            }
            Err(panic) => {
                let error = HookError::Panicked {
                    message: panic_message(panic.as_ref()),
                };
                log_hook_failure(plugin.as_ref(), HookKind::CustomId, &error);
                continue;
            }
        };
        if candidate.is_empty() {
            continue;
        }
        if registry.contains(&candidate) {
            debug!(plugin = plugin_label(plugin.as_ref()), id = %candidate, "proposed connection id already live");
            continue;
        }
        return ConnectionId::from(candidate);
    }
    default_id
}
