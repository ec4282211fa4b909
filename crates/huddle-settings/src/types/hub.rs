//! Hub behaviour settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hub behaviour settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Whether the transport echoes publications back to the publisher.
    ///
    /// When `false` the broadcast engine delivers the publisher's own copy
    /// with a direct send, so every subscriber still receives it once.
    pub publish_to_self: bool,
    /// Upper bound on a single async plugin hook, in milliseconds.
    pub hook_timeout_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            publish_to_self: false,
            hook_timeout_ms: 30_000,
        }
    }
}

impl HubSettings {
    /// Hook timeout as a [`Duration`].
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }
}
