//! Ordered, fail-open execution of plugin hooks.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use huddle_core::Payload;
use tracing::warn;

use crate::hub::Hub;
use crate::plugin::errors::{HookError, HookResult};
use crate::plugin::{HookKind, Plugin, panic_message, plugin_label};
use crate::websocket::connection::{Connection, PendingConnection};

/// Runs each lifecycle hook across all plugins in registration order.
///
/// Every hook call is bounded by `hook_timeout` and shielded from panics.
/// A failure is logged with the plugin's label and the next plugin still
/// runs. Each `run_*` returns how many hooks failed.
pub struct PluginPipeline {
    plugins: Vec<Arc<dyn Plugin>>,
    hook_timeout: Duration,
}

impl PluginPipeline {
    /// Create a pipeline over `plugins`.
    pub fn new(plugins: Vec<Arc<dyn Plugin>>, hook_timeout: Duration) -> Self {
        Self {
            plugins,
            hook_timeout,
        }
    }

    /// Plugins in registration order.
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// Number of plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether there are no plugins.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Per-hook time budget.
    pub fn hook_timeout(&self) -> Duration {
        self.hook_timeout
    }

    /// Run every `init` hook.
    pub async fn run_init(&self, hub: &Hub) -> usize {
        let mut failures = 0;
        for plugin in &self.plugins {
            if !self.guard(plugin.as_ref(), HookKind::Init, plugin.init(hub)).await {
                failures += 1;
            }
        }
        failures
    }

    /// Run every `on_pre_ready` hook.
    pub async fn run_pre_ready(&self, pending: &PendingConnection, hub: &Hub) -> usize {
        let mut failures = 0;
        for plugin in &self.plugins {
            let fut = plugin.on_pre_ready(pending, hub);
            if !self.guard(plugin.as_ref(), HookKind::PreReady, fut).await {
                failures += 1;
            }
        }
        failures
    }

    /// Run every `on_open` hook.
    pub async fn run_open(&self, connection: &Connection, hub: &Hub) -> usize {
        let mut failures = 0;
        for plugin in &self.plugins {
            let fut = plugin.on_open(connection, hub);
            if !self.guard(plugin.as_ref(), HookKind::Open, fut).await {
                failures += 1;
            }
        }
        failures
    }

    /// Run every `on_message` hook.
    pub async fn run_message(&self, connection: &Connection, payload: &Payload, hub: &Hub) -> usize {
        let mut failures = 0;
        for plugin in &self.plugins {
            let fut = plugin.on_message(connection, payload, hub);
            if !self.guard(plugin.as_ref(), HookKind::Message, fut).await {
                failures += 1;
            }
        }
        failures
    }

    /// Run every `on_close` hook.
    pub async fn run_close(&self, connection: &Connection, hub: &Hub) -> usize {
        let mut failures = 0;
        for plugin in &self.plugins {
            let fut = plugin.on_close(connection, hub);
            if !self.guard(plugin.as_ref(), HookKind::Close, fut).await {
                failures += 1;
            }
        }
        failures
    }

    /// Await one hook under the timeout and panic guard. Returns `true` on success.
    async fn guard<F>(&self, plugin: &dyn Plugin, hook: HookKind, fut: F) -> bool
    where
        F: Future<Output = HookResult>,
    {
        let outcome = tokio::time::timeout(self.hook_timeout, AssertUnwindSafe(fut).catch_unwind()).await;
        let error = match outcome {
            Ok(Ok(Ok(()))) => return true,
            Ok(Ok(Err(error))) => error,
            Ok(Err(panic)) => HookError::Panicked {
                message: panic_message(panic.as_ref()),
            },
            Err(_elapsed) => HookError::TimedOut {
                timeout_ms: u64::try_from(self.hook_timeout.as_millis()).unwrap_or(u64::MAX),
            },
        };
        log_hook_failure(plugin, hook, &error);
        false
    }
}

/// Log a hook failure in the shape every hook kind shares.
pub(crate) fn log_hook_failure(plugin: &dyn Plugin, hook: HookKind, error: &HookError) {
    warn!(plugin = plugin_label(plugin), %hook, %error, "plugin hook failed, continuing");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use huddle_core::Store;
    use parking_lot::Mutex;

    use crate::websocket::connection::RequestInfo;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> Option<&str> {
            Some(self.name)
        }

        async fn on_pre_ready(&self, _pending: &PendingConnection, _hub: &Hub) -> HookResult {
            self.log.lock().push(format!("{}:pre_ready", self.name));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Plugin for Failing {
        async fn on_pre_ready(&self, _pending: &PendingConnection, _hub: &Hub) -> HookResult {
            Err(HookError::failed("rejected"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Plugin for Panicking {
        async fn on_pre_ready(&self, _pending: &PendingConnection, _hub: &Hub) -> HookResult {
            panic!("pre-ready exploded");
        }
    }

    struct Slow;

    #[async_trait]
    impl Plugin for Slow {
        async fn on_pre_ready(&self, _pending: &PendingConnection, _hub: &Hub) -> HookResult {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn pending() -> PendingConnection {
        PendingConnection::new("/", RequestInfo::default(), Store::new())
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Plugin> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PluginPipeline::new(
            vec![recorder("a", &log), recorder("b", &log), recorder("c", &log)],
            Duration::from_secs(1),
        );
        let hub = Hub::builder().build().await;
        assert_eq!(pipeline.run_pre_ready(&pending(), &hub).await, 0);
        assert_eq!(*log.lock(), vec!["a:pre_ready", "b:pre_ready", "c:pre_ready"]);
    }

    #[tokio::test]
    async fn error_and_panic_do_not_stop_later_plugins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PluginPipeline::new(
            vec![Arc::new(Failing), Arc::new(Panicking), recorder("after", &log)],
            Duration::from_secs(1),
        );
        let hub = Hub::builder().build().await;
        assert_eq!(pipeline.run_pre_ready(&pending(), &hub).await, 2);
        assert_eq!(*log.lock(), vec!["after:pre_ready"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_hook_times_out() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PluginPipeline::new(
            vec![Arc::new(Slow), recorder("after", &log)],
            Duration::from_millis(50),
        );
        let hub = Hub::builder().build().await;
        assert_eq!(pipeline.run_pre_ready(&pending(), &hub).await, 1);
        assert_eq!(*log.lock(), vec!["after:pre_ready"]);
    }

    #[tokio::test]
    async fn empty_pipeline_is_a_no_op() {
        let pipeline = PluginPipeline::new(Vec::new(), Duration::from_secs(1));
        let hub = Hub::builder().build().await;
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.run_init(&hub).await, 0);
        assert_eq!(pipeline.run_pre_ready(&pending(), &hub).await, 0);
    }
}
