//! Graceful shutdown for a listening hub.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::server::ListenHandle;

/// Time allowed for connections to close before the server task is aborted.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the token passed to [`Hub::listen`](crate::Hub::listen).
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token to hand to the listener.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown was signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown and wait for the server to drain.
    ///
    /// Aborts the server task if it is still running after `timeout`
    /// (default 10s). Returns `true` when it stopped on its own.
    pub async fn drain(&self, handle: ListenHandle, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.shutdown();
        info!(
            addr = %handle.local_addr(),
            timeout_secs = timeout.as_secs(),
            "draining connections"
        );
        let mut task = handle.into_task();
        if tokio::time::timeout(timeout, &mut task).await.is_ok() {
            true
        } else {
            warn!("drain timed out after {timeout:?}, aborting server");
            task.abort();
            false
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
