//! Graceful shutdown management

use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared exit signal for a recording session
///
/// Clones observe the same signal. Ctrl+C, a startup timeout and an
/// explicit [`ShutdownManager::trigger`] all end up cancelling the same
/// token, so every trigger takes the same teardown path.
#[derive(Debug, Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    /// Create a new shutdown manager with running state
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Spawn a Ctrl+C signal handler that triggers shutdown
    ///
    /// The task ends on its own once shutdown is triggered. Abort the
    /// returned handle to detach it earlier.
    pub fn spawn_signal_handler(&self) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => {
                    if result.is_ok() {
                        info!("Received shutdown signal (Ctrl+C)");
                        info!("Shutting down gracefully...");
                        token.cancel();
                    }
                }
                _ = token.cancelled() => {}
            }
        })
    }

    /// Request shutdown; repeated calls are no-ops
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Check if the process should continue running
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Wait until shutdown is requested
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The underlying token, for components that take one directly
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Sleep for a duration, but wake early if shutdown is triggered
    ///
    /// Returns false when woken by shutdown.
    pub async fn interruptible_sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.token.cancelled() => false,
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
