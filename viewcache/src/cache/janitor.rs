//! Background expiry sweeper for the fast tier.
//!
//! Entries past their fail-safe horizon are unreadable but still occupy
//! memory until something touches their key; the janitor reclaims them on a
//! fixed interval so an idle process does not hold dead payloads.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::memory::MemoryCache;

/// Handle to the background sweep task.
///
/// Shut down with [`CacheJanitor::shutdown`] for a clean join; dropping the
/// handle aborts the task instead.
pub struct CacheJanitor {
    handle: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl CacheJanitor {
    /// Spawn the sweep task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(memory: Arc<MemoryCache>, interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            debug!(interval_secs = interval.as_secs(), "cache janitor started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("cache janitor shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let swept = memory.sweep_expired();
                        if swept > 0 {
                            debug!(swept, "dropped expired cache entries");
                        }
                    }
                }
            }
        });

        Self {
            handle: Some(handle),
            shutdown,
        }
    }

    /// Signal the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for CacheJanitor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shutdown.cancel();
            handle.abort();
        }
    }
}
