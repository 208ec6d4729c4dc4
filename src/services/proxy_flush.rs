//! Proxy file flush service
//!
//! Evictions only mark the proxy file dirty. This service writes it on a
//! blocking thread, right away when a write is due and otherwise once the
//! debounce window has passed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::proxy::ProxyPool;

/// Proxy flush service configuration
#[derive(Debug, Clone)]
pub struct ProxyFlushConfig {
    /// How often pending writes are checked
    pub check_interval: Duration,
}

impl ProxyFlushConfig {
    /// Check twice per debounce window, never more often than every 100ms
    pub fn for_debounce(debounce: Duration) -> Self {
        Self {
            check_interval: (debounce / 2).max(Duration::from_millis(100)),
        }
    }
}

impl Default for ProxyFlushConfig {
    fn default() -> Self {
        Self::for_debounce(Duration::from_secs(2))
    }
}

/// Writes deferred proxy file changes in the background
pub struct ProxyFlushService {
    pool: Arc<ProxyPool>,
    config: ProxyFlushConfig,
}

impl ProxyFlushService {
    pub fn new(pool: Arc<ProxyPool>, config: ProxyFlushConfig) -> Self {
        Self { pool, config }
    }

    /// Run until shutdown, then write whatever is still pending
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting proxy flush service ({}ms interval)",
            self.config.check_interval.as_millis()
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.pool.write_requested() => {}
                changed = shutdown.changed() => {
                    // A dropped handle counts as shutdown
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if flush_blocking(&self.pool, false).await {
                debug!("Flushed proxy file changes");
            }
        }

        if flush_blocking(&self.pool, true).await {
            info!("Proxy file flushed on shutdown");
        }
        info!("Proxy flush service shutting down");
    }
}

/// Run a pool flush on the blocking pool. `force` ignores the debounce window.
pub async fn flush_blocking(pool: &Arc<ProxyPool>, force: bool) -> bool {
    let pool = pool.clone();
    let result = tokio::task::spawn_blocking(move || {
        if force {
            pool.flush()
        } else {
            pool.flush_if_due()
        }
    })
    .await;

    match result {
        Ok(written) => written,
        Err(e) => {
            error!("Proxy file flush task failed: {}", e);
            false
        }
    }
}

/// Handle for managing the proxy flush service
pub struct ProxyFlushHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ProxyFlushHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for ProxyFlushHandle {
    fn default() -> Self {
        Self::new().0
    }
}
