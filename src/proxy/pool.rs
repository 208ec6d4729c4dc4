//! Shared proxy pool with sticky per-worker selection
//!
//! Entries rotate round-robin and shrink as proxies fail. A pool that started
//! with proxies and drains to zero becomes exhausted; a pool that started empty
//! (or in direct mode) keeps running direct.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::persist::ProxyFileWriter;

/// Pool construction options
#[derive(Debug, Clone, Default)]
pub struct PoolOptions {
    /// Never hand out proxies (direct mode)
    pub ignore_proxies: bool,
    /// File rewritten with the surviving proxies
    pub file_path: Option<PathBuf>,
    /// Minimum time between file rewrites
    pub persist_debounce: Duration,
}

/// Sticky proxy binding owned by one worker.
///
/// Repeated [`ProxyPool::next`] calls with the same context return the same
/// proxy until it leaves the pool.
#[derive(Debug, Default)]
pub struct SelectionContext {
    current: Option<String>,
}

impl SelectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[derive(Debug)]
struct PoolState {
    entries: Vec<String>,
    cursor: usize,
    exhausted: bool,
    warned_empty: bool,
}

/// Proxy pool shared by all dispatch workers
#[derive(Debug)]
pub struct ProxyPool {
    state: Mutex<PoolState>,
    ignore_proxies: bool,
    initial_count: usize,
    writer: Option<ProxyFileWriter>,
    write_wanted: Notify,
}

impl ProxyPool {
    pub fn new(proxies: Vec<String>, options: PoolOptions) -> Self {
        let initial_count = proxies.len();
        let writer = options
            .file_path
            .map(|path| ProxyFileWriter::new(path, options.persist_debounce));

        Self {
            state: Mutex::new(PoolState {
                warned_empty: proxies.is_empty(),
                entries: proxies,
                cursor: 0,
                exhausted: false,
            }),
            ignore_proxies: options.ignore_proxies,
            initial_count,
            writer,
            write_wanted: Notify::new(),
        }
    }

    /// Pool that never hands out proxies
    pub fn direct() -> Self {
        Self::new(
            Vec::new(),
            PoolOptions {
                ignore_proxies: true,
                ..PoolOptions::default()
            },
        )
    }

    pub fn has_proxies(&self) -> bool {
        !self.ignore_proxies && !self.state.lock().entries.is_empty()
    }

    /// Direct connections are allowed only if the pool never had proxies to lose
    pub fn allow_direct_fallback(&self) -> bool {
        self.ignore_proxies || self.initial_count == 0
    }

    pub fn exhausted(&self) -> bool {
        self.state.lock().exhausted
    }

    pub fn is_direct(&self) -> bool {
        self.ignore_proxies
    }

    pub fn initial_count(&self) -> usize {
        self.initial_count
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current entries in rotation order
    pub fn snapshot(&self) -> Vec<String> {
        self.state.lock().entries.clone()
    }

    /// Pick the proxy for the calling worker.
    ///
    /// Returns the context's sticky proxy while it is still pooled, otherwise the
    /// next entry in round-robin order. `None` means send direct (or, when
    /// [`exhausted`](Self::exhausted), stop).
    pub fn next(&self, ctx: &mut SelectionContext) -> Option<String> {
        let mut state = self.state.lock();

        if let Some(current) = ctx.current.as_deref() {
            if state.entries.iter().any(|p| p == current) {
                return ctx.current.clone();
            }
            // Evicted by another worker since it was bound
            ctx.current = None;
        }

        if self.ignore_proxies || state.entries.is_empty() {
            return None;
        }

        let len = state.entries.len();
        let proxy = state.entries[state.cursor % len].clone();
        state.cursor = (state.cursor + 1) % len;

        ctx.current = Some(proxy.clone());
        Some(proxy)
    }

    /// Remove a failing proxy. Returns false if it was already gone.
    pub fn mark_bad(&self, proxy: &str, ctx: &mut SelectionContext) -> bool {
        if ctx.current() == Some(proxy) {
            ctx.clear();
        }

        {
            let mut state = self.state.lock();
            let Some(idx) = state.entries.iter().position(|p| p == proxy) else {
                debug!("Proxy {} already removed", proxy);
                return false;
            };

            state.entries.remove(idx);
            if idx < state.cursor {
                state.cursor -= 1;
            }
            let remaining = state.entries.len();
            state.cursor = if remaining == 0 {
                0
            } else {
                state.cursor % remaining
            };

            info!("Removed proxy {} ({} remaining)", proxy, remaining);

            if remaining == 0 {
                if !self.allow_direct_fallback() {
                    state.exhausted = true;
                    error!("Proxy list exhausted; stopping (no direct fallback)");
                } else if !state.warned_empty {
                    warn!("Proxy list is empty, running direct");
                    state.warned_empty = true;
                }
            }
        }

        // The file is written by the flush service, off the dispatch path
        if let Some(writer) = &self.writer {
            if writer.mark_dirty() {
                self.write_wanted.notify_one();
            }
        }
        true
    }

    /// Resolves once an eviction left a write that is already due
    pub async fn write_requested(&self) {
        self.write_wanted.notified().await;
    }

    /// Write deferred changes whose debounce window has passed
    pub fn flush_if_due(&self) -> bool {
        match &self.writer {
            Some(writer) => writer.flush_if_due(|| self.snapshot()),
            None => false,
        }
    }

    /// Write any deferred changes now
    pub fn flush(&self) -> bool {
        match &self.writer {
            Some(writer) => writer.flush(|| self.snapshot()),
            None => false,
        }
    }

    pub fn has_pending_write(&self) -> bool {
        self.writer.as_ref().is_some_and(|w| w.is_dirty())
    }
}
