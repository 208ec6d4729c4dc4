//! Batch orchestration
//!
//! Each batch reads every request file, sends them through a bounded set of
//! workers, then sleeps until the next batch. A worker keeps its sticky proxy
//! binding across files and batches.

mod check;
mod summary;

pub use check::run_check;
pub use summary::{print_summary, render_summary, summary_rows};

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::Result;
use crate::models::Metrics;
use crate::placeholder::PlaceholderResolver;
use crate::proxy::{
    load_proxies, DispatchConfig, Dispatcher, PoolOptions, ProxyPool, SelectionContext, Transport,
};
use crate::request::{parse_raw_request, DirectiveRegistry, PostSendAction};
use crate::services::{flush_blocking, ProxyFlushConfig, ProxyFlushHandle, ProxyFlushService};
use crate::sink::{ResponseSink, SinkTarget};

/// Options that come from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Ignore the proxy file
    pub direct: bool,
    /// `--response [FILE]`
    pub response: Option<Option<String>>,
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// The requests folder had no request files
    NoRequests,
    /// Every proxy failed and direct fallback was not allowed
    Exhausted,
    /// Ctrl+C or SIGTERM
    Interrupted,
}

/// How a single batch finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed,
    Exhausted,
    Interrupted,
}

/// Sends request files through the proxy pool
pub struct Runner {
    requests_dir: PathBuf,
    interval: Duration,
    pool: Arc<ProxyPool>,
    resolver: PlaceholderResolver,
    dispatcher: Dispatcher,
    sink: ResponseSink,
    directives: DirectiveRegistry,
    metrics: Metrics,
    contexts: Vec<SelectionContext>,
}

impl Runner {
    pub fn new(
        config: &Config,
        pool: Arc<ProxyPool>,
        dispatcher: Dispatcher,
        sink: ResponseSink,
    ) -> Self {
        let workers = config.send.workers.max(1);
        Self {
            requests_dir: config.paths.requests_dir.clone(),
            interval: Duration::from_secs(config.send.interval_secs),
            pool,
            resolver: PlaceholderResolver::new(
                &config.paths.placeholders_dir,
                config.send.placeholder_rotation,
            ),
            dispatcher,
            sink,
            directives: DirectiveRegistry::new(),
            metrics: Metrics::new(),
            contexts: (0..workers).map(|_| SelectionContext::new()).collect(),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn pool(&self) -> &ProxyPool {
        &self.pool
    }

    /// Run batches until interrupted, out of proxies or out of request files
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<RunEnd> {
        loop {
            let files = request_files(&self.requests_dir).await?;
            if files.is_empty() {
                warn!(
                    "No *.txt request files found in {}, stopping",
                    self.requests_dir.display()
                );
                return Ok(RunEnd::NoRequests);
            }

            match self.run_batch(files, &shutdown).await {
                BatchOutcome::Completed => {}
                BatchOutcome::Exhausted => return Ok(RunEnd::Exhausted),
                BatchOutcome::Interrupted => return Ok(RunEnd::Interrupted),
            }

            debug!("Batch done, sleeping {}s", self.interval.as_secs());
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(RunEnd::Interrupted);
                    }
                }
            }
        }
    }

    /// Send every file once. Exhaustion stops workers from taking new files;
    /// an interrupt lets the batch finish and is reported afterwards.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn run_batch(
        &mut self,
        files: Vec<PathBuf>,
        shutdown: &watch::Receiver<bool>,
    ) -> BatchOutcome {
        let queue = Mutex::new(VecDeque::from(files));
        let exhausted = AtomicBool::new(false);

        let mut contexts = std::mem::take(&mut self.contexts);
        {
            let this = &*self;
            let workers = contexts
                .iter_mut()
                .map(|ctx| this.worker(&queue, &exhausted, ctx));
            futures::future::join_all(workers).await;
        }
        self.contexts = contexts;

        if exhausted.load(Ordering::SeqCst) {
            BatchOutcome::Exhausted
        } else if *shutdown.borrow() {
            BatchOutcome::Interrupted
        } else {
            BatchOutcome::Completed
        }
    }

    async fn worker(
        &self,
        queue: &Mutex<VecDeque<PathBuf>>,
        exhausted: &AtomicBool,
        ctx: &mut SelectionContext,
    ) {
        loop {
            if exhausted.load(Ordering::SeqCst) {
                break;
            }
            let Some(path) = queue.lock().pop_front() else {
                break;
            };

            let name = file_label(&path);
            match self.process_file(&path, ctx).await {
                Ok(()) => {}
                Err(e) if e.is_fatal_to_run() => {
                    self.metrics.record_error();
                    error!("{}. Terminating.", e);
                    exhausted.store(true, Ordering::SeqCst);
                    break;
                }
                Err(e) => {
                    self.metrics.record_error();
                    error!("Failed to send {}: {}", name, e);
                }
            }
        }
    }

    /// Read, fill placeholders, parse, send, dump and apply directives
    pub async fn process_file(&self, path: &Path, ctx: &mut SelectionContext) -> Result<()> {
        let raw = tokio::fs::read_to_string(path).await?;
        let text = self.resolver.replace(&raw).await?;
        let parsed = parse_raw_request(&text)?;

        let response = self
            .dispatcher
            .send_with_failover(&parsed, &self.pool, ctx)
            .await?;
        self.metrics.record_response(response.status.as_u16());

        if let Err(e) = self.sink.write(response).await {
            warn!("Failed to dump response for {}: {}", file_label(path), e);
        }

        for action in self.directives.actions(&parsed.meta) {
            match action {
                PostSendAction::Sleep(delay) => {
                    info!("Meta: sleeping for {:.3}s", delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Ok(())
    }
}

/// `*.txt` files in `dir`, sorted by name, without `example*` files.
/// The folder is created when missing.
pub async fn request_files(dir: &Path) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !is_request_file(&path) {
            continue;
        }
        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_request_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "txt")
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| !n.to_ascii_lowercase().starts_with("example"))
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Banner shown when the run would otherwise silently go direct
pub fn no_proxy_banner(source: &Path) -> String {
    let rule = "=".repeat(70);
    [
        rule.clone(),
        "  NO PROXIES FOUND - RUNNING DIRECT".to_string(),
        format!("  File: {}", source.display()),
        "  Add proxies or use --direct to skip the startup delay.".to_string(),
        rule,
    ]
    .join("\n")
}

/// Build the proxy pool for a run, warning (and pausing) when it is empty.
///
/// Returns `None` if the run was interrupted during the startup pause.
pub async fn build_pool(
    config: &Config,
    direct: bool,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<ProxyPool>> {
    let source = &config.paths.proxies_file;

    if direct {
        let ignored = if source.exists() {
            load_proxies(source)?.len()
        } else {
            0
        };
        if ignored > 0 {
            info!(
                "--direct enabled: ignoring {} proxies from {}",
                ignored,
                source.display()
            );
        }
        return Ok(Some(ProxyPool::direct()));
    }

    let proxies = load_proxies(source)?;
    let pool = ProxyPool::new(
        proxies,
        PoolOptions {
            ignore_proxies: false,
            file_path: Some(source.clone()),
            persist_debounce: config.persist_debounce(),
        },
    );

    if pool.has_proxies() {
        info!("Loaded proxies: {} (from {})", pool.len(), source.display());
        return Ok(Some(pool));
    }

    warn!("{}", no_proxy_banner(source));
    let grace = Duration::from_secs(config.proxy.no_proxy_grace_secs);
    if !grace.is_zero() {
        warn!(
            "Starting in {} seconds because proxies are missing...",
            grace.as_secs()
        );
        tokio::select! {
            _ = tokio::time::sleep(grace) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(None);
                }
            }
        }
    }
    Ok(Some(pool))
}

/// Full send loop: pool, flush service, batches, final flush and summary
pub async fn run(
    config: &Config,
    options: RunOptions,
    transport: Arc<dyn Transport>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<RunEnd> {
    let Some(pool) = build_pool(config, options.direct, &mut shutdown).await? else {
        info!("Interrupted before start");
        return Ok(RunEnd::Interrupted);
    };
    let pool = Arc::new(pool);

    info!(
        "Starting sender. Reading from {}",
        config.paths.requests_dir.display()
    );
    info!("Parallel workers: {}", config.send.workers);

    let (flush_handle, flush_shutdown) = ProxyFlushHandle::new();
    let flush_service = ProxyFlushService::new(
        pool.clone(),
        ProxyFlushConfig::for_debounce(config.persist_debounce()),
    );
    let flush_task = tokio::spawn(async move {
        flush_service.run(flush_shutdown).await;
    });

    let sink = ResponseSink::new(
        SinkTarget::from_flag(options.response, config),
        config.response.clone(),
    );
    if sink.enabled() {
        info!("Response dump enabled ({})", sink.describe());
    }

    let dispatcher = Dispatcher::new(transport, DispatchConfig::from_config(config));
    let mut runner = Runner::new(config, pool.clone(), dispatcher, sink);

    let end = runner.run(shutdown).await;
    match &end {
        Ok(RunEnd::Interrupted) => info!("Interrupted, exiting cleanly"),
        Ok(RunEnd::Exhausted) => error!("Proxy list exhausted. Terminating."),
        Ok(RunEnd::NoRequests) => {}
        Err(e) => error!("Run failed: {}", e),
    }

    flush_handle.shutdown();
    if let Err(e) = flush_task.await {
        error!("Proxy flush task failed: {}", e);
    }
    flush_blocking(&pool, true).await;

    print_summary(&runner.metrics().snapshot());
    end
}
