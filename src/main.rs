//! rawsend - Entry Point
//!
//! Replays request files until interrupted, or checks the proxy list with `--check`.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use rawsend::cli::Cli;
use rawsend::config::Config;
use rawsend::logging;
use rawsend::proxy::{ReqwestTransport, Transport};
use rawsend::runner::{self, RunOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(workers) = cli.workers {
        config.send.workers = usize::from(workers);
    }
    if let Some(path) = cli.proxy_file.clone() {
        config.paths.proxies_file = path;
    }

    // Keep the guard until exit so file logs are flushed
    let _log_guard = logging::init(&config.log);

    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new());

    if cli.check {
        runner::run_check(&config, transport, cli.direct)
            .await
            .context("Proxy check failed")?;
        return Ok(());
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let options = RunOptions {
        direct: cli.direct,
        response: cli.response,
    };
    let end = runner::run(&config, options, transport, shutdown_rx)
        .await
        .context("Run failed")?;

    info!("rawsend stopped ({:?})", end);
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
