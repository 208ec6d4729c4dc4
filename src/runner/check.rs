//! `--check`: test every proxy once and keep only the working ones

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::proxy::health::save_report;
use crate::proxy::{load_proxies, CheckReport, ProxyCheckConfig, ProxyChecker, Transport};

/// Check the configured proxy file and rewrite it with the survivors.
///
/// Returns `None` when there was nothing to check.
pub async fn run_check(
    config: &Config,
    transport: Arc<dyn Transport>,
    direct: bool,
) -> Result<Option<CheckReport>> {
    let source = &config.paths.proxies_file;

    if direct {
        warn!("--check with --direct: no proxies to test");
        return Ok(None);
    }

    let proxies = load_proxies(source)?;
    if proxies.is_empty() {
        warn!("No proxies found in {}, nothing to check", source.display());
        return Ok(None);
    }

    let checker = ProxyChecker::new(transport, ProxyCheckConfig::from_config(config));
    info!("Loaded proxies: {} (from {})", proxies.len(), source.display());
    let report = checker.check_all(&proxies).await;
    save_report(&report, source);
    Ok(Some(report))
}
