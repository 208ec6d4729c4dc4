//! One-shot proxy checking
//!
//! Fetches a known URL through every proxy and keeps the ones that answer 2xx.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;

use super::list::write_proxy_file;
use super::transport::{OutboundRequest, Route, Transport};

/// Proxy checker configuration
#[derive(Debug, Clone)]
pub struct ProxyCheckConfig {
    /// URL fetched through each proxy
    pub check_url: String,
    /// Timeout for each attempt
    pub timeout: Duration,
    /// Verify TLS on the first attempt (a failure retries without)
    pub verify_tls: bool,
    /// Max proxies checked at once
    pub workers: usize,
}

impl ProxyCheckConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            check_url: config.proxy.check_url.clone(),
            timeout: config.request_timeout(),
            verify_tls: config.send.verify_tls,
            workers: config.proxy.check_workers,
        }
    }
}

impl Default for ProxyCheckConfig {
    fn default() -> Self {
        Self {
            check_url: "https://httpbin.org/get".to_string(),
            timeout: Duration::from_secs(20),
            verify_tls: true,
            workers: 32,
        }
    }
}

/// Result for a single proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub proxy: String,
    pub ok: bool,
    pub detail: String,
}

/// Result of a whole check run
#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    /// Working proxies in their original file order
    pub good: Vec<String>,
    pub total: usize,
}

impl CheckReport {
    pub fn bad_count(&self) -> usize {
        self.total.saturating_sub(self.good.len())
    }
}

/// Checks proxies concurrently through a [`Transport`]
pub struct ProxyChecker {
    transport: Arc<dyn Transport>,
    config: ProxyCheckConfig,
}

impl ProxyChecker {
    pub fn new(transport: Arc<dyn Transport>, config: ProxyCheckConfig) -> Self {
        Self { transport, config }
    }

    /// Check every proxy, at most `workers` at a time
    pub async fn check_all(&self, proxies: &[String]) -> CheckReport {
        self.check_all_reporting(proxies, log_outcome).await
    }

    /// Like [`check_all`](Self::check_all), calling `on_result` as each check
    /// completes
    pub async fn check_all_reporting<F>(&self, proxies: &[String], on_result: F) -> CheckReport
    where
        F: FnMut(&CheckOutcome),
    {
        if proxies.is_empty() {
            warn!("No proxies to check");
            return CheckReport::default();
        }

        info!(
            "Checking {} proxies against {} (timeout={}s)...",
            proxies.len(),
            self.config.check_url,
            self.config.timeout.as_secs()
        );

        let worker_count = self.config.workers.clamp(1, proxies.len());

        let outcomes = futures::stream::iter(proxies)
            .map(|proxy| self.check_proxy(proxy))
            .buffer_unordered(worker_count)
            .inspect(on_result)
            .collect::<Vec<CheckOutcome>>()
            .await;

        let working: HashSet<&str> = outcomes
            .iter()
            .filter(|o| o.ok)
            .map(|o| o.proxy.as_str())
            .collect();

        let good: Vec<String> = proxies
            .iter()
            .filter(|p| working.contains(p.as_str()))
            .cloned()
            .collect();

        info!(
            "Proxy check finished: {} good / {} total",
            good.len(),
            proxies.len()
        );

        CheckReport {
            good,
            total: proxies.len(),
        }
    }

    /// Check one proxy, retrying once without TLS verification
    #[instrument(skip(self))]
    pub async fn check_proxy(&self, proxy: &str) -> CheckOutcome {
        let mut attempts = vec![self.config.verify_tls];
        if self.config.verify_tls {
            attempts.push(false);
        }

        let request = OutboundRequest {
            method: "GET".to_string(),
            url: self.config.check_url.clone(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: self.config.timeout,
        };

        let mut last_error = "unknown error".to_string();
        for verify_tls in attempts {
            let route = Route::via(proxy, verify_tls);
            match self.transport.execute(&request, &route).await {
                Ok(response) => {
                    let code = response.status.as_u16();
                    if response.status.is_success() {
                        let mode = if verify_tls { "verify" } else { "no-verify" };
                        return outcome(proxy, true, format!("HTTP {} ({})", code, mode));
                    }
                    return outcome(proxy, false, format!("HTTP {}", code));
                }
                Err(e) if e.is_tls() && verify_tls => {
                    debug!("TLS error via {}, retrying without verification", proxy);
                    last_error = format!("TLS error: {}", e);
                }
                Err(e) => {
                    last_error = e.to_string();
                    break;
                }
            }
        }

        outcome(proxy, false, last_error)
    }
}

fn log_outcome(outcome: &CheckOutcome) {
    if outcome.ok {
        info!("OK   {} ({})", outcome.proxy, outcome.detail);
    } else {
        error!("BAD  {} ({})", outcome.proxy, outcome.detail);
    }
}

fn outcome(proxy: &str, ok: bool, detail: String) -> CheckOutcome {
    CheckOutcome {
        proxy: proxy.to_string(),
        ok,
        detail,
    }
}

/// Replace the proxy file with the working proxies. Failures are logged.
pub fn save_report(report: &CheckReport, dest: &Path) -> bool {
    match write_proxy_file(dest, &report.good) {
        Ok(()) => {
            info!(
                "Updated proxy file {} with {} working proxies (removed {})",
                dest.display(),
                report.good.len(),
                report.bad_count()
            );
            true
        }
        Err(e) => {
            error!(
                "Failed to write proxy check results to {}: {}",
                dest.display(),
                e
            );
            false
        }
    }
}
