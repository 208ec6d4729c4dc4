//! Failover-aware request dispatch
//!
//! One outer loop walks the proxy pool, one inner loop retries the current route
//! with TLS verification turned off after a certificate failure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::error::{RawsendError, Result};
use crate::models::{ParsedRequest, Response};

use super::pool::{ProxyPool, SelectionContext};
use super::transport::{OutboundRequest, Route, Transport};

/// Settings that shape every outgoing request
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub scheme: String,
    /// Takes precedence over the parsed `Host` header
    pub default_host: Option<String>,
    pub verify_tls: bool,
    pub timeout: Duration,
    /// Lowercased header names never sent
    pub skip_headers: HashSet<String>,
    /// Statuses that get the answering proxy evicted
    pub drop_statuses: Vec<u16>,
}

impl DispatchConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scheme: config.send.scheme.clone(),
            default_host: config.send.default_host.clone(),
            verify_tls: config.send.verify_tls,
            timeout: config.request_timeout(),
            skip_headers: config.send.skip_headers.clone(),
            drop_statuses: config.proxy.drop_statuses.clone(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            default_host: None,
            verify_tls: true,
            timeout: Duration::from_secs(20),
            skip_headers: HashSet::from(["content-length".to_string()]),
            drop_statuses: vec![407],
        }
    }
}

/// Sends parsed requests through the proxy pool
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: DispatchConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Resolve URL and headers for the wire
    pub fn prepare(&self, parsed: &ParsedRequest) -> Result<OutboundRequest> {
        Ok(OutboundRequest {
            method: parsed.method.clone(),
            url: resolve_url(
                parsed,
                &self.config.scheme,
                self.config.default_host.as_deref(),
            )?,
            headers: build_headers(&parsed.headers, &self.config.skip_headers),
            body: Bytes::from(parsed.body.clone()),
            timeout: self.config.timeout,
        })
    }

    /// Send `parsed`, rotating proxies until one answers.
    ///
    /// Fails with [`RawsendError::ProxyExhausted`] once the pool has lost its last
    /// proxy; in direct mode the transport error of the failed attempt is returned.
    #[instrument(skip_all, fields(method = %parsed.method, path = %parsed.path))]
    pub async fn send_with_failover(
        &self,
        parsed: &ParsedRequest,
        pool: &ProxyPool,
        ctx: &mut SelectionContext,
    ) -> Result<Response> {
        let request = self.prepare(parsed)?;

        loop {
            let proxy = pool.next(ctx);
            if proxy.is_none() && pool.exhausted() {
                return Err(RawsendError::ProxyExhausted);
            }

            let mut route = Route {
                proxy,
                verify_tls: self.config.verify_tls,
            };
            let mut downgraded = false;

            loop {
                match self.transport.execute(&request, &route).await {
                    Ok(response) => {
                        let status = response.status.as_u16();
                        if let Some(proxy) = route.proxy.as_deref() {
                            if self.config.drop_statuses.contains(&status) {
                                warn!(
                                    "Proxy {} returned HTTP {}; dropping and trying next",
                                    proxy, status
                                );
                                drop(response);
                                self.evict(proxy, pool, ctx)?;
                                break;
                            }
                        }

                        if downgraded && route.proxy.is_none() {
                            warn!("TLS verification disabled for this request (direct)");
                        }
                        info!(
                            "{} {} -> {} ({} bytes) via {}",
                            parsed.method,
                            parsed.path,
                            status,
                            response.size_hint(),
                            route.mode()
                        );
                        return Ok(response);
                    }
                    Err(e) if e.is_tls() && route.verify_tls && !downgraded => {
                        warn!(
                            "TLS error via {}; retrying without verification: {}",
                            route.proxy.as_deref().unwrap_or("direct"),
                            e
                        );
                        route.verify_tls = false;
                        downgraded = true;
                    }
                    Err(e) if e.is_transport_failure() => match route.proxy.as_deref() {
                        Some(proxy) => {
                            if downgraded {
                                error!(
                                    "Proxy failed ({}) after TLS retry, removing. Error: {}",
                                    proxy, e
                                );
                            } else {
                                error!("Proxy failed ({}), removing. Error: {}", proxy, e);
                            }
                            self.evict(proxy, pool, ctx)?;
                            break;
                        }
                        None => return Err(e),
                    },
                    Err(e) => return Err(e),
                }
            }
        }
    }

    fn evict(&self, proxy: &str, pool: &ProxyPool, ctx: &mut SelectionContext) -> Result<()> {
        pool.mark_bad(proxy, ctx);
        self.transport.forget(proxy);
        if pool.exhausted() {
            return Err(RawsendError::ProxyExhausted);
        }
        Ok(())
    }
}

/// Collapse the ordered header list into one entry per name.
///
/// Repeated `Cookie` values are joined with `"; "`, any other repeated header
/// with `", "`. The first occurrence decides casing and position.
pub fn build_headers(
    headers: &[(String, String)],
    skip_headers: &HashSet<String>,
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = Vec::with_capacity(headers.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (name, value) in headers {
        let key = name.to_ascii_lowercase();
        if skip_headers.contains(&key) {
            continue;
        }
        match seen.get(&key) {
            Some(&idx) => {
                let separator = if key == "cookie" { "; " } else { ", " };
                let existing = &mut merged[idx].1;
                existing.push_str(separator);
                existing.push_str(value);
            }
            None => {
                seen.insert(key, merged.len());
                merged.push((name.clone(), value.clone()));
            }
        }
    }

    merged
}

/// Absolute URL for the request.
///
/// Absolute paths are used verbatim; otherwise the host comes from
/// `default_host`, then the `Host` header.
pub fn resolve_url(
    parsed: &ParsedRequest,
    scheme: &str,
    default_host: Option<&str>,
) -> Result<String> {
    if parsed.has_absolute_url() {
        return Ok(parsed.path.clone());
    }

    let host = default_host
        .or_else(|| parsed.header("host"))
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(RawsendError::MissingHost)?;

    Ok(format!("{}://{}{}", scheme, host, parsed.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResponseBody;
    use crate::proxy::pool::PoolOptions;
    use async_trait::async_trait;
    use http::StatusCode;
    use parking_lot::Mutex;
    use tokio_test::{assert_err, assert_ok};

    type Responder = Box<dyn Fn(&Route) -> Result<Response> + Send + Sync>;

    /// Answers from a closure and records every route it was asked to use
    struct MockTransport {
        calls: Mutex<Vec<Route>>,
        forgotten: Mutex<Vec<String>>,
        respond: Responder,
    }

    impl MockTransport {
        fn new(respond: impl Fn(&Route) -> Result<Response> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                forgotten: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn modes(&self) -> Vec<String> {
            self.calls.lock().iter().map(Route::mode).collect()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn execute(&self, _request: &OutboundRequest, route: &Route) -> Result<Response> {
            self.calls.lock().push(route.clone());
            (self.respond)(route)
        }

        fn forget(&self, proxy: &str) {
            self.forgotten.lock().push(proxy.to_string());
        }
    }

    fn response(status: u16) -> Response {
        Response {
            status: StatusCode::from_u16(status).unwrap(),
            url: "https://example.com/".to_string(),
            headers: Vec::new(),
            body: ResponseBody::Buffered(Bytes::from_static(b"ok")),
        }
    }

    fn request() -> ParsedRequest {
        ParsedRequest {
            method: "GET".to_string(),
            path: "/".to_string(),
            headers: vec![("Host".to_string(), "example.com".to_string())],
            body: String::new(),
            meta: HashMap::new(),
        }
    }

    fn pool(items: &[&str]) -> ProxyPool {
        ProxyPool::new(
            items.iter().map(|s| s.to_string()).collect(),
            PoolOptions::default(),
        )
    }

    fn dispatcher(transport: Arc<MockTransport>) -> Dispatcher {
        Dispatcher::new(transport, DispatchConfig::default())
    }

    #[tokio::test]
    async fn test_drop_status_rotates_to_next_proxy() {
        let transport = MockTransport::new(|route| match route.proxy.as_deref() {
            Some("http://a:1") => Ok(response(407)),
            _ => Ok(response(200)),
        });
        let pool = pool(&["http://a:1", "http://b:2"]);
        let mut ctx = SelectionContext::new();

        let resp = assert_ok!(
            dispatcher(transport.clone())
                .send_with_failover(&request(), &pool, &mut ctx)
                .await
        );
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(
            transport.modes(),
            vec!["proxy=http://a:1", "proxy=http://b:2"]
        );
        assert_eq!(pool.snapshot(), vec!["http://b:2"]);
        assert_eq!(*transport.forgotten.lock(), vec!["http://a:1"]);
        assert_eq!(ctx.current(), Some("http://b:2"));
    }

    #[tokio::test]
    async fn test_other_error_statuses_keep_the_proxy() {
        let transport = MockTransport::new(|_| Ok(response(503)));
        let pool = pool(&["http://a:1"]);
        let mut ctx = SelectionContext::new();

        let resp = assert_ok!(
            dispatcher(transport)
                .send_with_failover(&request(), &pool, &mut ctx)
                .await
        );
        assert_eq!(resp.status.as_u16(), 503);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_tls_failure_downgrades_once_on_same_proxy() {
        let transport = MockTransport::new(|route| {
            if route.verify_tls {
                Err(RawsendError::Tls("invalid peer certificate".to_string()))
            } else {
                Ok(response(200))
            }
        });
        let pool = pool(&["http://a:1", "http://b:2"]);
        let mut ctx = SelectionContext::new();

        assert_ok!(
            dispatcher(transport.clone())
                .send_with_failover(&request(), &pool, &mut ctx)
                .await
        );
        assert_eq!(
            transport.modes(),
            vec!["proxy=http://a:1", "proxy=http://a:1 insecure"]
        );
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_tls_failure_after_downgrade_evicts_proxy() {
        let transport = MockTransport::new(|route| match route.proxy.as_deref() {
            Some("http://a:1") => Err(RawsendError::Tls("handshake failure".to_string())),
            _ => Ok(response(200)),
        });
        let pool = pool(&["http://a:1", "http://b:2"]);
        let mut ctx = SelectionContext::new();

        assert_ok!(
            dispatcher(transport.clone())
                .send_with_failover(&request(), &pool, &mut ctx)
                .await
        );
        assert_eq!(
            transport.modes(),
            vec![
                "proxy=http://a:1",
                "proxy=http://a:1 insecure",
                "proxy=http://b:2"
            ]
        );
        assert_eq!(pool.snapshot(), vec!["http://b:2"]);
    }

    #[tokio::test]
    async fn test_last_proxy_failing_exhausts_the_run() {
        let transport =
            MockTransport::new(|_| Err(RawsendError::Transport("connection refused".to_string())));
        let pool = pool(&["http://a:1", "http://b:2"]);
        let mut ctx = SelectionContext::new();
        let dispatcher = dispatcher(transport.clone());

        let err = assert_err!(
            dispatcher
                .send_with_failover(&request(), &pool, &mut ctx)
                .await
        );
        assert!(matches!(err, RawsendError::ProxyExhausted));
        assert!(pool.exhausted());
        assert_eq!(transport.calls.lock().len(), 2);

        // No further attempts once exhausted
        let err = assert_err!(
            dispatcher
                .send_with_failover(&request(), &pool, &mut ctx)
                .await
        );
        assert!(matches!(err, RawsendError::ProxyExhausted));
        assert_eq!(transport.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_direct_transport_failure_propagates() {
        let transport = MockTransport::new(|_| Err(RawsendError::Timeout));
        let pool = ProxyPool::direct();
        let mut ctx = SelectionContext::new();

        let err = assert_err!(
            dispatcher(transport.clone())
                .send_with_failover(&request(), &pool, &mut ctx)
                .await
        );
        assert!(matches!(err, RawsendError::Timeout));
        assert_eq!(transport.modes(), vec!["direct"]);
    }

    #[tokio::test]
    async fn test_direct_tls_downgrade() {
        let transport = MockTransport::new(|route| {
            if route.verify_tls {
                Err(RawsendError::Tls("certificate has expired".to_string()))
            } else {
                Ok(response(200))
            }
        });
        let pool = pool(&[]);
        let mut ctx = SelectionContext::new();

        assert_ok!(
            dispatcher(transport.clone())
                .send_with_failover(&request(), &pool, &mut ctx)
                .await
        );
        assert_eq!(transport.modes(), vec!["direct", "direct-insecure"]);
    }

    #[tokio::test]
    async fn test_direct_tls_failure_after_downgrade_propagates() {
        let transport =
            MockTransport::new(|_| Err(RawsendError::Tls("unknown issuer".to_string())));
        let pool = pool(&[]);
        let mut ctx = SelectionContext::new();

        let err = assert_err!(
            dispatcher(transport.clone())
                .send_with_failover(&request(), &pool, &mut ctx)
                .await
        );
        assert!(err.is_tls());
        assert_eq!(transport.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_host_fails_before_sending() {
        let transport = MockTransport::new(|_| Ok(response(200)));
        let pool = pool(&["http://a:1"]);
        let mut ctx = SelectionContext::new();
        let mut parsed = request();
        parsed.headers.clear();

        let err = assert_err!(
            dispatcher(transport.clone())
                .send_with_failover(&parsed, &pool, &mut ctx)
                .await
        );
        assert!(matches!(err, RawsendError::MissingHost));
        assert!(transport.calls.lock().is_empty());
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_sticky_proxy_reused_across_requests() {
        let transport = MockTransport::new(|_| Ok(response(200)));
        let pool = pool(&["http://a:1", "http://b:2"]);
        let mut ctx = SelectionContext::new();
        let dispatcher = dispatcher(transport.clone());

        for _ in 0..3 {
            assert_ok!(
                dispatcher
                    .send_with_failover(&request(), &pool, &mut ctx)
                    .await
            );
        }
        assert_eq!(
            transport.modes(),
            vec!["proxy=http://a:1"; 3]
        );
    }

    #[test]
    fn test_build_headers_merges_duplicates() {
        let headers: Vec<(String, String)> = [
            ("Cookie", "a=1"),
            ("X-Test", "1"),
            ("Content-Length", "10"),
            ("cookie", "b=2"),
            ("x-test", "2"),
        ]
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect();

        let merged = build_headers(&headers, &DispatchConfig::default().skip_headers);
        assert_eq!(
            merged,
            vec![
                ("Cookie".to_string(), "a=1; b=2".to_string()),
                ("X-Test".to_string(), "1, 2".to_string()),
            ]
        );
    }

    #[test]
    fn test_resolve_url() {
        let mut parsed = request();
        parsed.path = "/api?x=1".to_string();
        assert_eq!(
            resolve_url(&parsed, "https", None).unwrap(),
            "https://example.com/api?x=1"
        );
        assert_eq!(
            resolve_url(&parsed, "http", Some("override.test")).unwrap(),
            "http://override.test/api?x=1"
        );

        parsed.path = "HTTPS://abs.test/x".to_string();
        assert_eq!(
            resolve_url(&parsed, "http", Some("override.test")).unwrap(),
            "HTTPS://abs.test/x"
        );

        parsed.path = "/".to_string();
        parsed.headers = vec![("Host".to_string(), "  ".to_string())];
        assert!(matches!(
            resolve_url(&parsed, "https", None),
            Err(RawsendError::MissingHost)
        ));
    }
}
