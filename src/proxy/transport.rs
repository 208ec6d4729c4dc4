//! HTTP transport through upstream proxies
//!
//! The dispatch engine talks to a [`Transport`]; the reqwest implementation keeps
//! one client per route (proxy + TLS verification flag).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tracing::{debug, instrument};

use crate::error::{RawsendError, Result};
use crate::models::{Response, ResponseBody};

/// A fully resolved request ready for the wire
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    /// Merged headers, one entry per name
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Duration,
}

/// How a request leaves the process
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    /// Proxy URL, `None` for a direct connection
    pub proxy: Option<String>,
    pub verify_tls: bool,
}

impl Route {
    pub fn direct(verify_tls: bool) -> Self {
        Self {
            proxy: None,
            verify_tls,
        }
    }

    pub fn via(proxy: impl Into<String>, verify_tls: bool) -> Self {
        Self {
            proxy: Some(proxy.into()),
            verify_tls,
        }
    }

    /// Mode label used in request logs
    pub fn mode(&self) -> String {
        match (&self.proxy, self.verify_tls) {
            (Some(proxy), true) => format!("proxy={}", proxy),
            (Some(proxy), false) => format!("proxy={} insecure", proxy),
            (None, true) => "direct".to_string(),
            (None, false) => "direct-insecure".to_string(),
        }
    }
}

/// Sends one request over one route
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &OutboundRequest, route: &Route) -> Result<Response>;

    /// Release anything held for a proxy that left the pool
    fn forget(&self, _proxy: &str) {}
}

/// reqwest-backed transport with a client cache keyed by route
#[derive(Default)]
pub struct ReqwestTransport {
    clients: DashMap<Route, reqwest::Client>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, route: &Route) -> Result<reqwest::Client> {
        if let Some(client) = self.clients.get(route) {
            return Ok(client.value().clone());
        }

        let client = Self::build_client(route)?;
        Ok(self
            .clients
            .entry(route.clone())
            .or_insert(client)
            .value()
            .clone())
    }

    fn build_client(route: &Route) -> Result<reqwest::Client> {
        debug!("Building HTTP client for {}", route.mode());

        let mut builder = reqwest::Client::builder().danger_accept_invalid_certs(!route.verify_tls);

        builder = match &route.proxy {
            Some(proxy) => {
                let proxy = reqwest::Proxy::all(proxy.as_str())
                    .map_err(|e| RawsendError::InvalidProxyAddress(format!("{}: {}", proxy, e)))?;
                builder.proxy(proxy)
            }
            // Ignore HTTP(S)_PROXY from the environment for direct routes
            None => builder.no_proxy(),
        };

        builder
            .build()
            .map_err(|e| RawsendError::Transport(format!("failed to build client: {}", e)))
    }

    pub fn cached_clients(&self) -> usize {
        self.clients.len()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url, mode = %route.mode()))]
    async fn execute(&self, request: &OutboundRequest, route: &Route) -> Result<Response> {
        let client = self.client_for(route)?;

        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| RawsendError::InvalidRequest(format!("invalid method: {}", request.method)))?;
        let headers = header_map(&request.headers)?;

        let resp = client
            .request(method, request.url.as_str())
            .headers(headers)
            .body(request.body.clone())
            .timeout(request.timeout)
            .send()
            .await?;

        let status = resp.status();
        let url = resp.url().to_string();
        let headers = resp
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(RawsendError::from))
            .boxed();

        Ok(Response {
            status,
            url,
            headers,
            body: ResponseBody::Stream(body),
        })
    }

    fn forget(&self, proxy: &str) {
        self.clients
            .retain(|route, _| route.proxy.as_deref() != Some(proxy));
    }
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RawsendError::InvalidRequest(format!("invalid header name: {}", name)))?;
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            RawsendError::InvalidRequest(format!("invalid value for header {}", name))
        })?;
        map.append(header_name, header_value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_mode_labels() {
        assert_eq!(Route::via("http://p:1", true).mode(), "proxy=http://p:1");
        assert_eq!(
            Route::via("http://p:1", false).mode(),
            "proxy=http://p:1 insecure"
        );
        assert_eq!(Route::direct(true).mode(), "direct");
        assert_eq!(Route::direct(false).mode(), "direct-insecure");
    }

    #[test]
    fn test_header_map_rejects_invalid_names() {
        let ok = header_map(&[("X-Test".to_string(), "1, 2".to_string())]).unwrap();
        assert_eq!(ok.get("x-test").unwrap(), "1, 2");

        let err = header_map(&[("Bad Header".to_string(), "v".to_string())]).unwrap_err();
        assert!(matches!(err, RawsendError::InvalidRequest(_)));
    }

    #[test]
    fn test_clients_are_cached_per_route() {
        let transport = ReqwestTransport::new();
        let a = Route::via("http://127.0.0.1:3128", true);
        let b = Route::via("http://127.0.0.1:3128", false);

        transport.client_for(&a).unwrap();
        transport.client_for(&a).unwrap();
        transport.client_for(&b).unwrap();
        transport.client_for(&Route::direct(true)).unwrap();
        assert_eq!(transport.cached_clients(), 3);

        transport.forget("http://127.0.0.1:3128");
        assert_eq!(transport.cached_clients(), 1);
    }

    #[test]
    fn test_unusable_proxy_url_is_reported() {
        let transport = ReqwestTransport::new();
        let err = transport
            .client_for(&Route::via("not a proxy url", true))
            .unwrap_err();
        assert!(matches!(err, RawsendError::InvalidProxyAddress(_)));
    }
}
