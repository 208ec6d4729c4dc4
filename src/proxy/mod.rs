//! Proxy handling
//!
//! This module provides:
//! - Proxy list loading and normalization
//! - The shared proxy pool with sticky selection and debounced persistence
//! - The transport abstraction and its reqwest implementation
//! - Failover-aware request dispatch
//! - One-shot proxy checking

pub mod dispatch;
pub mod health;
pub mod list;
pub mod persist;
pub mod pool;
pub mod transport;

pub use dispatch::{build_headers, resolve_url, DispatchConfig, Dispatcher};
pub use health::{CheckOutcome, CheckReport, ProxyCheckConfig, ProxyChecker};
pub use list::{load_proxies, normalize_proxy_line};
pub use pool::{PoolOptions, ProxyPool, SelectionContext};
pub use transport::{OutboundRequest, ReqwestTransport, Route, Transport};
