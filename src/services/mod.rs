//! Background services

pub mod proxy_flush;

pub use proxy_flush::{flush_blocking, ProxyFlushConfig, ProxyFlushHandle, ProxyFlushService};
