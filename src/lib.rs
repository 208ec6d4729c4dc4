//! rawsend - raw HTTP request replayer
//!
//! Replays hand-written raw HTTP request files on an interval through a
//! self-healing pool of rotating proxies.
//!
//! ## Features
//!
//! - Raw HTTP/1.x request lines and HTTP/2-style pseudo-header blocks
//! - `{name}` placeholders filled from per-name value files
//! - Sticky per-worker proxy selection with failover and eviction
//! - Evicted proxies removed from the proxy file (debounced)
//! - One-shot TLS downgrade retry
//! - Streamed response dumps to the console or a file
//! - `--check` mode that prunes dead proxies

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod placeholder;
pub mod proxy;
pub mod request;
pub mod runner;
pub mod services;
pub mod sink;

pub use config::Config;
pub use error::{RawsendError, Result};
