use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{RawsendError, Result};
use crate::placeholder::PlaceholderRotation;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Where request templates, proxies, placeholders and dumps live
    pub paths: PathsConfig,
    /// Request dispatch settings
    pub send: SendConfig,
    /// Proxy pool and proxy check settings
    pub proxy: ProxyConfig,
    /// Response dump settings
    pub response: ResponseConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    /// Folder with `*.txt` raw request templates
    pub requests_dir: PathBuf,
    /// Proxy list file (one proxy per line)
    pub proxies_file: PathBuf,
    /// Folder with one value file per placeholder
    pub placeholders_dir: PathBuf,
    /// Folder for response dumps given by relative name
    pub responses_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SendConfig {
    /// Scheme used to build URLs from relative paths
    pub scheme: String,
    /// Overrides the Host header of every request when set
    pub default_host: Option<String>,
    /// Verify TLS certificates on the first attempt
    pub verify_tls: bool,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Lowercased header names stripped before sending
    pub skip_headers: HashSet<String>,
    /// Pause between batches in seconds
    pub interval_secs: u64,
    /// Number of parallel dispatch workers
    pub workers: usize,
    /// Placeholder rotation strategy
    pub placeholder_rotation: PlaceholderRotation,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// URL fetched through each proxy in check mode
    pub check_url: String,
    /// Max proxies checked concurrently
    pub check_workers: usize,
    /// Response statuses that get a proxy evicted
    pub drop_statuses: Vec<u16>,
    /// Minimum time between proxy file rewrites in milliseconds
    pub persist_debounce_ms: u64,
    /// Startup pause when no proxies were found, in seconds
    pub no_proxy_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ResponseConfig {
    /// Byte cap for dumped bodies (0 = unlimited)
    pub max_bytes: usize,
    /// Streaming chunk size in bytes
    pub chunk_size: usize,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Console output format (pretty, json)
    pub format: String,
    /// Folder for rotated log files
    pub dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            paths: PathsConfig {
                requests_dir: get_env_or("RAWSEND_REQUESTS_DIR", "requests").into(),
                proxies_file: get_env_or("RAWSEND_PROXIES_FILE", "proxies.txt").into(),
                placeholders_dir: get_env_or("RAWSEND_PLACEHOLDERS_DIR", "placeholders").into(),
                responses_dir: get_env_or("RAWSEND_RESPONSES_DIR", "responses").into(),
            },
            send: SendConfig {
                scheme: get_env_or("RAWSEND_SCHEME", "https"),
                default_host: get_env_opt("RAWSEND_DEFAULT_HOST"),
                verify_tls: parse_bool("RAWSEND_VERIFY_TLS", "true")?,
                timeout_secs: parse_num("RAWSEND_TIMEOUT_SECONDS", "20")?,
                skip_headers: split_list(&get_env_or("RAWSEND_SKIP_HEADERS", "content-length"))
                    .map(|h| h.to_ascii_lowercase())
                    .collect(),
                interval_secs: parse_num("RAWSEND_INTERVAL_SECONDS", "30")?,
                workers: parse_num::<usize>("RAWSEND_WORKERS", "10")?.max(1),
                placeholder_rotation: PlaceholderRotation::from_str(&get_env_or(
                    "RAWSEND_PLACEHOLDER_ROTATION",
                    "sequential",
                )),
            },
            proxy: ProxyConfig {
                check_url: get_env_or("RAWSEND_PROXY_CHECK_URL", "https://httpbin.org/get"),
                check_workers: parse_num::<usize>("RAWSEND_PROXY_CHECK_WORKERS", "32")?.max(1),
                drop_statuses: split_list(&get_env_or("RAWSEND_PROXY_DROP_STATUSES", "407"))
                    .map(|s| {
                        s.parse::<u16>().map_err(|_| {
                            RawsendError::InvalidConfig(format!(
                                "RAWSEND_PROXY_DROP_STATUSES contains an invalid status: {}",
                                s
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
                persist_debounce_ms: parse_num("RAWSEND_PROXY_PERSIST_DEBOUNCE_MS", "2000")?,
                no_proxy_grace_secs: parse_num("RAWSEND_NO_PROXY_GRACE_SECONDS", "10")?,
            },
            response: ResponseConfig {
                max_bytes: parse_num("RAWSEND_RESPONSE_MAX_BYTES", "1048576")?,
                chunk_size: parse_num::<usize>("RAWSEND_RESPONSE_CHUNK_SIZE", "8192")?.max(1),
            },
            log: LogConfig {
                level: get_env_or("RAWSEND_LOG_LEVEL", "info"),
                format: get_env_or("RAWSEND_LOG_FORMAT", "pretty"),
                dir: get_env_or("RAWSEND_LOG_DIR", "logs").into(),
            },
        })
    }

    /// Request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.send.timeout_secs)
    }

    /// Proxy file write debounce as a duration
    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.proxy.persist_debounce_ms)
    }

    /// Resolve a `--response` file name against the responses folder
    pub fn response_path(&self, name: &str) -> PathBuf {
        let candidate = PathBuf::from(name);
        if candidate.is_absolute() {
            candidate
        } else {
            self.paths.responses_dir.join(candidate)
        }
    }
}

#[cfg(test)]
impl Config {
    /// Defaults rooted in `root`, independent of the process environment
    pub(crate) fn rooted_at(root: &std::path::Path) -> Self {
        Config {
            paths: PathsConfig {
                requests_dir: root.join("requests"),
                proxies_file: root.join("proxies.txt"),
                placeholders_dir: root.join("placeholders"),
                responses_dir: root.join("responses"),
            },
            send: SendConfig {
                scheme: "https".to_string(),
                default_host: None,
                verify_tls: true,
                timeout_secs: 5,
                skip_headers: ["content-length".to_string()].into_iter().collect(),
                interval_secs: 0,
                workers: 2,
                placeholder_rotation: PlaceholderRotation::Sequential,
            },
            proxy: ProxyConfig {
                check_url: "https://check.test/".to_string(),
                check_workers: 4,
                drop_statuses: vec![407],
                persist_debounce_ms: 0,
                no_proxy_grace_secs: 0,
            },
            response: ResponseConfig {
                max_bytes: 0,
                chunk_size: 8192,
            },
            log: LogConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                dir: root.join("logs"),
            },
        }
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get environment variable, treating blank values as unset
fn get_env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_num<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| RawsendError::InvalidConfig(format!("{} must be a valid number", key)))
}

fn parse_bool(key: &str, default: &str) -> Result<bool> {
    match get_env_or(key, default).trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RawsendError::InvalidConfig(format!(
            "{} must be a boolean",
            key
        ))),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}
