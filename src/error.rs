use std::error::Error as StdError;

use thiserror::Error;

/// Unified error type for rawsend
#[derive(Error, Debug)]
pub enum RawsendError {
    // Request template errors
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Placeholder '{name}' not found")]
    PlaceholderNotFound { name: String },

    #[error("Placeholder '{name}' has no values")]
    PlaceholderEmpty { name: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Host header is missing and no default host is configured")]
    MissingHost,

    // Proxy errors
    #[error("Proxy list exhausted")]
    ProxyExhausted,

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    // Transport errors
    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for rawsend operations
pub type Result<T> = std::result::Result<T, RawsendError>;

impl RawsendError {
    /// TLS/certificate verification failure (eligible for one downgrade retry)
    pub fn is_tls(&self) -> bool {
        matches!(self, RawsendError::Tls(_))
    }

    /// Failure that a different proxy might not hit
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            RawsendError::Tls(_)
                | RawsendError::Transport(_)
                | RawsendError::Timeout
                | RawsendError::InvalidProxyAddress(_)
        )
    }

    /// Errors that end the whole run rather than a single request
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, RawsendError::ProxyExhausted)
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for RawsendError {
    fn from(err: url::ParseError) -> Self {
        RawsendError::InvalidProxyAddress(err.to_string())
    }
}

// Convert from reqwest errors, sorting TLS failures out of the generic bucket
impl From<reqwest::Error> for RawsendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return RawsendError::Timeout;
        }
        if err.is_builder() {
            return RawsendError::InvalidRequest(err.to_string());
        }
        // The URL stays out of both the message and the classification
        let err = err.without_url();
        let detail = error_chain(&err);
        if tls_failure_in_sources(&err) {
            RawsendError::Tls(detail)
        } else {
            RawsendError::Transport(detail)
        }
    }
}

/// Flatten an error and all of its sources into one line
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}

/// Look for a TLS failure below the top-level error.
///
/// A plain socket error (refused, reset, unreachable) anywhere in the chain
/// rules TLS out.
fn tls_failure_in_sources(err: &dyn StdError) -> bool {
    let mut tls = false;
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if is_socket_failure(io.kind()) {
                return false;
            }
        }
        tls |= looks_like_tls_failure(&inner.to_string());
        source = inner.source();
    }
    tls
}

fn is_socket_failure(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    matches!(
        kind,
        ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | AddrNotAvailable
    )
}

fn looks_like_tls_failure(detail: &str) -> bool {
    let lower = detail.to_ascii_lowercase();
    ["certificate", "tls", "ssl", "handshake"]
        .iter()
        .any(|needle| lower.contains(needle))
}
