//! Proxy list file loading and line normalization

use std::path::Path;

use tracing::{debug, warn};
use url::Url;

use crate::error::Result;

/// Normalize one proxy file line into `scheme://[user:pass@]host:port`.
///
/// Returns `None` for blank lines, `#` comments and lines that do not
/// produce a usable proxy URL.
pub fn normalize_proxy_line(line: &str) -> Option<String> {
    let raw = line.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }

    let token = raw.split_whitespace().next()?;

    let normalized = if token.contains("://") {
        token.to_string()
    } else if token.contains('@') {
        format!("http://{}", token)
    } else {
        let parts: Vec<&str> = token.split(':').collect();
        match parts.as_slice() {
            [host, port, user, password, ..] => {
                format!("http://{}:{}@{}:{}", user, password, host, port)
            }
            [host, port] => format!("http://{}:{}", host, port),
            _ => format!("http://{}", token),
        }
    };

    match Url::parse(&normalized) {
        Ok(url) if url.host_str().is_some_and(|h| !h.is_empty()) => Some(normalized),
        Ok(_) => {
            debug!("Dropping proxy line without a host: {}", raw);
            None
        }
        Err(e) => {
            debug!("Dropping malformed proxy line {}: {}", raw, e);
            None
        }
    }
}

/// Parse proxy file contents, keeping file order
pub fn parse_proxy_list(contents: &str) -> Vec<String> {
    contents.lines().filter_map(normalize_proxy_line).collect()
}

/// Load proxies from a file. A missing file yields an empty list.
pub fn load_proxies(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        warn!("Proxy file not found: {}", path.display());
        return Ok(Vec::new());
    }

    let contents = std::fs::read_to_string(path)?;
    Ok(parse_proxy_list(&contents))
}

/// Serialize proxies the way the proxy file stores them
pub fn render_proxy_list(proxies: &[String]) -> String {
    let mut data = proxies.join("\n");
    if !proxies.is_empty() {
        data.push('\n');
    }
    data
}

/// Overwrite the proxy file with `proxies`, creating parent folders
pub fn write_proxy_file(path: &Path, proxies: &[String]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, render_proxy_list(proxies))?;
    Ok(())
}
