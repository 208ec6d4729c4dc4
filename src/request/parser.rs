//! Raw request template parser
//!
//! Accepts classic `METHOD PATH HTTP/x.y` request lines as well as HTTP/2-style
//! pseudo-header blocks (`:method`, `:path`, `:scheme`, `:authority`), with optional
//! `# @key: value` metadata lines in front.

use std::collections::HashMap;

use crate::error::{RawsendError, Result};
use crate::models::{is_absolute_url, ParsedRequest};

/// Parse raw request text into a [`ParsedRequest`]
pub fn parse_raw_request(raw_text: &str) -> Result<ParsedRequest> {
    if raw_text.trim().is_empty() {
        return Err(parse_error("request text is empty"));
    }

    let (meta, rest) = split_preamble(raw_text);
    if rest.trim().is_empty() {
        return Err(parse_error("missing request line"));
    }

    let (head, body) = split_head_and_body(rest);
    let head = head.replace('\r', "");
    let mut lines = head.lines().map(str::trim).filter(|l| !l.is_empty());

    let first = lines
        .next()
        .ok_or_else(|| parse_error("missing request line"))?;

    let mut method = None;
    let mut path = None;
    let mut header_lines: Vec<&str> = Vec::new();

    match parse_request_line(first) {
        Some((m, p)) => {
            method = Some(m.to_string());
            path = Some(p.to_string());
        }
        None if first.contains(':') => header_lines.push(first),
        None => {
            return Err(parse_error(format!("cannot parse request line: {}", first)));
        }
    }
    header_lines.extend(lines);

    let mut headers: Vec<(String, String)> = Vec::new();
    let mut pseudo: HashMap<String, String> = HashMap::new();

    for line in header_lines {
        if let Some(stripped) = line.strip_prefix(':') {
            let (name, value) = stripped
                .split_once(':')
                .ok_or_else(|| parse_error(format!("invalid header format: {}", line)))?;
            pseudo.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            continue;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| parse_error(format!("invalid header format: {}", line)))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(parse_error(format!("invalid header format: {}", line)));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    let method = method
        .or_else(|| pseudo.get("method").cloned())
        .filter(|m| !m.is_empty());
    let path = path
        .or_else(|| pseudo.get("path").cloned())
        .filter(|p| !p.is_empty());

    let (method, mut path) = match (method, path) {
        (Some(method), Some(path)) => (method, path),
        _ => {
            return Err(parse_error(
                "missing method/path: expected a `METHOD PATH HTTP/x` request line \
                 or `:method` and `:path` pseudo-headers",
            ))
        }
    };

    if let Some(authority) = pseudo.get("authority") {
        let has_host = headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("host"));
        if !has_host {
            headers.push(("Host".to_string(), authority.clone()));
        }
        if let Some(scheme) = pseudo.get("scheme") {
            if !is_absolute_url(&path) {
                path = format!("{}://{}{}", scheme, authority, path);
            }
        }
    }

    Ok(ParsedRequest {
        method,
        path,
        headers,
        body: body.to_string(),
        meta,
    })
}

fn parse_error(message: impl Into<String>) -> RawsendError {
    RawsendError::Parse(message.into())
}

/// Split off leading metadata, comment and blank lines.
///
/// Returns the collected metadata and the text starting at the first real line.
fn split_preamble(raw_text: &str) -> (HashMap<String, String>, &str) {
    let mut meta = HashMap::new();
    let mut offset = 0;

    for line in raw_text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            offset += line.len();
            continue;
        }
        let Some(comment) = trimmed.strip_prefix('#') else {
            break;
        };
        if let Some((key, value)) = comment
            .trim_start()
            .strip_prefix('@')
            .and_then(|directive| directive.split_once(':'))
        {
            let key = key.trim();
            if !key.is_empty() {
                meta.insert(key.to_ascii_lowercase(), value.trim().to_string());
            }
        }
        offset += line.len();
    }

    (meta, &raw_text[offset..])
}

/// Split at the first empty line; the body keeps every byte after it.
fn split_head_and_body(text: &str) -> (&str, &str) {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(pos) = text[search_from..].find('\n') {
        let newline = search_from + pos;
        let after = newline + 1;
        match (bytes.get(after), bytes.get(after + 1)) {
            (Some(b'\n'), _) => return (&text[..newline], &text[after + 1..]),
            (Some(b'\r'), Some(b'\n')) => return (&text[..newline], &text[after + 2..]),
            _ => search_from = after,
        }
    }

    (text, "")
}

/// `METHOD PATH HTTP/x.y` with exactly three tokens
fn parse_request_line(line: &str) -> Option<(&str, &str)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        [method, path, version] if version.to_ascii_uppercase().starts_with("HTTP/") => {
            Some((method, path))
        }
        _ => None,
    }
}
