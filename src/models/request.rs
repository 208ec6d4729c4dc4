use std::collections::HashMap;

/// A raw request template after parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    /// Path or absolute URL
    pub path: String,
    /// Headers in file order, duplicates kept
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// `# @key: value` directives found above the request
    pub meta: HashMap<String, String>,
}

impl ParsedRequest {
    /// First header value with the given name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a header, in file order
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Whether the path already carries a scheme and host
    pub fn has_absolute_url(&self) -> bool {
        is_absolute_url(&self.path)
    }
}

/// `http://` or `https://` prefix, any case
pub fn is_absolute_url(path: &str) -> bool {
    let lower = path.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
