use std::fmt;

use bytes::Bytes;
use futures::stream::BoxStream;
use http::StatusCode;

use crate::error::Result;

/// Response body, either already in memory or still on the wire
pub enum ResponseBody {
    Buffered(Bytes),
    Stream(BoxStream<'static, Result<Bytes>>),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            ResponseBody::Stream(_) => write!(f, "Stream"),
        }
    }
}

/// A response as handed from the transport to the sink
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    /// Final URL after redirects
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn reason(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    /// Declared `Content-Length`, if present and numeric
    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Charset label from `Content-Type`
    pub fn charset(&self) -> Option<&str> {
        let content_type = self.header("content-type")?;
        content_type.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            if key.trim().eq_ignore_ascii_case("charset") {
                Some(value.trim().trim_matches('"'))
            } else {
                None
            }
        })
    }

    /// Size for log lines: declared length, else buffered length, else unknown
    pub fn size_hint(&self) -> String {
        if let Some(len) = self.content_length() {
            return len.to_string();
        }
        match &self.body {
            ResponseBody::Buffered(bytes) => bytes.len().to_string(),
            ResponseBody::Stream(_) => "unknown".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(headers: &[(&str, &str)], body: ResponseBody) -> Response {
        Response {
            status: StatusCode::OK,
            url: "http://example.com".to_string(),
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body,
        }
    }

    #[test]
    fn test_size_hint_prefers_content_length() {
        let resp = response(
            &[("Content-Length", "11")],
            ResponseBody::Buffered(Bytes::from_static(b"abc")),
        );
        assert_eq!(resp.size_hint(), "11");
    }

    #[test]
    fn test_size_hint_falls_back_to_buffer_then_unknown() {
        let resp = response(&[], ResponseBody::Buffered(Bytes::from_static(b"abc")));
        assert_eq!(resp.size_hint(), "3");

        let resp = response(&[], ResponseBody::Stream(Box::pin(futures::stream::empty())));
        assert_eq!(resp.size_hint(), "unknown");
    }

    #[test]
    fn test_charset_parsing() {
        let resp = response(
            &[("Content-Type", "text/html; Charset=\"ISO-8859-1\"")],
            ResponseBody::Buffered(Bytes::new()),
        );
        assert_eq!(resp.charset(), Some("ISO-8859-1"));

        let resp = response(
            &[("Content-Type", "application/json")],
            ResponseBody::Buffered(Bytes::new()),
        );
        assert_eq!(resp.charset(), None);
    }

    #[test]
    fn test_reason_phrase() {
        let mut resp = response(&[], ResponseBody::Buffered(Bytes::new()));
        assert_eq!(resp.reason(), "OK");
        resp.status = StatusCode::PROXY_AUTHENTICATION_REQUIRED;
        assert_eq!(resp.reason(), "Proxy Authentication Required");
    }
}
