//! Response dumps to the console or an append-only file
//!
//! Bodies are streamed in bounded chunks, decoded with the charset the response
//! declares, and cut off at a byte budget.

use std::path::PathBuf;

use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{Config, ResponseConfig};
use crate::error::Result;
use crate::models::{Response, ResponseBody};

const DELIMITER_WIDTH: usize = 70;

/// Where response dumps go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    Console,
    File(PathBuf),
}

impl SinkTarget {
    /// Map the `--response [FILE]` flag: absent disables dumps, no value
    /// means console, a value names a file under the responses folder.
    pub fn from_flag(flag: Option<Option<String>>, config: &Config) -> Option<Self> {
        match flag? {
            Some(name) if !name.trim().is_empty() => {
                Some(SinkTarget::File(config.response_path(name.trim())))
            }
            _ => Some(SinkTarget::Console),
        }
    }
}

/// How much of a body was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub bytes: usize,
    pub truncated: bool,
}

/// Serialized response writer shared by all workers
pub struct ResponseSink {
    target: Option<SinkTarget>,
    limits: ResponseConfig,
    lock: Mutex<()>,
}

impl ResponseSink {
    pub fn new(target: Option<SinkTarget>, limits: ResponseConfig) -> Self {
        Self {
            target,
            limits,
            lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(
            None,
            ResponseConfig {
                max_bytes: 0,
                chunk_size: 8192,
            },
        )
    }

    pub fn enabled(&self) -> bool {
        self.target.is_some()
    }

    /// Label for the startup log line
    pub fn describe(&self) -> String {
        match &self.target {
            None => "off".to_string(),
            Some(SinkTarget::Console) => "console".to_string(),
            Some(SinkTarget::File(path)) => format!("file={}", path.display()),
        }
    }

    /// Dump one response. The response is consumed on every path.
    pub async fn write(&self, response: Response) -> Result<WriteSummary> {
        let Some(target) = &self.target else {
            return Ok(WriteSummary {
                bytes: 0,
                truncated: false,
            });
        };

        let _guard = self.lock.lock().await;
        match target {
            SinkTarget::Console => {
                let mut out = tokio::io::stdout();
                let summary = write_block(&mut out, response, &self.limits).await?;
                out.flush().await?;
                Ok(summary)
            }
            SinkTarget::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                let summary = write_block(&mut file, response, &self.limits).await?;
                file.flush().await?;
                debug!("Appended response dump to {}", path.display());
                Ok(summary)
            }
        }
    }
}

/// Write one dump block: delimiter, status line, headers, blank line, body,
/// optional truncation notice, delimiter.
pub async fn write_block<W>(
    out: &mut W,
    response: Response,
    limits: &ResponseConfig,
) -> Result<WriteSummary>
where
    W: AsyncWrite + Unpin,
{
    let delimiter = "=".repeat(DELIMITER_WIDTH);
    let encoding = response
        .charset()
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);
    let declared = response.content_length();

    let mut head = format!(
        "{}\n{} {} {}\n",
        delimiter,
        response.status.as_u16(),
        response.reason(),
        response.url
    );
    for (name, value) in &response.headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push('\n');
    }
    head.push('\n');
    out.write_all(head.as_bytes()).await?;

    let url = response.url.clone();
    let mut body: BoxStream<'static, Result<bytes::Bytes>> = match response.body {
        ResponseBody::Buffered(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
        ResponseBody::Stream(stream) => stream,
    };

    let chunk_size = limits.chunk_size.max(1);
    let mut decoder = encoding.new_decoder();
    let mut emitted = 0usize;
    let mut truncated = false;
    let mut read_error = None;

    'read: while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                read_error = Some(e);
                break;
            }
        };

        for piece in chunk.chunks(chunk_size) {
            let piece = if limits.max_bytes > 0 && emitted + piece.len() > limits.max_bytes {
                truncated = true;
                &piece[..limits.max_bytes - emitted]
            } else {
                piece
            };
            emitted += piece.len();

            let text = decode(&mut decoder, piece, false);
            out.write_all(text.as_bytes()).await?;

            if truncated {
                break 'read;
            }
        }
    }
    drop(body);

    let tail = decode(&mut decoder, &[], true);
    out.write_all(tail.as_bytes()).await?;

    if !truncated && limits.max_bytes > 0 && declared.is_some_and(|len| len > emitted as u64) {
        truncated = true;
    }

    let mut footer = String::new();
    if truncated {
        footer.push_str(&format!("\n[truncated after {} bytes]", emitted));
    }
    if let Some(e) = read_error {
        warn!("Response body from {} ended early: {}", url, e);
        footer.push_str(&format!("\n[body incomplete: {}]", e));
    }
    footer.push('\n');
    footer.push_str(&delimiter);
    footer.push_str("\n\n");
    out.write_all(footer.as_bytes()).await?;

    Ok(WriteSummary {
        bytes: emitted,
        truncated,
    })
}

/// Decode with replacement characters for invalid input
fn decode(decoder: &mut Decoder, mut src: &[u8], last: bool) -> String {
    let capacity = decoder
        .max_utf8_buffer_length(src.len())
        .unwrap_or(src.len() * 3 + 16);
    let mut text = String::with_capacity(capacity);

    loop {
        let (result, read, _had_errors) = decoder.decode_to_string(src, &mut text, last);
        src = &src[read..];
        match result {
            CoderResult::InputEmpty => return text,
            CoderResult::OutputFull => {
                let extra = decoder
                    .max_utf8_buffer_length(src.len())
                    .unwrap_or(src.len() * 3 + 16);
                text.reserve(extra.max(16));
            }
        }
    }
}
