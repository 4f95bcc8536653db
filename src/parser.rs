//! Lenient response head parser.
//!
//! Some servers and proxies emit blank keep-alive probes or stray bytes
//! before a real response. The parser skips such garbage lines, up to a
//! bound, until it finds a valid status line, and distinguishes a peer that
//! dropped the connection without responding from one that sent garbage.

use crate::conn::io::SessionBuffer;
use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::response::ResponseHead;
use crate::version::HttpVersion;

/// Limits applied while reading a message head.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Non-status lines tolerated before the status line. Reaching the cap
    /// fails the parse.
    pub max_garbage_lines: usize,
    /// Maximum number of header fields.
    pub max_header_count: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_garbage_lines: 64,
            max_header_count: 128,
        }
    }
}

/// Outcome of locating a status line in the incoming stream.
enum HeadOutcome {
    Status(HttpVersion, u16, String),
    /// Stream ended before any line was read.
    NoResponse,
    /// Stream ended mid-garbage, or the garbage cap was reached.
    Invalid,
}

/// Reads a structured response head from a session buffer.
#[derive(Debug, Clone, Default)]
pub struct ResponseParser {
    config: ParserConfig,
}

impl ResponseParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parse the status line and headers, skipping leading garbage.
    pub async fn parse_head(&self, io: &mut SessionBuffer) -> Result<ResponseHead> {
        let (version, status, reason) = match self.locate_status_line(io).await? {
            HeadOutcome::Status(version, status, reason) => (version, status, reason),
            HeadOutcome::NoResponse => return Err(Error::NoResponse),
            HeadOutcome::Invalid => {
                return Err(Error::protocol(
                    "the server failed to respond with a valid HTTP response",
                ))
            }
        };
        let headers = self.read_headers(io).await?;
        Ok(ResponseHead {
            version,
            status,
            reason,
            headers,
        })
    }

    async fn locate_status_line(&self, io: &mut SessionBuffer) -> Result<HeadOutcome> {
        let mut garbage = 0usize;
        loop {
            let line = match io.read_line().await? {
                Some(line) => line,
                None if garbage == 0 => return Ok(HeadOutcome::NoResponse),
                None => return Ok(HeadOutcome::Invalid),
            };
            if looks_like_status_line(&line) {
                return parse_status_line(&line).map(|(v, s, r)| HeadOutcome::Status(v, s, r));
            }
            garbage += 1;
            if garbage >= self.config.max_garbage_lines {
                return Ok(HeadOutcome::Invalid);
            }
            tracing::debug!(line = %line, "garbage in response");
        }
    }

    async fn read_headers(&self, io: &mut SessionBuffer) -> Result<Headers> {
        let mut headers = Headers::new();
        // The previous field stays pending so obs-fold continuation lines
        // can append to it.
        let mut pending: Option<(String, String)> = None;
        loop {
            let line = io
                .read_line()
                .await?
                .ok_or_else(|| Error::protocol("connection closed in message head"))?;
            if line.is_empty() {
                break;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                match pending.as_mut() {
                    Some((_, value)) => {
                        value.push(' ');
                        value.push_str(line.trim());
                    }
                    None => {
                        return Err(Error::protocol("header continuation without a header"))
                    }
                }
                continue;
            }
            if let Some((name, value)) = pending.take() {
                headers.add(name, value);
            }
            if headers.len() >= self.config.max_header_count {
                return Err(Error::protocol("too many headers in response"));
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| Error::protocol(format!("malformed header: {}", line)))?;
            let name = name.trim();
            if name.is_empty() || !name.bytes().all(is_tchar) {
                return Err(Error::protocol(format!("invalid header name: {}", line)));
            }
            pending = Some((name.to_string(), value.trim().to_string()));
        }
        if let Some((name, value)) = pending.take() {
            headers.add(name, value);
        }
        Ok(headers)
    }
}

fn looks_like_status_line(line: &str) -> bool {
    line.trim_start().starts_with("HTTP/")
}

fn parse_status_line(line: &str) -> Result<(HttpVersion, u16, String)> {
    let line = line.trim_start();
    let mut parts = line.splitn(3, ' ');
    let version = match parts.next() {
        Some("HTTP/1.1") => HttpVersion::Http11,
        Some("HTTP/1.0") => HttpVersion::Http10,
        Some(other) => {
            return Err(Error::protocol(format!(
                "unsupported protocol version: {}",
                other
            )))
        }
        None => return Err(Error::protocol("empty status line")),
    };
    let code = parts
        .next()
        .ok_or_else(|| Error::protocol(format!("status line has no code: {}", line)))?;
    let status: u16 = code
        .parse()
        .map_err(|_| Error::protocol(format!("invalid status code: {}", code)))?;
    if !(100..=599).contains(&status) {
        return Err(Error::protocol(format!("invalid status code: {}", status)));
    }
    let reason = parts.next().unwrap_or("").trim().to_string();
    Ok((version, status, reason))
}

/// Valid token character per RFC 9110.
pub(crate) fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' |
        b'^' | b'_' | b'`' | b'|' | b'~' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z'
    )
}
