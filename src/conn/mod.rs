//! Managed connections: one transport stream bound to a route, exchanged
//! exclusively by one execution between lease and release.

pub mod connector;
pub mod io;
pub mod manager;

use std::future::Future;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::Method;

use crate::conn::connector::Connect;
use crate::conn::io::SessionBuffer;
use crate::error::{Error, Result};
use crate::parser::{is_tchar, ResponseParser};
use crate::request::Request;
use crate::response::{Response, ResponseHead};
use crate::route::Route;
use crate::version::HttpVersion;

/// A pooled transport connection bound to a route.
///
/// Created unconnected on a pool miss; the execution chain opens it before
/// the first exchange. After each response the connection records whether
/// the reuse strategy permits returning it to the idle set, and for how
/// long the server promised to keep it alive.
pub struct ManagedConnection {
    route: Route,
    id: u64,
    io: Option<SessionBuffer>,
    reusable: bool,
    reused: bool,
    keep_alive: Option<Duration>,
    last_activity: Instant,
}

impl ManagedConnection {
    pub(crate) fn new(route: Route, id: u64) -> Self {
        Self {
            route,
            id,
            io: None,
            reusable: false,
            reused: false,
            keep_alive: None,
            last_activity: Instant::now(),
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    /// Whether this connection served a previous exchange before the
    /// current lease.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub(crate) fn mark_reused(&mut self) {
        self.reused = true;
    }

    /// Whether the last response permits returning this connection to the
    /// idle pool.
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// Keep-alive duration declared by the last response, if any.
    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Establish the transport stream to the route's first hop.
    pub async fn open(&mut self, connector: &dyn Connect, timeout: Option<Duration>) -> Result<()> {
        let fut = connector.connect(self.route.first_hop());
        let stream = match timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Error::ConnectTimeout(limit))??,
            None => fut.await?,
        };
        tracing::debug!(id = self.id, route = %self.route, "connection opened");
        self.io = Some(SessionBuffer::new(stream));
        self.reusable = true;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Shut the transport down. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut io) = self.io.take() {
            let _ = io.shutdown().await;
            tracing::debug!(id = self.id, route = %self.route, "connection closed");
        }
        self.reusable = false;
    }

    /// Send one request and read the full response.
    ///
    /// 1xx informational responses are consumed before the final head.
    /// Updates the reuse flag and keep-alive duration from the response.
    pub async fn send_request(
        &mut self,
        request: &Request,
        parser: &ResponseParser,
        read_limit: Option<Duration>,
        write_limit: Option<Duration>,
    ) -> Result<Response> {
        let head_bytes = build_request(request, &self.route)?;
        let io = self
            .io
            .as_mut()
            .ok_or_else(|| Error::connection("connection is not open"))?;

        timed(
            async {
                io.write_all(&head_bytes).await?;
                if let Some(body) = &request.body {
                    io.write_all(body).await?;
                }
                io.flush().await
            },
            write_limit,
            Error::WriteTimeout,
        )
        .await?;

        let head = loop {
            let head = timed(parser.parse_head(io), read_limit, Error::ReadTimeout).await?;
            if (100..200).contains(&head.status) {
                tracing::debug!(status = head.status, "discarding informational response");
                continue;
            }
            break head;
        };

        let (body, framing_reusable) = read_body(io, request, &head, read_limit).await?;

        self.keep_alive = parse_keep_alive(&head.headers);
        self.reusable = framing_reusable && reuse_permitted(&head);
        self.last_activity = Instant::now();
        Ok(Response::new(head, body))
    }
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.id)
            .field("route", &self.route)
            .field("open", &self.is_open())
            .field("reusable", &self.reusable)
            .finish()
    }
}

/// Apply a timeout to an IO future, mapping elapse to the given error.
async fn timed<T>(
    fut: impl Future<Output = Result<T>>,
    limit: Option<Duration>,
    on_elapsed: fn(Duration) -> Error,
) -> Result<T> {
    match limit {
        Some(d) => tokio::time::timeout(d, fut)
            .await
            .map_err(|_| on_elapsed(d))?,
        None => fut.await,
    }
}

/// Serialize the request head per RFC 9112.
///
/// Direct routes use origin-form targets; proxied routes use absolute-form
/// since the first hop must see the full target.
fn build_request(request: &Request, route: &Route) -> Result<Vec<u8>> {
    for (name, value) in request.headers.iter() {
        validate_header_name(name)?;
        validate_header_value(value)?;
    }

    let mut out = Vec::with_capacity(1024);
    out.extend_from_slice(request.method.as_str().as_bytes());
    out.push(b' ');

    let path = request
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    if route.is_direct() {
        out.extend_from_slice(path.as_bytes());
    } else {
        let scheme = if route.secure { "https" } else { "http" };
        out.extend_from_slice(scheme.as_bytes());
        out.extend_from_slice(b"://");
        out.extend_from_slice(route.target.hostname.as_bytes());
        let default_port = if route.secure { 443 } else { 80 };
        if route.target.port != default_port {
            out.push(b':');
            out.extend_from_slice(route.target.port.to_string().as_bytes());
        }
        out.extend_from_slice(path.as_bytes());
    }
    out.extend_from_slice(b" HTTP/1.1\r\n");

    // Host is mandatory for HTTP/1.1 and always derived from the target.
    out.extend_from_slice(b"Host: ");
    out.extend_from_slice(route.target.hostname.as_bytes());
    let default_port = if route.target.secure { 443 } else { 80 };
    if route.target.port != default_port {
        out.push(b':');
        out.extend_from_slice(route.target.port.to_string().as_bytes());
    }
    out.extend_from_slice(b"\r\n");

    let mut has_connection = false;
    let mut has_content_length = false;
    let mut has_transfer_encoding = false;
    for (name, value) in request.headers.iter() {
        if name.eq_ignore_ascii_case("host") {
            continue;
        }
        if name.eq_ignore_ascii_case("connection") {
            has_connection = true;
        }
        if name.eq_ignore_ascii_case("content-length") {
            has_content_length = true;
        }
        if name.eq_ignore_ascii_case("transfer-encoding") {
            has_transfer_encoding = true;
        }
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    // Persistent connections are the point of the pool.
    if !has_connection {
        out.extend_from_slice(b"Connection: keep-alive\r\n");
    }

    if let Some(body) = &request.body {
        if !has_content_length && !has_transfer_encoding {
            out.extend_from_slice(b"Content-Length: ");
            out.extend_from_slice(body.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(b"\r\n");
    Ok(out)
}

/// Read the response body per RFC 9112 Section 6.3. Returns the raw body
/// and whether the framing leaves the connection reusable.
async fn read_body(
    io: &mut SessionBuffer,
    request: &Request,
    head: &ResponseHead,
    read_limit: Option<Duration>,
) -> Result<(Bytes, bool)> {
    let has_body = !matches!(head.status, 204 | 304) && request.method != Method::HEAD;
    if !has_body {
        return Ok((Bytes::new(), true));
    }

    let transfer_encoding = head.headers.first("transfer-encoding");
    let is_chunked = transfer_encoding
        .map(|v| {
            // chunked must be the final transfer coding
            v.split(',')
                .next_back()
                .map(|s| s.trim().eq_ignore_ascii_case("chunked"))
                .unwrap_or(false)
        })
        .unwrap_or(false);

    if is_chunked {
        let body = read_chunked_body(io, read_limit).await?;
        return Ok((body, true));
    }
    if transfer_encoding.is_some() {
        // Unknown transfer coding: delimited by connection close.
        let body = read_until_close(io, read_limit).await?;
        return Ok((body, false));
    }
    if let Some(value) = head.headers.first("content-length") {
        let len = parse_content_length(value)?;
        let body = read_fixed_body(io, len, read_limit).await?;
        return Ok((body, true));
    }
    // No framing information: the body runs to connection close.
    let body = read_until_close(io, read_limit).await?;
    Ok((body, false))
}

async fn read_fixed_body(
    io: &mut SessionBuffer,
    content_length: usize,
    read_limit: Option<Duration>,
) -> Result<Bytes> {
    let mut body = vec![0u8; content_length];
    let mut filled = 0;
    while filled < content_length {
        let n = timed(io.read(&mut body[filled..]), read_limit, Error::ReadTimeout).await?;
        if n == 0 {
            return Err(Error::protocol(format!(
                "connection closed before receiving full body (got {} of {} bytes)",
                filled, content_length
            )));
        }
        filled += n;
    }
    Ok(Bytes::from(body))
}

async fn read_until_close(io: &mut SessionBuffer, read_limit: Option<Duration>) -> Result<Bytes> {
    let mut body = Vec::new();
    let mut chunk = [0u8; 8 * 1024];
    loop {
        let n = timed(io.read(&mut chunk), read_limit, Error::ReadTimeout).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Ok(Bytes::from(body))
}

/// Read a chunked body per RFC 9112 Section 7.1, discarding any trailer
/// section.
async fn read_chunked_body(io: &mut SessionBuffer, read_limit: Option<Duration>) -> Result<Bytes> {
    let mut body = Vec::new();
    loop {
        let line = timed(io.read_line(), read_limit, Error::ReadTimeout)
            .await?
            .ok_or_else(|| Error::protocol("connection closed while reading chunk size"))?;
        let size_token = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_token, 16)
            .map_err(|_| Error::protocol(format!("invalid chunk size: {}", line)))?;

        if size == 0 {
            // Trailer section runs to an empty line; absent trailers on a
            // closing connection are tolerated.
            loop {
                match timed(io.read_line(), read_limit, Error::ReadTimeout).await? {
                    Some(trailer) if trailer.is_empty() => return Ok(Bytes::from(body)),
                    Some(_) => continue,
                    None => return Ok(Bytes::from(body)),
                }
            }
        }

        let mut chunk = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            let n = timed(io.read(&mut chunk[filled..]), read_limit, Error::ReadTimeout).await?;
            if n == 0 {
                return Err(Error::protocol("connection closed while reading chunk data"));
            }
            filled += n;
        }
        body.extend_from_slice(&chunk);

        match timed(io.read_line(), read_limit, Error::ReadTimeout).await? {
            Some(sep) if sep.is_empty() => {}
            _ => return Err(Error::protocol("missing CRLF after chunk data")),
        }
    }
}

/// Whether `Connection`/version semantics permit reuse.
fn reuse_permitted(head: &ResponseHead) -> bool {
    let tokens = head
        .headers
        .first("connection")
        .unwrap_or("")
        .to_ascii_lowercase();
    match head.version {
        HttpVersion::Http11 => !tokens.split(',').any(|t| t.trim() == "close"),
        HttpVersion::Http10 => tokens.split(',').any(|t| t.trim() == "keep-alive"),
    }
}

/// Extract the `timeout` parameter of a `Keep-Alive` header.
fn parse_keep_alive(headers: &crate::headers::Headers) -> Option<Duration> {
    let value = headers.first("keep-alive")?;
    for part in value.split(',') {
        if let Some((key, val)) = part.trim().split_once('=') {
            if key.trim().eq_ignore_ascii_case("timeout") {
                if let Ok(secs) = val.trim().parse::<u64>() {
                    return Some(Duration::from_secs(secs));
                }
            }
        }
    }
    None
}

/// Parse and validate Content-Length per RFC 9112 Section 6.2: multiple
/// values must all be identical.
fn parse_content_length(value: &str) -> Result<usize> {
    let mut parts = value.split(',').map(str::trim);
    let first = parts
        .next()
        .unwrap_or("")
        .parse::<usize>()
        .map_err(|_| Error::protocol(format!("invalid Content-Length: {}", value)))?;
    for part in parts {
        let val = part
            .parse::<usize>()
            .map_err(|_| Error::protocol(format!("invalid Content-Length: {}", value)))?;
        if val != first {
            return Err(Error::protocol(format!(
                "conflicting Content-Length values: {}",
                value
            )));
        }
    }
    Ok(first)
}

/// Validate a header name per RFC 9110 Section 5.1.
fn validate_header_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::protocol("empty header name"));
    }
    if !name.bytes().all(is_tchar) {
        return Err(Error::protocol(format!(
            "invalid character in header name: {:?}",
            name
        )));
    }
    Ok(())
}

/// Header values must not contain NUL, CR or LF (prevents header
/// injection).
fn validate_header_value(value: &str) -> Result<()> {
    if value.bytes().any(|b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(Error::protocol(
            "invalid character in header value (CR/LF/NUL not allowed)",
        ));
    }
    Ok(())
}
