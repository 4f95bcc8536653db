//! Error types for the wraith crate.

use std::io;
use std::time::Duration;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during HTTP operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP protocol error: malformed status line, headers or framing.
    #[error("HTTP protocol error: {0}")]
    Protocol(String),

    /// The peer closed the connection without sending a status line.
    ///
    /// Distinct from [`Error::Protocol`]: a dropped connection is safe to
    /// retry on a fresh connection for idempotent requests, garbled input
    /// is not.
    #[error("the target server failed to respond")]
    NoResponse,

    /// Invalid request URI.
    #[error("invalid request URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    /// Cookie parsing error.
    #[error("cookie parse error: {0}")]
    CookieParse(String),

    /// Authentication error: malformed challenge or scheme misuse.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Response declared a content coding the client cannot decode.
    #[error("unsupported content encoding: {0}")]
    UnsupportedEncoding(String),

    /// Decompression error.
    #[error("decompression error: {0}")]
    Decompression(String),

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Missing required field or data.
    #[error("missing required: {0}")]
    Missing(String),

    /// Connect timeout (TCP handshake).
    #[error("connect timeout after {0:?}")]
    ConnectTimeout(Duration),

    /// Socket read timeout.
    #[error("read timeout after {0:?}")]
    ReadTimeout(Duration),

    /// Socket write timeout.
    #[error("write timeout after {0:?}")]
    WriteTimeout(Duration),

    /// Total request deadline exceeded, covering all retry and auth rounds.
    #[error("total request deadline exceeded after {0:?}")]
    TotalTimeout(Duration),

    /// Pool lease timeout (no connection available).
    ///
    /// Distinct from the socket timeouts so callers can tell "server slow"
    /// from "pool full".
    #[error("pool lease timeout after {0:?} - no connections available")]
    PoolLeaseTimeout(Duration),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// The execution was aborted by the caller.
    #[error("request aborted")]
    Aborted,
}

impl Error {
    /// Create an HTTP protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Create a cookie parse error.
    pub fn cookie(message: impl Into<String>) -> Self {
        Self::CookieParse(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create an IO error with custom message.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(io::Error::other(message.into()))
    }

    /// Create a missing field error.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing(field.into())
    }
}
