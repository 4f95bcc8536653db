//! Request wrapper mutated by interceptors during a single execution.

use std::time::Duration;

use bytes::Bytes;
use http::{Method, Uri};

use crate::error::Result;
use crate::headers::Headers;

/// Per-request configuration overriding client-level defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Enable authentication handling for this request.
    pub authenticate: Option<bool>,
    /// Enable cookie handling for this request.
    pub handle_cookies: Option<bool>,
    /// Cap on authentication rounds for this request.
    pub max_auth_rounds: Option<usize>,
    /// Overall deadline for this request, covering all rounds.
    pub total_timeout: Option<Duration>,
}

/// A logical HTTP request: method, target, headers and optional body.
///
/// One `Request` belongs to a single execution; interceptors add headers to
/// it while the exchange is in flight and the final form is exposed through
/// the execution context.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: Headers,
    pub body: Option<Bytes>,
    pub config: Option<RequestConfig>,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: Headers::new(),
            body: None,
            config: None,
        }
    }

    pub fn get(uri: &str) -> Result<Self> {
        Ok(Self::new(Method::GET, uri.parse::<Uri>()?))
    }

    pub fn head(uri: &str) -> Result<Self> {
        Ok(Self::new(Method::HEAD, uri.parse::<Uri>()?))
    }

    pub fn post(uri: &str) -> Result<Self> {
        Ok(Self::new(Method::POST, uri.parse::<Uri>()?))
    }

    pub fn put(uri: &str) -> Result<Self> {
        Ok(Self::new(Method::PUT, uri.parse::<Uri>()?))
    }

    pub fn delete(uri: &str) -> Result<Self> {
        Ok(Self::new(Method::DELETE, uri.parse::<Uri>()?))
    }

    /// Append a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attach per-request configuration.
    pub fn config(mut self, config: RequestConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Whether the method is idempotent per RFC 9110 Section 9.2.2.
    ///
    /// Idempotent requests may be transparently retried once when the
    /// connection drops before a response head is received.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self.method,
            Method::GET
                | Method::HEAD
                | Method::OPTIONS
                | Method::TRACE
                | Method::PUT
                | Method::DELETE
        )
    }
}
