//! # Wraith
//!
//! HTTP/1.1 client execution core: managed connection pooling,
//! authentication challenge handling, cookie persistence,
//! content-encoding negotiation and lenient response parsing.
//!
//! The [`Client`] drives a logical request to completion over a pooled,
//! possibly reused connection, transparently replaying it through
//! authentication rounds and retrying idempotent requests whose
//! connection silently dropped.

pub mod auth;
pub mod conn;
pub mod context;
pub mod cookie;
pub mod error;
pub mod executor;
pub mod headers;
pub mod parser;
pub mod protocol;
pub mod request;
pub mod response;
pub mod route;
pub mod timeouts;
pub mod version;

// Re-exports
pub use auth::{AuthScope, BasicCredentialsProvider, Credentials};
pub use context::{AbortHandle, ExecutionContext};
pub use cookie::{Cookie, CookieOrigin, CookieStore};
pub use error::{Error, Result};
pub use executor::{Client, ClientBuilder};
pub use headers::Headers;
pub use request::{Request, RequestConfig};
pub use response::Response;
pub use route::{HttpHost, Route};
pub use timeouts::Timeouts;
pub use version::HttpVersion;
