//! Transport connector abstraction.
//!
//! The core only needs a byte-oriented duplex stream per route hop; TLS and
//! proxy tunneling live behind [`Connect`] implementations supplied by the
//! caller.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::Result;
use crate::route::HttpHost;

/// Byte-oriented duplex stream usable as a connection transport.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Boxed transport stream.
pub type BoxStream = Box<dyn AsyncStream>;

/// Opens transport streams to a route's first hop.
pub trait Connect: Send + Sync {
    fn connect<'a>(
        &'a self,
        host: &'a HttpHost,
    ) -> Pin<Box<dyn Future<Output = Result<BoxStream>> + Send + 'a>>;
}

/// Plain TCP connector.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connect for TcpConnector {
    fn connect<'a>(
        &'a self,
        host: &'a HttpHost,
    ) -> Pin<Box<dyn Future<Output = Result<BoxStream>> + Send + 'a>> {
        Box::pin(async move {
            let stream = TcpStream::connect((host.hostname.as_str(), host.port)).await?;
            // Request heads are small; batching them behind Nagle only adds
            // latency.
            let _ = stream.set_nodelay(true);
            Ok(Box::new(stream) as BoxStream)
        })
    }
}
