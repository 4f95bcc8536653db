//! Timeout configuration for request execution.
//!
//! # Timeout Types
//!
//! - **connect**: transport connection establishment
//! - **read**: receiving the response head and each body chunk
//! - **write**: sending the request head and body
//! - **total**: absolute deadline for the whole execution, covering every
//!   retry and authentication round
//! - **pool_lease**: waiting for a pooled connection to become available

use std::time::Duration;

/// Timeout configuration. All timeouts are optional; `None` disables that
/// phase's limit.
#[derive(Clone, Debug, Default)]
pub struct Timeouts {
    /// Timeout for establishing the transport connection.
    pub connect: Option<Duration>,

    /// Socket read timeout, applied to the response head and to each body
    /// read.
    pub read: Option<Duration>,

    /// Socket write timeout for sending the request.
    pub write: Option<Duration>,

    /// Total request deadline. Does not reset between rounds.
    pub total: Option<Duration>,

    /// Time to wait for an available pooled connection. Under load this
    /// bounds queueing instead of letting requests pile up indefinitely.
    pub pool_lease: Option<Duration>,
}

impl Timeouts {
    /// No timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sensible defaults for API calls.
    ///
    /// - connect: 10s
    /// - read: 30s
    /// - write: 30s
    /// - total: 120s
    /// - pool_lease: 5s
    pub fn api_defaults() -> Self {
        Self {
            connect: Some(Duration::from_secs(10)),
            read: Some(Duration::from_secs(30)),
            write: Some(Duration::from_secs(30)),
            total: Some(Duration::from_secs(120)),
            pool_lease: Some(Duration::from_secs(5)),
        }
    }

    /// Set connect timeout.
    pub fn connect(mut self, timeout: Duration) -> Self {
        self.connect = Some(timeout);
        self
    }

    /// Set socket read timeout.
    pub fn read(mut self, timeout: Duration) -> Self {
        self.read = Some(timeout);
        self
    }

    /// Set socket write timeout.
    pub fn write(mut self, timeout: Duration) -> Self {
        self.write = Some(timeout);
        self
    }

    /// Set total request deadline.
    pub fn total(mut self, timeout: Duration) -> Self {
        self.total = Some(timeout);
        self
    }

    /// Set pool lease timeout.
    pub fn pool_lease(mut self, timeout: Duration) -> Self {
        self.pool_lease = Some(timeout);
        self
    }

    /// Disable the total deadline.
    pub fn no_total_timeout(mut self) -> Self {
        self.total = None;
        self
    }

    /// Disable the pool lease timeout.
    pub fn no_pool_lease_timeout(mut self) -> Self {
        self.pool_lease = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_defaults() {
        let t = Timeouts::api_defaults();
        assert_eq!(t.connect, Some(Duration::from_secs(10)));
        assert_eq!(t.read, Some(Duration::from_secs(30)));
        assert_eq!(t.total, Some(Duration::from_secs(120)));
        assert_eq!(t.pool_lease, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_builder_pattern() {
        let t = Timeouts::new()
            .connect(Duration::from_secs(5))
            .read(Duration::from_secs(15));
        assert_eq!(t.connect, Some(Duration::from_secs(5)));
        assert_eq!(t.read, Some(Duration::from_secs(15)));
        assert_eq!(t.total, None);
    }
}
