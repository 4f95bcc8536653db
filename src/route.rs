//! Connection routes: the network path descriptor used as the pool key.

use http::Uri;

use crate::error::{Error, Result};

/// A target or proxy endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HttpHost {
    /// Lower-cased host name or address literal.
    pub hostname: String,
    pub port: u16,
    /// Whether the endpoint expects a secure channel.
    pub secure: bool,
}

impl HttpHost {
    pub fn new(hostname: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            hostname: hostname.into().to_ascii_lowercase(),
            port,
            secure,
        }
    }

    /// Extract the target host from a request URI.
    pub fn from_uri(uri: &Uri) -> Result<Self> {
        let hostname = uri
            .host()
            .ok_or_else(|| Error::protocol("request URI has no host"))?;
        let secure = uri.scheme_str() == Some("https");
        let port = uri
            .port_u16()
            .unwrap_or(if secure { 443 } else { 80 });
        Ok(Self::new(hostname, port, secure))
    }
}

impl std::fmt::Display for HttpHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// The path a connection takes to its target: direct, or through an ordered
/// chain of proxy hops.
///
/// Routes are immutable and compare by every field; the connection manager
/// keys its pool on them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub target: HttpHost,
    pub proxies: Vec<HttpHost>,
    /// Whether the end-to-end channel is secure.
    pub secure: bool,
}

impl Route {
    /// A direct route to the target.
    pub fn direct(target: HttpHost) -> Self {
        let secure = target.secure;
        Self {
            target,
            proxies: Vec::new(),
            secure,
        }
    }

    /// A route through the given proxy chain.
    pub fn via(target: HttpHost, proxies: Vec<HttpHost>) -> Self {
        let secure = target.secure;
        Self {
            target,
            proxies,
            secure,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.proxies.is_empty()
    }

    /// The hop the transport actually connects to.
    pub fn first_hop(&self) -> &HttpHost {
        self.proxies.first().unwrap_or(&self.target)
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for proxy in &self.proxies {
            write!(f, "{} -> ", proxy)?;
        }
        write!(f, "{}", self.target)
    }
}

/// Computes routes for targets. Resolution is deterministic and free of
/// side effects: direct unless a proxy chain is configured.
#[derive(Debug, Clone, Default)]
pub struct RoutePlanner {
    proxies: Vec<HttpHost>,
}

impl RoutePlanner {
    /// Plan direct routes only.
    pub fn direct() -> Self {
        Self::default()
    }

    /// Send all traffic through the given proxy.
    pub fn via_proxy(proxy: HttpHost) -> Self {
        Self {
            proxies: vec![proxy],
        }
    }

    /// Send all traffic through an ordered chain of proxy hops.
    pub fn via_proxy_chain(proxies: Vec<HttpHost>) -> Self {
        Self { proxies }
    }

    pub fn determine_route(&self, target: &HttpHost) -> Route {
        if self.proxies.is_empty() {
            Route::direct(target.clone())
        } else {
            Route::via(target.clone(), self.proxies.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_from_uri_defaults() {
        let uri: Uri = "http://Example.COM/path".parse().unwrap();
        let host = HttpHost::from_uri(&uri).unwrap();
        assert_eq!(host.hostname, "example.com");
        assert_eq!(host.port, 80);
        assert!(!host.secure);

        let uri: Uri = "https://example.com:8443/".parse().unwrap();
        let host = HttpHost::from_uri(&uri).unwrap();
        assert_eq!(host.port, 8443);
        assert!(host.secure);
    }

    #[test]
    fn test_route_equality_is_field_wise() {
        let a = Route::direct(HttpHost::new("example.com", 80, false));
        let b = Route::direct(HttpHost::new("example.com", 80, false));
        let c = Route::direct(HttpHost::new("example.com", 81, false));
        assert_eq!(a, b);
        assert_ne!(a, c);

        let proxied = Route::via(
            HttpHost::new("example.com", 80, false),
            vec![HttpHost::new("proxy", 3128, false)],
        );
        assert_ne!(a, proxied);
        assert_eq!(proxied.first_hop().hostname, "proxy");
    }

    #[test]
    fn test_planner() {
        let target = HttpHost::new("example.com", 80, false);
        assert!(RoutePlanner::direct().determine_route(&target).is_direct());

        let planner = RoutePlanner::via_proxy(HttpHost::new("proxy", 3128, false));
        let route = planner.determine_route(&target);
        assert!(!route.is_direct());
        assert_eq!(route.target, target);
    }
}
