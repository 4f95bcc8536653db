//! The request execution chain.
//!
//! Drives a logical request to completion over a managed connection:
//! route computation, pool lease, the interceptor chain, the wire
//! exchange, authentication rounds and the single idempotent retry.

use std::sync::Arc;
use std::time::Duration;

use http::Uri;
use tokio::time::Instant;

use crate::auth::{
    parse_challenges, AuthSchemeRegistry, BasicCredentialsProvider, CredentialsProvider,
};
use crate::conn::connector::{Connect, TcpConnector};
use crate::conn::manager::{ConnectionManager, PoolConfig};
use crate::conn::ManagedConnection;
use crate::context::ExecutionContext;
use crate::cookie::{CookieOrigin, CookieStore};
use crate::error::{Error, Result};
use crate::parser::{ParserConfig, ResponseParser};
use crate::protocol::{
    RequestAcceptEncoding, RequestAddCookies, RequestInterceptor, ResponseContentEncoding,
    ResponseInterceptor, ResponseProcessCookies,
};
use crate::request::Request;
use crate::response::Response;
use crate::route::{HttpHost, Route, RoutePlanner};
use crate::timeouts::Timeouts;

/// HTTP client: the execution chain plus the shared resources it drives.
///
/// Cheap to share behind an [`Arc`]; concurrent executions contend only on
/// the connection pool.
pub struct Client {
    connector: Arc<dyn Connect>,
    manager: Arc<ConnectionManager>,
    planner: RoutePlanner,
    parser: ResponseParser,
    timeouts: Timeouts,
    credentials: Arc<dyn CredentialsProvider>,
    schemes: Arc<AuthSchemeRegistry>,
    cookie_store: Arc<CookieStore>,
    authenticate: bool,
    handle_cookies: bool,
    retry_enabled: bool,
    max_auth_rounds: usize,
}

impl Client {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// The connection manager, for idle/expired sweeps and statistics.
    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn cookie_store(&self) -> &Arc<CookieStore> {
        &self.cookie_store
    }

    /// Execute a request with a throwaway context.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let mut ctx = ExecutionContext::new();
        self.execute_with_context(request, &mut ctx).await
    }

    /// Execute a request, exposing per-call state through `ctx`.
    ///
    /// One call may span several wire round-trips: authentication rounds
    /// and a single retry for idempotent requests whose connection dropped
    /// before responding. After the call `ctx` holds the route and the
    /// fully materialized request.
    pub async fn execute_with_context(
        &self,
        request: Request,
        ctx: &mut ExecutionContext,
    ) -> Result<Response> {
        let cfg = request.config.clone().unwrap_or_default();
        let auth_enabled = cfg.authenticate.unwrap_or(self.authenticate);
        let cookies_enabled = cfg.handle_cookies.unwrap_or(self.handle_cookies);
        let max_auth_rounds = cfg.max_auth_rounds.unwrap_or(self.max_auth_rounds);
        let mut timeouts = self.timeouts.clone();
        if let Some(total) = cfg.total_timeout {
            timeouts.total = Some(total);
        }
        let deadline = timeouts.total.map(|t| Instant::now() + t);

        let target = HttpHost::from_uri(&request.uri)?;
        let route = self.planner.determine_route(&target);
        tracing::debug!(route = %route, method = %request.method, "executing request");
        ctx.route = Some(route.clone());
        if cookies_enabled {
            ctx.cookie_origin = Some(cookie_origin(&request.uri, &route));
            ctx.cookie_store = Some(self.cookie_store.clone());
        }

        let mut request = request;
        let mut held: Option<ManagedConnection> = None;
        let mut auth_rounds = 0usize;
        let mut retried = false;

        loop {
            if ctx.is_aborted() {
                return Err(Error::Aborted);
            }
            if deadline_expired(deadline) {
                return Err(Error::TotalTimeout(timeouts.total.unwrap_or_default()));
            }

            let mut conn = match held.take() {
                Some(conn) => conn,
                None => {
                    let lease = self
                        .manager
                        .lease(&route, bounded(timeouts.pool_lease, deadline));
                    tokio::pin!(lease);
                    let leased = tokio::select! {
                        result = &mut lease => result,
                        _ = ctx.aborted() => return Err(Error::Aborted),
                    };
                    leased.map_err(|e| translate_deadline(e, deadline, &timeouts))?
                }
            };

            if !conn.is_open() {
                let opened = {
                    let open = conn.open(
                        self.connector.as_ref(),
                        bounded(timeouts.connect, deadline),
                    );
                    tokio::pin!(open);
                    tokio::select! {
                        result = &mut open => Some(result),
                        _ = ctx.aborted() => None,
                    }
                };
                match opened {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        self.manager.discard(conn).await;
                        return Err(translate_deadline(e, deadline, &timeouts));
                    }
                    None => {
                        self.manager.discard(conn).await;
                        return Err(Error::Aborted);
                    }
                }
            }

            if let Err(e) = self.prepare_request(&mut request, ctx, auth_enabled) {
                self.manager.discard(conn).await;
                return Err(e);
            }
            ctx.set_final_request(request.clone());

            let outcome = {
                let send = conn.send_request(
                    &request,
                    &self.parser,
                    bounded(timeouts.read, deadline),
                    bounded(timeouts.write, deadline),
                );
                tokio::pin!(send);
                tokio::select! {
                    result = &mut send => Some(result),
                    _ = ctx.aborted() => None,
                }
            };
            let result = match outcome {
                Some(result) => result,
                None => {
                    self.manager.discard(conn).await;
                    return Err(Error::Aborted);
                }
            };

            let mut response = match result {
                Ok(response) => response,
                Err(e) => {
                    let was_reused = conn.is_reused();
                    self.manager.discard(conn).await;
                    let e = translate_deadline(e, deadline, &timeouts);
                    if self.retry_enabled
                        && !retried
                        && request.is_idempotent()
                        && is_retryable(&e, was_reused)
                    {
                        retried = true;
                        tracing::debug!("retrying on a fresh connection: {}", e);
                        continue;
                    }
                    return Err(e);
                }
            };

            // Response-phase: capture cookies from every round, including
            // unauthorized ones.
            if let Err(e) = ResponseProcessCookies.process(&mut response, ctx) {
                self.manager.discard(conn).await;
                return Err(e);
            }

            let status = response.status();
            if auth_enabled && matches!(status, 401 | 407) && auth_rounds < max_auth_rounds {
                let is_proxy = status == 407;
                let (challenge_header, host) = if is_proxy {
                    ("Proxy-Authenticate", route.first_hop().clone())
                } else {
                    ("WWW-Authenticate", route.target.clone())
                };
                let values = response.headers().all(challenge_header);
                let challenges = parse_challenges(&values);
                let exchange = if is_proxy {
                    &mut ctx.proxy_auth
                } else {
                    &mut ctx.target_auth
                };
                if exchange.update(&challenges, &host, &self.schemes, self.credentials.as_ref()) {
                    auth_rounds += 1;
                    tracing::debug!(status, round = auth_rounds, "authentication round required");
                    // Connection-bound schemes must continue the handshake
                    // on the very same connection.
                    let connection_based = exchange
                        .scheme()
                        .map(|s| s.is_connection_based())
                        .unwrap_or(false);
                    let valid_for = conn.keep_alive();
                    if conn.is_reusable() && connection_based {
                        held = Some(conn);
                    } else if conn.is_reusable() {
                        self.manager.release(conn, valid_for).await;
                    } else {
                        self.manager.discard(conn).await;
                    }
                    continue;
                }
                // Exchange exhausted: the unauthorized response is the
                // final answer, not an error.
            } else if !matches!(status, 401 | 407) {
                ctx.target_auth.mark_success();
                ctx.proxy_auth.mark_success();
            }

            let decoded = ResponseContentEncoding.process(&mut response, ctx);
            let valid_for = conn.keep_alive();
            if conn.is_reusable() {
                self.manager.release(conn, valid_for).await;
            } else {
                self.manager.discard(conn).await;
            }
            decoded?;

            ctx.set_final_request(request.clone());
            return Ok(response);
        }
    }

    /// Request-phase interceptors, in fixed order; the auth header
    /// reflects the current exchange state.
    fn prepare_request(
        &self,
        request: &mut Request,
        ctx: &mut ExecutionContext,
        auth_enabled: bool,
    ) -> Result<()> {
        RequestAcceptEncoding.process(request, ctx)?;
        RequestAddCookies.process(request, ctx)?;
        if auth_enabled {
            if let Some(value) = ctx.target_auth.authorization_header(request)? {
                request.headers.set("Authorization", value);
            }
            if let Some(value) = ctx.proxy_auth.authorization_header(request)? {
                request.headers.set("Proxy-Authorization", value);
            }
        }
        Ok(())
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

fn cookie_origin(uri: &Uri, route: &Route) -> CookieOrigin {
    CookieOrigin::new(
        route.target.hostname.clone(),
        route.target.port,
        uri.path(),
        route.secure,
    )
}

fn deadline_expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|d| Instant::now() >= d)
}

/// Bound a phase timeout by the remaining overall budget.
fn bounded(limit: Option<Duration>, deadline: Option<Instant>) -> Option<Duration> {
    let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
    match (limit, remaining) {
        (Some(limit), Some(remaining)) => Some(limit.min(remaining)),
        (None, remaining) => remaining,
        (limit, None) => limit,
    }
}

/// A phase timeout that fired because the overall budget ran out reports
/// as the total-deadline failure.
fn translate_deadline(e: Error, deadline: Option<Instant>, timeouts: &Timeouts) -> Error {
    if deadline_expired(deadline) {
        Error::TotalTimeout(timeouts.total.unwrap_or_default())
    } else {
        e
    }
}

/// Retry is reserved for exchanges where no response head was received:
/// a silently dropped connection, or an IO fault on a reused (stale)
/// connection.
fn is_retryable(e: &Error, was_reused: bool) -> bool {
    match e {
        Error::NoResponse => true,
        Error::Io(_) => was_reused,
        _ => false,
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    connector: Arc<dyn Connect>,
    pool: PoolConfig,
    planner: RoutePlanner,
    parser: ParserConfig,
    timeouts: Timeouts,
    credentials: Arc<dyn CredentialsProvider>,
    schemes: AuthSchemeRegistry,
    cookie_store: Option<Arc<CookieStore>>,
    authenticate: bool,
    handle_cookies: bool,
    retry_enabled: bool,
    max_auth_rounds: usize,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            connector: Arc::new(TcpConnector::new()),
            pool: PoolConfig::default(),
            planner: RoutePlanner::direct(),
            parser: ParserConfig::default(),
            timeouts: Timeouts::api_defaults(),
            credentials: Arc::new(BasicCredentialsProvider::new()),
            schemes: AuthSchemeRegistry::new(),
            cookie_store: None,
            authenticate: true,
            handle_cookies: true,
            retry_enabled: true,
            max_auth_rounds: 3,
        }
    }
}

impl ClientBuilder {
    /// Replace the transport connector.
    pub fn connector(mut self, connector: impl Connect + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool = config;
        self
    }

    /// Route all traffic through a proxy.
    pub fn proxy(mut self, proxy: HttpHost) -> Self {
        self.planner = RoutePlanner::via_proxy(proxy);
        self
    }

    pub fn route_planner(mut self, planner: RoutePlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn parser_config(mut self, config: ParserConfig) -> Self {
        self.parser = config;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn credentials_provider(
        mut self,
        provider: impl CredentialsProvider + 'static,
    ) -> Self {
        self.credentials = Arc::new(provider);
        self
    }

    pub fn scheme_registry(mut self, registry: AuthSchemeRegistry) -> Self {
        self.schemes = registry;
        self
    }

    /// Share a cookie store across clients.
    pub fn cookie_store(mut self, store: Arc<CookieStore>) -> Self {
        self.cookie_store = Some(store);
        self
    }

    /// Enable or disable authentication handling.
    pub fn authenticate(mut self, enabled: bool) -> Self {
        self.authenticate = enabled;
        self
    }

    /// Enable or disable cookie handling.
    pub fn handle_cookies(mut self, enabled: bool) -> Self {
        self.handle_cookies = enabled;
        self
    }

    /// Enable or disable the single idempotent retry.
    pub fn retry(mut self, enabled: bool) -> Self {
        self.retry_enabled = enabled;
        self
    }

    /// Cap authentication rounds per execution.
    pub fn max_auth_rounds(mut self, rounds: usize) -> Self {
        self.max_auth_rounds = rounds;
        self
    }

    pub fn build(self) -> Client {
        Client {
            connector: self.connector,
            manager: Arc::new(ConnectionManager::new(self.pool)),
            planner: self.planner,
            parser: ResponseParser::new(self.parser),
            timeouts: self.timeouts,
            credentials: self.credentials,
            schemes: Arc::new(self.schemes),
            cookie_store: self.cookie_store.unwrap_or_default(),
            authenticate: self.authenticate,
            handle_cookies: self.handle_cookies,
            retry_enabled: self.retry_enabled,
            max_auth_rounds: self.max_auth_rounds,
        }
    }
}
