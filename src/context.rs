//! Per-execution state threaded through interceptors and the chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::auth::AuthExchange;
use crate::cookie::{CookieOrigin, CookieSpec, CookieStore};
use crate::request::Request;
use crate::route::Route;

#[derive(Default)]
struct AbortFlag {
    aborted: AtomicBool,
    notify: Notify,
}

/// Caller-held handle that cancels an in-flight execution.
///
/// Aborting unblocks any pending pool lease or socket operation; the
/// execution fails with [`crate::Error::Aborted`].
#[derive(Clone)]
pub struct AbortHandle {
    inner: Arc<AbortFlag>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::Acquire)
    }
}

/// State bag scoped to one `execute()` call, which may span several wire
/// round-trips.
///
/// Interceptors read and update it; after the call the caller can inspect
/// the route and the fully materialized request that went on the wire.
pub struct ExecutionContext {
    /// Route computed for the call.
    pub route: Option<Route>,
    /// Authentication exchange with the target host.
    pub target_auth: AuthExchange,
    /// Authentication exchange with the proxy, if the route has one.
    pub proxy_auth: AuthExchange,
    /// Origin cookies are validated against and selected for.
    pub cookie_origin: Option<CookieOrigin>,
    /// Active cookie parsing/matching rules.
    pub cookie_spec: CookieSpec,
    /// Store cookies are persisted into.
    pub cookie_store: Option<Arc<CookieStore>>,
    abort: Arc<AbortFlag>,
    request: Option<Request>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            route: None,
            target_auth: AuthExchange::new(),
            proxy_auth: AuthExchange::new(),
            cookie_origin: None,
            cookie_spec: CookieSpec::new(),
            cookie_store: None,
            abort: Arc::new(AbortFlag::default()),
            request: None,
        }
    }

    /// Handle for cancelling the execution from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            inner: self.abort.clone(),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.aborted.load(Ordering::Acquire)
    }

    /// Resolves once the execution is aborted.
    pub(crate) async fn aborted(&self) {
        let notified = self.abort.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_aborted() {
            return;
        }
        notified.await;
    }

    /// The request as last materialized by the execution chain, with all
    /// interceptor-added headers. Exposed for diagnostics and testing.
    pub fn final_request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    pub(crate) fn set_final_request(&mut self, request: Request) {
        self.request = Some(request);
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
