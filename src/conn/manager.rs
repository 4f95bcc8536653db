//! Route-keyed connection pool with strict per-route and total caps.
//!
//! Leases beyond the caps block until a release or eviction frees a slot;
//! this is deliberate backpressure instead of unbounded socket creation.
//! The pool is the only structure shared between executions, so all state
//! lives behind one lock and is touched only briefly.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};

use crate::conn::ManagedConnection;
use crate::error::{Error, Result};
use crate::route::Route;

/// Pool limits and idle policy.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections (leased + idle) per route.
    pub max_per_route: usize,
    /// Maximum connections (leased + idle) across all routes.
    pub max_total: usize,
    /// Idle bound applied when a response declares no keep-alive duration.
    pub max_idle: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_route: 2,
            max_total: 20,
            max_idle: Duration::from_secs(30),
        }
    }
}

struct IdleEntry {
    conn: ManagedConnection,
    idle_since: Instant,
    expires_at: Instant,
}

impl IdleEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Default)]
struct PoolState {
    idle: HashMap<Route, VecDeque<IdleEntry>>,
    leased_per_route: HashMap<Route, usize>,
    leased_total: usize,
    next_id: u64,
    closed: bool,
}

impl PoolState {
    fn idle_count(&self, route: &Route) -> usize {
        self.idle.get(route).map_or(0, VecDeque::len)
    }

    fn idle_total(&self) -> usize {
        self.idle.values().map(VecDeque::len).sum()
    }

    fn allocated(&self, route: &Route) -> usize {
        self.leased_per_route.get(route).copied().unwrap_or(0) + self.idle_count(route)
    }

    fn allocated_total(&self) -> usize {
        self.leased_total + self.idle_total()
    }

    fn mark_leased(&mut self, route: &Route) {
        *self.leased_per_route.entry(route.clone()).or_insert(0) += 1;
        self.leased_total += 1;
    }

    fn mark_released(&mut self, route: &Route) {
        if let Some(count) = self.leased_per_route.get_mut(route) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.leased_per_route.remove(route);
            }
        }
        self.leased_total = self.leased_total.saturating_sub(1);
    }

    /// Drop the least-recently-used idle entry across all routes.
    fn evict_oldest_idle(&mut self) -> Option<ManagedConnection> {
        let route = self
            .idle
            .iter()
            .filter_map(|(route, entries)| {
                entries.back().map(|e| (route.clone(), e.idle_since))
            })
            .min_by_key(|(_, idle_since)| *idle_since)
            .map(|(route, _)| route)?;
        let entries = self.idle.get_mut(&route)?;
        let entry = entries.pop_back();
        if entries.is_empty() {
            self.idle.remove(&route);
        }
        entry.map(|e| e.conn)
    }
}

/// Statistics snapshot for monitoring.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub leased: usize,
    pub idle: usize,
    pub max_per_route: usize,
    pub max_total: usize,
}

/// Owns the connection pool; exposes only lease/release/sweep operations.
pub struct ConnectionManager {
    state: Mutex<PoolState>,
    released: Notify,
    config: PoolConfig,
}

enum Attempt {
    Leased(ManagedConnection),
    Evicted(Vec<ManagedConnection>),
    Full,
}

impl ConnectionManager {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            released: Notify::new(),
            config,
        }
    }

    /// Lease a connection for the route, blocking up to `timeout` while the
    /// caps are exhausted. Returns an idle pooled connection when one is
    /// available, otherwise a fresh unopened one.
    pub async fn lease(
        &self,
        route: &Route,
        timeout: Option<Duration>,
    ) -> Result<ManagedConnection> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let mut closeable = Vec::new();
            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(Error::connection("connection manager is shut down"));
                }
                match self.attempt_lease(&mut state, route, &mut closeable) {
                    Attempt::Leased(conn) => {
                        drop(state);
                        for mut stale in closeable {
                            stale.close().await;
                        }
                        return Ok(conn);
                    }
                    Attempt::Evicted(evicted) => {
                        drop(state);
                        for mut conn in evicted {
                            conn.close().await;
                        }
                        for mut stale in closeable {
                            stale.close().await;
                        }
                        continue;
                    }
                    Attempt::Full => {
                        // Register for wakeup while still holding the lock so
                        // a release between unlock and await cannot be missed.
                        let notified = self.released.notified();
                        tokio::pin!(notified);
                        notified.as_mut().enable();
                        drop(state);
                        for mut stale in closeable {
                            stale.close().await;
                        }
                        match deadline {
                            Some(deadline) => {
                                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                                    let waited = timeout.unwrap_or_default();
                                    tracing::debug!(route = %route, "lease timed out");
                                    return Err(Error::PoolLeaseTimeout(waited));
                                }
                            }
                            None => notified.await,
                        }
                    }
                }
            }
        }
    }

    fn attempt_lease(
        &self,
        state: &mut PoolState,
        route: &Route,
        closeable: &mut Vec<ManagedConnection>,
    ) -> Attempt {
        // Lazily reap expired idle entries for this route.
        if let Some(entries) = state.idle.get_mut(route) {
            let now = Instant::now();
            let mut kept = VecDeque::with_capacity(entries.len());
            while let Some(entry) = entries.pop_front() {
                if entry.is_expired(now) {
                    closeable.push(entry.conn);
                } else {
                    kept.push_back(entry);
                }
            }
            *entries = kept;
        }

        if let Some(entries) = state.idle.get_mut(route) {
            if let Some(entry) = entries.pop_front() {
                if entries.is_empty() {
                    state.idle.remove(route);
                }
                state.mark_leased(route);
                let mut conn = entry.conn;
                conn.mark_reused();
                tracing::debug!(route = %route, id = conn.id(), "reusing pooled connection");
                return Attempt::Leased(conn);
            }
        }

        if state.allocated(route) < self.config.max_per_route
            && state.allocated_total() < self.config.max_total
        {
            let id = state.next_id;
            state.next_id += 1;
            state.mark_leased(route);
            tracing::debug!(route = %route, id, "leasing new connection");
            return Attempt::Leased(ManagedConnection::new(route.clone(), id));
        }

        // The total cap may be consumed by idle connections on other
        // routes; evict the oldest to make room.
        if state.allocated(route) < self.config.max_per_route
            && state.allocated_total() >= self.config.max_total
            && state.idle_total() > 0
        {
            let mut evicted = Vec::new();
            if let Some(conn) = state.evict_oldest_idle() {
                tracing::debug!(id = conn.id(), "evicting idle connection to free capacity");
                evicted.push(conn);
            }
            return Attempt::Evicted(evicted);
        }

        Attempt::Full
    }

    /// Return a connection to the pool.
    ///
    /// Kept only if the transport is still open and the reuse strategy
    /// permitted reuse; `valid_for` bounds how long it may sit idle
    /// (defaulting to the pool's idle bound).
    pub async fn release(&self, conn: ManagedConnection, valid_for: Option<Duration>) {
        let keep = conn.is_open() && conn.is_reusable();
        let mut to_close = None;
        {
            let mut state = self.state.lock().await;
            state.mark_released(conn.route());
            if keep && !state.closed {
                let now = Instant::now();
                let validity = valid_for.unwrap_or(self.config.max_idle);
                tracing::debug!(route = %conn.route(), id = conn.id(), ?validity, "returning connection to pool");
                state
                    .idle
                    .entry(conn.route().clone())
                    .or_default()
                    .push_front(IdleEntry {
                        conn,
                        idle_since: now,
                        expires_at: now + validity,
                    });
            } else {
                to_close = Some(conn);
            }
        }
        if let Some(mut conn) = to_close {
            tracing::debug!(route = %conn.route(), id = conn.id(), "discarding connection");
            conn.close().await;
        }
        self.released.notify_waiters();
    }

    /// Close and drop a connection regardless of its reusable state.
    pub async fn discard(&self, mut conn: ManagedConnection) {
        conn.close().await;
        self.release(conn, None).await;
    }

    /// Close idle connections that have been unused for at least
    /// `threshold`.
    pub async fn close_idle(&self, threshold: Duration) {
        let now = Instant::now();
        self.sweep(|entry| now.saturating_duration_since(entry.idle_since) >= threshold)
            .await;
    }

    /// Close idle connections past their keep-alive validity.
    pub async fn close_expired(&self) {
        let now = Instant::now();
        self.sweep(|entry| entry.is_expired(now)).await;
    }

    async fn sweep(&self, mut expired: impl FnMut(&IdleEntry) -> bool) {
        let mut closeable = Vec::new();
        {
            let mut state = self.state.lock().await;
            for entries in state.idle.values_mut() {
                let mut kept = VecDeque::with_capacity(entries.len());
                while let Some(entry) = entries.pop_front() {
                    if expired(&entry) {
                        closeable.push(entry.conn);
                    } else {
                        kept.push_back(entry);
                    }
                }
                *entries = kept;
            }
            state.idle.retain(|_, entries| !entries.is_empty());
        }
        for mut conn in closeable {
            conn.close().await;
        }
        self.released.notify_waiters();
    }

    /// Close all idle connections and refuse further pooling.
    pub async fn shutdown(&self) {
        let mut closeable = Vec::new();
        {
            let mut state = self.state.lock().await;
            state.closed = true;
            for (_, entries) in state.idle.drain() {
                for entry in entries {
                    closeable.push(entry.conn);
                }
            }
        }
        for mut conn in closeable {
            conn.close().await;
        }
        self.released.notify_waiters();
    }

    /// Spawn a background task that periodically sweeps expired idle
    /// connections, complementing the lazy reaping done at lease time.
    pub fn spawn_sweeper(self: &std::sync::Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = std::sync::Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                manager.close_expired().await;
            }
        })
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            leased: state.leased_total,
            idle: state.idle_total(),
            max_per_route: self.config.max_per_route,
            max_total: self.config.max_total,
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::HttpHost;

    fn route(host: &str) -> Route {
        Route::direct(HttpHost::new(host, 80, false))
    }

    #[tokio::test]
    async fn test_lease_respects_per_route_cap() {
        let manager = ConnectionManager::new(PoolConfig {
            max_per_route: 2,
            max_total: 10,
            ..PoolConfig::default()
        });
        let r = route("a");
        let c1 = manager.lease(&r, None).await.unwrap();
        let _c2 = manager.lease(&r, None).await.unwrap();
        let err = manager
            .lease(&r, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PoolLeaseTimeout(_)));

        // Releasing one frees a slot; unopened connections are not pooled.
        manager.release(c1, None).await;
        let c3 = manager.lease(&r, Some(Duration::from_millis(20))).await;
        assert!(c3.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_routes_do_not_contend() {
        let manager = ConnectionManager::new(PoolConfig {
            max_per_route: 1,
            max_total: 10,
            ..PoolConfig::default()
        });
        let _a = manager.lease(&route("a"), None).await.unwrap();
        let b = manager
            .lease(&route("b"), Some(Duration::from_millis(20)))
            .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_blocked_lease_proceeds_after_release() {
        let manager = std::sync::Arc::new(ConnectionManager::new(PoolConfig {
            max_per_route: 1,
            max_total: 1,
            ..PoolConfig::default()
        }));
        let r = route("a");
        let conn = manager.lease(&r, None).await.unwrap();

        let waiter = {
            let manager = manager.clone();
            let r = r.clone();
            tokio::spawn(async move { manager.lease(&r, Some(Duration::from_secs(2))).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.release(conn, None).await;
        let leased = waiter.await.unwrap();
        assert!(leased.is_ok());
    }

    #[tokio::test]
    async fn test_total_cap_counts_all_routes() {
        let manager = ConnectionManager::new(PoolConfig {
            max_per_route: 5,
            max_total: 2,
            ..PoolConfig::default()
        });
        let _a = manager.lease(&route("a"), None).await.unwrap();
        let _b = manager.lease(&route("b"), None).await.unwrap();
        let err = manager
            .lease(&route("c"), Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PoolLeaseTimeout(_)));

        let stats = manager.stats().await;
        assert_eq!(stats.leased, 2);
        assert_eq!(stats.idle, 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_leases() {
        let manager = ConnectionManager::default();
        manager.shutdown().await;
        let err = manager.lease(&route("a"), None).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}
