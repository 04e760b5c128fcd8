//! Bounded connection pool.
//!
//! # Responsibilities
//! - Open sessions lazily up to `max_size`
//! - Queue callers FIFO when every connection is checked out
//! - Re-validate idle sessions whose last health check is stale
//! - Drain and close everything on shutdown
//!
//! # Design Decisions
//! - A fair semaphore hands out checkout rights; the free set itself sits
//!   behind one mutex, never touched across an await
//! - `PooledConnection` is an RAII guard: dropping it is the release, so
//!   every exit path (including a cancelled request) returns the connection
//! - Connections still checked out when the drain window closes are revoked,
//!   not yanked: their next query fails and they are closed on drop

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use crate::db::client::{probe_session, ConnectOptions, Connector, DbError, Row, Session};
use crate::db::postgres::redact_target;
use crate::observability::metrics;

/// Relaxed ordering is enough: ids only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum number of open sessions.
    pub max_size: usize,
    /// How long `acquire` waits for a free connection.
    pub acquire_timeout: Duration,
    /// Callers allowed to queue before `acquire` fails fast with `Exhausted`.
    /// `None` means unbounded.
    pub max_waiting: Option<usize>,
    /// Idle sessions older than this are probed before being handed out.
    pub idle_check_interval: Duration,
    pub connect: ConnectOptions,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 10,
            acquire_timeout: Duration::from_secs(5),
            max_waiting: None,
            idle_check_interval: Duration::from_secs(30),
            connect: ConnectOptions::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("database unreachable: {0}")]
    Connectivity(DbError),

    #[error("pool exhausted: {waiting} callers already waiting")]
    Exhausted { waiting: usize },

    #[error("timed out after {0:?} waiting for a connection")]
    AcquireTimeout(Duration),

    #[error("pool is shut down")]
    Closed,

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub max_size: usize,
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
    pub waiting: usize,
    pub acquired_total: u64,
    pub released_total: u64,
    pub closed: bool,
}

/// Outcome of [`ConnectionPool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolShutdownReport {
    /// Every checked-out connection came back within the drain window.
    pub drained: bool,
    /// Connections still in use when the window closed.
    pub forcibly_terminated: usize,
    pub idle_closed: usize,
}

struct IdleConnection {
    id: ConnectionId,
    session: Box<dyn Session>,
    last_health_check_at: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleConnection>,
    /// Revocation flags of checked-out connections.
    in_use: HashMap<ConnectionId, Arc<AtomicBool>>,
    /// Idle + in use + being opened.
    open: usize,
}

struct PoolInner {
    connector: Arc<dyn Connector>,
    target: String,
    options: PoolOptions,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    waiting: AtomicUsize,
    in_use_tx: watch::Sender<usize>,
    acquired_total: AtomicU64,
    released_total: AtomicU64,
    closed: AtomicBool,
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report_gauges(&self) {
        let (idle, in_use) = {
            let state = self.lock_state();
            (state.idle.len(), state.in_use.len())
        };
        metrics::record_pool_connections(idle, in_use);
    }
}

/// Shared handle to the pool. Cloning is cheap.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("target", &redact_target(&self.inner.target))
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionPool {
    /// Build the pool and prove the database is reachable.
    ///
    /// The probe connection is kept as the first idle session. Failure here
    /// is meant to stop the process from serving traffic.
    pub async fn initialize(
        connector: Arc<dyn Connector>,
        target: impl Into<String>,
        options: PoolOptions,
    ) -> Result<Self, PoolError> {
        let target = target.into();
        let max_size = options.max_size.max(1);
        let (in_use_tx, _) = watch::channel(0usize);

        let mut session = connector
            .open(&target, &options.connect)
            .await
            .map_err(PoolError::Connectivity)?;
        probe_session(session.as_mut())
            .await
            .map_err(PoolError::Connectivity)?;

        tracing::info!(
            database = %redact_target(&target),
            max_size,
            acquire_timeout_ms = options.acquire_timeout.as_millis() as u64,
            "Connected to database"
        );

        let mut state = PoolState::default();
        state.idle.push_back(IdleConnection {
            id: ConnectionId::new(),
            session,
            last_health_check_at: Instant::now(),
        });
        state.open = 1;

        Ok(Self {
            inner: Arc::new(PoolInner {
                connector,
                target,
                options: PoolOptions { max_size, ..options },
                permits: Arc::new(Semaphore::new(max_size)),
                state: Mutex::new(state),
                waiting: AtomicUsize::new(0),
                in_use_tx,
                acquired_total: AtomicU64::new(0),
                released_total: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Check out a connection, waiting FIFO behind earlier callers.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        if let Some(limit) = inner.options.max_waiting {
            let waiting = inner.waiting.load(Ordering::SeqCst);
            if inner.permits.available_permits() == 0 && waiting >= limit {
                tracing::warn!(waiting, limit, "Connection pool exhausted");
                return Err(PoolError::Exhausted { waiting });
            }
        }

        let permit = {
            let _queued = WaitingGuard::enter(&inner.waiting);
            let acquire = inner.permits.clone().acquire_owned();
            match tokio::time::timeout(inner.options.acquire_timeout, acquire).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(PoolError::Closed),
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = inner.options.acquire_timeout.as_millis() as u64,
                        "Timed out waiting for a pooled connection"
                    );
                    return Err(PoolError::AcquireTimeout(inner.options.acquire_timeout));
                }
            }
        };

        let (id, session, last_health_check_at) = self.checkout().await?;

        let revoked = Arc::new(AtomicBool::new(false));
        {
            let mut state = inner.lock_state();
            state.in_use.insert(id, revoked.clone());
        }
        inner.in_use_tx.send_modify(|n| *n += 1);
        inner.acquired_total.fetch_add(1, Ordering::SeqCst);
        inner.report_gauges();
        tracing::trace!(connection_id = %id, "Connection acquired");

        Ok(PooledConnection {
            id,
            session: Some(session),
            permit: Some(permit),
            pool: self.inner.clone(),
            revoked,
            broken: false,
            last_health_check_at,
        })
    }

    /// Find a usable idle session or open a new one. Caller holds a permit.
    async fn checkout(&self) -> Result<(ConnectionId, Box<dyn Session>, Instant), PoolError> {
        let inner = &self.inner;
        loop {
            let idle = inner.lock_state().idle.pop_front();

            if let Some(IdleConnection {
                id,
                mut session,
                mut last_health_check_at,
            }) = idle
            {
                let slot = OpenSlot::armed(inner);
                if session.is_closed() {
                    tracing::debug!(connection_id = %id, "Discarding closed idle connection");
                    continue;
                }
                if last_health_check_at.elapsed() >= inner.options.idle_check_interval {
                    if let Err(e) = probe_session(session.as_mut()).await {
                        tracing::warn!(connection_id = %id, error = %e, "Idle connection failed health check");
                        close_detached(session);
                        continue;
                    }
                    last_health_check_at = Instant::now();
                }
                slot.commit();
                return Ok((id, session, last_health_check_at));
            }

            inner.lock_state().open += 1;
            let slot = OpenSlot::armed(inner);
            let session = inner
                .connector
                .open(&inner.target, &inner.options.connect)
                .await?;
            slot.commit();
            let id = ConnectionId::new();
            tracing::debug!(connection_id = %id, "Opened new connection");
            return Ok((id, session, Instant::now()));
        }
    }

    /// Return a connection. Equivalent to dropping it.
    pub fn release(&self, connection: PooledConnection) {
        drop(connection);
    }

    /// Round-trip a trivial query on a pooled connection.
    pub async fn probe(&self) -> bool {
        let mut conn = match self.acquire().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(error = %e, "Database probe could not acquire a connection");
                return false;
            }
        };
        match conn.probe().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(connection_id = %conn.id(), error = %e, "Database probe failed");
                false
            }
        }
    }

    /// Stop handing out connections, wait up to `drain_timeout` for checked
    /// out ones to come back, then revoke whatever is left.
    pub async fn shutdown(&self, drain_timeout: Duration) -> PoolShutdownReport {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);
        inner.permits.close();

        let mut in_use = inner.in_use_tx.subscribe();
        let drained = tokio::time::timeout(drain_timeout, in_use.wait_for(|n| *n == 0))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false);

        let (forcibly_terminated, idle) = {
            let mut state = inner.lock_state();
            let forced = if drained {
                0
            } else {
                for flag in state.in_use.values() {
                    flag.store(true, Ordering::SeqCst);
                }
                state.in_use.len()
            };
            let idle: Vec<IdleConnection> = state.idle.drain(..).collect();
            state.open -= idle.len();
            (forced, idle)
        };

        let idle_closed = idle.len();
        for conn in idle {
            if let Err(e) = conn.session.close().await {
                tracing::debug!(connection_id = %conn.id, error = %e, "Error closing idle connection");
            }
        }

        if forcibly_terminated > 0 {
            tracing::warn!(
                forcibly_terminated,
                drain_timeout_ms = drain_timeout.as_millis() as u64,
                "Connection pool drain window exceeded"
            );
        } else {
            tracing::info!(idle_closed, "Connection pool shut down");
        }

        PoolShutdownReport {
            drained,
            forcibly_terminated,
            idle_closed,
        }
    }

    pub fn status(&self) -> PoolStatus {
        let inner = &self.inner;
        let state = inner.lock_state();
        PoolStatus {
            max_size: inner.options.max_size,
            open: state.open,
            idle: state.idle.len(),
            in_use: state.in_use.len(),
            waiting: inner.waiting.load(Ordering::SeqCst),
            acquired_total: inner.acquired_total.load(Ordering::SeqCst),
            released_total: inner.released_total.load(Ordering::SeqCst),
            closed: inner.closed.load(Ordering::SeqCst),
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }
}

/// A checked-out connection. Dropping it returns it to the pool.
pub struct PooledConnection {
    id: ConnectionId,
    session: Option<Box<dyn Session>>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
    revoked: Arc<AtomicBool>,
    broken: bool,
    last_health_check_at: Instant,
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("revoked", &self.revoked.load(Ordering::Relaxed))
            .field("broken", &self.broken)
            .finish()
    }
}

impl PooledConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn last_health_check_at(&self) -> Instant {
        self.last_health_check_at
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    pub async fn query(&mut self, text: &str, params: &[Value]) -> Result<Vec<Row>, DbError> {
        if self.is_revoked() {
            return Err(DbError::Terminated);
        }
        let session = self.session.as_mut().ok_or(DbError::Closed)?;
        let result = session.query(text, params).await;
        if let Err(DbError::Closed | DbError::Connect(_)) = &result {
            self.broken = true;
        }
        result
    }

    /// Run the liveness query on this connection.
    pub async fn probe(&mut self) -> Result<(), DbError> {
        if self.is_revoked() {
            return Err(DbError::Terminated);
        }
        let session = self.session.as_mut().ok_or(DbError::Closed)?;
        match probe_session(session.as_mut()).await {
            Ok(()) => {
                self.last_health_check_at = Instant::now();
                Ok(())
            }
            Err(e) => {
                self.broken = true;
                Err(e)
            }
        }
    }

    /// Close the session instead of returning it to the free set.
    pub fn discard(&mut self) {
        self.broken = true;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let pool = &self.pool;
        if let Some(session) = self.session.take() {
            let reusable = !self.broken
                && !self.is_revoked()
                && !pool.closed.load(Ordering::SeqCst)
                && !session.is_closed();

            let mut state = pool.lock_state();
            state.in_use.remove(&self.id);
            if reusable {
                state.idle.push_back(IdleConnection {
                    id: self.id,
                    session,
                    last_health_check_at: self.last_health_check_at,
                });
            } else {
                state.open -= 1;
                drop(state);
                tracing::debug!(connection_id = %self.id, "Closing connection on release");
                close_detached(session);
            }
        }

        pool.released_total.fetch_add(1, Ordering::SeqCst);
        pool.in_use_tx.send_modify(|n| *n = n.saturating_sub(1));
        pool.report_gauges();
        tracing::trace!(connection_id = %self.id, "Connection released");
        // Free the slot last so the next waiter finds the idle session.
        drop(self.permit.take());
    }
}

/// Counts a caller as queued while it waits for a permit.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Keeps `open` honest when a checkout is abandoned midway.
struct OpenSlot<'a> {
    inner: &'a PoolInner,
    armed: bool,
}

impl<'a> OpenSlot<'a> {
    fn armed(inner: &'a PoolInner) -> Self {
        Self { inner, armed: true }
    }

    fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for OpenSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.lock_state().open -= 1;
        }
    }
}

fn close_detached(session: Box<dyn Session>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                let _ = session.close().await;
            });
        }
        Err(_) => drop(session),
    }
}
