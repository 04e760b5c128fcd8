//! Downstream database client interface.
//!
//! The pool only needs three things from a driver: open a session, run a
//! query on it, close it. Anything implementing [`Connector`] can sit under
//! the pool; `postgres.rs` is the production implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Errors raised by a database session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("query failed: {0}")]
    Query(String),

    #[error("parameter {index} cannot be bound as {expected}")]
    Param { index: usize, expected: String },

    #[error("session is closed")]
    Closed,

    #[error("connection was terminated by pool shutdown")]
    Terminated,
}

/// Options applied when opening a session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    /// Reported to the server where the driver supports it.
    pub application_name: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            application_name: None,
        }
    }
}

/// Opens sessions against a connection target.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, target: &str, options: &ConnectOptions) -> Result<Box<dyn Session>, DbError>;
}

/// A live database session.
#[async_trait]
pub trait Session: Send + 'static {
    async fn query(&mut self, text: &str, params: &[Value]) -> Result<Vec<Row>, DbError>;

    async fn close(self: Box<Self>) -> Result<(), DbError>;

    /// True once the underlying transport is known to be gone.
    fn is_closed(&self) -> bool;
}

/// Trivial round trip used for liveness checks.
pub const PROBE_QUERY: &str = "SELECT 1 AS one";

/// Run [`PROBE_QUERY`] and report whether it answered.
pub async fn probe_session(session: &mut dyn Session) -> Result<(), DbError> {
    session.query(PROBE_QUERY, &[]).await.map(|_| ())
}
