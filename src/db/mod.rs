//! Database subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     pool.rs initialize → connector opens first session → probe (SELECT 1)
//!     → failure is fatal; success keeps the session idle
//!
//! Per request:
//!     pipeline → pool.acquire (FIFO wait, bounded by acquire timeout)
//!     → handler queries through PooledConnection
//!     → guard dropped → session back in the free set
//!
//! Shutdown:
//!     pool.shutdown → refuse new acquires → drain window → revoke stragglers
//! ```
//!
//! # Design Decisions
//! - The driver sits behind the `Connector`/`Session` traits (client.rs)
//! - One connection per request, never per query and never ambient

pub mod client;
pub mod pool;
pub mod postgres;

pub use client::{ConnectOptions, Connector, DbError, Row, Session, PROBE_QUERY};
pub use pool::{ConnectionId, ConnectionPool, PoolError, PoolOptions, PoolShutdownReport, PoolStatus, PooledConnection};
pub use postgres::PostgresConnector;
