//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! GET {prefix}/health
//!     → readiness.rs (run probes concurrently, each with a timeout)
//!     → DatabaseProbe → pool.probe() → SELECT 1 on a pooled connection
//!     → aggregate: ok | degraded | down (down while draining)
//!
//! GET {prefix}/health/live
//!     → process is up; no dependencies consulted
//! ```
//!
//! # Design Decisions
//! - Probes borrow a pooled connection, so an exhausted pool reads as down
//! - Readiness never caches: each call reflects the database right now

pub mod readiness;

pub use readiness::{DatabaseProbe, HealthStatus, Probe, Readiness, ReadinessReport};
