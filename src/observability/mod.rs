//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, panic hook)
//!     → metrics.rs (counters, gauges, histograms)
//!     → dedupe.rs (suppresses repeated error lines)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Correlation and request ids ride on the per-request span
//! - Metrics are cheap (atomic increments)

pub mod dedupe;
pub mod logging;
pub mod metrics;
