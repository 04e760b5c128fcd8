//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Shutdown trigger (watch channel) + in-flight request tracker
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Coordinator (coordinator.rs):
//!     trigger → stop accepting → drain in-flight → close pool → exit code
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Every wait is bounded by the drain window; shutdown never hangs

pub mod coordinator;
pub mod shutdown;
pub mod signals;

pub use coordinator::{ShutdownCoordinator, ShutdownReport};
pub use shutdown::{InFlightGuard, InFlightTracker, Shutdown};
