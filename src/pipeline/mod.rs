//! Request pipeline subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → context_layer.rs (context entry, correlation id, request span)
//!     → binder.rs
//!         → validate input (schema)           400 on failure, no acquire
//!         → acquire pooled connection (db)    503 on exhausted/timeout
//!         → handler (route.rs)                4xx client fault, else 500
//!         → release connection
//!         → serialize output (schema)         strict: 500 / lenient: log once
//!     → error.rs renders every failure with one body shape
//!     → context entry destroyed, response sent
//! ```
//!
//! # Design Decisions
//! - Stages are plain functions run in a fixed order (state.rs tracks them)
//! - Handlers receive the context and connection as arguments

pub mod binder;
pub mod context_layer;
pub mod error;
pub mod route;
pub mod state;

pub use binder::{RawRequest, RouteBinder};
pub use context_layer::{establish_context, ContextLayerState};
pub use error::{ApiError, ErrorBody};
pub use route::{
    HandlerError, InputSource, Reply, RouteDescriptor, RouteHandler, RouteTable, TypedHandler,
};
pub use state::{PipelineState, Progress};
