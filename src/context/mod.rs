//! Request context subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → store.rs (create handle, isolated entry)
//!     → request.rs (correlation id adopted or generated, request id generated)
//!     → handlers receive RequestContext explicitly
//!     → pipeline binds/unbinds the pooled connection id
//!     → ContextScope dropped → entry destroyed
//! ```
//!
//! # Design Decisions
//! - No ambient/thread-local lookup: the context is an explicit argument
//! - Entry lifetime is tied to an RAII scope, so cancelled requests clean up too

pub mod request;
pub mod store;

pub use request::{RequestContext, CORRELATION_ID_HEADER, REQUEST_ID_HEADER};
pub use store::{ContextError, ContextHandle, ContextKey, ContextScope, ContextStore, ContextValue};
