//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack, prefix mount)
//!     → pipeline context layer (correlation id, request span)
//!     → business routes (pipeline binder) | operator.rs (health, docs, shutdown)
//!     → Send to client
//! ```

pub mod operator;
pub mod server;

pub use server::HttpServer;
