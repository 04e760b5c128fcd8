//! API scaffold library.
//!
//! An HTTP service scaffold built around a request-scoped resource and
//! validation pipeline: every request gets its own context, at most one
//! pooled database connection, validated input and contract-checked output.

// Core subsystems
pub mod config;
pub mod context;
pub mod db;
pub mod http;
pub mod pipeline;
pub mod schema;

// Application
pub mod routes;

// Cross-cutting concerns
pub mod health;
pub mod lifecycle;
pub mod observability;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
