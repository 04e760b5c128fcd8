//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, APP_* environment overrides, deserialize)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//!     → handed to subsystems at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - Every field has a default except the output contract mode
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AppConfig, DatabaseConfig, HealthConfig, LifecycleConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, ServiceConfig, TimeoutConfig, ValidationConfig,
};
