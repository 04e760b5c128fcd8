//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.
//! Every section except `validation` has defaults; the output contract mode
//! must be stated explicitly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::{ConnectOptions, PoolOptions};
use crate::schema::ContractMode;

/// Root configuration for the service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub listener: ListenerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    /// Output contract policy. Required.
    pub validation: ValidationConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Defaults everywhere, with the given contract mode.
    pub fn with_contract(output_contract: ContractMode) -> Self {
        Self {
            service: ServiceConfig::default(),
            listener: ListenerConfig::default(),
            database: DatabaseConfig::default(),
            validation: ValidationConfig { output_contract },
            timeouts: TimeoutConfig::default(),
            lifecycle: LifecycleConfig::default(),
            health: HealthConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Service identity and route mounting.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name reported in logs and the OpenAPI document.
    pub name: String,

    pub description: String,

    /// Prefix every route is mounted under (e.g., "/api"). Empty for root.
    pub prefix: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "api-scaffold".to_string(),
            description: "HTTP API with validated routes and pooled database access".to_string(),
            prefix: "/api".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest accepted request body in bytes.
    pub body_limit_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            body_limit_bytes: 1024 * 1024,
        }
    }
}

/// Database pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL or key/value connection string.
    pub url: String,

    pub max_connections: usize,

    /// How long a request waits for a free connection.
    pub acquire_timeout_ms: u64,

    pub connect_timeout_ms: u64,

    /// Callers allowed to queue for a connection before failing fast.
    /// Unset means unbounded.
    pub max_waiting: Option<usize>,

    /// Idle connections older than this are probed before reuse.
    pub idle_check_interval_secs: u64,

    pub application_name: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://postgres@localhost:5432/postgres".to_string(),
            max_connections: 10,
            acquire_timeout_ms: 5_000,
            connect_timeout_ms: 5_000,
            max_waiting: None,
            idle_check_interval_secs: 30,
            application_name: Some("api-scaffold".to_string()),
        }
    }
}

impl DatabaseConfig {
    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_size: self.max_connections,
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            max_waiting: self.max_waiting,
            idle_check_interval: Duration::from_secs(self.idle_check_interval_secs),
            connect: ConnectOptions {
                connect_timeout: Duration::from_millis(self.connect_timeout_ms),
                application_name: self.application_name.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidationConfig {
    /// `strict` or `lenient`.
    pub output_contract: ContractMode,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Shutdown behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Bounded time for in-flight requests to finish on shutdown.
    pub drain_timeout_secs: u64,

    /// Expose `POST {prefix}/shutdown`.
    pub shutdown_endpoint: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 10,
            shutdown_endpoint: false,
        }
    }
}

/// Readiness probing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Upper bound for each readiness probe.
    pub probe_timeout_ms: u64,

    /// Background re-check interval; 0 disables the watcher.
    pub check_interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 2_000,
            check_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Distinct error signatures remembered before the dedupe cache resets.
    pub dedupe_capacity: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            dedupe_capacity: crate::observability::dedupe::DEFAULT_DEDUPE_CAPACITY,
        }
    }
}
