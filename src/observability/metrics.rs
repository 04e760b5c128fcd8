//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define pipeline metrics (requests, latency, validation failures, pool usage)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `api_requests_total` (counter): requests by route, status
//! - `api_request_duration_seconds` (histogram): latency by route
//! - `api_validation_failures_total` (counter): input/output failures by kind
//! - `api_pool_connections` (gauge): pooled connections by state (idle, in_use)
//! - `api_pool_acquire_failures_total` (counter): failed acquisitions by reason
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so library code and
//!   tests call these helpers unconditionally

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const REQUESTS_TOTAL: &str = "api_requests_total";
pub const REQUEST_DURATION: &str = "api_request_duration_seconds";
pub const VALIDATION_FAILURES: &str = "api_validation_failures_total";
pub const POOL_CONNECTIONS: &str = "api_pool_connections";
pub const POOL_ACQUIRE_FAILURES: &str = "api_pool_acquire_failures_total";

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    describe_counter!(REQUESTS_TOTAL, "Total requests handled, by route and status");
    describe_histogram!(REQUEST_DURATION, "Request latency in seconds, by route");
    describe_counter!(VALIDATION_FAILURES, "Schema validation failures, by kind");
    describe_gauge!(POOL_CONNECTIONS, "Pooled database connections, by state");
    describe_counter!(POOL_ACQUIRE_FAILURES, "Failed connection acquisitions, by reason");

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    let route = format!("{} {}", method, route);
    counter!(REQUESTS_TOTAL, "route" => route.clone(), "status" => status.to_string()).increment(1);
    histogram!(REQUEST_DURATION, "route" => route).record(start.elapsed().as_secs_f64());
}

/// `kind` is `input` or `output`.
pub fn record_validation_failure(kind: &'static str) {
    counter!(VALIDATION_FAILURES, "kind" => kind).increment(1);
}

pub fn record_pool_connections(idle: usize, in_use: usize) {
    gauge!(POOL_CONNECTIONS, "state" => "idle").set(idle as f64);
    gauge!(POOL_CONNECTIONS, "state" => "in_use").set(in_use as f64);
}

pub fn record_acquire_failure(reason: &'static str) {
    counter!(POOL_ACQUIRE_FAILURES, "reason" => reason).increment(1);
}
