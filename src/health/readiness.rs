//! Readiness probing.
//!
//! # Responsibilities
//! - Run named sub-probes concurrently, each bounded by a timeout
//! - Aggregate them into `ok`, `degraded` or `down`
//! - Report `down` while the service drains
//! - Optionally re-check on an interval and log status changes

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::time;

use crate::db::ConnectionPool;
use crate::lifecycle::Shutdown;

/// A named check contributing to readiness.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn check(&self) -> bool;
}

/// Database reachability via a pooled round trip.
#[derive(Debug, Clone)]
pub struct DatabaseProbe {
    pool: ConnectionPool,
}

impl DatabaseProbe {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Probe for DatabaseProbe {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> bool {
        self.pool.probe().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub status: HealthStatus,
    pub checks: BTreeMap<String, bool>,
}

impl ReadinessReport {
    fn from_checks(checks: BTreeMap<String, bool>, draining: bool) -> Self {
        let passed = checks.values().filter(|ok| **ok).count();
        let status = if draining || (!checks.is_empty() && passed == 0) {
            HealthStatus::Down
        } else if passed == checks.len() {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        Self { status, checks }
    }
}

#[derive(Clone)]
pub struct Readiness {
    probes: Vec<Arc<dyn Probe>>,
    probe_timeout: Duration,
    shutdown: Option<Shutdown>,
}

impl Readiness {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            probe_timeout,
            shutdown: None,
        }
    }

    pub fn with_probe(mut self, probe: impl Probe) -> Self {
        self.probes.push(Arc::new(probe));
        self
    }

    /// Report `down` once `shutdown` has been triggered.
    pub fn draining_on(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn is_draining(&self) -> bool {
        self.shutdown.as_ref().is_some_and(Shutdown::is_triggered)
    }

    pub async fn check(&self) -> ReadinessReport {
        let results = join_all(self.probes.iter().map(|probe| async move {
            let ok = match time::timeout(self.probe_timeout, probe.check()).await {
                Ok(ok) => ok,
                Err(_) => {
                    tracing::warn!(
                        probe = probe.name(),
                        timeout_ms = self.probe_timeout.as_millis() as u64,
                        "Readiness probe timed out"
                    );
                    false
                }
            };
            (probe.name().to_string(), ok)
        }))
        .await;

        ReadinessReport::from_checks(results.into_iter().collect(), self.is_draining())
    }

    /// Re-check every `interval` until shutdown, logging status changes.
    pub async fn watch(self, interval: Duration, shutdown: Shutdown) {
        let mut ticker = time::interval(interval);
        let mut last: Option<HealthStatus> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.check().await;
                    if last != Some(report.status) {
                        match report.status {
                            HealthStatus::Ok => tracing::info!(checks = ?report.checks, "Service ready"),
                            _ => tracing::warn!(status = ?report.status, checks = ?report.checks, "Service not ready"),
                        }
                        last = Some(report.status);
                    }
                }
                _ = shutdown.wait() => {
                    tracing::debug!("Readiness watcher stopping");
                    break;
                }
            }
        }
    }
}
