//! Graceful shutdown sequence.
//!
//! # Sequence
//! ```text
//! trigger (signal or POST /shutdown)
//!     → 1. stop accepting: the server's graceful-shutdown future resolves
//!     → 2. drain: wait for in-flight requests, bounded by the drain window
//!     → 3. pool.shutdown with whatever is left of the window
//!     → 4. exit code: 0 when everything drained cleanly, 1 otherwise
//! ```

use std::io;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::db::{ConnectionPool, PoolShutdownReport};
use crate::lifecycle::shutdown::{InFlightTracker, Shutdown};

/// What happened during shutdown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// In-flight requests finished inside the drain window.
    pub drained: bool,
    /// Requests still running when the window closed.
    pub abandoned: u64,
    pub pool: Option<PoolShutdownReport>,
    pub errors: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.drained && self.errors.is_empty() && self.pool.map_or(true, |p| p.drained)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    shutdown: Shutdown,
    in_flight: InFlightTracker,
    pool: Option<ConnectionPool>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(
        shutdown: Shutdown,
        in_flight: InFlightTracker,
        pool: Option<ConnectionPool>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            shutdown,
            in_flight,
            pool,
            drain_timeout,
        }
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn in_flight(&self) -> &InFlightTracker {
        &self.in_flight
    }

    /// Wait for a trigger (or for the server to stop on its own), then run
    /// the shutdown sequence.
    pub async fn run(&self, mut server: JoinHandle<io::Result<()>>) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        let early_exit = tokio::select! {
            biased;
            _ = self.shutdown.wait() => None,
            result = &mut server => Some(result),
        };

        if let Some(result) = early_exit {
            // The server stopped without being asked to.
            self.shutdown.trigger();
            let message = match result {
                Ok(Ok(())) => "server stopped unexpectedly".to_string(),
                Ok(Err(e)) => format!("server failed: {}", e),
                Err(e) => format!("server task panicked: {}", e),
            };
            tracing::error!(fatal = true, error = %message, "HTTP server terminated");
            report.errors.push(message);
            report.drained = self.in_flight.active_count() == 0;
            report.pool = self.close_pool(Duration::ZERO).await;
            return report;
        }

        self.drain(server, report).await
    }

    async fn drain(&self, mut server: JoinHandle<io::Result<()>>, mut report: ShutdownReport) -> ShutdownReport {
        let started = Instant::now();
        tracing::info!(
            in_flight = self.in_flight.active_count(),
            drain_timeout_ms = self.drain_timeout.as_millis() as u64,
            "Shutdown initiated, draining in-flight requests"
        );

        report.drained = self.in_flight.wait_idle(self.drain_timeout).await;
        if !report.drained {
            report.abandoned = self.in_flight.active_count();
            tracing::warn!(abandoned = report.abandoned, "Drain window exceeded");
        }

        // Connections from idle keep-alive clients close promptly; anything
        // still open after the window is cut off.
        let remaining = self.drain_timeout.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, &mut server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => report.errors.push(format!("server failed: {}", e)),
            Ok(Err(e)) => report.errors.push(format!("server task panicked: {}", e)),
            Err(_) => {
                server.abort();
                report.drained = false;
                tracing::warn!("Server did not stop within the drain window, aborting");
            }
        }

        let remaining = self.drain_timeout.saturating_sub(started.elapsed());
        report.pool = self.close_pool(remaining).await;

        tracing::info!(
            drained = report.drained,
            elapsed_ms = started.elapsed().as_millis() as u64,
            exit_code = report.exit_code(),
            "Shutdown complete"
        );
        report
    }

    async fn close_pool(&self, drain_timeout: Duration) -> Option<PoolShutdownReport> {
        match &self.pool {
            Some(pool) => Some(pool.shutdown(drain_timeout).await),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(drain: Duration) -> ShutdownCoordinator {
        ShutdownCoordinator::new(Shutdown::new(), InFlightTracker::new(), None, drain)
    }

    fn server_until(shutdown: Shutdown) -> JoinHandle<io::Result<()>> {
        tokio::spawn(async move {
            shutdown.wait().await;
            Ok(())
        })
    }

    #[tokio::test]
    async fn clean_drain_exits_zero() {
        let coord = coordinator(Duration::from_millis(200));
        let server = server_until(coord.shutdown().clone());

        let guard = coord.in_flight().track();
        let runner = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.run(server).await })
        };

        coord.shutdown().trigger();
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        let report = runner.await.unwrap();
        assert!(report.drained);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn exceeded_window_exits_one_within_bound() {
        let drain = Duration::from_millis(50);
        let coord = coordinator(drain);
        let server = server_until(coord.shutdown().clone());
        let _stuck = coord.in_flight().track();

        coord.shutdown().trigger();
        let started = Instant::now();
        let report = coord.run(server).await;

        assert!(!report.drained);
        assert_eq!(report.abandoned, 1);
        assert_eq!(report.exit_code(), 1);
        assert!(started.elapsed() < drain + Duration::from_millis(100));
    }

    #[tokio::test]
    async fn unexpected_server_exit_is_an_error() {
        let coord = coordinator(Duration::from_millis(50));
        let server = tokio::spawn(async { Err(io::Error::other("listener died")) });

        let report = coord.run(server).await;
        assert!(coord.shutdown().is_triggered());
        assert_eq!(report.exit_code(), 1);
        assert!(report.errors[0].contains("listener died"));
    }
}
