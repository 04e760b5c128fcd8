//! API scaffold server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ context layer ──▶ route binder
//!                                     (correlation,     validate input
//!                                      request span)    acquire connection ──▶ pool ──▶ Postgres
//!                                                       handler
//!                                                       release connection
//!     Client Response                                   serialize output
//!     ◀────────────── echo ids   ◀──────────────────────┘
//!
//!     Signals / POST /shutdown ──▶ shutdown coordinator
//!                                  stop accepting, drain in-flight, close pool
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use api_scaffold::config::{load_config, AppConfig};
use api_scaffold::db::{ConnectionPool, PostgresConnector};
use api_scaffold::http::HttpServer;
use api_scaffold::lifecycle::{signals, InFlightTracker, Shutdown, ShutdownCoordinator};
use api_scaffold::observability::{logging, metrics};
use api_scaffold::routes;

#[derive(Parser)]
#[command(name = "api-server")]
#[command(about = "HTTP API scaffold with validated routes and pooled database connections", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {}: {}", cli.config.display(), e);
            process::exit(1);
        }
    };

    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    tracing::info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting"
    );

    let code = match start(config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(fatal = true, error = %e, "Startup failed");
            1
        }
    };

    tracing::info!(exit_code = code, "Shutdown complete");
    process::exit(code);
}

/// Bring every subsystem up, serve until shutdown, and return the exit code.
async fn start(config: AppConfig) -> Result<i32, Box<dyn std::error::Error>> {
    tracing::info!(
        bind_address = %config.listener.bind_address,
        prefix = %config.service.prefix,
        output_contract = config.validation.output_contract.as_str(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
        tracing::info!(address = %addr, "Metrics exporter listening");
    }

    let pool = ConnectionPool::initialize(
        Arc::new(PostgresConnector),
        config.database.url.clone(),
        config.database.pool_options(),
    )
    .await?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let in_flight = InFlightTracker::new();
    let server = HttpServer::new(
        &config,
        Some(pool.clone()),
        routes::routes(),
        shutdown.clone(),
        in_flight.clone(),
    );

    let handle = tokio::spawn(server.run(listener));
    tokio::spawn(signals::listen(shutdown.clone()));

    let coordinator = ShutdownCoordinator::new(
        shutdown,
        in_flight,
        Some(pool),
        Duration::from_secs(config.lifecycle.drain_timeout_secs),
    );
    let report = coordinator.run(handle).await;

    tracing::info!(
        drained = report.drained,
        abandoned = report.abandoned,
        errors = report.errors.len(),
        "Shutdown finished"
    );
    Ok(report.exit_code())
}
