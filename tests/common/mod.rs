//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use api_scaffold::config::AppConfig;
use api_scaffold::db::{
    ConnectOptions, ConnectionPool, Connector, DbError, PoolOptions, Row, Session, PROBE_QUERY,
};
use api_scaffold::http::server::App;
use api_scaffold::http::HttpServer;
use api_scaffold::lifecycle::{InFlightTracker, Shutdown};
use api_scaffold::pipeline::RouteTable;
use api_scaffold::schema::ContractMode;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use serde_json::{json, Value};

/// In-memory database with a reachability switch and per-query latency.
#[derive(Default)]
pub struct ScriptedDb {
    unreachable: AtomicBool,
    latency_ms: AtomicU64,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub queries: AtomicUsize,
}

impl ScriptedDb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(ScriptedConnector(self.clone()))
    }

    fn is_down(&self) -> bool {
        self.unreachable.load(Ordering::SeqCst)
    }
}

struct ScriptedConnector(Arc<ScriptedDb>);

struct ScriptedSession(Arc<ScriptedDb>);

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, _target: &str, _options: &ConnectOptions) -> Result<Box<dyn Session>, DbError> {
        if self.0.is_down() {
            return Err(DbError::Connect("connection refused".into()));
        }
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession(self.0.clone())))
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn query(&mut self, text: &str, _params: &[Value]) -> Result<Vec<Row>, DbError> {
        let latency = self.0.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.0.is_down() {
            return Err(DbError::Closed);
        }
        self.0.queries.fetch_add(1, Ordering::SeqCst);

        let rows = if text == PROBE_QUERY {
            vec![json!({ "one": 1 })]
        } else if text.contains("pg_tables") {
            vec![
                json!({
                    "schemaname": "public",
                    "tablename": "users",
                    "tableowner": "app",
                    "tablespace": null,
                    "hasindexes": true,
                    "hasrules": false,
                    "hastriggers": false,
                    "rowsecurity": false,
                }),
                json!({
                    "schemaname": "public",
                    "tablename": "orders",
                    "tableowner": "app",
                    "tablespace": null,
                    "hasindexes": null,
                    "hasrules": null,
                    "hastriggers": null,
                    "rowsecurity": null,
                }),
            ]
        } else {
            Vec::new()
        };
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect())
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        self.0.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.0.is_down()
    }
}

pub async fn pool(db: &Arc<ScriptedDb>, max_size: usize, acquire_timeout: Duration) -> ConnectionPool {
    let options = PoolOptions {
        max_size,
        acquire_timeout,
        ..PoolOptions::default()
    };
    ConnectionPool::initialize(db.connector(), "scripted://db", options)
        .await
        .unwrap()
}

/// Defaults with the background readiness watcher off.
pub fn config(mode: ContractMode) -> AppConfig {
    let mut config = AppConfig::with_contract(mode);
    config.health.check_interval_secs = 0;
    config.health.probe_timeout_ms = 500;
    config.lifecycle.drain_timeout_secs = 2;
    config
}

/// A server plus the handles its coordinator would share.
pub struct TestApp {
    pub server: HttpServer,
    pub shutdown: Shutdown,
    pub in_flight: InFlightTracker,
}

impl TestApp {
    pub fn new(config: &AppConfig, pool: Option<ConnectionPool>, routes: RouteTable) -> Self {
        let shutdown = Shutdown::new();
        let in_flight = InFlightTracker::new();
        let server = HttpServer::new(config, pool, routes, shutdown.clone(), in_flight.clone());
        Self {
            server,
            shutdown,
            in_flight,
        }
    }

    pub fn router(&self) -> App {
        self.server.router()
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll `condition` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
