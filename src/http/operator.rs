//! Operator endpoints.
//!
//! # Endpoints (under the service prefix)
//! - `GET /health`: readiness, `{status, checks}`; 200 when ok, else 503
//! - `GET /health/live`: liveness, always 200
//! - `GET /health/pool`: pool counters
//! - `GET /documentation/json`: OpenAPI document for the business routes
//! - `POST /shutdown`: acknowledge, then run the shutdown sequence (opt-in)

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

use crate::db::{ConnectionPool, PoolStatus};
use crate::health::{HealthStatus, Readiness};
use crate::lifecycle::Shutdown;
use crate::pipeline::ApiError;

#[derive(Clone)]
pub struct OperatorState {
    pub readiness: Readiness,
    pub shutdown: Shutdown,
    pub pool: Option<ConnectionPool>,
    pub openapi: Arc<Value>,
}

pub async fn get_readiness(State(state): State<OperatorState>) -> Response {
    let report = state.readiness.check().await;
    let status = match report.status {
        HealthStatus::Ok => StatusCode::OK,
        HealthStatus::Degraded | HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report)).into_response()
}

#[derive(Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn get_liveness() -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn get_pool_status(State(state): State<OperatorState>) -> Result<Json<PoolStatus>, ApiError> {
    state
        .pool
        .as_ref()
        .map(|pool| Json(pool.status()))
        .ok_or(ApiError::NotFound)
}

pub async fn get_openapi(State(state): State<OperatorState>) -> Json<Value> {
    Json(state.openapi.as_ref().clone())
}

pub async fn post_shutdown(State(state): State<OperatorState>) -> (StatusCode, Json<Value>) {
    if state.shutdown.trigger() {
        tracing::info!("Shutdown requested via endpoint");
    } else {
        tracing::debug!("Shutdown already in progress");
    }
    (StatusCode::ACCEPTED, Json(json!({ "message": "Shutdown initiated" })))
}
