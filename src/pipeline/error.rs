//! HTTP-facing error taxonomy.
//!
//! Every pipeline failure leaves through [`ApiError`], which renders the same
//! body shape: `{statusCode, error, message, issues}` plus `context` for
//! validation failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::db::PoolError;
use crate::pipeline::route::InputSource;
use crate::schema::Issue;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Input failed its schema. Carries every issue found.
    #[error("{context} failed validation with {} issue(s)", .issues.len())]
    Validation {
        context: InputSource,
        issues: Vec<Issue>,
    },

    /// A client-fault condition signalled by the handler.
    #[error("{message}")]
    Client { status: StatusCode, message: String },

    /// A required resource (the pool) could not serve the request.
    #[error("{0}")]
    Unavailable(String),

    #[error("route not found")]
    NotFound,

    /// The request outlived the configured request timeout.
    #[error("request timed out")]
    Timeout,

    /// Details are logged at the failure site, never sent.
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Client { status, .. } => *status,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a handler's client-fault status, falling back to 400 for values
    /// that are not 4xx.
    pub fn client(status: u16, message: impl Into<String>) -> Self {
        let status = StatusCode::from_u16(status)
            .ok()
            .filter(|s| s.is_client_error())
            .unwrap_or(StatusCode::BAD_REQUEST);
        ApiError::Client {
            status,
            message: message.into(),
        }
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        let message = match &err {
            PoolError::Exhausted { .. } => "Database connection pool exhausted",
            PoolError::AcquireTimeout(_) => "Timed out waiting for a database connection",
            PoolError::Closed => "Service is shutting down",
            PoolError::Connectivity(_) | PoolError::Db(_) => "Database unavailable",
        };
        ApiError::Unavailable(message.to_string())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub error: String,
    pub message: String,
    pub issues: Vec<Issue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<InputSource>,
}

impl ApiError {
    pub fn body(&self) -> ErrorBody {
        let status = self.status();
        let (issues, context) = match self {
            ApiError::Validation { context, issues } => (issues.clone(), Some(*context)),
            _ => (Vec::new(), None),
        };
        ErrorBody {
            status_code: status.as_u16(),
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.to_string(),
            issues,
            context,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
