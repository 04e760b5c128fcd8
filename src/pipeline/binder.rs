//! Typed route binder.
//!
//! # Responsibilities
//! - Mount every registered route on the axum router
//! - Run the per-request stages in order: validate input, acquire, handle,
//!   validate output, respond
//! - Release the bound connection on every exit path
//!
//! # Design Decisions
//! - Invalid input is rejected before a connection is acquired
//! - The pooled connection is a RAII value; cancellation drops it, which
//!   returns it to the pool

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::RawPathParamsRejection;
use axum::extract::{DefaultBodyLimit, FromRequest, RawPathParams, Request};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use serde_json::{Map, Value};

use crate::context::RequestContext;
use crate::db::{ConnectionPool, PoolError, PooledConnection};
use crate::observability::metrics;
use crate::pipeline::error::ApiError;
use crate::pipeline::route::{HandlerError, InputSource, RouteDescriptor, RouteTable};
use crate::pipeline::state::{PipelineState, Progress};
use crate::schema::{validate_with, Issue, IssueCode, OutputSerializer, ValidateOptions, ValidationResult};

/// Largest request body read for `body` routes.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Raw inputs pulled off the transport before validation.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub query: Option<String>,
    pub params: Vec<(String, String)>,
    pub body: Bytes,
}

#[derive(Clone)]
pub struct RouteBinder {
    pool: Option<ConnectionPool>,
    serializer: OutputSerializer,
    body_limit: usize,
}

impl RouteBinder {
    /// `pool` may be absent for deployments whose routes never need one.
    pub fn new(pool: Option<ConnectionPool>, serializer: OutputSerializer) -> Self {
        Self {
            pool,
            serializer,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Build an axum router serving every route in `table`.
    ///
    /// Requests must already carry a [`RequestContext`] extension, see
    /// `pipeline::context_layer`.
    pub fn router(&self, table: &RouteTable) -> Router {
        let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();

        for route in table.iter() {
            let filter = match MethodFilter::try_from(route.method().clone()) {
                Ok(filter) => filter,
                Err(_) => {
                    tracing::warn!(route = %route.label(), "Skipping route with unsupported method");
                    continue;
                }
            };

            let binder = self.clone();
            let descriptor = Arc::clone(route);
            let handler = move |params: Result<RawPathParams, RawPathParamsRejection>,
                                request: Request| {
                let binder = binder.clone();
                let descriptor = Arc::clone(&descriptor);
                async move { binder.serve(descriptor, params, request).await }
            };

            let path = route.path().to_string();
            let method_router = match by_path.remove(&path) {
                Some(existing) => existing.on(filter, handler),
                None => axum::routing::on(filter, handler),
            };
            by_path.insert(path, method_router);
        }

        by_path
            .into_iter()
            .fold(Router::new(), |router, (path, methods)| router.route(&path, methods))
            .layer(DefaultBodyLimit::max(self.body_limit))
    }

    async fn serve(
        &self,
        route: Arc<RouteDescriptor>,
        params: Result<RawPathParams, RawPathParamsRejection>,
        request: Request,
    ) -> Response {
        let Some(ctx) = request.extensions().get::<RequestContext>().cloned() else {
            tracing::error!(route = %route.label(), "Request reached a route without a context");
            return ApiError::Internal.into_response();
        };

        let params = params
            .map(|p| {
                p.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let query = request.uri().query().map(str::to_string);

        let reads_body = matches!(route.input_spec(), Some(input) if input.source == InputSource::Body);
        let body = if reads_body {
            match Bytes::from_request(request, &()).await {
                Ok(bytes) => bytes,
                Err(rejection) => {
                    tracing::info!(error = %rejection, "Failed to read request body");
                    let error = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                        ApiError::client(413, format!("Request body exceeds {} bytes", self.body_limit))
                    } else {
                        ApiError::client(400, "Request body could not be read")
                    };
                    let response = error.into_response();
                    metrics::record_request(route.method().as_str(), route.path(), response.status().as_u16(), ctx.started_at());
                    return response;
                }
            }
        } else {
            Bytes::new()
        };

        let raw = RawRequest { query, params, body };
        let response = self.dispatch(&route, &ctx, raw).await;
        metrics::record_request(
            route.method().as_str(),
            route.path(),
            response.status().as_u16(),
            ctx.started_at(),
        );
        response
    }

    /// Run one request through the pipeline and produce its response.
    pub async fn dispatch(&self, route: &RouteDescriptor, ctx: &RequestContext, raw: RawRequest) -> Response {
        let mut progress = Progress::established();
        match self.run(route, ctx, raw, &mut progress).await {
            Ok(response) => {
                progress.advance(PipelineState::Sent);
                response
            }
            Err(err) => {
                progress.fail();
                err.into_response()
            }
        }
    }

    async fn run(
        &self,
        route: &RouteDescriptor,
        ctx: &RequestContext,
        raw: RawRequest,
        progress: &mut Progress,
    ) -> Result<Response, ApiError> {
        let input = self.validate_input(route, &raw)?;
        progress.advance(PipelineState::InputValidated);

        let mut connection = self.acquire(route, ctx).await?;
        if connection.is_some() {
            progress.advance(PipelineState::ConnectionAcquired);
        }

        let outcome = route.handler().call(ctx, input, connection.as_mut()).await;
        self.release(ctx, connection);

        let reply = outcome.map_err(|e| handler_failure(route, e))?;
        progress.advance(PipelineState::HandlerExecuted);

        let Ok(status) = StatusCode::from_u16(reply.status) else {
            tracing::error!(route = %route.label(), status = reply.status, "Handler replied with an invalid status code");
            return Err(ApiError::Internal);
        };

        let bytes = self
            .serializer
            .serialize(&route.label(), reply.status, route.response_schema(reply.status), &reply.body)
            .map_err(|e| {
                tracing::error!(route = %route.label(), error = %e, "Response rejected by output contract");
                ApiError::Internal
            })?;
        progress.advance(PipelineState::OutputValidated);

        Ok((
            status,
            [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
            bytes,
        )
            .into_response())
    }

    fn validate_input(&self, route: &RouteDescriptor, raw: &RawRequest) -> Result<Value, ApiError> {
        let Some(spec) = route.input_spec() else {
            return Ok(Value::Null);
        };

        let (value, options) = match spec.source {
            InputSource::Query => (query_object(raw.query.as_deref()), ValidateOptions::coercing()),
            InputSource::Params => (params_object(&raw.params), ValidateOptions::coercing()),
            InputSource::Body => match parse_body(&raw.body) {
                Ok(value) => (value, ValidateOptions::default()),
                Err(issue) => {
                    metrics::record_validation_failure("input");
                    return Err(ApiError::Validation {
                        context: InputSource::Body,
                        issues: vec![issue],
                    });
                }
            },
        };

        match validate_with(&spec.schema, &value, options) {
            ValidationResult::Valid(normalized) => Ok(normalized),
            ValidationResult::Invalid(issues) => {
                metrics::record_validation_failure("input");
                tracing::info!(
                    route = %route.label(),
                    context = %spec.source,
                    issues = issues.len(),
                    "Rejected invalid input"
                );
                Err(ApiError::Validation {
                    context: spec.source,
                    issues,
                })
            }
        }
    }

    async fn acquire(
        &self,
        route: &RouteDescriptor,
        ctx: &RequestContext,
    ) -> Result<Option<PooledConnection>, ApiError> {
        if !route.needs_connection() {
            return Ok(None);
        }
        let Some(pool) = &self.pool else {
            tracing::error!(route = %route.label(), "Route needs a database connection but no pool is configured");
            return Err(ApiError::Unavailable("Database unavailable".to_string()));
        };

        match pool.acquire().await {
            Ok(connection) => {
                ctx.bind_connection(connection.id()).map_err(|e| {
                    tracing::error!(error = %e, "Failed to bind connection to request context");
                    ApiError::Internal
                })?;
                tracing::debug!(connection_id = %connection.id(), "Connection bound to request");
                Ok(Some(connection))
            }
            Err(e) => {
                let reason = match &e {
                    PoolError::Exhausted { .. } => "exhausted",
                    PoolError::AcquireTimeout(_) => "timeout",
                    PoolError::Closed => "closed",
                    PoolError::Connectivity(_) | PoolError::Db(_) => "connectivity",
                };
                metrics::record_acquire_failure(reason);
                tracing::warn!(route = %route.label(), error = %e, "Failed to acquire database connection");
                Err(e.into())
            }
        }
    }

    fn release(&self, ctx: &RequestContext, connection: Option<PooledConnection>) {
        if let Some(connection) = connection {
            ctx.unbind_connection();
            match &self.pool {
                Some(pool) => pool.release(connection),
                None => drop(connection),
            }
        }
    }
}

fn handler_failure(route: &RouteDescriptor, err: HandlerError) -> ApiError {
    match err {
        HandlerError::Client { status, message } => ApiError::client(status, message),
        HandlerError::Input(invalid) => {
            metrics::record_validation_failure("input");
            ApiError::Validation {
                context: route.input_spec().map_or(InputSource::Body, |i| i.source),
                issues: invalid.issues,
            }
        }
        other => {
            tracing::error!(route = %route.label(), error = %other, "Handler failed");
            ApiError::Internal
        }
    }
}

/// Query strings become an object of strings; repeated keys become arrays.
fn query_object(query: Option<&str>) -> Value {
    let mut map = Map::new();
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        let value = Value::String(value.into_owned());
        match map.get_mut(key.as_ref()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(map)
}

fn params_object(params: &[(String, String)]) -> Value {
    Value::Object(
        params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn parse_body(body: &Bytes) -> Result<Value, Issue> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| {
        Issue::new(
            "",
            IssueCode::InvalidJson,
            format!("Body is not valid JSON: {}", e),
        )
    })
}
