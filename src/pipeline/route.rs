//! Route descriptors and handler contracts.
//!
//! # Responsibilities
//! - Bind method + path to a handler, an input schema and per-status output schemas
//! - Erase typed handlers behind one object-safe trait
//! - Project the registered table to an OpenAPI document

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::context::{ContextError, RequestContext};
use crate::db::{DbError, PooledConnection};
use crate::schema::{Issue, IssueCode, Schema, ValidationError};

/// Where a route reads its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputSource {
    #[serde(rename = "querystring")]
    Query,
    Body,
    Params,
}

impl InputSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputSource::Query => "querystring",
            InputSource::Body => "body",
            InputSource::Params => "params",
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handler's successful outcome: status plus an unserialized body.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn with_status(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn json<T: Serialize>(status: u16, body: &T) -> Result<Self, HandlerError> {
        let body = serde_json::to_value(body).map_err(HandlerError::internal)?;
        Ok(Self { status, body })
    }
}

/// Errors a handler may raise.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The caller did something wrong; surfaced as-is with a 4xx status.
    #[error("{message}")]
    Client { status: u16, message: String },

    /// The validated input did not fit the handler's input type.
    #[error(transparent)]
    Input(#[from] ValidationError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    pub fn client(status: u16, message: impl Into<String>) -> Self {
        HandlerError::Client {
            status,
            message: message.into(),
        }
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        HandlerError::Internal(err.to_string())
    }
}

/// Object-safe handler invoked by the binder with already-validated input.
#[async_trait]
pub trait RouteHandler: Send + Sync + 'static {
    async fn call(
        &self,
        ctx: &RequestContext,
        input: Value,
        db: Option<&mut PooledConnection>,
    ) -> Result<Reply, HandlerError>;
}

/// Handler with a typed input.
///
/// `db` is `Some` exactly when the route was declared `with_connection`.
#[async_trait]
pub trait TypedHandler: Send + Sync + 'static {
    type Input: DeserializeOwned + Send;

    async fn handle(
        &self,
        ctx: &RequestContext,
        input: Self::Input,
        db: Option<&mut PooledConnection>,
    ) -> Result<Reply, HandlerError>;
}

struct Typed<H>(H);

#[async_trait]
impl<H: TypedHandler> RouteHandler for Typed<H> {
    async fn call(
        &self,
        ctx: &RequestContext,
        input: Value,
        db: Option<&mut PooledConnection>,
    ) -> Result<Reply, HandlerError> {
        let input: H::Input = serde_json::from_value(input).map_err(|e| ValidationError {
            issues: vec![Issue::new("", IssueCode::InvalidType, e.to_string())],
        })?;
        self.0.handle(ctx, input, db).await
    }
}

#[derive(Debug, Clone)]
pub struct RouteInput {
    pub source: InputSource,
    pub schema: Arc<Schema>,
}

/// One registered route. Immutable once added to a [`RouteTable`].
#[derive(Clone)]
pub struct RouteDescriptor {
    method: Method,
    path: String,
    summary: Option<String>,
    input: Option<RouteInput>,
    responses: BTreeMap<u16, Arc<Schema>>,
    needs_connection: bool,
    handler: Arc<dyn RouteHandler>,
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("input", &self.input.as_ref().map(|i| i.source))
            .field("responses", &self.responses.keys().collect::<Vec<_>>())
            .field("needs_connection", &self.needs_connection)
            .finish()
    }
}

impl RouteDescriptor {
    /// Path patterns use `{name}` segments for parameters.
    pub fn new<H: TypedHandler>(method: Method, path: impl Into<String>, handler: H) -> Self {
        Self::from_handler(method, path, Arc::new(Typed(handler)))
    }

    pub fn from_handler(
        method: Method,
        path: impl Into<String>,
        handler: Arc<dyn RouteHandler>,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            summary: None,
            input: None,
            responses: BTreeMap::new(),
            needs_connection: false,
            handler,
        }
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn input(mut self, source: InputSource, schema: Schema) -> Self {
        self.input = Some(RouteInput {
            source,
            schema: Arc::new(schema),
        });
        self
    }

    pub fn response(mut self, status: u16, schema: Schema) -> Self {
        self.responses.insert(status, Arc::new(schema));
        self
    }

    /// Acquire a pooled connection for each request on this route.
    pub fn with_connection(mut self) -> Self {
        self.needs_connection = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `METHOD path`, used in logs and metric labels.
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    pub fn input_spec(&self) -> Option<&RouteInput> {
        self.input.as_ref()
    }

    pub fn response_schema(&self, status: u16) -> Option<&Schema> {
        self.responses.get(&status).map(|s| s.as_ref())
    }

    pub fn needs_connection(&self) -> bool {
        self.needs_connection
    }

    pub fn handler(&self) -> &Arc<dyn RouteHandler> {
        &self.handler
    }

    fn openapi_operation(&self) -> Value {
        let mut operation = Map::new();
        if let Some(summary) = &self.summary {
            operation.insert("summary".into(), json!(summary));
        }

        if let Some(input) = &self.input {
            match (input.source, input.schema.as_ref()) {
                (InputSource::Body, schema) => {
                    operation.insert(
                        "requestBody".into(),
                        json!({
                            "required": true,
                            "content": { "application/json": { "schema": schema.to_json_schema() } }
                        }),
                    );
                }
                (source, Schema::Object(object)) => {
                    let location = if source == InputSource::Query { "query" } else { "path" };
                    let parameters: Vec<Value> = object
                        .fields
                        .iter()
                        .map(|f| {
                            json!({
                                "name": f.name,
                                "in": location,
                                "required": f.required || source == InputSource::Params,
                                "schema": f.schema.to_json_schema(),
                            })
                        })
                        .collect();
                    operation.insert("parameters".into(), json!(parameters));
                }
                // Non-object query/params schemas have no named parameters.
                _ => {}
            }
        }

        let responses: Map<String, Value> = self
            .responses
            .iter()
            .map(|(status, schema)| {
                let description = StatusCode::from_u16(*status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Response");
                (
                    status.to_string(),
                    json!({
                        "description": description,
                        "content": { "application/json": { "schema": schema.to_json_schema() } }
                    }),
                )
            })
            .collect();
        operation.insert("responses".into(), Value::Object(responses));

        Value::Object(operation)
    }
}

/// The set of routes registered at startup.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<RouteDescriptor>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, descriptor: RouteDescriptor) -> Self {
        self.routes.push(Arc::new(descriptor));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RouteDescriptor>> {
        self.routes.iter()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// OpenAPI 3 document for the table, with paths mounted under `prefix`.
    pub fn openapi(&self, title: &str, description: &str, prefix: &str) -> Value {
        let mut paths: Map<String, Value> = Map::new();
        for route in &self.routes {
            let full = join_path(prefix, route.path());
            let entry = paths.entry(full).or_insert_with(|| json!({}));
            if let Value::Object(methods) = entry {
                methods.insert(
                    route.method().as_str().to_ascii_lowercase(),
                    route.openapi_operation(),
                );
            }
        }

        json!({
            "openapi": "3.0.3",
            "info": {
                "title": title,
                "description": description,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "paths": paths,
        })
    }
}

/// Join a mount prefix and a route path without doubling or losing slashes.
pub fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if path == "/" || path.is_empty() {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{}/{}", prefix, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ObjectSchema;

    struct Noop;

    #[async_trait]
    impl TypedHandler for Noop {
        type Input = Value;

        async fn handle(
            &self,
            _ctx: &RequestContext,
            input: Value,
            _db: Option<&mut PooledConnection>,
        ) -> Result<Reply, HandlerError> {
            Ok(Reply::ok(input))
        }
    }

    #[test]
    fn joins_prefix_and_path() {
        assert_eq!(join_path("/api", "/"), "/api");
        assert_eq!(join_path("/api/", "/users/{id}"), "/api/users/{id}");
        assert_eq!(join_path("", "/"), "/");
        assert_eq!(join_path("", "/health"), "/health");
    }

    #[test]
    fn openapi_projects_routes() {
        let table = RouteTable::new()
            .route(
                RouteDescriptor::new(Method::GET, "/users/{id}", Noop)
                    .summary("Fetch a user")
                    .input(
                        InputSource::Params,
                        ObjectSchema::new().field("id", Schema::integer()).into(),
                    )
                    .response(200, ObjectSchema::new().field("name", Schema::string()).into()),
            )
            .route(
                RouteDescriptor::new(Method::POST, "/users", Noop)
                    .input(InputSource::Body, ObjectSchema::new().field("name", Schema::string()).into())
                    .response(201, Schema::any()),
            );

        let doc = table.openapi("svc", "test service", "/api");
        assert_eq!(doc["openapi"], "3.0.3");
        assert_eq!(doc["info"]["title"], "svc");

        let get = &doc["paths"]["/api/users/{id}"]["get"];
        assert_eq!(get["summary"], "Fetch a user");
        assert_eq!(get["parameters"][0]["in"], "path");
        assert_eq!(get["parameters"][0]["schema"], json!({ "type": "integer" }));
        assert_eq!(get["responses"]["200"]["description"], "OK");

        let post = &doc["paths"]["/api/users"]["post"];
        assert_eq!(
            post["requestBody"]["content"]["application/json"]["schema"]["required"],
            json!(["name"])
        );
        assert_eq!(post["responses"]["201"]["description"], "Created");
    }

    #[test]
    fn descriptor_exposes_declarations() {
        let route = RouteDescriptor::new(Method::GET, "/", Noop)
            .response(200, Schema::any())
            .with_connection();
        assert_eq!(route.label(), "GET /");
        assert!(route.needs_connection());
        assert!(route.response_schema(200).is_some());
        assert!(route.response_schema(404).is_none());
        assert!(route.input_spec().is_none());
    }
}
