//! Request pipeline behavior through the fully layered router.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use api_scaffold::context::RequestContext;
use api_scaffold::db::{ConnectionId, PooledConnection};
use api_scaffold::observability::dedupe::DedupeCache;
use api_scaffold::pipeline::{HandlerError, InputSource, Reply, RouteDescriptor, RouteTable, TypedHandler};
use api_scaffold::routes;
use api_scaffold::schema::{validate, ContractMode, ObjectSchema, OutputSerializer, Schema, ValidationResult};
use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;

use common::{body_json, get, post_json, ScriptedDb, TestApp};

struct FailsAfterQuery;

#[async_trait]
impl TypedHandler for FailsAfterQuery {
    type Input = ();

    async fn handle(
        &self,
        _ctx: &RequestContext,
        _input: (),
        db: Option<&mut PooledConnection>,
    ) -> Result<Reply, HandlerError> {
        let db = db.ok_or_else(|| HandlerError::internal("no connection"))?;
        db.query("SELECT 1", &[]).await?;
        Err(HandlerError::internal("database password is hunter2"))
    }
}

/// Records which connections are held at the same time.
#[derive(Default)]
struct Exclusive {
    active: Mutex<HashSet<ConnectionId>>,
    collisions: AtomicUsize,
    mismatched_context: AtomicUsize,
}

struct ExclusiveHandler(Arc<Exclusive>);

#[async_trait]
impl TypedHandler for ExclusiveHandler {
    type Input = ();

    async fn handle(
        &self,
        ctx: &RequestContext,
        _input: (),
        db: Option<&mut PooledConnection>,
    ) -> Result<Reply, HandlerError> {
        let db = db.ok_or_else(|| HandlerError::internal("no connection"))?;
        let id = db.id();
        if ctx.connection_id() != Some(id) {
            self.0.mismatched_context.fetch_add(1, Ordering::SeqCst);
        }
        if !self.0.active.lock().unwrap().insert(id) {
            self.0.collisions.fetch_add(1, Ordering::SeqCst);
        }
        let result = db.query("SELECT 1", &[]).await;
        self.0.active.lock().unwrap().remove(&id);
        result?;
        Ok(Reply::ok(json!({ "connection": id.as_u64() })))
    }
}

#[derive(Deserialize)]
struct Signup {
    #[allow(dead_code)]
    email: String,
}

struct CreateUser;

#[async_trait]
impl TypedHandler for CreateUser {
    type Input = Signup;

    async fn handle(
        &self,
        _ctx: &RequestContext,
        _input: Signup,
        _db: Option<&mut PooledConnection>,
    ) -> Result<Reply, HandlerError> {
        Ok(Reply::with_status(201, json!({ "id": "not-a-number" })))
    }
}

fn user_route() -> RouteDescriptor {
    RouteDescriptor::new(Method::POST, "/users", CreateUser)
        .input(
            InputSource::Body,
            ObjectSchema::new()
                .field("email", Schema::string().min_length(3))
                .field("age", Schema::integer().min(0.0))
                .field(
                    "address",
                    ObjectSchema::new().field("city", Schema::string()).into(),
                )
                .optional("tags", Schema::array(Schema::string()))
                .into(),
        )
        .response(201, ObjectSchema::new().field("id", Schema::integer()).into())
}

fn app_routes(exclusive: &Arc<Exclusive>) -> RouteTable {
    routes::routes()
        .route(RouteDescriptor::new(Method::GET, "/fails", FailsAfterQuery).with_connection())
        .route(
            RouteDescriptor::new(Method::GET, "/exclusive", ExclusiveHandler(exclusive.clone()))
                .response(200, ObjectSchema::new().field("connection", Schema::integer()).into())
                .with_connection(),
        )
        .route(user_route())
}

async fn setup(mode: ContractMode, max_size: usize) -> (Arc<ScriptedDb>, api_scaffold::db::ConnectionPool, TestApp, Arc<Exclusive>) {
    let db = ScriptedDb::new();
    let pool = common::pool(&db, max_size, Duration::from_millis(200)).await;
    let exclusive = Arc::new(Exclusive::default());
    let app = TestApp::new(&common::config(mode), Some(pool.clone()), app_routes(&exclusive));
    (db, pool, app, exclusive)
}

#[tokio::test]
async fn sample_route_greets_and_lists_tables() {
    let (_db, _pool, app, _) = setup(ContractMode::Strict, 2).await;

    let request = axum::http::Request::builder()
        .uri("/api?name=Ada")
        .header("correlation-id", "corr-123")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["correlation-id"], "corr-123");
    let request_id = response.headers()["request-id"].to_str().unwrap().to_string();
    assert!(!request_id.is_empty());
    assert_ne!(request_id, "corr-123");

    let body = body_json(response).await;
    assert_eq!(body["message"], "Hello Ada");
    assert_eq!(body["rows"].as_array().unwrap().len(), 2);
    assert_eq!(body["rows"][0]["tablename"], "users");
    assert_eq!(body["rows"][0]["tablespace"], Value::Null);
    assert_eq!(body["rows"][1]["hasindexes"], Value::Null);
}

#[tokio::test]
async fn generates_correlation_id_when_absent_or_empty() {
    let (_db, _pool, app, _) = setup(ContractMode::Strict, 2).await;

    let request = axum::http::Request::builder()
        .uri("/api/health/live")
        .header("correlation-id", "")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    let correlation = response.headers()["correlation-id"].to_str().unwrap();
    assert!(!correlation.is_empty());
}

#[tokio::test]
async fn acquire_and_release_balance_on_every_path() {
    let (_db, pool, app, _) = setup(ContractMode::Strict, 2).await;

    // Success.
    let response = app.router().oneshot(get("/api?name=Ada")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Validation failure never acquires.
    let response = app.router().oneshot(get("/api")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Handler error after using the connection; detail stays in the logs.
    let response = app.router().oneshot(get("/api/fails")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert!(!body.to_string().contains("hunter2"));
    assert_eq!(body["issues"], json!([]));

    let status = pool.status();
    assert_eq!(status.acquired_total, 2);
    assert_eq!(status.released_total, 2);
    assert_eq!(status.in_use, 0);
}

#[tokio::test]
async fn aborted_request_still_releases_its_connection() {
    let (db, pool, app, _) = setup(ContractMode::Strict, 1).await;
    db.set_latency(Duration::from_millis(500));

    let router = app.router();
    let request = tokio::spawn(async move { router.oneshot(get("/api?name=Ada")).await });

    assert!(common::eventually(Duration::from_secs(1), || pool.status().in_use == 1).await);
    assert_eq!(app.in_flight.active_count(), 1);
    request.abort();

    assert!(common::eventually(Duration::from_secs(1), || pool.status().in_use == 0).await);
    let status = pool.status();
    assert_eq!(status.acquired_total, status.released_total);
    assert!(common::eventually(Duration::from_secs(1), || app.in_flight.active_count() == 0).await);

    // The pool still serves the next request.
    db.set_latency(Duration::ZERO);
    let response = app.router().oneshot(get("/api?name=Ada")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_share_a_connection() {
    let (db, pool, app, exclusive) = setup(ContractMode::Strict, 3).await;
    db.set_latency(Duration::from_millis(20));

    let requests: Vec<_> = (0..12)
        .map(|_| {
            let router = app.router();
            tokio::spawn(async move { router.oneshot(get("/api/exclusive")).await.unwrap().status() })
        })
        .collect();

    let mut ok = 0;
    for request in requests {
        match request.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::SERVICE_UNAVAILABLE => {}
            other => panic!("unexpected status {}", other),
        }
    }

    assert!(ok > 0);
    assert_eq!(exclusive.collisions.load(Ordering::SeqCst), 0);
    assert_eq!(exclusive.mismatched_context.load(Ordering::SeqCst), 0);
    let status = pool.status();
    assert!(status.open <= 3);
    assert_eq!(status.acquired_total, status.released_total);
}

#[tokio::test]
async fn reports_every_input_violation_together() {
    let (_db, pool, app, _) = setup(ContractMode::Strict, 1).await;

    let response = app
        .router()
        .oneshot(post_json(
            "/api/users",
            json!({ "email": "x", "age": "old", "address": {}, "tags": ["a", 2] }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["statusCode"], 400);
    assert_eq!(body["error"], "Bad Request");
    assert_eq!(body["context"], "body");

    let issues: Vec<(String, String)> = body["issues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| (i["path"].as_str().unwrap().to_string(), i["code"].as_str().unwrap().to_string()))
        .collect();
    assert_eq!(
        issues,
        vec![
            ("email".to_string(), "too_small".to_string()),
            ("age".to_string(), "invalid_type".to_string()),
            ("address.city".to_string(), "required".to_string()),
            ("tags[1]".to_string(), "invalid_type".to_string()),
        ]
    );
    assert_eq!(pool.status().acquired_total, 0);
}

#[tokio::test]
async fn strict_contract_turns_bad_output_into_500() {
    let (_db, _pool, app, _) = setup(ContractMode::Strict, 1).await;

    let response = app
        .router()
        .oneshot(post_json("/api/users", json!({ "email": "ada@example.com", "age": 36, "address": { "city": "London" } })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["message"], "internal server error");
    assert!(!body.to_string().contains("not-a-number"));
}

#[tokio::test]
async fn lenient_contract_ships_unvalidated_output() {
    let (_db, _pool, app, _) = setup(ContractMode::Lenient, 1).await;

    let response = app
        .router()
        .oneshot(post_json("/api/users", json!({ "email": "ada@example.com", "age": 36, "address": { "city": "London" } })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await, json!({ "id": "not-a-number" }));
}

#[tokio::test]
async fn serialized_output_validates_against_its_schema() {
    let schema: Schema = ObjectSchema::new()
        .field("message", Schema::string())
        .field(
            "rows",
            Schema::array(
                ObjectSchema::new()
                    .field("schemaname", Schema::string())
                    .field("tablename", Schema::string().nullable())
                    .into(),
            ),
        )
        .into();
    let value = json!({
        "message": "Hello",
        "rows": [{ "schemaname": "public", "tablename": null, "extra": true }],
    });

    let serializer = OutputSerializer::new(ContractMode::Strict, Arc::new(DedupeCache::default()));
    let bytes = serializer.serialize("GET /", 200, Some(&schema), &value).unwrap();
    let shipped: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert!(matches!(validate(&schema, &shipped), ValidationResult::Valid(_)));
    assert!(shipped["rows"][0].get("extra").is_none());
}

#[tokio::test]
async fn exhausted_pool_times_out_with_503() {
    let (_db, pool, app, _) = setup(ContractMode::Strict, 1).await;
    let held = pool.acquire().await.unwrap();

    let started = Instant::now();
    let response = app.router().oneshot(get("/api?name=Ada")).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_secs(2));
    let body = body_json(response).await;
    assert_eq!(body["statusCode"], 503);

    drop(held);
    let response = app.router().oneshot(get("/api?name=Ada")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_routes_get_a_json_404() {
    let (_db, _pool, app, _) = setup(ContractMode::Strict, 1).await;

    let response = app.router().oneshot(get("/nowhere")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key("correlation-id"));
    assert_eq!(body_json(response).await["statusCode"], 404);
}

#[tokio::test]
async fn documentation_lists_prefixed_routes() {
    let (_db, _pool, app, _) = setup(ContractMode::Strict, 1).await;

    let response = app.router().oneshot(get("/api/documentation/json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let doc = body_json(response).await;
    assert_eq!(doc["openapi"], "3.0.3");
    assert!(doc["paths"]["/api"]["get"].is_object());
    assert!(doc["paths"]["/api/users"]["post"]["requestBody"].is_object());
}

struct Sleepy(Duration);

#[async_trait]
impl TypedHandler for Sleepy {
    type Input = ();

    async fn handle(
        &self,
        _ctx: &RequestContext,
        _input: (),
        _db: Option<&mut PooledConnection>,
    ) -> Result<Reply, HandlerError> {
        tokio::time::sleep(self.0).await;
        Ok(Reply::ok(json!({})))
    }
}

#[tokio::test]
async fn request_timeout_gets_the_error_body() {
    let db = ScriptedDb::new();
    let pool = common::pool(&db, 1, Duration::from_millis(200)).await;
    let mut config = common::config(ContractMode::Strict);
    config.timeouts.request_secs = 1;
    let routes = RouteTable::new().route(
        RouteDescriptor::new(Method::GET, "/sleepy", Sleepy(Duration::from_secs(3)))
            .response(200, ObjectSchema::new().into()),
    );
    let app = TestApp::new(&config, Some(pool), routes);

    let response = app.router().oneshot(get("/api/sleepy")).await.unwrap();

    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert!(response.headers().contains_key("correlation-id"));
    assert_eq!(
        body_json(response).await,
        json!({
            "statusCode": 408,
            "error": "Request Timeout",
            "message": "request timed out",
            "issues": []
        })
    );
}

#[tokio::test]
async fn oversized_body_is_payload_too_large() {
    let db = ScriptedDb::new();
    let pool = common::pool(&db, 1, Duration::from_millis(200)).await;
    let mut config = common::config(ContractMode::Strict);
    config.listener.body_limit_bytes = 64;
    let app = TestApp::new(&config, Some(pool), RouteTable::new().route(user_route()));

    let response = app
        .router()
        .oneshot(post_json("/api/users", json!({ "email": "x".repeat(200) })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = body_json(response).await;
    assert_eq!(body["statusCode"], 413);
    assert_eq!(body["message"], "Request body exceeds 64 bytes");
}

#[tokio::test]
async fn trailing_slashes_are_ignored() {
    let (_db, _pool, app, _) = setup(ContractMode::Strict, 1).await;

    let response = app.router().oneshot(get("/api/?name=Ada")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["message"], "Hello Ada");

    let response = app.router().oneshot(get("/api/health/live/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
