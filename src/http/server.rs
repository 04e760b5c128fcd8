//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router: business routes from the binder plus operator endpoints
//! - Mount everything under the configured prefix; trailing slashes are ignored
//! - Wire up middleware (request context, tracing, panics, timeout)
//! - Bind server to listener and stop accepting on shutdown

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::body::HttpBody;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Router, ServiceExt};
use tokio::net::TcpListener;
use tower::Layer;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::context::ContextStore;
use crate::db::ConnectionPool;
use crate::health::{DatabaseProbe, Readiness};
use crate::http::operator::{self, OperatorState};
use crate::lifecycle::{InFlightTracker, Shutdown};
use crate::observability::dedupe::DedupeCache;
use crate::pipeline::{establish_context, ApiError, ContextLayerState, RouteBinder, RouteTable};
use crate::schema::OutputSerializer;

/// The routed application, with trailing slashes trimmed before routing.
pub type App = NormalizePath<Router>;

/// HTTP server for the API.
pub struct HttpServer {
    router: App,
    readiness: Readiness,
    shutdown: Shutdown,
    check_interval: Duration,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// `shutdown` and `in_flight` are shared with the shutdown coordinator.
    pub fn new(
        config: &AppConfig,
        pool: Option<ConnectionPool>,
        routes: RouteTable,
        shutdown: Shutdown,
        in_flight: InFlightTracker,
    ) -> Self {
        let mut readiness = Readiness::new(Duration::from_millis(config.health.probe_timeout_ms))
            .draining_on(shutdown.clone());
        if let Some(pool) = &pool {
            readiness = readiness.with_probe(DatabaseProbe::new(pool.clone()));
        }

        let serializer = OutputSerializer::new(
            config.validation.output_contract,
            Arc::new(DedupeCache::new(config.observability.dedupe_capacity)),
        );
        let binder = RouteBinder::new(pool.clone(), serializer)
            .body_limit(config.listener.body_limit_bytes);

        let operator_state = OperatorState {
            readiness: readiness.clone(),
            shutdown: shutdown.clone(),
            pool,
            openapi: Arc::new(routes.openapi(
                &config.service.name,
                &config.service.description,
                &config.service.prefix,
            )),
        };

        let context_state = ContextLayerState {
            store: ContextStore::new(),
            in_flight,
        };

        let router = NormalizePathLayer::trim_trailing_slash().layer(Self::build_router(
            config,
            binder.router(&routes),
            operator_state,
            context_state,
        ));

        Self {
            router,
            readiness,
            shutdown,
            check_interval: Duration::from_secs(config.health.check_interval_secs),
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Layers run outermost first: context, trace, panic catch, timeout
    /// body, timeout.
    #[allow(deprecated)]
    fn build_router(
        config: &AppConfig,
        business: Router,
        operator_state: OperatorState,
        context_state: ContextLayerState,
    ) -> Router {
        let mut ops = Router::new()
            .route("/health", get(operator::get_readiness))
            .route("/health/live", get(operator::get_liveness))
            .route("/health/pool", get(operator::get_pool_status))
            .route("/documentation/json", get(operator::get_openapi));
        if config.lifecycle.shutdown_endpoint {
            ops = ops.route("/shutdown", post(operator::post_shutdown));
        }

        let app = business.merge(ops.with_state(operator_state));
        let app = if config.service.prefix.is_empty() {
            app
        } else {
            Router::new().nest(&config.service.prefix, app)
        };

        app.fallback(not_found)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(middleware::map_response(timeout_body))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn_with_state(context_state, establish_context))
    }

    /// The fully layered application, for in-process testing.
    pub fn router(&self) -> App {
        self.router.clone()
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Run the server, accepting connections on the given listener until
    /// shutdown is triggered.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        if !self.check_interval.is_zero() {
            tokio::spawn(
                self.readiness
                    .clone()
                    .watch(self.check_interval, self.shutdown.clone()),
            );
        }

        let shutdown = self.shutdown.clone();
        axum::serve(listener, ServiceExt::<Request>::into_make_service(self.router))
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// The timeout layer answers with a bare 408; give it the common error body.
async fn timeout_body(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT && response.body().size_hint().exact() == Some(0) {
        tracing::warn!("Request timed out");
        return ApiError::Timeout.into_response();
    }
    response
}

fn panic_response(_payload: Box<dyn Any + Send + 'static>) -> Response {
    // The panic hook has already logged the payload inside the request span.
    ApiError::Internal.into_response()
}
