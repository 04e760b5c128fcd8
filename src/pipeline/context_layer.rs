//! Request context middleware.
//!
//! Runs before routing: creates the context entry, adopts or generates the
//! correlation id, opens the `request` span every downstream log line is
//! emitted in, and echoes both ids on the response. The context entry and the
//! in-flight guard live in this frame, so they are released when the request
//! completes or is cancelled.

use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::Instrument;

use crate::context::{ContextStore, RequestContext, CORRELATION_ID_HEADER, REQUEST_ID_HEADER};
use crate::lifecycle::InFlightTracker;
use crate::observability::logging;
use crate::pipeline::error::ApiError;

#[derive(Debug, Clone, Default)]
pub struct ContextLayerState {
    pub store: ContextStore,
    pub in_flight: InFlightTracker,
}

pub async fn establish_context(
    State(state): State<ContextLayerState>,
    mut request: Request,
    next: Next,
) -> Response {
    let _in_flight = state.in_flight.track();
    let scope = state.store.scope();

    let header = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok());
    let ctx = match RequestContext::establish(&scope, header) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!(error = %e, "Failed to establish request context");
            return ApiError::Internal.into_response();
        }
    };

    let span = tracing::info_span!(
        "request",
        correlation_id = %ctx.correlation_id(),
        request_id = %ctx.request_id(),
        method = %request.method(),
        path = %request.uri().path(),
    );

    request.extensions_mut().insert(ctx.clone());
    let mut response = logging::within_request(next.run(request).instrument(span.clone())).await;

    span.in_scope(|| {
        tracing::debug!(
            status = response.status().as_u16(),
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            "Request completed"
        );
    });

    let headers = response.headers_mut();
    for (name, value) in [
        (CORRELATION_ID_HEADER, ctx.correlation_id()),
        (REQUEST_ID_HEADER, ctx.request_id()),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }

    drop(scope);
    response
}
