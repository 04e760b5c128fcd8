//! Per-request view over the context store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::context::store::{
    ContextError, ContextHandle, ContextKey, ContextScope, ContextStore, ContextValue,
};
use crate::db::ConnectionId;

/// Inbound header carrying a client-supplied correlation id.
pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// Outbound header echoing the server-generated request id.
pub const REQUEST_ID_HEADER: &str = "request-id";

/// Identity of one in-flight request, handed to handlers explicitly.
///
/// The ids are fixed at creation and cached here; the store remains the
/// place other readers (and lazily bound resources) go through.
#[derive(Debug, Clone)]
pub struct RequestContext {
    handle: ContextHandle,
    correlation_id: Arc<str>,
    request_id: Arc<str>,
    started_at: Instant,
    store: ContextStore,
}

impl RequestContext {
    /// Populate a fresh scope with correlation and request ids.
    ///
    /// A non-empty `correlation_header` is adopted; otherwise a new id is
    /// generated. The request id is always generated.
    pub fn establish(
        scope: &ContextScope,
        correlation_header: Option<&str>,
    ) -> Result<Self, ContextError> {
        let correlation_id = correlation_header
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(generate_id);
        let request_id = generate_id();

        let store = scope.store().clone();
        let handle = scope.handle();
        store.set(
            handle,
            ContextKey::CorrelationId,
            ContextValue::Text(correlation_id.clone()),
        )?;
        store.set(
            handle,
            ContextKey::RequestId,
            ContextValue::Text(request_id.clone()),
        )?;
        let started_at = store.started_at(handle)?;

        Ok(Self {
            handle,
            correlation_id: correlation_id.into(),
            request_id: request_id.into(),
            started_at,
            store,
        })
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn get(&self, key: &ContextKey) -> Result<ContextValue, ContextError> {
        self.store.get(self.handle, key)
    }

    pub fn set_attribute(&self, name: &str, value: impl Into<String>) -> Result<(), ContextError> {
        self.store.set(
            self.handle,
            ContextKey::Attribute(name.to_string()),
            ContextValue::Text(value.into()),
        )
    }

    pub fn attribute(&self, name: &str) -> Result<String, ContextError> {
        let key = ContextKey::Attribute(name.to_string());
        match self.store.get(self.handle, &key)? {
            ContextValue::Text(value) => Ok(value),
            ContextValue::Connection(_) => Err(ContextError::KeyNotFound {
                handle: self.handle,
                key,
            }),
        }
    }

    /// The connection currently bound to this request, if any.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.store
            .get(self.handle, &ContextKey::Connection)
            .ok()
            .and_then(|v| v.as_connection())
    }

    pub(crate) fn bind_connection(&self, id: ConnectionId) -> Result<(), ContextError> {
        self.store
            .set(self.handle, ContextKey::Connection, ContextValue::Connection(id))
    }

    pub(crate) fn unbind_connection(&self) {
        // Handle may already be gone when the request is being torn down.
        let _ = self.store.remove(self.handle, &ContextKey::Connection);
    }
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}
