//! Request-lifetime key/value store.
//!
//! # Responsibilities
//! - Hand out a unique handle per in-flight request
//! - Keep each handle's values isolated from every other handle
//! - Destroy entries when the request leaves the pipeline
//!
//! # Design Decisions
//! - Sharded map (DashMap) so concurrent requests never contend on one lock
//! - All operations are synchronous in-memory operations; nothing here awaits
//! - Missing keys and destroyed handles are errors, never silent defaults

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use thiserror::Error;

use crate::db::ConnectionId;

/// Relaxed ordering is enough: handles only need to be unique.
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier of one request's context entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(u64);

impl ContextHandle {
    fn next() -> Self {
        Self(HANDLE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw handle value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Keys understood by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextKey {
    CorrelationId,
    RequestId,
    /// The pooled connection currently bound to the request.
    Connection,
    /// Free-form value set by application handlers.
    Attribute(String),
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextKey::CorrelationId => f.write_str("correlationId"),
            ContextKey::RequestId => f.write_str("requestId"),
            ContextKey::Connection => f.write_str("connection"),
            ContextKey::Attribute(name) => write!(f, "attribute:{}", name),
        }
    }
}

/// Values held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextValue {
    Text(String),
    Connection(ConnectionId),
}

impl ContextValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContextValue::Text(s) => Some(s),
            ContextValue::Connection(_) => None,
        }
    }

    pub fn as_connection(&self) -> Option<ConnectionId> {
        match self {
            ContextValue::Connection(id) => Some(*id),
            ContextValue::Text(_) => None,
        }
    }
}

/// Lookup failures. Both variants indicate a programming error on the
/// request path and surface as a 500.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("context {0} does not exist")]
    HandleNotFound(ContextHandle),

    #[error("context {handle} has no value for {key}")]
    KeyNotFound {
        handle: ContextHandle,
        key: ContextKey,
    },
}

#[derive(Debug)]
struct Entry {
    started_at: Instant,
    values: HashMap<ContextKey, ContextValue>,
}

/// Process-wide store of request contexts.
///
/// Cloning is cheap; all clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct ContextStore {
    entries: Arc<DashMap<ContextHandle, Entry>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty entry and return its handle.
    pub fn create(&self) -> ContextHandle {
        let handle = ContextHandle::next();
        self.entries.insert(
            handle,
            Entry {
                started_at: Instant::now(),
                values: HashMap::new(),
            },
        );
        tracing::trace!(handle = %handle, "Context created");
        handle
    }

    /// Create an entry whose lifetime is tied to the returned scope.
    pub fn scope(&self) -> ContextScope {
        ContextScope {
            store: self.clone(),
            handle: self.create(),
        }
    }

    pub fn set(
        &self,
        handle: ContextHandle,
        key: ContextKey,
        value: ContextValue,
    ) -> Result<(), ContextError> {
        let mut entry = self
            .entries
            .get_mut(&handle)
            .ok_or(ContextError::HandleNotFound(handle))?;
        entry.values.insert(key, value);
        Ok(())
    }

    pub fn get(&self, handle: ContextHandle, key: &ContextKey) -> Result<ContextValue, ContextError> {
        let entry = self
            .entries
            .get(&handle)
            .ok_or(ContextError::HandleNotFound(handle))?;
        entry
            .values
            .get(key)
            .cloned()
            .ok_or_else(|| ContextError::KeyNotFound {
                handle,
                key: key.clone(),
            })
    }

    /// Remove a single key, returning the previous value if any.
    pub fn remove(
        &self,
        handle: ContextHandle,
        key: &ContextKey,
    ) -> Result<Option<ContextValue>, ContextError> {
        let mut entry = self
            .entries
            .get_mut(&handle)
            .ok_or(ContextError::HandleNotFound(handle))?;
        Ok(entry.values.remove(key))
    }

    pub fn started_at(&self, handle: ContextHandle) -> Result<Instant, ContextError> {
        self.entries
            .get(&handle)
            .map(|entry| entry.started_at)
            .ok_or(ContextError::HandleNotFound(handle))
    }

    /// Drop the entry. Returns false if it was already gone.
    pub fn destroy(&self, handle: ContextHandle) -> bool {
        let existed = self.entries.remove(&handle).is_some();
        if existed {
            tracing::trace!(handle = %handle, "Context destroyed");
        }
        existed
    }

    /// Number of live entries (one per in-flight request).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// RAII guard that destroys its context entry on drop.
///
/// Dropping happens on every exit path, including a cancelled request future.
#[derive(Debug)]
pub struct ContextScope {
    store: ContextStore,
    handle: ContextHandle,
}

impl ContextScope {
    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        self.store.destroy(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique() {
        let store = ContextStore::new();
        let a = store.create();
        let b = store.create();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn values_are_isolated_per_handle() {
        let store = ContextStore::new();
        let a = store.create();
        let b = store.create();

        store
            .set(a, ContextKey::CorrelationId, ContextValue::Text("abc".into()))
            .unwrap();

        assert_eq!(
            store.get(a, &ContextKey::CorrelationId).unwrap(),
            ContextValue::Text("abc".into())
        );
        assert_eq!(
            store.get(b, &ContextKey::CorrelationId),
            Err(ContextError::KeyNotFound {
                handle: b,
                key: ContextKey::CorrelationId
            })
        );
    }

    #[test]
    fn destroyed_handle_is_not_found() {
        let store = ContextStore::new();
        let handle = store.create();
        store
            .set(handle, ContextKey::RequestId, ContextValue::Text("r1".into()))
            .unwrap();

        assert!(store.destroy(handle));
        assert!(!store.destroy(handle));
        assert_eq!(
            store.get(handle, &ContextKey::RequestId),
            Err(ContextError::HandleNotFound(handle))
        );
        assert_eq!(
            store.set(handle, ContextKey::RequestId, ContextValue::Text("r2".into())),
            Err(ContextError::HandleNotFound(handle))
        );
    }

    #[test]
    fn scope_destroys_on_drop() {
        let store = ContextStore::new();
        let scope = store.scope();
        let handle = scope.handle();
        assert!(store.started_at(handle).is_ok());

        drop(scope);
        assert!(store.is_empty());
        assert!(store.started_at(handle).is_err());
    }

    #[test]
    fn remove_clears_single_key() {
        let store = ContextStore::new();
        let handle = store.create();
        let key = ContextKey::Attribute("tenant".into());
        store
            .set(handle, key.clone(), ContextValue::Text("t1".into()))
            .unwrap();

        assert_eq!(
            store.remove(handle, &key).unwrap(),
            Some(ContextValue::Text("t1".into()))
        );
        assert_eq!(store.remove(handle, &key).unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_writers_do_not_bleed() {
        let store = ContextStore::new();
        let mut tasks = Vec::new();

        for i in 0..64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let scope = store.scope();
                let expected = format!("corr-{}", i);
                store
                    .set(
                        scope.handle(),
                        ContextKey::CorrelationId,
                        ContextValue::Text(expected.clone()),
                    )
                    .unwrap();
                tokio::task::yield_now().await;
                let seen = store
                    .get(scope.handle(), &ContextKey::CorrelationId)
                    .unwrap();
                assert_eq!(seen.as_text(), Some(expected.as_str()));
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert!(store.is_empty());
    }
}
