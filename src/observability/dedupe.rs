//! Suppression of repeated log lines.
//!
//! Lenient output validation can fail on every request for the same route.
//! The cache lets the first occurrence through and swallows repeats. When it
//! grows past capacity it is cleared wholesale, so a long-lived process
//! re-reports old problems occasionally instead of growing without bound.

use std::collections::HashSet;
use std::sync::Mutex;

pub const DEFAULT_DEDUPE_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct DedupeCache {
    capacity: usize,
    seen: Mutex<HashSet<String>>,
}

impl DedupeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// True the first time `key` is offered since the last clear.
    pub fn first_occurrence(&self, key: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if seen.contains(key) {
            return false;
        }
        seen.insert(key.to_string());
        if seen.len() > self.capacity {
            seen.clear();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupeCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUPE_CAPACITY)
    }
}
