//! Memoized user profile lookups.
//!
//! Profiles are keyed by display name, the only identifier the item payloads
//! carry consistently. Two accounts sharing a display name therefore resolve
//! to the same cached profile. Entries are never evicted.
//!
//! The cache is an explicit object owned by a client. Clones share the same
//! storage, so a caller can hand one cache to a client and inspect it later.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct UserCache {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl UserCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached profile for `display_name`, if it was fetched before.
    pub fn get(&self, display_name: &str) -> Option<Value> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(display_name)
            .cloned()
    }

    /// Store the raw profile fetched for `display_name`.
    pub fn insert(&self, display_name: impl Into<String>, profile: Value) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(display_name.into(), profile);
    }

    pub fn contains(&self, display_name: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(display_name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
