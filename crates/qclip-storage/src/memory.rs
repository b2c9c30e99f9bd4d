//! In-memory artifact store.
//!
//! Used by tests. Supports failure injection per key prefix so callers can
//! exercise error paths.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::store::ArtifactStore;

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Vec<u8>>,
    put_counts: HashMap<String, usize>,
    failing_put_prefixes: HashSet<String>,
    failing_get_prefixes: HashSet<String>,
    failing_delete_prefixes: HashSet<String>,
}

/// Thread-safe in-memory [`ArtifactStore`]. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-write; the map is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every put whose key starts with `prefix` fail.
    pub fn fail_puts(&self, prefix: impl Into<String>) {
        self.lock().failing_put_prefixes.insert(prefix.into());
    }

    /// Make every get whose key starts with `prefix` fail with a non-404 error.
    pub fn fail_gets(&self, prefix: impl Into<String>) {
        self.lock().failing_get_prefixes.insert(prefix.into());
    }

    /// Make every delete whose key starts with `prefix` fail.
    pub fn fail_deletes(&self, prefix: impl Into<String>) {
        self.lock().failing_delete_prefixes.insert(prefix.into());
    }

    /// Clear all injected failures.
    pub fn heal(&self) {
        let mut inner = self.lock();
        inner.failing_put_prefixes.clear();
        inner.failing_get_prefixes.clear();
        inner.failing_delete_prefixes.clear();
    }

    /// Insert an object directly, bypassing failure injection and counters.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.lock().objects.insert(key.into(), data.into());
    }

    /// Current contents of `key`, if any.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(key).cloned()
    }

    /// Number of successful puts to `key`.
    pub fn put_count(&self, key: &str) -> usize {
        self.lock().put_counts.get(key).copied().unwrap_or(0)
    }

    /// Sorted list of stored keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().objects.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn matches_any(prefixes: &HashSet<String>, key: &str) -> bool {
    prefixes.iter().any(|p| key.starts_with(p.as_str()))
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn put_bytes(&self, key: &str, data: Vec<u8>, _content_type: &str) -> StorageResult<()> {
        let mut inner = self.lock();
        if matches_any(&inner.failing_put_prefixes, key) {
            return Err(StorageError::upload_failed(format!("injected failure for {}", key)));
        }
        inner.objects.insert(key.to_string(), data);
        *inner.put_counts.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        let inner = self.lock();
        if matches_any(&inner.failing_get_prefixes, key) {
            return Err(StorageError::download_failed(format!("injected failure for {}", key)));
        }
        inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let inner = self.lock();
        if matches_any(&inner.failing_get_prefixes, key) {
            return Err(StorageError::download_failed(format!("injected failure for {}", key)));
        }
        Ok(inner.objects.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut inner = self.lock();
        if matches_any(&inner.failing_delete_prefixes, key) {
            return Err(StorageError::delete_failed(format!("injected failure for {}", key)));
        }
        inner.objects.remove(key);
        Ok(())
    }
}
