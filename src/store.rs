//! # Key-Value Storage Seam
//!
//! The persistent storage substrate is an external collaborator assumed to
//! survive process restarts. This module defines the narrow async trait the
//! result cache and feature flags are written against, plus an in-memory
//! implementation used by tests and ephemeral deployments.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Errors surfaced by the storage substrate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or refused the operation
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// Stored document could not be encoded or decoded
    #[error("stored document malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// String-keyed document store. Values are opaque JSON documents.
///
/// Implementations must be safe for concurrent access; the cache relies only
/// on last-writer-wins semantics, never on transactions.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All keys beginning with `prefix`, for namespace scans.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Hash-map backed store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let store = InMemoryStore::new();
        store.put("a", "1".into()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn prefix_scan_only_matches_namespace() {
        let store = InMemoryStore::new();
        store.put("comps:cache:x", "1".into()).await.unwrap();
        store.put("comps:cache:y", "2".into()).await.unwrap();
        store.put("comps:flags", "3".into()).await.unwrap();

        let mut keys = store.keys_with_prefix("comps:cache:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["comps:cache:x", "comps:cache:y"]);
    }
}
