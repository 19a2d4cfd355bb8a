//! # Result Cache
//!
//! TTL-based cache over the [`KeyValueStore`] substrate. Entries past their
//! TTL are returned flagged stale rather than deleted, so callers can fall
//! back to degraded data; eviction happens only through the opportunistic
//! size-bounded garbage collector.

use crate::store::{KeyValueStore, StoreError};
use crate::types::CacheKey;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CACHE_PREFIX: &str = "comps:cache:";

/// Entry count above which a write triggers expired-entry collection.
const GC_ENTRY_BOUND: usize = 1000;

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry<T> {
    value: T,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Probe used by the garbage collector to read expiry without decoding the
/// full value.
#[derive(Debug, Deserialize)]
struct ExpiryProbe {
    expires_at: DateTime<Utc>,
}

/// Cache read result. The value is returned even past expiry, with `stale`
/// set, so the caller decides whether degraded data is acceptable.
#[derive(Debug, Clone)]
pub struct CacheHit<T> {
    pub value: T,
    pub stale: bool,
    pub created_at: DateTime<Utc>,
}

/// TTL cache for enrichment results, shared with other read paths through
/// the underlying store (last-writer-wins, no transactions).
pub struct ResultCache {
    store: Arc<dyn KeyValueStore>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Read an entry. Expired entries are returned with `stale = true`;
    /// storage errors propagate to the caller.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
    ) -> Result<Option<CacheHit<T>>, StoreError> {
        let Some(raw) = self.store.get(&storage_key(key)).await? else {
            return Ok(None);
        };

        let entry: StoredEntry<T> = serde_json::from_str(&raw)?;
        let stale = Utc::now() >= entry.expires_at;
        Ok(Some(CacheHit {
            value: entry.value,
            stale,
            created_at: entry.created_at,
        }))
    }

    /// Write an entry, unconditionally overwriting any previous value, then
    /// run the opportunistic garbage collector.
    pub async fn set<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let created_at = Utc::now();
        let expires_at = created_at
            + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::hours(24));
        let entry = StoredEntry {
            value,
            created_at,
            expires_at,
        };

        self.store
            .put(&storage_key(key), serde_json::to_string(&entry)?)
            .await?;

        self.collect_expired().await;
        Ok(())
    }

    /// Remove every entry under the cache namespace.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        let keys = self.store.keys_with_prefix(CACHE_PREFIX).await?;
        for key in keys {
            self.store.delete(&key).await?;
        }
        Ok(())
    }

    /// Size-bounded GC: only scans once the namespace exceeds the entry
    /// bound, and only removes entries past expiry. Failures are logged and
    /// swallowed; collection gets another chance on the next write.
    async fn collect_expired(&self) {
        let keys = match self.store.keys_with_prefix(CACHE_PREFIX).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Cache GC scan failed");
                return;
            }
        };
        if keys.len() <= GC_ENTRY_BOUND {
            return;
        }

        let now = Utc::now();
        let mut removed = 0usize;
        for key in keys {
            let Ok(Some(raw)) = self.store.get(&key).await else {
                continue;
            };
            let Ok(probe) = serde_json::from_str::<ExpiryProbe>(&raw) else {
                // Undecodable entries are junk; drop them too.
                if self.store.delete(&key).await.is_ok() {
                    removed += 1;
                }
                continue;
            };
            if now >= probe.expires_at && self.store.delete(&key).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Cache GC removed expired entries");
        }
    }
}

fn storage_key(key: &CacheKey) -> String {
    format!("{CACHE_PREFIX}{key}")
}
