//! TTL- and tag-addressable ephemeral cache.
//!
//! The cache is advisory only: it is a derived copy of data whose source
//! of truth lives elsewhere, so losing it never loses data - it only
//! forces a future re-fetch. Entries persist under their own `cache:` keys
//! so a restart starts warm, and the whole cache is bounded by a byte
//! budget enforced with least-recently-accessed eviction.

use crate::error::SyncResult;
use crate::keys;
use parking_lot::RwLock;
use satchel_storage::StoreBackend;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// One cached value with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key.
    pub key: String,
    /// The cached value.
    pub data: Value,
    /// Expiry time, epoch millis.
    pub expires_at: i64,
    /// Serialized size of `data`.
    pub size_bytes: usize,
    /// Number of reads served.
    pub access_count: u64,
    /// Last read time, epoch millis.
    pub last_accessed: i64,
    /// Invalidation tags.
    pub tags: BTreeSet<String>,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Number of live entries.
    pub entries: usize,
    /// Total serialized size of live entries.
    pub total_size_bytes: usize,
    /// Reads served across all live entries.
    pub total_accesses: u64,
}

/// TTL- and tag-addressable cache with access statistics.
pub struct CacheManager {
    backend: Arc<dyn StoreBackend>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    max_bytes: usize,
}

impl CacheManager {
    /// Loads cached entries from the store and sweeps out anything that
    /// expired while the process was down.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails; unreadable entries are skipped.
    pub async fn load(backend: Arc<dyn StoreBackend>, max_storage_mb: u64) -> SyncResult<Self> {
        let mut entries = HashMap::new();

        for key in backend.keys().await? {
            if !key.starts_with(keys::CACHE_PREFIX) {
                continue;
            }
            let Some(bytes) = backend.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) => {
                    entries.insert(entry.key.clone(), entry);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unreadable cache entry");
                }
            }
        }

        let manager = Self {
            backend,
            entries: RwLock::new(entries),
            max_bytes: (max_storage_mb as usize).saturating_mul(1024 * 1024),
        };
        manager.sweep_expired().await?;
        Ok(manager)
    }

    /// Caches a value for `ttl_minutes`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the store write fails.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        data: &T,
        ttl_minutes: i64,
        tags: impl IntoIterator<Item = String>,
    ) -> SyncResult<()> {
        let data = serde_json::to_value(data)?;
        let size_bytes = serde_json::to_vec(&data)?.len();
        let now = crate::now_millis();

        let entry = CacheEntry {
            key: key.to_string(),
            data,
            expires_at: now + ttl_minutes.saturating_mul(60_000),
            size_bytes,
            access_count: 0,
            last_accessed: now,
            tags: tags.into_iter().collect(),
        };

        self.entries.write().insert(key.to_string(), entry.clone());
        self.persist(&entry).await?;
        self.enforce_budget().await
    }

    /// Returns a cached value, or `None` if absent or expired.
    ///
    /// An expired entry is evicted on the spot; a served read bumps the
    /// entry's access statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the cached value cannot be deserialized as `T`
    /// or the store fails.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
        let now = crate::now_millis();

        let entry = self.entries.read().get(key).cloned();
        let Some(mut entry) = entry else {
            return Ok(None);
        };

        if now > entry.expires_at {
            self.evict(key).await?;
            return Ok(None);
        }

        entry.access_count += 1;
        entry.last_accessed = now;
        self.entries.write().insert(key.to_string(), entry.clone());
        self.persist(&entry).await?;

        Ok(Some(serde_json::from_value(entry.data)?))
    }

    /// Clears one entry, all entries matching any given tag, or everything
    /// if neither a key nor tags are given.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn invalidate(
        &self,
        key: Option<&str>,
        tags: Option<&[String]>,
    ) -> SyncResult<usize> {
        let victims: Vec<String> = match (key, tags) {
            (None, None) => self.entries.read().keys().cloned().collect(),
            (key, tags) => {
                let entries = self.entries.read();
                entries
                    .values()
                    .filter(|e| {
                        key == Some(e.key.as_str())
                            || tags.is_some_and(|tags| {
                                e.tags.iter().any(|t| tags.contains(t))
                            })
                    })
                    .map(|e| e.key.clone())
                    .collect()
            }
        };

        for victim in &victims {
            self.evict(victim).await?;
        }
        Ok(victims.len())
    }

    /// Removes all expired entries in one pass.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn sweep_expired(&self) -> SyncResult<usize> {
        let now = crate::now_millis();
        let expired: Vec<String> = self
            .entries
            .read()
            .values()
            .filter(|e| now > e.expires_at)
            .map(|e| e.key.clone())
            .collect();

        for key in &expired {
            self.evict(key).await?;
        }

        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "swept expired cache entries");
        }
        Ok(expired.len())
    }

    /// Returns aggregate statistics over live entries.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        CacheStats {
            entries: entries.len(),
            total_size_bytes: entries.values().map(|e| e.size_bytes).sum(),
            total_accesses: entries.values().map(|e| e.access_count).sum(),
        }
    }

    async fn evict(&self, key: &str) -> SyncResult<()> {
        self.entries.write().remove(key);
        self.backend.remove(&keys::cache(key)).await?;
        Ok(())
    }

    async fn persist(&self, entry: &CacheEntry) -> SyncResult<()> {
        let bytes = serde_json::to_vec(entry)?;
        self.backend.set(&keys::cache(&entry.key), bytes).await?;
        Ok(())
    }

    /// Evicts least-recently-accessed entries until the byte budget fits.
    async fn enforce_budget(&self) -> SyncResult<()> {
        loop {
            let victim = {
                let entries = self.entries.read();
                let total: usize = entries.values().map(|e| e.size_bytes).sum();
                if total <= self.max_bytes {
                    break;
                }
                entries
                    .values()
                    .min_by_key(|e| (e.last_accessed, e.key.clone()))
                    .map(|e| e.key.clone())
            };

            match victim {
                Some(key) => {
                    tracing::debug!(key = %key, "evicting cache entry over byte budget");
                    self.evict(&key).await?;
                }
                None => break,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_storage::MemoryStore;
    use serde_json::json;

    async fn cache() -> CacheManager {
        CacheManager::load(Arc::new(MemoryStore::new()), 50)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn set_then_get_typed() {
        let cache = cache().await;
        cache
            .set("profile", &json!({"name": "a"}), 10, ["user".to_string()])
            .await
            .unwrap();

        let value: Option<Value> = cache.get("profile").await.unwrap();
        assert_eq!(value, Some(json!({"name": "a"})));

        let missing: Option<Value> = cache.get("absent").await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn expired_get_evicts() {
        let cache = cache().await;
        cache
            .set("stale", &json!(1), -1, std::iter::empty())
            .await
            .unwrap();

        let value: Option<Value> = cache.get("stale").await.unwrap();
        assert_eq!(value, None);
        // The entry is gone, not just hidden
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn reads_bump_access_stats() {
        let cache = cache().await;
        cache
            .set("hot", &json!(1), 10, std::iter::empty())
            .await
            .unwrap();

        let _: Option<Value> = cache.get("hot").await.unwrap();
        let _: Option<Value> = cache.get("hot").await.unwrap();

        assert_eq!(cache.stats().total_accesses, 2);
    }

    #[tokio::test]
    async fn invalidate_by_key_tag_and_all() {
        let cache = cache().await;
        cache
            .set("a", &json!(1), 10, ["users".to_string()])
            .await
            .unwrap();
        cache
            .set("b", &json!(2), 10, ["users".to_string(), "feed".to_string()])
            .await
            .unwrap();
        cache
            .set("c", &json!(3), 10, ["feed".to_string()])
            .await
            .unwrap();

        assert_eq!(
            cache.invalidate(Some("a"), None).await.unwrap(),
            1
        );
        assert_eq!(cache.stats().entries, 2);

        assert_eq!(
            cache
                .invalidate(None, Some(&["feed".to_string()]))
                .await
                .unwrap(),
            2
        );
        assert_eq!(cache.stats().entries, 0);

        cache.set("d", &json!(4), 10, std::iter::empty()).await.unwrap();
        assert_eq!(cache.invalidate(None, None).await.unwrap(), 1);
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired() {
        let cache = cache().await;
        cache
            .set("old", &json!(1), -1, std::iter::empty())
            .await
            .unwrap();
        cache
            .set("fresh", &json!(2), 10, std::iter::empty())
            .await
            .unwrap();

        assert_eq!(cache.sweep_expired().await.unwrap(), 1);
        assert_eq!(cache.stats().entries, 1);

        let fresh: Option<Value> = cache.get("fresh").await.unwrap();
        assert_eq!(fresh, Some(json!(2)));
    }

    #[tokio::test]
    async fn load_sweeps_entries_that_expired_while_down() {
        let backend: Arc<dyn StoreBackend> = Arc::new(MemoryStore::new());
        {
            let cache = CacheManager::load(Arc::clone(&backend), 50).await.unwrap();
            cache
                .set("stale", &json!(1), -1, std::iter::empty())
                .await
                .unwrap();
            cache
                .set("fresh", &json!(2), 10, std::iter::empty())
                .await
                .unwrap();
        }

        let cache = CacheManager::load(Arc::clone(&backend), 50).await.unwrap();
        assert_eq!(cache.stats().entries, 1);
        // Swept from the backing store too, not just from memory
        assert!(backend.get("cache:stale").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_survives_restart() {
        let backend: Arc<dyn StoreBackend> = Arc::new(MemoryStore::new());
        {
            let cache = CacheManager::load(Arc::clone(&backend), 50).await.unwrap();
            cache
                .set("warm", &json!({"x": 1}), 10, std::iter::empty())
                .await
                .unwrap();
        }

        let cache = CacheManager::load(backend, 50).await.unwrap();
        let value: Option<Value> = cache.get("warm").await.unwrap();
        assert_eq!(value, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn byte_budget_evicts_least_recently_accessed() {
        let mut cache = cache().await;
        // Each entry serializes to 12 bytes, so three entries exceed this
        cache.max_bytes = 25;

        cache
            .set("first", &json!("0123456789"), 10, std::iter::empty())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache
            .set("second", &json!("0123456789"), 10, std::iter::empty())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // Touch "first" so "second" becomes the eviction candidate
        let _: Option<Value> = cache.get("first").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        cache
            .set("third", &json!("0123456789"), 10, std::iter::empty())
            .await
            .unwrap();

        let first: Option<Value> = cache.get("first").await.unwrap();
        let second: Option<Value> = cache.get("second").await.unwrap();
        let third: Option<Value> = cache.get("third").await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(third.is_some());
    }
}
