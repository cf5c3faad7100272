//! In-memory store backend for testing.

use crate::backend::StoreBackend;
use crate::error::StorageResult;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory store backend.
///
/// This backend stores all data in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral engines that don't need persistence
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across tasks.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory store with pre-existing entries.
    ///
    /// Useful for testing startup/recovery scenarios.
    #[must_use]
    pub fn with_entries(entries: HashMap<String, Vec<u8>>) -> Self {
        Self {
            data: RwLock::new(entries),
        }
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Clears all entries from the store.
    pub fn clear(&self) {
        self.data.write().clear();
    }
}

#[async_trait]
impl StoreBackend for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_new_is_empty() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_set_then_get() {
        let store = MemoryStore::new();
        store.set("a", b"hello".to_vec()).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.get("b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_set_replaces() {
        let store = MemoryStore::new();
        store.set("a", b"one".to_vec()).await.unwrap();
        store.set("a", b"two".to_vec()).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_remove() {
        let store = MemoryStore::new();
        store.set("a", b"x".to_vec()).await.unwrap();
        store.remove("a").await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), None);

        // Removing an absent key is a no-op
        store.remove("a").await.unwrap();
    }

    #[tokio::test]
    async fn memory_keys() {
        let store = MemoryStore::new();
        store.set("one", vec![1]).await.unwrap();
        store.set("two", vec![2]).await.unwrap();

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn memory_with_entries() {
        let mut entries = HashMap::new();
        entries.insert("seed".to_string(), b"value".to_vec());

        let store = MemoryStore::with_entries(entries);
        assert_eq!(store.get("seed").await.unwrap(), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn memory_clear() {
        let store = MemoryStore::new();
        store.set("a", vec![1]).await.unwrap();
        store.clear();
        assert!(store.is_empty());
    }
}
