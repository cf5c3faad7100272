//! Store backend trait definition.

use crate::error::StorageResult;
use async_trait::async_trait;

/// A persisted key/value store.
///
/// Store backends are **opaque byte stores** keyed by UTF-8 strings. The
/// engine owns all interpretation of the stored bytes - backends do not
/// understand entities, queue items, or cache entries.
///
/// # Invariants
///
/// - `get` returns exactly the bytes most recently passed to `set` for
///   that key, or `None` if the key was never set or has been removed
/// - `set` is durable before it returns: the value must survive process
///   termination immediately after the call completes
/// - `keys` returns every currently stored key, in no particular order
/// - Backends must be `Send + Sync` for shared access
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing and ephemeral use
/// - [`super::FileStore`] - For persistent storage
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Returns the value stored under `key`, if any.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be made durable.
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    /// Removes the value stored under `key`.
    ///
    /// Removing an absent key is a no-op.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Returns all currently stored keys.
    async fn keys(&self) -> StorageResult<Vec<String>>;
}
