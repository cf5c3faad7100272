//! File-based store backend for persistent storage.

use crate::backend::StoreBackend;
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// A file-based store backend.
///
/// Each key is stored as its own file under a root directory, so individual
/// writes stay small and independent. Data survives process restarts.
///
/// # Durability
///
/// Writes go to a temporary file which is fsynced and then renamed over the
/// final name, so a value is either fully present or fully absent after a
/// crash - never truncated.
///
/// # Key encoding
///
/// Keys may contain arbitrary characters; bytes outside `[A-Za-z0-9_-]` are
/// percent-encoded into the file name and decoded again by [`keys`]. Dots
/// are encoded too, so no stored file name can collide with the `.tmp`
/// suffix used for in-flight writes.
///
/// [`keys`]: StoreBackend::keys
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens a file store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Returns the root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(encode_key(key))
    }
}

#[async_trait]
impl StoreBackend for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let final_path = self.path_for(key);
        let mut tmp_name = final_path.file_name().unwrap_or_default().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = final_path.with_file_name(tmp_name);

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&value).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Skip in-flight temporary files
            if name.ends_with(".tmp") {
                continue;
            }
            keys.push(decode_key(name)?);
        }

        Ok(keys)
    }
}

/// Percent-encodes a key into a safe file name.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => {
                out.push(byte as char);
            }
            _ => {
                out.push('%');
                out.push_str(&format!("{byte:02X}"));
            }
        }
    }
    out
}

/// Decodes a file name produced by [`encode_key`] back into a key.
fn decode_key(name: &str) -> StorageResult<String> {
    let mut bytes = Vec::with_capacity(name.len());
    let mut chars = name.bytes();

    while let Some(b) = chars.next() {
        if b == b'%' {
            let hi = chars.next();
            let lo = chars.next();
            let (Some(hi), Some(lo)) = (hi, lo) else {
                return Err(StorageError::InvalidKey(name.to_string()));
            };
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| StorageError::InvalidKey(name.to_string()))?;
            bytes.push(hex);
        } else {
            bytes.push(b);
        }
    }

    String::from_utf8(bytes).map_err(|_| StorageError::InvalidKey(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_encoding_roundtrip() {
        for key in [
            "entity:doc-1",
            "cache:user profile",
            "plain",
            "a%b:c/d",
            "report.tmp",
        ] {
            let encoded = encode_key(key);
            assert!(!encoded.contains(':'));
            assert!(!encoded.contains('/'));
            assert!(!encoded.ends_with(".tmp"));
            assert_eq!(decode_key(&encoded).unwrap(), key);
        }
    }

    #[test]
    fn decode_rejects_truncated_escape() {
        assert!(decode_key("abc%4").is_err());
        assert!(decode_key("abc%zz").is_err());
    }

    #[tokio::test]
    async fn file_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.set("entity:x", b"payload".to_vec()).await.unwrap();
        assert_eq!(
            store.get("entity:x").await.unwrap(),
            Some(b"payload".to_vec())
        );
        assert_eq!(store.get("entity:y").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.set("queue", b"[1,2,3]".to_vec()).await.unwrap();
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get("queue").await.unwrap(), Some(b"[1,2,3]".to_vec()));
    }

    #[tokio::test]
    async fn file_remove_and_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.set("entity:a", vec![1]).await.unwrap();
        store.set("entity:b", vec![2]).await.unwrap();
        store.remove("entity:a").await.unwrap();

        let keys = store.keys().await.unwrap();
        assert_eq!(keys, vec!["entity:b".to_string()]);

        // Removing an absent key is a no-op
        store.remove("entity:a").await.unwrap();
    }

    #[tokio::test]
    async fn file_set_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.set("settings", b"old".to_vec()).await.unwrap();
        store.set("settings", b"new".to_vec()).await.unwrap();

        assert_eq!(store.get("settings").await.unwrap(), Some(b"new".to_vec()));
        assert_eq!(store.keys().await.unwrap().len(), 1);
    }
}
