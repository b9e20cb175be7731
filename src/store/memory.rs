//! In-memory blob store

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{BlobStore, Origin};
use crate::error::{Error, Result};

/// Key -> bytes map guarded by a single reader/writer lock
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Total bytes held across all blobs
    pub fn total_bytes(&self) -> u64 {
        self.data.read().values().map(|v| v.len() as u64).sum()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        self.data.write().insert(key.to_string(), content);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.data
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(key))
    }

    async fn exists(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }
}

#[async_trait]
impl Origin for MemoryStore {
    async fn exists(&self, key: &str) -> bool {
        BlobStore::exists(self, key).await
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        BlobStore::get(self, key).await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_memory_put_get() {
        let store = MemoryStore::new();
        store.put("key", Bytes::from_static(b"data")).await.unwrap();

        let result = BlobStore::get(&store, "key").await.unwrap();
        assert_eq!(result, Bytes::from_static(b"data"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), 4);
    }

    #[tokio::test]
    async fn test_memory_overwrite() {
        let store = MemoryStore::new();
        store.put("key", Bytes::from_static(b"old")).await.unwrap();
        store.put("key", Bytes::from_static(b"newer")).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(
            BlobStore::get(&store, "key").await.unwrap(),
            Bytes::from_static(b"newer")
        );
    }

    #[tokio::test]
    async fn test_memory_get_missing() {
        let store = MemoryStore::new();
        let err = BlobStore::get(&store, "missing").await.unwrap_err();
        assert_matches!(err, Error::NotFound { ref key } if key == "missing");
    }

    #[tokio::test]
    async fn test_memory_delete_missing_is_noop() {
        let store = MemoryStore::new();
        store.delete("missing").await.unwrap();

        store.put("key", Bytes::from_static(b"data")).await.unwrap();
        store.delete("key").await.unwrap();
        assert!(!BlobStore::exists(&store, "key").await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_memory_as_origin() {
        let store = MemoryStore::new();
        store.put("img", Bytes::from_static(b"raw")).await.unwrap();

        let origin: &dyn Origin = &store;
        assert!(origin.exists("img").await);
        assert!(!origin.exists("other").await);
        assert_eq!(origin.get("img").await.unwrap(), Bytes::from_static(b"raw"));
    }
}
