//! In-memory blob store.
//!
//! Nothing survives the process. Used by tests and by ephemeral sessions.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{BlobStore, StoreResult};

/// Blob store backed by a concurrent hash map.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Total stored bytes across all blobs
    pub fn total_bytes(&self) -> usize {
        self.blobs.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> StoreResult<()> {
        self.blobs.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.blobs.get(key).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.blobs.remove(key);
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.blobs.clear();
        Ok(())
    }

    async fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.blobs.contains_key(key))
    }
}

impl std::fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBlobStore")
            .field("blobs", &self.blobs.len())
            .finish()
    }
}
