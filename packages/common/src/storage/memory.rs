use std::collections::HashMap;
use std::io::Cursor;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

use super::error::StorageError;
use super::key::StorageKey;
use super::traits::{BlobStore, BoxReader};

/// Process-local blob store. Contents are lost when the process exits.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<StorageKey, Vec<u8>>>,
    max_size: u64,
}

impl MemoryBlobStore {
    pub fn new(max_size: u64) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            max_size,
        }
    }

    /// Number of blobs currently held.
    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn put_stream(&self, key: &StorageKey, reader: BoxReader) -> Result<u64, StorageError> {
        if self.blobs.read().await.contains_key(key) {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }

        let mut data = Vec::new();
        reader.take(self.max_size.saturating_add(1)).read_to_end(&mut data).await?;
        let size = data.len() as u64;
        if size > self.max_size {
            return Err(StorageError::SizeLimitExceeded {
                actual: size,
                limit: self.max_size,
            });
        }

        let mut blobs = self.blobs.write().await;
        if blobs.contains_key(key) {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        blobs.insert(key.clone(), data);
        Ok(size)
    }

    async fn get_stream(&self, key: &StorageKey) -> Result<BoxReader, StorageError> {
        let blobs = self.blobs.read().await;
        let data = blobs
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(Box::new(Cursor::new(data.clone())))
    }

    async fn exists(&self, key: &StorageKey) -> Result<bool, StorageError> {
        Ok(self.blobs.read().await.contains_key(key))
    }

    async fn delete(&self, key: &StorageKey) -> Result<bool, StorageError> {
        Ok(self.blobs.write().await.remove(key).is_some())
    }
}
