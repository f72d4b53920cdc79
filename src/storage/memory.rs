//! In-memory object store used by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ObjectStore, StorageError, StoredObject};

/// Object store keeping everything in a process-local map.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an object exists under the given bucket and key.
    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .await
            .contains_key(&(bucket.to_string(), key.to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        self.objects
            .lock()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(&self, bucket: &str, key: &str, object: StoredObject) -> Result<(), StorageError> {
        self.objects
            .lock()
            .await
            .insert((bucket.to_string(), key.to_string()), object);
        Ok(())
    }

    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), StorageError> {
        let object = self.get(bucket, src_key).await?;
        self.put(bucket, dst_key, object).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .await
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}
