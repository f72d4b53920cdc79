//! Object storage boundary.
//!
//! Documents move through two key prefixes inside a bucket: `raw/` for uploads
//! awaiting ingestion and `done/` for documents that have been indexed. The
//! [`ObjectStore`] trait is the seam the pipeline talks through; [`FsStore`]
//! persists to a local directory tree and [`MemoryStore`] backs tests.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

pub mod fs;
pub mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Content type assumed whenever an object or message does not carry one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Errors produced by object store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested object does not exist.
    #[error("object not found: {bucket}/{key}")]
    NotFound {
        /// Bucket the lookup targeted.
        bucket: String,
        /// Key the lookup targeted.
        key: String,
    },
    /// The bucket or key is empty or would escape the store's root.
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    /// The underlying filesystem operation failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The object's attribute record could not be read or written.
    #[error("object attributes malformed: {0}")]
    Attributes(#[from] serde_json::Error),
}

/// A stored object: its body plus the attributes captured at upload time.
#[derive(Debug, Clone, Default)]
pub struct StoredObject {
    /// Raw object body.
    pub body: Vec<u8>,
    /// Content type recorded when the object was stored, if any.
    pub content_type: Option<String>,
    /// User-supplied metadata keys and values.
    pub metadata: HashMap<String, String>,
}

impl StoredObject {
    /// Build an object from a body and optional content type, with no metadata.
    pub fn new(body: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            body,
            content_type,
            metadata: HashMap::new(),
        }
    }

    /// The body as raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// The body decoded as UTF-8 text. Invalid sequences are replaced rather
    /// than surfaced as errors, matching how extracted text is consumed.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The recorded content type, or [`DEFAULT_CONTENT_TYPE`] when absent.
    pub fn content_type_or_default(&self) -> &str {
        self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE)
    }
}

/// Bucket-and-key addressed blob storage used by every pipeline stage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object and its attributes.
    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError>;

    /// Store an object, replacing any existing object under the same key.
    async fn put(&self, bucket: &str, key: &str, object: StoredObject) -> Result<(), StorageError>;

    /// Copy an object to a new key within the same bucket, attributes included.
    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), StorageError>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;
}
