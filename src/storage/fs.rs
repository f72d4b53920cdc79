//! Filesystem-backed object store.
//!
//! Objects live under `<root>/<bucket>/objects/<key>` with attributes (content
//! type and metadata) in a JSON sidecar under `<root>/<bucket>/.attrs/<key>.json`.
//! Keys may contain `/` separators, which map onto subdirectories.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ObjectStore, StorageError, StoredObject};

/// Object store persisting to a local directory tree.
pub struct FsStore {
    root: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ObjectAttrs {
    content_type: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

impl FsStore {
    /// Create a store rooted at `root`. The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.bucket_dir(bucket)?;
        path.push("objects");
        push_key(&mut path, key)?;
        Ok(path)
    }

    fn attrs_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let mut path = self.bucket_dir(bucket)?;
        path.push(".attrs");
        push_key(&mut path, key)?;
        path.set_file_name(match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => format!("{name}.json"),
            None => return Err(StorageError::InvalidKey(key.to_string())),
        });
        Ok(path)
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        if bucket.is_empty() || !valid_component(bucket) {
            return Err(StorageError::InvalidKey(format!("bucket {bucket:?}")));
        }
        Ok(self.root.join(bucket))
    }

    fn not_found(bucket: &str, key: &str) -> StorageError {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

/// Append a `/`-separated object key to `path`, rejecting traversal components.
fn push_key(path: &mut PathBuf, key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.starts_with('/') || key.ends_with('/') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    for component in key.split('/') {
        if !valid_component(component) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        path.push(component);
    }
    Ok(())
}

fn valid_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && !component.contains('\\')
        && !component.contains('\0')
}

async fn write_with_parents(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        let body = match tokio::fs::read(self.object_path(bucket, key)?).await {
            Ok(body) => body,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Self::not_found(bucket, key));
            }
            Err(err) => return Err(err.into()),
        };
        let attrs = match tokio::fs::read(self.attrs_path(bucket, key)?).await {
            Ok(raw) => serde_json::from_slice::<ObjectAttrs>(&raw)?,
            Err(err) if err.kind() == ErrorKind::NotFound => ObjectAttrs::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(StoredObject {
            body,
            content_type: attrs.content_type,
            metadata: attrs.metadata,
        })
    }

    async fn put(&self, bucket: &str, key: &str, object: StoredObject) -> Result<(), StorageError> {
        let attrs = ObjectAttrs {
            content_type: object.content_type,
            metadata: object.metadata,
        };
        write_with_parents(&self.object_path(bucket, key)?, &object.body).await?;
        write_with_parents(&self.attrs_path(bucket, key)?, &serde_json::to_vec(&attrs)?).await?;
        Ok(())
    }

    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> Result<(), StorageError> {
        let object = self.get(bucket, src_key).await?;
        self.put(bucket, dst_key, object).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        for path in [self.object_path(bucket, key)?, self.attrs_path(bucket, key)?] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
