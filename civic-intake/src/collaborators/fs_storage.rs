//! Object storage on the local filesystem
//!
//! Objects are written below `base_dir` with `create_new`, so an existing key
//! surfaces as [`StorageError::AlreadyExists`] rather than being overwritten.

use super::{ObjectStorage, StorageError};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

pub struct FsObjectStorage {
    base_dir: PathBuf,
    public_base_url: String,
}

impl FsObjectStorage {
    pub fn new(base_dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Resolve `key` below the base dir, refusing absolute paths and `..`
    fn object_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(StorageError::Failed(format!("Invalid object key: {}", key)));
        }
        Ok(self.base_dir.join(relative))
    }

    fn public_url(&self, key: &str, path: &Path) -> String {
        if self.public_base_url == "file://" {
            format!("file://{}", path.display())
        } else {
            format!("{}/{}", self.public_base_url.trim_end_matches('/'), key)
        }
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, StorageError> {
        let path = self.object_path(key)?;
        let data = bytes.to_vec();
        let write_path = path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            if let Some(parent) = write_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Failed(format!("Create dir failed: {}", e)))?;
            }
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&write_path)
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::AlreadyExists => {
                        StorageError::AlreadyExists(write_path.display().to_string())
                    }
                    _ => StorageError::Failed(format!("Open failed: {}", e)),
                })?;
            file.write_all(&data)
                .and_then(|_| file.sync_all())
                .map_err(|e| StorageError::Failed(format!("Write failed: {}", e)))
        })
        .await
        .map_err(|e| StorageError::Failed(format!("Storage task failed: {}", e)))??;

        tracing::debug!(key, content_type, bytes = bytes.len(), "Stored object");
        Ok(self.public_url(key, &path))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(key)?;

        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Failed(format!("Remove failed: {}", e))),
        })
        .await
        .map_err(|e| StorageError::Failed(format!("Storage task failed: {}", e)))??;

        tracing::debug!(key, "Deleted object");
        Ok(())
    }
}
