//! The artifact store abstraction.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

/// Content type for uploaded input artifacts.
pub const CONTENT_TYPE_OCTET: &str = "application/octet-stream";

/// Content type for JSON documents.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Blob storage keyed by string.
///
/// Puts overwrite unconditionally; a key is either fully written or absent.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write `data` under `key`, replacing any existing object.
    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()>;

    /// Upload a local file under `key`.
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        let data = tokio::fs::read(path).await?;
        self.put_bytes(key, data, content_type).await
    }

    /// Read the object at `key`. Returns [`StorageError::NotFound`] when absent.
    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Download the object at `key` into `path`, creating parent directories.
    async fn get_file(&self, key: &str, path: &Path) -> StorageResult<u64> {
        let bytes = self.get_bytes(key).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::download_failed(format!("Failed to create directory: {}", e))
            })?;
        }

        let len = bytes.len() as u64;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| StorageError::download_failed(format!("Failed to write file: {}", e)))?;
        Ok(len)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Delete the object at `key`. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;
}
