//! S3-compatible artifact store (Cloudflare R2 by default).

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::ArtifactStore;

/// Connection settings for the bucket holding inputs and results.
#[derive(Debug, Clone)]
pub struct R2Config {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// "auto" for R2
    pub region: String,
}

impl Default for R2Config {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            bucket_name: "quickclip".to_string(),
            region: "auto".to_string(),
        }
    }
}

fn required_env(name: &str) -> StorageResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| StorageError::config_error(format!("{} not set", name)))
}

impl R2Config {
    /// Create config from environment variables.
    ///
    /// Endpoint and credentials are required; bucket and region fall back to
    /// the defaults.
    pub fn from_env() -> StorageResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            endpoint_url: required_env("R2_ENDPOINT_URL")?,
            access_key_id: required_env("R2_ACCESS_KEY_ID")?,
            secret_access_key: required_env("R2_SECRET_ACCESS_KEY")?,
            bucket_name: std::env::var("R2_BUCKET_NAME").unwrap_or(defaults.bucket_name),
            region: std::env::var("R2_REGION").unwrap_or(defaults.region),
        })
    }
}

/// [`ArtifactStore`] over the S3 API.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
}

impl R2Client {
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "qclip-env",
        );

        let s3_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket_name,
        }
    }

    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(R2Config::from_env()?))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// HEAD the bucket; used by the binaries at startup.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                StorageError::AwsSdk(format!(
                    "bucket {} unreachable: {}",
                    self.bucket,
                    e.into_service_error()
                ))
            })?;
        Ok(())
    }

    async fn put(&self, key: &str, body: ByteStream, content_type: &str) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e.into_service_error())))?;
        Ok(())
    }

    async fn open(&self, key: &str) -> StorageResult<ByteStream> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.into_service_error() {
                err if err.is_no_such_key() => StorageError::not_found(key),
                err => StorageError::download_failed(format!("{}: {}", key, err)),
            })?;
        Ok(response.body)
    }
}

#[async_trait]
impl ArtifactStore for R2Client {
    async fn put_bytes(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        let size = data.len();
        self.put(key, ByteStream::from(data), content_type).await?;
        debug!(key = %key, bytes = size, "Stored object");
        Ok(())
    }

    /// Streams the file from disk instead of buffering it.
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", path.display(), e)))?;
        self.put(key, body, content_type).await?;
        info!(key = %key, path = %path.display(), "Stored file");
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        let body = self.open(key).await?;
        let bytes = body
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(format!("{}: {}", key, e)))?
            .into_bytes();
        debug!(key = %key, bytes = bytes.len(), "Fetched object");
        Ok(bytes.to_vec())
    }

    /// Streams the object to disk chunk by chunk.
    async fn get_file(&self, key: &str, path: &Path) -> StorageResult<u64> {
        let mut body = self.open(key).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::download_failed(format!("{}: {}", key, e)))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(key = %key, path = %path.display(), bytes = written, "Fetched object to file");
        Ok(written)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(e) => match e.into_service_error() {
                err if err.is_not_found() => Ok(false),
                err => Err(StorageError::AwsSdk(format!("{}: {}", key, err))),
            },
        }
    }

    /// S3 treats deleting a missing key as success, so this is idempotent.
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(format!("{}: {}", key, e.into_service_error())))?;
        debug!(key = %key, "Deleted object");
        Ok(())
    }
}
