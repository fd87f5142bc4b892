//! Storage abstraction layer
//!
//! Provides a unified interface for S3 and local filesystem storage. Storage-backed
//! adapters persist records and key sets through this trait.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::Result;

pub mod local;
pub mod retry;
pub mod s3;

pub use local::LocalStorage;
pub use retry::{RetryPolicy, RetryingStorage};
pub use s3::S3Storage;

/// Storage backend trait
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read object from storage, `None` when it does not exist
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write object to storage
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Delete object from storage. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if object exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// List object keys under a prefix
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Storage configuration
#[derive(Debug, Clone)]
pub enum StorageConfig {
    S3 {
        bucket: String,
        region: String,
        endpoint: Option<String>,
    },
    Local {
        root_path: String,
    },
}

/// Create storage backend from config, wrapped with the given retry policy
pub async fn create_storage(
    config: StorageConfig,
    retry: RetryPolicy,
) -> Result<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config {
        StorageConfig::S3 {
            bucket,
            region,
            endpoint,
        } => Arc::new(s3::S3Storage::new(bucket, region, endpoint).await?),
        StorageConfig::Local { root_path } => Arc::new(local::LocalStorage::new(root_path)?),
    };
    Ok(Arc::new(RetryingStorage::new(backend, retry)))
}
