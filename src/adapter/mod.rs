//! Key-value and key-set adapters
//!
//! [`KeyValueAdapter`] persists record id -> [`Record`]; [`KeySetAdapter`] persists
//! key -> set of opaque string values and backs blocks, inverted indices and blacklists.
//! Both declare whether they may be shared between concurrent workers.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::record::Record;
use crate::types::RecordId;
use crate::Result;

pub mod file;
pub mod memory;
pub mod storage;

pub use file::FileKeySetAdapter;
pub use memory::{MemoryKeySetAdapter, MemoryKeyValueAdapter};
pub use storage::{StorageKeySetAdapter, StorageKeyValueAdapter};

/// A set of values stored under one key
pub type ValueSet = BTreeSet<String>;

/// Record id -> record store
#[async_trait]
pub trait KeyValueAdapter: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Arc<Record>>>;

    /// Insert or overwrite.
    async fn set(&self, id: &str, record: Arc<Record>) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn len(&self) -> Result<usize>;

    /// Lazily walk every `(id, record)`; order is adapter-defined.
    fn scan(&self) -> BoxStream<'_, Result<(RecordId, Arc<Record>)>>;

    /// Whether concurrent readers and writers may share this adapter.
    fn parallel_safe(&self) -> bool;

    /// Release any held resources.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Key -> set-of-values store
#[async_trait]
pub trait KeySetAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ValueSet>>;

    /// Replace the whole set stored under `key`.
    async fn set(&self, key: &str, values: ValueSet) -> Result<()>;

    /// Add one value, creating the key if needed.
    async fn add(&self, key: &str, value: &str) -> Result<()>;

    /// Remove one value. The key is kept even if its set becomes empty.
    async fn remove(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    async fn len(&self) -> Result<usize>;

    async fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Lazily walk every `(key, set)` in ascending key order.
    fn scan(&self) -> BoxStream<'_, Result<(String, ValueSet)>>;

    fn parallel_safe(&self) -> bool;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Collect an adapter scan into memory. Intended for tests and small key sets.
pub async fn collect_key_sets(adapter: &dyn KeySetAdapter) -> Result<Vec<(String, ValueSet)>> {
    use futures::TryStreamExt;
    adapter.scan().try_collect().await
}
