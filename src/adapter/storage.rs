//! Adapters persisted through a [`StorageBackend`]
//!
//! Each key maps to one JSON object at `<prefix>/<hex(key)>.json`, so the same adapters run on
//! the local filesystem and on S3.

use async_stream::try_stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::record::{Record, RecordSchema, RecordSnapshot};
use crate::storage::StorageBackend;
use crate::types::{decode_object_key, encode_object_key, RecordId};
use crate::{Error, Result};

use super::{KeySetAdapter, KeyValueAdapter, ValueSet};

const OBJECT_SUFFIX: &str = ".json";

fn object_path(prefix: &str, key: &str) -> String {
    format!("{}/{}{}", prefix, encode_object_key(key), OBJECT_SUFFIX)
}

fn list_prefix(prefix: &str) -> String {
    format!("{}/", prefix)
}

/// Recover the logical key from a listed object path; foreign objects yield `None`.
fn key_from_path(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let encoded = name.strip_suffix(OBJECT_SUFFIX)?;
    decode_object_key(encoded).ok()
}

/// Records stored as [`RecordSnapshot`] JSON objects
pub struct StorageKeyValueAdapter {
    storage: Arc<dyn StorageBackend>,
    prefix: String,
    schema: Arc<RecordSchema>,
}

impl StorageKeyValueAdapter {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        prefix: impl Into<String>,
        schema: Arc<RecordSchema>,
    ) -> Self {
        Self {
            storage,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            schema,
        }
    }

    fn decode(&self, path: &str, data: &[u8]) -> Result<Record> {
        let snapshot: RecordSnapshot = serde_json::from_slice(data)
            .map_err(|e| Error::adapter("storage-kv", format!("corrupt object {}: {}", path, e)))?;
        Record::from_snapshot(self.schema.clone(), snapshot)
    }
}

#[async_trait]
impl KeyValueAdapter for StorageKeyValueAdapter {
    async fn get(&self, id: &str) -> Result<Option<Arc<Record>>> {
        let path = object_path(&self.prefix, id);
        match self.storage.get(&path).await? {
            Some(data) => Ok(Some(Arc::new(self.decode(&path, &data)?))),
            None => Ok(None),
        }
    }

    async fn set(&self, id: &str, record: Arc<Record>) -> Result<()> {
        let data = serde_json::to_vec(&record.snapshot())?;
        self.storage
            .put(&object_path(&self.prefix, id), Bytes::from(data))
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.storage.delete(&object_path(&self.prefix, id)).await
    }

    async fn clear(&self) -> Result<()> {
        for path in self.storage.list(&list_prefix(&self.prefix)).await? {
            if key_from_path(&path).is_some() {
                self.storage.delete(&path).await?;
            }
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let paths = self.storage.list(&list_prefix(&self.prefix)).await?;
        Ok(paths.iter().filter(|p| key_from_path(p).is_some()).count())
    }

    fn scan(&self) -> BoxStream<'_, Result<(RecordId, Arc<Record>)>> {
        Box::pin(try_stream! {
            let paths = self.storage.list(&list_prefix(&self.prefix)).await?;
            for path in paths {
                let Some(id) = key_from_path(&path) else { continue };
                // Objects removed between list and get are skipped.
                if let Some(data) = self.storage.get(&path).await? {
                    let record = self.decode(&path, &data)?;
                    yield (id, Arc::new(record));
                }
            }
        })
    }

    fn parallel_safe(&self) -> bool {
        true
    }
}

#[derive(Serialize, Deserialize)]
struct StoredSet {
    key: String,
    values: ValueSet,
}

/// Key sets stored one object per key
///
/// Read-modify-write updates (`add`, `remove`) are serialized through an adapter-local lock.
pub struct StorageKeySetAdapter {
    storage: Arc<dyn StorageBackend>,
    prefix: String,
    write_lock: Mutex<()>,
}

impl StorageKeySetAdapter {
    pub fn new(storage: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into().trim_end_matches('/').to_string(),
            write_lock: Mutex::new(()),
        }
    }

    async fn read(&self, path: &str) -> Result<Option<StoredSet>> {
        match self.storage.get(path).await? {
            Some(data) => serde_json::from_slice(&data).map(Some).map_err(|e| {
                Error::adapter("storage-keyset", format!("corrupt object {}: {}", path, e))
            }),
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, values: ValueSet) -> Result<()> {
        let stored = StoredSet {
            key: key.to_string(),
            values,
        };
        let data = serde_json::to_vec(&stored)?;
        self.storage
            .put(&object_path(&self.prefix, key), Bytes::from(data))
            .await
    }
}

#[async_trait]
impl KeySetAdapter for StorageKeySetAdapter {
    async fn get(&self, key: &str) -> Result<Option<ValueSet>> {
        Ok(self
            .read(&object_path(&self.prefix, key))
            .await?
            .map(|stored| stored.values))
    }

    async fn set(&self, key: &str, values: ValueSet) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(key, values).await
    }

    async fn add(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut values = self.get(key).await?.unwrap_or_default();
        if values.insert(value.to_string()) {
            self.write(key, values).await?;
        }
        Ok(())
    }

    async fn remove(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(mut values) = self.get(key).await? {
            if values.remove(value) {
                self.write(key, values).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.storage.delete(&object_path(&self.prefix, key)).await
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for path in self.storage.list(&list_prefix(&self.prefix)).await? {
            if key_from_path(&path).is_some() {
                self.storage.delete(&path).await?;
            }
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        let paths = self.storage.list(&list_prefix(&self.prefix)).await?;
        Ok(paths.iter().filter(|p| key_from_path(p).is_some()).count())
    }

    async fn contains_key(&self, key: &str) -> Result<bool> {
        self.storage.exists(&object_path(&self.prefix, key)).await
    }

    fn scan(&self) -> BoxStream<'_, Result<(String, ValueSet)>> {
        Box::pin(try_stream! {
            let mut entries: Vec<(String, String)> = self
                .storage
                .list(&list_prefix(&self.prefix))
                .await?
                .into_iter()
                .filter_map(|path| key_from_path(&path).map(|key| (key, path)))
                .collect();
            entries.sort();
            for (key, path) in entries {
                if let Some(stored) = self.read(&path).await? {
                    yield (key, stored.values);
                }
            }
        })
    }

    fn parallel_safe(&self) -> bool {
        true
    }
}
