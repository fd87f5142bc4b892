//! In-memory adapters

use async_stream::try_stream;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::record::Record;
use crate::types::RecordId;
use crate::Result;

use super::{KeySetAdapter, KeyValueAdapter, ValueSet};

/// Records held in insertion order. Overwriting an id keeps its original position.
#[derive(Default)]
pub struct MemoryKeyValueAdapter {
    records: RwLock<IndexMap<RecordId, Arc<Record>>>,
}

impl MemoryKeyValueAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueAdapter for MemoryKeyValueAdapter {
    async fn get(&self, id: &str) -> Result<Option<Arc<Record>>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn set(&self, id: &str, record: Arc<Record>) -> Result<()> {
        self.records.write().await.insert(id.to_string(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.write().await.shift_remove(id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }

    fn scan(&self) -> BoxStream<'_, Result<(RecordId, Arc<Record>)>> {
        Box::pin(try_stream! {
            // Snapshot so the lock is not held while the consumer works.
            let snapshot: Vec<(RecordId, Arc<Record>)> = self
                .records
                .read()
                .await
                .iter()
                .map(|(id, record)| (id.clone(), record.clone()))
                .collect();
            for item in snapshot {
                yield item;
            }
        })
    }

    fn parallel_safe(&self) -> bool {
        true
    }
}

/// Concurrent in-memory key sets
#[derive(Default)]
pub struct MemoryKeySetAdapter {
    sets: DashMap<String, ValueSet>,
}

impl MemoryKeySetAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeySetAdapter for MemoryKeySetAdapter {
    async fn get(&self, key: &str) -> Result<Option<ValueSet>> {
        Ok(self.sets.get(key).map(|set| set.value().clone()))
    }

    async fn set(&self, key: &str, values: ValueSet) -> Result<()> {
        self.sets.insert(key.to_string(), values);
        Ok(())
    }

    async fn add(&self, key: &str, value: &str) -> Result<()> {
        self.sets
            .entry(key.to_string())
            .or_default()
            .insert(value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str, value: &str) -> Result<()> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(value);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.sets.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.sets.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.sets.len())
    }

    async fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.sets.contains_key(key))
    }

    fn scan(&self) -> BoxStream<'_, Result<(String, ValueSet)>> {
        Box::pin(try_stream! {
            let mut keys: Vec<String> = self.sets.iter().map(|e| e.key().clone()).collect();
            keys.sort();
            for key in keys {
                // Keys deleted after the snapshot are skipped.
                let values = self.sets.get(&key).map(|set| set.value().clone());
                if let Some(values) = values {
                    yield (key, values);
                }
            }
        })
    }

    fn parallel_safe(&self) -> bool {
        true
    }
}
