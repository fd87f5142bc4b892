//! Key sets persisted as a block file
//!
//! The file is loaded into memory on open and rewritten atomically on [`close`]. Not safe for
//! concurrent writers across processes.
//!
//! [`close`]: KeySetAdapter::close

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::io::block_file::{BlockFileReader, BlockFileWriter};
use crate::Result;

use super::{KeySetAdapter, ValueSet};

pub struct FileKeySetAdapter {
    path: PathBuf,
    batch_size: usize,
    sets: RwLock<BTreeMap<String, ValueSet>>,
}

impl FileKeySetAdapter {
    /// Open `path`, loading existing content if the file exists.
    pub fn open(path: impl Into<PathBuf>, batch_size: usize) -> Result<Self> {
        let path = path.into();
        let mut sets: BTreeMap<String, ValueSet> = BTreeMap::new();
        if path.exists() {
            for entry in BlockFileReader::open(&path)? {
                let (key, ids) = entry?;
                sets.entry(key).or_default().extend(ids);
            }
            tracing::debug!(path = %path.display(), keys = sets.len(), "Loaded key sets");
        }
        Ok(Self {
            path,
            batch_size,
            sets: RwLock::new(sets),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Write the current content to disk.
    pub async fn flush(&self) -> Result<()> {
        let sets = self.sets.read().await;
        let mut writer = BlockFileWriter::create(&self.path, self.batch_size)?;
        for (key, values) in sets.iter() {
            writer.write(key, values.iter().map(String::as_str))?;
        }
        writer.finish()?;
        Ok(())
    }
}

#[async_trait]
impl KeySetAdapter for FileKeySetAdapter {
    async fn get(&self, key: &str) -> Result<Option<ValueSet>> {
        Ok(self.sets.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, values: ValueSet) -> Result<()> {
        self.sets.write().await.insert(key.to_string(), values);
        Ok(())
    }

    async fn add(&self, key: &str, value: &str) -> Result<()> {
        self.sets
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str, value: &str) -> Result<()> {
        if let Some(set) = self.sets.write().await.get_mut(key) {
            set.remove(value);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.sets.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.sets.write().await.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.sets.read().await.len())
    }

    fn scan(&self) -> BoxStream<'_, Result<(String, ValueSet)>> {
        Box::pin(try_stream! {
            let snapshot: Vec<(String, ValueSet)> = self
                .sets
                .read()
                .await
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for entry in snapshot {
                yield entry;
            }
        })
    }

    fn parallel_safe(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<()> {
        self.flush().await
    }
}
