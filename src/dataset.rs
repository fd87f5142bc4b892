//! Datasets: records projected from a reader and stored in a key-value adapter

use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;

use crate::adapter::{KeyValueAdapter, MemoryKeyValueAdapter};
use crate::blocking::Block;
use crate::evaluation::GroundTruth;
use crate::io::Reader;
use crate::pairs::PairGenerator;
use crate::record::{Record, RecordSchema};
use crate::{Error, Result};

/// A named collection of records keyed by id
#[derive(Clone)]
pub struct Dataset {
    id: String,
    schema: Arc<RecordSchema>,
    adapter: Arc<dyn KeyValueAdapter>,
}

impl Dataset {
    pub fn builder(schema: Arc<RecordSchema>) -> DatasetBuilder {
        DatasetBuilder {
            schema,
            dataset_id: None,
            adapter: None,
            skip_invalid: false,
        }
    }

    /// Wrap an adapter that already holds records of `schema`.
    pub fn open(
        dataset_id: impl Into<String>,
        schema: Arc<RecordSchema>,
        adapter: Arc<dyn KeyValueAdapter>,
    ) -> Self {
        Self {
            id: dataset_id.into(),
            schema,
            adapter,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    pub fn adapter(&self) -> &Arc<dyn KeyValueAdapter> {
        &self.adapter
    }

    pub async fn get(&self, id: &str) -> Result<Option<Arc<Record>>> {
        self.adapter.get(id).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.adapter.len().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// All records in adapter order.
    pub fn records(&self) -> BoxStream<'_, Result<Arc<Record>>> {
        self.adapter.scan().map_ok(|(_, record)| record).boxed()
    }

    /// The first `n` records; fails when the dataset holds fewer.
    pub async fn head(&self, n: usize) -> Result<Vec<Arc<Record>>> {
        let records: Vec<Arc<Record>> = self.records().take(n).try_collect().await?;
        if records.len() < n {
            return Err(Error::Iteration(format!(
                "dataset {} has {} records, {} requested",
                self.id,
                records.len(),
                n
            )));
        }
        Ok(records)
    }

    /// Candidate pairs against `other` (or within this dataset), optionally restricted to a
    /// block and/or a ground truth.
    pub fn generate_pairs<'a>(
        &'a self,
        other: Option<&'a Dataset>,
        block: Option<&'a Block>,
        ground_truth: Option<&'a GroundTruth>,
    ) -> BoxStream<'a, Result<(Arc<Record>, Arc<Record>)>> {
        let mut generator = PairGenerator::new(self);
        if let Some(other) = other {
            generator = generator.right(other);
        }
        if let Some(block) = block {
            generator = generator.block(block);
        }
        if let Some(ground_truth) = ground_truth {
            generator = generator.ground_truth(ground_truth);
        }
        generator.stream()
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("id", &self.id)
            .field("schema", &self.schema.name())
            .finish()
    }
}

pub struct DatasetBuilder {
    schema: Arc<RecordSchema>,
    dataset_id: Option<String>,
    adapter: Option<Arc<dyn KeyValueAdapter>>,
    skip_invalid: bool,
}

impl DatasetBuilder {
    /// Defaults to a fresh UUID.
    pub fn id(mut self, dataset_id: impl Into<String>) -> Self {
        self.dataset_id = Some(dataset_id.into());
        self
    }

    /// Defaults to an in-memory adapter.
    pub fn adapter(mut self, adapter: Arc<dyn KeyValueAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Log and skip rows that fail to read or project instead of aborting.
    pub fn skip_invalid(mut self, skip: bool) -> Self {
        self.skip_invalid = skip;
        self
    }

    /// Ingest every raw object of `reader` in order. Duplicate ids overwrite earlier records.
    #[tracing::instrument(skip(self, reader), fields(schema = %self.schema.name(), source = %reader.source_name()))]
    pub async fn ingest<R: Reader>(self, reader: R) -> Result<Dataset> {
        let dataset = Dataset {
            id: self
                .dataset_id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            schema: self.schema,
            adapter: self
                .adapter
                .unwrap_or_else(|| Arc::new(MemoryKeyValueAdapter::new())),
        };

        let mut ingested = 0usize;
        let mut skipped = 0usize;
        for (row, raw) in reader.enumerate() {
            let record = raw.and_then(|raw| {
                let mut record = Record::project(dataset.schema.clone(), raw)?;
                record.materialize()?;
                Ok(record)
            });
            match record {
                Ok(record) => {
                    let id = record.id().to_string();
                    tracing::trace!(row, %id, "Ingesting record");
                    dataset.adapter.set(&id, Arc::new(record)).await?;
                    ingested += 1;
                }
                Err(err) if self.skip_invalid => {
                    tracing::warn!(row, error = %err, "Skipping invalid input row");
                    skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        tracing::info!(
            dataset_id = %dataset.id,
            ingested,
            skipped,
            "Dataset ingested"
        );
        Ok(dataset)
    }
}
