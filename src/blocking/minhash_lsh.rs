//! MinHash-LSH blocking: one block per LSH bucket

use async_trait::async_trait;
use futures::TryStreamExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::dataset::Dataset;
use crate::minhash::{Lsh, LshParams, MinHash, Permutations};
use crate::types::Member;
use crate::Result;

use super::{token_keys, BlockStrategy, BlockWriter, KeySource};

/// Sketches of one dataset in record order
pub struct Sketches {
    pub dataset_id: String,
    pub sketches: Vec<(String, MinHash)>,
}

pub struct MinHashLshBlockGenerator {
    key: KeySource,
    params: LshParams,
    permutations: Arc<Permutations>,
    index_threshold: Option<usize>,
}

impl MinHashLshBlockGenerator {
    /// The key must yield a list of tokens.
    pub fn new(key: KeySource, params: LshParams) -> Result<Self> {
        Self::with_seed(key, params, 1)
    }

    pub fn with_seed(key: KeySource, params: LshParams, seed: u64) -> Result<Self> {
        let (bands, rows) = params.resolve()?;
        let num_perm = match params {
            LshParams::Threshold { num_perm, .. } => num_perm,
            LshParams::Bands { .. } => bands * rows,
        };
        Ok(Self {
            key,
            params,
            permutations: Permutations::new(num_perm, seed)?,
            index_threshold: None,
        })
    }

    /// Buckets holding more than `threshold` left records are blacklisted.
    pub fn index_threshold(mut self, threshold: usize) -> Self {
        self.index_threshold = Some(threshold);
        self
    }
}

#[async_trait]
impl BlockStrategy for MinHashLshBlockGenerator {
    type Keys = Sketches;

    async fn extract(&self, dataset: &Dataset) -> Result<Sketches> {
        let mut sketches = Vec::new();
        let mut records = dataset.records();
        while let Some(record) = records.try_next().await? {
            let tokens = token_keys(&record, self.key.evaluate(&record)?)?;
            if tokens.is_empty() {
                continue;
            }
            let mut sketch = MinHash::new(self.permutations.clone());
            sketch.update_all(&tokens);
            sketches.push((record.id().to_string(), sketch));
        }
        Ok(Sketches {
            dataset_id: dataset.id().to_string(),
            sketches,
        })
    }

    async fn emit(
        &self,
        left: &Sketches,
        right: Option<&Sketches>,
        writer: &BlockWriter,
    ) -> Result<()> {
        let mut lsh = Lsh::new(self.params)?;
        for (id, sketch) in &left.sketches {
            lsh.insert(id, sketch)?;
        }

        // right records only join buckets formed by the left side
        let mut probes: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
        if let Some(right) = right {
            for (id, sketch) in &right.sketches {
                for bucket in lsh.bucket_ids(sketch)? {
                    if lsh.bucket(&bucket).is_some() {
                        probes.entry(bucket).or_default().insert(id.as_str());
                    }
                }
            }
        }

        let mut oversized = 0usize;
        for (bucket, left_ids) in lsh.buckets() {
            if let Some(threshold) = self.index_threshold {
                if left_ids.len() > threshold {
                    writer.blacklist_key(bucket).await?;
                    oversized += 1;
                    continue;
                }
            }
            let right_ids = match right {
                Some(right) => match probes.get(bucket) {
                    Some(ids) => Some((right.dataset_id.as_str(), ids)),
                    None => continue,
                },
                None => None,
            };
            for id in left_ids {
                writer.write(bucket, &Member::new(&left.dataset_id, id)).await?;
            }
            if let Some((dataset_id, ids)) = right_ids {
                for id in ids {
                    writer.write(bucket, &Member::new(dataset_id, *id)).await?;
                }
            }
        }

        tracing::debug!(
            bands = lsh.bands(),
            rows = lsh.rows(),
            oversized,
            "MinHash LSH buckets emitted"
        );
        Ok(())
    }
}
