//! Canopy blocking over numeric vectors
//!
//! Repeatedly pick a random center from the pool, put every pooled point within `t1` of it in a
//! new canopy, then drop every pooled point within `t2` (the center included). Distances equal
//! to a threshold count as within it.

use async_trait::async_trait;
use futures::TryStreamExt;
use std::sync::Arc;

use crate::dataset::Dataset;
use crate::types::{Member, Value};
use crate::{Error, Result};

use super::{BlockStrategy, BlockWriter, KeySource};

pub type DistanceFn = Arc<dyn Fn(&[f64], &[f64]) -> f64 + Send + Sync>;

pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Vectors of one dataset in record order
pub struct Points {
    pub dataset_id: String,
    pub vectors: Vec<(String, Vec<f64>)>,
}

pub struct CanopyBlockGenerator {
    key: KeySource,
    t1: f64,
    t2: f64,
    distance: DistanceFn,
    seed: u64,
}

impl CanopyBlockGenerator {
    /// Requires `t1 > t2 > 0`.
    pub fn new(key: KeySource, t1: f64, t2: f64, distance: DistanceFn) -> Result<Self> {
        if !(t2 > 0.0 && t1 > t2) {
            return Err(Error::parameter(format!(
                "canopy thresholds must satisfy t1 > t2 > 0, got t1={} t2={}",
                t1, t2
            )));
        }
        Ok(Self {
            key,
            t1,
            t2,
            distance,
            seed: 0,
        })
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[async_trait]
impl BlockStrategy for CanopyBlockGenerator {
    type Keys = Points;

    async fn extract(&self, dataset: &Dataset) -> Result<Points> {
        let mut vectors = Vec::new();
        let mut records = dataset.records();
        while let Some(record) = records.try_next().await? {
            match self.key.evaluate(&record)? {
                Value::Null => {}
                value => {
                    let vector = value.as_vector().ok_or_else(|| {
                        Error::blocking(format!(
                            "record {}: expected a vector, got {}",
                            record.id(),
                            value.kind()
                        ))
                    })?;
                    vectors.push((record.id().to_string(), vector));
                }
            }
        }
        Ok(Points {
            dataset_id: dataset.id().to_string(),
            vectors,
        })
    }

    async fn emit(
        &self,
        left: &Points,
        right: Option<&Points>,
        writer: &BlockWriter,
    ) -> Result<()> {
        let mut pool: Vec<(Member, &[f64])> = std::iter::once(left)
            .chain(right)
            .flat_map(|points| {
                points.vectors.iter().map(move |(id, vector)| {
                    (Member::new(&points.dataset_id, id), vector.as_slice())
                })
            })
            .collect();

        let mut rng = fastrand::Rng::with_seed(self.seed);
        let mut canopies = 0usize;
        while !pool.is_empty() {
            let center = pool[rng.usize(..pool.len())].1;
            let block_id = canopies.to_string();
            for (member, vector) in &pool {
                if (self.distance)(center, vector) <= self.t1 {
                    writer.write(&block_id, member).await?;
                }
            }
            let before = pool.len();
            pool.retain(|(_, vector)| (self.distance)(center, vector) > self.t2);
            if pool.len() == before {
                // a distance function that is not zero on identical points would never
                // shrink the pool
                return Err(Error::parameter(
                    "canopy distance must be within t2 of the center itself",
                ));
            }
            canopies += 1;
        }

        tracing::debug!(canopies, "Canopy clustering finished");
        Ok(())
    }
}
