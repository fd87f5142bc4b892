//! Permutation MinHash sketches and banded LSH
//!
//! A sketch keeps, per permutation `(a * h + b) mod p`, the minimum over the token hashes.
//! The LSH splits a sketch into `bands` runs of `rows` values; two sketches that agree on a
//! whole band land in the same bucket.

use seahash::SeaHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hasher;
use std::sync::Arc;

use crate::{Error, Result};

const MERSENNE_PRIME: u64 = (1 << 61) - 1;
const MAX_HASH: u64 = (1 << 32) - 1;

/// Permutation parameters shared by every sketch of one index
#[derive(Debug)]
pub struct Permutations {
    a: Vec<u64>,
    b: Vec<u64>,
}

impl Permutations {
    pub fn new(num_perm: usize, seed: u64) -> Result<Arc<Self>> {
        if num_perm == 0 {
            return Err(Error::parameter("num_perm must be at least 1"));
        }
        let mut rng = fastrand::Rng::with_seed(seed);
        let a = (0..num_perm).map(|_| rng.u64(1..MERSENNE_PRIME)).collect();
        let b = (0..num_perm).map(|_| rng.u64(0..MERSENNE_PRIME)).collect();
        Ok(Arc::new(Self { a, b }))
    }

    pub fn len(&self) -> usize {
        self.a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MinHash {
    permutations: Arc<Permutations>,
    values: Vec<u64>,
}

impl MinHash {
    pub fn new(permutations: Arc<Permutations>) -> Self {
        let values = vec![MAX_HASH; permutations.len()];
        Self {
            permutations,
            values,
        }
    }

    pub fn update(&mut self, token: &str) {
        let h = seahash::hash(token.as_bytes()) & MAX_HASH;
        for (i, value) in self.values.iter_mut().enumerate() {
            let permuted = ((self.permutations.a[i] as u128 * h as u128
                + self.permutations.b[i] as u128)
                % MERSENNE_PRIME as u128) as u64
                & MAX_HASH;
            if permuted < *value {
                *value = permuted;
            }
        }
    }

    pub fn update_all<I, S>(&mut self, tokens: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for token in tokens {
            self.update(token.as_ref());
        }
    }

    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn num_perm(&self) -> usize {
        self.values.len()
    }

    /// Estimated Jaccard similarity; sketches of different shape score 0.
    pub fn jaccard(&self, other: &MinHash) -> f64 {
        if self.values.len() != other.values.len() || self.values.is_empty() {
            return 0.0;
        }
        let equal = self
            .values
            .iter()
            .zip(&other.values)
            .filter(|(a, b)| a == b)
            .count();
        equal as f64 / self.values.len() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LshParams {
    /// Pick bands and rows minimizing the weighted false positive and negative
    /// probabilities around `threshold`.
    Threshold { threshold: f64, num_perm: usize },
    Bands { bands: usize, rows: usize },
}

impl LshParams {
    /// Resolve to `(bands, rows)`.
    pub fn resolve(&self) -> Result<(usize, usize)> {
        match *self {
            LshParams::Bands { bands, rows } => {
                if bands == 0 || rows == 0 {
                    return Err(Error::parameter("bands and rows must be at least 1"));
                }
                Ok((bands, rows))
            }
            LshParams::Threshold {
                threshold,
                num_perm,
            } => {
                if !(threshold > 0.0 && threshold <= 1.0) {
                    return Err(Error::parameter(format!(
                        "LSH threshold must be in (0, 1], got {}",
                        threshold
                    )));
                }
                if num_perm < 2 {
                    return Err(Error::parameter("num_perm must be at least 2"));
                }
                Ok(optimal_bands(threshold, num_perm))
            }
        }
    }
}

fn integrate(f: impl Fn(f64) -> f64, from: f64, to: f64) -> f64 {
    const STEPS: usize = 200;
    let width = (to - from) / STEPS as f64;
    (0..STEPS)
        .map(|i| f(from + (i as f64 + 0.5) * width) * width)
        .sum()
}

fn optimal_bands(threshold: f64, num_perm: usize) -> (usize, usize) {
    let mut best = (1, 1);
    let mut best_error = f64::MAX;
    for bands in 1..=num_perm {
        for rows in 1..=num_perm / bands {
            let collide = |s: f64| 1.0 - (1.0 - s.powi(rows as i32)).powi(bands as i32);
            let false_positive = integrate(collide, 0.0, threshold);
            let false_negative = integrate(|s| 1.0 - collide(s), threshold, 1.0);
            let error = 0.5 * false_positive + 0.5 * false_negative;
            if error < best_error {
                best_error = error;
                best = (bands, rows);
            }
        }
    }
    best
}

/// Banded LSH index from ids to buckets
#[derive(Debug)]
pub struct Lsh {
    bands: usize,
    rows: usize,
    buckets: BTreeMap<String, BTreeSet<String>>,
}

impl Lsh {
    pub fn new(params: LshParams) -> Result<Self> {
        let (bands, rows) = params.resolve()?;
        Ok(Self {
            bands,
            rows,
            buckets: BTreeMap::new(),
        })
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Sketch length required by this index.
    pub fn num_perm(&self) -> usize {
        self.bands * self.rows
    }

    /// Stable bucket id of every band of `sketch`.
    pub fn bucket_ids(&self, sketch: &MinHash) -> Result<Vec<String>> {
        if sketch.num_perm() < self.num_perm() {
            return Err(Error::parameter(format!(
                "sketch has {} permutations, index needs {}",
                sketch.num_perm(),
                self.num_perm()
            )));
        }
        Ok(sketch
            .values()
            .chunks(self.rows)
            .take(self.bands)
            .enumerate()
            .map(|(band, values)| {
                let mut hasher = SeaHasher::new();
                hasher.write_u64(band as u64);
                for value in values {
                    hasher.write_u64(*value);
                }
                format!("{:016x}", hasher.finish())
            })
            .collect())
    }

    pub fn insert(&mut self, id: &str, sketch: &MinHash) -> Result<Vec<String>> {
        let ids = self.bucket_ids(sketch)?;
        for bucket in &ids {
            self.buckets
                .entry(bucket.clone())
                .or_default()
                .insert(id.to_string());
        }
        Ok(ids)
    }

    /// Ids sharing at least one bucket with `sketch`, sorted.
    pub fn query(&self, sketch: &MinHash) -> Result<Vec<String>> {
        let mut found = BTreeSet::new();
        for bucket in self.bucket_ids(sketch)? {
            if let Some(ids) = self.buckets.get(&bucket) {
                found.extend(ids.iter().cloned());
            }
        }
        Ok(found.into_iter().collect())
    }

    pub fn bucket(&self, bucket_id: &str) -> Option<&BTreeSet<String>> {
        self.buckets.get(bucket_id)
    }

    /// Buckets in ascending id order.
    pub fn buckets(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.buckets.iter()
    }
}
