//! Labelled record pairs
//!
//! Pairs are role-ordered: `(id1, id2)` and `(id2, id1)` are different keys. Re-adding a pair
//! overwrites its label.

use futures::TryStreamExt;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::dataset::Dataset;
use crate::pairs::generate_pairs;
use crate::record::Record;
use crate::{Error, Result};

const HEADER: [&str; 3] = ["id1", "id2", "label"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroundTruth {
    labels: BTreeMap<(String, String), bool>,
}

/// A non-member pair with its negative-sampling score
struct Scored {
    score: f64,
    seq: usize,
    ids: (String, String),
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(self.seq.cmp(&other.seq))
    }
}

impl GroundTruth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id1: impl Into<String>, id2: impl Into<String>, label: bool) {
        self.labels.insert((id1.into(), id2.into()), label);
    }

    pub fn add_positive(&mut self, id1: impl Into<String>, id2: impl Into<String>) {
        self.add(id1, id2, true);
    }

    pub fn add_negative(&mut self, id1: impl Into<String>, id2: impl Into<String>) {
        self.add(id1, id2, false);
    }

    pub fn is_member(&self, id1: &str, id2: &str) -> bool {
        self.labels
            .contains_key(&(id1.to_string(), id2.to_string()))
    }

    pub fn label(&self, id1: &str, id2: &str) -> Result<bool> {
        self.labels
            .get(&(id1.to_string(), id2.to_string()))
            .copied()
            .ok_or_else(|| Error::missing(format!("pair ({}, {}) is not in the ground truth", id1, id2)))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.values().filter(|label| **label).count()
    }

    /// `(id1, id2, label)` in ascending pair order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, bool)> + Send + '_ {
        self.labels
            .iter()
            .map(|((id1, id2), label)| (id1.as_str(), id2.as_str(), *label))
    }

    /// Label of a pair drawn from one or two datasets; within one dataset either order counts.
    pub fn lookup(&self, id1: &str, id2: &str, single_dataset: bool) -> Option<bool> {
        let get = |a: &str, b: &str| self.labels.get(&(a.to_string(), b.to_string())).copied();
        match get(id1, id2) {
            Some(label) => Some(label),
            None if single_dataset => get(id2, id1),
            None => None,
        }
    }

    pub fn covers(&self, id1: &str, id2: &str, single_dataset: bool) -> bool {
        self.lookup(id1, id2, single_dataset).is_some()
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv = csv::Writer::from_writer(writer);
        csv.write_record(HEADER)?;
        for (id1, id2, label) in self.iter() {
            csv.write_record([id1, id2, if label { "True" } else { "False" }])?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R, source_name: &str) -> Result<Self> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let header = csv
            .headers()
            .map_err(|e| Error::format(source_name, 1, e.to_string()))?;
        if header.iter().map(str::trim).ne(HEADER) {
            return Err(Error::format(
                source_name,
                1,
                format!("expected header id1,id2,label, found {:?}", header),
            ));
        }

        let mut ground_truth = Self::new();
        for row in csv.records() {
            let row = row.map_err(|e| {
                let line = e.position().map(|p| p.line() as usize).unwrap_or(0);
                Error::format(source_name, line, e.to_string())
            })?;
            let line = row.position().map(|p| p.line() as usize).unwrap_or(0);
            if row.len() != 3 {
                return Err(Error::format(
                    source_name,
                    line,
                    format!("expected 3 fields, found {}", row.len()),
                ));
            }
            let label = match row[2].trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                other => {
                    return Err(Error::format(
                        source_name,
                        line,
                        format!("label must be True or False, found {:?}", other),
                    ))
                }
            };
            ground_truth.add(&row[0], &row[1], label);
        }
        Ok(ground_truth)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.to_writer(File::create(path)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::from_reader(File::open(path)?, &path.display().to_string())
    }

    /// Label the `n` lowest-scoring non-member pairs as negatives.
    pub async fn generate_negatives<F>(
        &mut self,
        left: &Dataset,
        right: Option<&Dataset>,
        score: F,
        n: usize,
    ) -> Result<()>
    where
        F: Fn(&Record, &Record) -> f64 + Send + Sync,
    {
        if n == 0 {
            return Ok(());
        }
        let mut heap: BinaryHeap<Scored> = BinaryHeap::with_capacity(n + 1);
        let mut pairs = generate_pairs(left, right, None, None);
        let mut seq = 0usize;
        while let Some((a, b)) = pairs.try_next().await? {
            if self.covers(a.id(), b.id(), right.is_none()) {
                continue;
            }
            heap.push(Scored {
                score: score(&a, &b),
                seq,
                ids: (a.id().to_string(), b.id().to_string()),
            });
            seq += 1;
            if heap.len() > n {
                heap.pop();
            }
        }
        drop(pairs);

        let added = heap.len();
        for scored in heap {
            self.add_negative(scored.ids.0, scored.ids.1);
        }
        tracing::info!(added, candidates = seq, "Generated negatives");
        Ok(())
    }

    /// Label every non-member pair as negative.
    pub async fn generate_all_negatives(
        &mut self,
        left: &Dataset,
        right: Option<&Dataset>,
    ) -> Result<()> {
        let mut negatives = Vec::new();
        let mut pairs = generate_pairs(left, right, None, None);
        while let Some((a, b)) = pairs.try_next().await? {
            if !self.covers(a.id(), b.id(), right.is_none()) {
                negatives.push((a.id().to_string(), b.id().to_string()));
            }
        }
        drop(pairs);

        tracing::info!(added = negatives.len(), "Generated all negatives");
        for (id1, id2) in negatives {
            self.add_negative(id1, id2);
        }
        Ok(())
    }

    /// Sample `n` negatives across `strata` strata.
    ///
    /// Each stratum is weighted by its positives / non-member pairs ratio. `n` is split by the
    /// normalized weights using largest remainders, clipped to what each stratum holds, and
    /// sampled without replacement, so at most `n` negatives are added.
    pub async fn generate_stratified_negatives<F>(
        &mut self,
        left: &Dataset,
        right: Option<&Dataset>,
        classify: F,
        strata: usize,
        seed: u64,
        n: usize,
    ) -> Result<()>
    where
        F: Fn(&Record, &Record) -> usize + Send + Sync,
    {
        if strata == 0 {
            return Err(Error::parameter("stratified sampling needs at least one stratum"));
        }
        let stratum_of = |a: &Record, b: &Record| -> Result<usize> {
            let stratum = classify(a, b);
            if stratum >= strata {
                return Err(Error::parameter(format!(
                    "classifier returned stratum {} for ({}, {}), expected < {}",
                    stratum,
                    a.id(),
                    b.id(),
                    strata
                )));
            }
            Ok(stratum)
        };

        let mut positives = vec![0usize; strata];
        let right_ds = right.unwrap_or(left);
        for (id1, id2, label) in self.iter() {
            if !label {
                continue;
            }
            if let (Some(a), Some(b)) = (left.get(id1).await?, right_ds.get(id2).await?) {
                positives[stratum_of(&a, &b)?] += 1;
            }
        }

        let mut candidates: Vec<Vec<(String, String)>> = vec![Vec::new(); strata];
        let mut pairs = generate_pairs(left, right, None, None);
        while let Some((a, b)) = pairs.try_next().await? {
            if self.covers(a.id(), b.id(), right.is_none()) {
                continue;
            }
            candidates[stratum_of(&a, &b)?].push((a.id().to_string(), b.id().to_string()));
        }
        drop(pairs);

        let weights: Vec<f64> = positives
            .iter()
            .zip(&candidates)
            .map(|(p, c)| if c.is_empty() { 0.0 } else { *p as f64 / c.len() as f64 })
            .collect();
        if weights.iter().all(|w| *w == 0.0) {
            tracing::warn!("No stratum has both positives and candidates; no negatives sampled");
            return Ok(());
        }

        let quotas = allocate(n, &weights);
        let mut rng = fastrand::Rng::with_seed(seed);
        for (stratum, mut pool) in candidates.into_iter().enumerate() {
            let take = quotas[stratum].min(pool.len());
            rng.shuffle(&mut pool);
            tracing::debug!(stratum, take, available = pool.len(), "Sampling stratum");
            for (id1, id2) in pool.into_iter().take(take) {
                self.add_negative(id1, id2);
            }
        }
        Ok(())
    }

    /// Split into `(train, test)` with `ratio` of the pairs in train.
    pub fn train_test_split(&self, ratio: f64, seed: u64) -> Result<(GroundTruth, GroundTruth)> {
        if !(0.0..=1.0).contains(&ratio) {
            return Err(Error::parameter(format!(
                "train ratio must be in [0, 1], got {}",
                ratio
            )));
        }
        let mut entries: Vec<(&(String, String), &bool)> = self.labels.iter().collect();
        fastrand::Rng::with_seed(seed).shuffle(&mut entries);
        let cut = (entries.len() as f64 * ratio).round() as usize;

        let mut train = GroundTruth::new();
        let mut test = GroundTruth::new();
        for (i, ((id1, id2), label)) in entries.into_iter().enumerate() {
            let target = if i < cut { &mut train } else { &mut test };
            target.add(id1.clone(), id2.clone(), *label);
        }
        Ok((train, test))
    }
}

/// Split `n` across `weights` by largest remainder; the quotas sum to at most `n`.
fn allocate(n: usize, weights: &[f64]) -> Vec<usize> {
    let total: f64 = weights.iter().sum();
    let shares: Vec<f64> = weights.iter().map(|w| n as f64 * w / total).collect();
    let mut quotas: Vec<usize> = shares.iter().map(|s| s.floor() as usize).collect();
    let assigned: usize = quotas.iter().sum();

    let mut order: Vec<usize> = (0..weights.len()).filter(|&i| weights[i] > 0.0).collect();
    order.sort_by(|&a, &b| {
        (shares[b] - shares[b].floor())
            .total_cmp(&(shares[a] - shares[a].floor()))
            .then(a.cmp(&b))
    });
    for i in order.into_iter().take(n.saturating_sub(assigned)) {
        quotas[i] += 1;
    }
    quotas
}
