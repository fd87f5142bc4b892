//! Candidate pair streams
//!
//! | block | ground truth | pairs |
//! |---|---|---|
//! | no | no | cartesian product, or 2-combinations of one dataset |
//! | yes | no | block pairs |
//! | no | yes | ground-truth pairs |
//! | yes | yes | block pairs that are in the ground truth |
//!
//! Pairs reached through several blocks are yielded once per block.

use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::blocking::Block;
use crate::dataset::Dataset;
use crate::evaluation::GroundTruth;
use crate::record::Record;
use crate::{Error, Result};

pub type RecordPair = (Arc<Record>, Arc<Record>);

pub struct PairGenerator<'a> {
    left: &'a Dataset,
    right: Option<&'a Dataset>,
    block: Option<&'a Block>,
    ground_truth: Option<&'a GroundTruth>,
    cancel: CancellationToken,
}

impl<'a> PairGenerator<'a> {
    pub fn new(left: &'a Dataset) -> Self {
        Self {
            left,
            right: None,
            block: None,
            ground_truth: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn right(mut self, right: &'a Dataset) -> Self {
        self.right = Some(right);
        self
    }

    pub fn block(mut self, block: &'a Block) -> Self {
        self.block = Some(block);
        self
    }

    pub fn ground_truth(mut self, ground_truth: &'a GroundTruth) -> Self {
        self.ground_truth = Some(ground_truth);
        self
    }

    /// The stream ends with [`Error::Cancelled`] once `cancel` fires.
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stream(self) -> BoxStream<'a, Result<RecordPair>> {
        match (self.block, self.ground_truth) {
            (None, None) => self.all_pairs(),
            (Some(block), ground_truth) => self.block_pairs(block, ground_truth),
            (None, Some(ground_truth)) => self.ground_truth_pairs(ground_truth),
        }
    }

    fn all_pairs(self) -> BoxStream<'a, Result<RecordPair>> {
        let Self {
            left, right, cancel, ..
        } = self;
        Box::pin(try_stream! {
            match right {
                Some(right) => {
                    let mut outer = left.records();
                    while let Some(a) = outer.try_next().await? {
                        let mut inner = right.records();
                        while let Some(b) = inner.try_next().await? {
                            check(&cancel)?;
                            yield (a.clone(), b);
                        }
                    }
                }
                None => {
                    let records: Vec<Arc<Record>> = left.records().try_collect().await?;
                    for (i, a) in records.iter().enumerate() {
                        for b in &records[i + 1..] {
                            check(&cancel)?;
                            yield (a.clone(), b.clone());
                        }
                    }
                }
            }
        })
    }

    fn block_pairs(
        self,
        block: &'a Block,
        ground_truth: Option<&'a GroundTruth>,
    ) -> BoxStream<'a, Result<RecordPair>> {
        let Self {
            left, right, cancel, ..
        } = self;
        Box::pin(try_stream! {
            let mut pairs = block.pairs(left.id(), right.map(Dataset::id));
            while let Some((block_id, id1, id2)) = pairs.try_next().await? {
                check(&cancel)?;
                if let Some(gt) = ground_truth {
                    if !gt.covers(&id1, &id2, right.is_none()) {
                        continue;
                    }
                }
                if let Some(pair) = fetch(left, right.unwrap_or(left), &id1, &id2).await? {
                    tracing::trace!(%block_id, %id1, %id2, "Block pair");
                    yield pair;
                }
            }
        })
    }

    fn ground_truth_pairs(self, ground_truth: &'a GroundTruth) -> BoxStream<'a, Result<RecordPair>> {
        let Self {
            left, right, cancel, ..
        } = self;
        Box::pin(try_stream! {
            for (id1, id2, _) in ground_truth.iter() {
                check(&cancel)?;
                if let Some(pair) = fetch(left, right.unwrap_or(left), id1, id2).await? {
                    yield pair;
                }
            }
        })
    }
}

fn check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Look up both records; a missing one skips the pair.
async fn fetch(left: &Dataset, right: &Dataset, id1: &str, id2: &str) -> Result<Option<RecordPair>> {
    let Some(a) = left.get(id1).await? else {
        tracing::warn!(dataset_id = %left.id(), id = id1, "Pair references a missing record; skipping");
        return Ok(None);
    };
    let Some(b) = right.get(id2).await? else {
        tracing::warn!(dataset_id = %right.id(), id = id2, "Pair references a missing record; skipping");
        return Ok(None);
    };
    Ok(Some((a, b)))
}

/// Candidate pairs of `left` against `right` (or within `left`).
pub fn generate_pairs<'a>(
    left: &'a Dataset,
    right: Option<&'a Dataset>,
    block: Option<&'a Block>,
    ground_truth: Option<&'a GroundTruth>,
) -> BoxStream<'a, Result<RecordPair>> {
    left.generate_pairs(right, block, ground_truth)
}
