//! Blocks: block id -> set of (dataset id, record id)

use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::sync::Arc;

use crate::adapter::{KeySetAdapter, MemoryKeySetAdapter, ValueSet};
use crate::types::Member;
use crate::Result;

/// A block view over a key-set adapter whose values are encoded [`Member`]s
#[derive(Clone)]
pub struct Block {
    adapter: Arc<dyn KeySetAdapter>,
}

impl Block {
    pub fn new(adapter: Arc<dyn KeySetAdapter>) -> Self {
        Self { adapter }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeySetAdapter::new()))
    }

    pub fn adapter(&self) -> &Arc<dyn KeySetAdapter> {
        &self.adapter
    }

    /// Add a member, bypassing any size cap.
    pub async fn add(&self, block_id: &str, member: &Member) -> Result<()> {
        self.adapter.add(block_id, &member.encode()).await
    }

    /// Number of blocks.
    pub async fn len(&self) -> Result<usize> {
        self.adapter.len().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn block_ids(&self) -> Result<Vec<String>> {
        self.adapter
            .scan()
            .map_ok(|(block_id, _)| block_id)
            .try_collect()
            .await
    }

    /// Members of one block, sorted by dataset id then record id.
    pub async fn members(&self, block_id: &str) -> Result<Option<Vec<Member>>> {
        match self.adapter.get(block_id).await? {
            Some(values) => Ok(Some(decode_members(&values)?)),
            None => Ok(None),
        }
    }

    /// `(block id, member count)` for every block.
    pub async fn sizes(&self) -> Result<Vec<(String, usize)>> {
        self.adapter
            .scan()
            .map_ok(|(block_id, values)| (block_id, values.len()))
            .try_collect()
            .await
    }

    /// Every membership row `(block id, member)`.
    pub fn iter(&self) -> BoxStream<'_, Result<(String, Member)>> {
        Box::pin(try_stream! {
            let mut blocks = self.adapter.scan();
            while let Some((block_id, values)) = blocks.try_next().await? {
                for member in decode_members(&values)? {
                    yield (block_id.clone(), member);
                }
            }
        })
    }

    /// Candidate id pairs `(block id, left id, right id)`.
    ///
    /// With a right dataset, the cross product of the two projections of each block; otherwise
    /// the unordered 2-combinations of the left projection. Pairs found in several blocks are
    /// yielded once per block.
    pub fn pairs<'a>(
        &'a self,
        left_dataset: &'a str,
        right_dataset: Option<&'a str>,
    ) -> BoxStream<'a, Result<(String, String, String)>> {
        Box::pin(try_stream! {
            let mut blocks = self.adapter.scan();
            while let Some((block_id, values)) = blocks.try_next().await? {
                let members = decode_members(&values)?;
                let left: Vec<&str> = members
                    .iter()
                    .filter(|m| m.dataset_id == left_dataset)
                    .map(|m| m.record_id.as_str())
                    .collect();
                match right_dataset {
                    Some(right_dataset) => {
                        let right: Vec<&str> = members
                            .iter()
                            .filter(|m| m.dataset_id == right_dataset)
                            .map(|m| m.record_id.as_str())
                            .collect();
                        for l in &left {
                            for r in &right {
                                yield (block_id.clone(), l.to_string(), r.to_string());
                            }
                        }
                    }
                    None => {
                        for (i, l) in left.iter().enumerate() {
                            for r in &left[i + 1..] {
                                yield (block_id.clone(), l.to_string(), r.to_string());
                            }
                        }
                    }
                }
            }
        })
    }
}

pub(crate) fn decode_members(values: &ValueSet) -> Result<Vec<Member>> {
    let mut members = values
        .iter()
        .map(|encoded| Member::decode(encoded))
        .collect::<Result<Vec<_>>>()?;
    members.sort();
    Ok(members)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pairs_dedup_and_linkage() {
        let block = Block::in_memory();
        for id in ["2", "1", "3"] {
            block.add("k", &Member::new("left", id)).await.unwrap();
        }
        block.add("k", &Member::new("right", "x")).await.unwrap();

        let dedup: Vec<_> = block.pairs("left", None).try_collect().await.unwrap();
        let ids: Vec<(String, String)> = dedup.into_iter().map(|(_, a, b)| (a, b)).collect();
        assert_eq!(
            ids,
            vec![
                ("1".to_string(), "2".to_string()),
                ("1".to_string(), "3".to_string()),
                ("2".to_string(), "3".to_string())
            ]
        );

        let linkage: Vec<_> = block.pairs("left", Some("right")).try_collect().await.unwrap();
        assert_eq!(linkage.len(), 3);
        assert!(linkage.iter().all(|(_, _, r)| r == "x"));
    }

    #[tokio::test]
    async fn test_members_and_sizes() {
        let block = Block::in_memory();
        block.add("a", &Member::new("d", "1")).await.unwrap();
        block.add("a", &Member::new("d", "1")).await.unwrap();
        block.add("b", &Member::new("d", "2")).await.unwrap();

        assert_eq!(block.len().await.unwrap(), 2);
        assert_eq!(block.block_ids().await.unwrap(), vec!["a", "b"]);
        assert_eq!(
            block.sizes().await.unwrap(),
            vec![("a".to_string(), 1), ("b".to_string(), 1)]
        );
        assert_eq!(
            block.members("a").await.unwrap().unwrap(),
            vec![Member::new("d", "1")]
        );
        let rows: Vec<_> = block.iter().try_collect().await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
