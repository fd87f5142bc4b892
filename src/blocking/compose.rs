//! Block composition: inverted indices, union and intersection
//!
//! Composite blocks are written under the SHA-256 of their sorted, newline-joined encoded
//! members, so identical outputs collapse into one block.

use futures::TryStreamExt;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::adapter::{KeySetAdapter, ValueSet};
use crate::Result;

use super::Block;

/// Derive `encode(dataset id, record id) -> {block id}` from `block` into `output`.
pub async fn inverted_index(
    block: &Block,
    output: Arc<dyn KeySetAdapter>,
) -> Result<Arc<dyn KeySetAdapter>> {
    let mut rows = block.adapter().scan();
    while let Some((block_id, members)) = rows.try_next().await? {
        for member in &members {
            output.add(member, &block_id).await?;
        }
    }
    Ok(output)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combine {
    Union,
    Intersect,
}

/// Union of every overlapping pair of blocks; blocks without a counterpart are kept as they are.
pub async fn union(
    left: &Block,
    right: &Block,
    right_index: &dyn KeySetAdapter,
    output: Arc<dyn KeySetAdapter>,
) -> Result<Block> {
    combine(Combine::Union, left, right, right_index, output).await
}

/// Intersection of every overlapping pair of blocks.
pub async fn intersect(
    left: &Block,
    right: &Block,
    right_index: &dyn KeySetAdapter,
    output: Arc<dyn KeySetAdapter>,
) -> Result<Block> {
    combine(Combine::Intersect, left, right, right_index, output).await
}

pub(crate) fn composite_block_id(members: &ValueSet) -> String {
    let mut hasher = Sha256::new();
    for (i, member) in members.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(member.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

async fn write_composite(output: &dyn KeySetAdapter, members: ValueSet) -> Result<()> {
    if members.is_empty() {
        return Ok(());
    }
    output.set(&composite_block_id(&members), members).await
}

#[tracing::instrument(skip_all, fields(op = ?op))]
async fn combine(
    op: Combine,
    left: &Block,
    right: &Block,
    right_index: &dyn KeySetAdapter,
    output: Arc<dyn KeySetAdapter>,
) -> Result<Block> {
    let mut matched_right: HashSet<String> = HashSet::new();
    let mut left_blocks = left.adapter().scan();
    while let Some((_, left_members)) = left_blocks.try_next().await? {
        let mut partners = BTreeSet::new();
        for member in &left_members {
            if let Some(block_ids) = right_index.get(member).await? {
                partners.extend(block_ids);
            }
        }

        if partners.is_empty() {
            if op == Combine::Union {
                write_composite(output.as_ref(), left_members).await?;
            }
            continue;
        }

        for partner in partners {
            let right_members = right.adapter().get(&partner).await?.unwrap_or_default();
            let combined: ValueSet = match op {
                Combine::Union => left_members.union(&right_members).cloned().collect(),
                Combine::Intersect => left_members.intersection(&right_members).cloned().collect(),
            };
            write_composite(output.as_ref(), combined).await?;
            matched_right.insert(partner);
        }
    }
    drop(left_blocks);

    if op == Combine::Union {
        let mut right_blocks = right.adapter().scan();
        while let Some((block_id, members)) = right_blocks.try_next().await? {
            if !matched_right.contains(&block_id) {
                write_composite(output.as_ref(), members).await?;
            }
        }
    }

    let block = Block::new(output);
    let block_count = block.len().await?;
    tracing::info!(blocks = block_count, "Composite blocks written");
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryKeySetAdapter;
    use crate::types::Member;

    async fn block(rows: Vec<(&str, Vec<&str>)>) -> Block {
        let block = Block::in_memory();
        for (id, members) in rows {
            for m in members {
                block.add(id, &Member::new("d", m)).await.unwrap();
            }
        }
        block
    }

    fn memory() -> Arc<dyn KeySetAdapter> {
        Arc::new(MemoryKeySetAdapter::new())
    }

    async fn member_sets(block: &Block) -> BTreeSet<ValueSet> {
        block
            .adapter()
            .scan()
            .map_ok(|(_, members)| members)
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_inverted_index_maps_members_to_blocks() {
        let a = block(vec![("x", vec!["1", "2"]), ("y", vec!["2"])]).await;
        let index = inverted_index(&a, memory()).await.unwrap();
        let blocks = index.get(&Member::new("d", "2").encode()).await.unwrap().unwrap();
        assert_eq!(blocks.into_iter().collect::<Vec<_>>(), vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_union_and_intersect() {
        let a = block(vec![("a1", vec!["1", "2"]), ("a2", vec!["5"])]).await;
        let b = block(vec![("b1", vec!["2", "3"]), ("b2", vec!["9"])]).await;
        let b_index = inverted_index(&b, memory()).await.unwrap();

        let u = union(&a, &b, b_index.as_ref(), memory()).await.unwrap();
        let sets = member_sets(&u).await;
        assert_eq!(sets.len(), 3);
        let enc = |ids: &[&str]| -> ValueSet { ids.iter().map(|i| Member::new("d", *i).encode()).collect() };
        assert!(sets.contains(&enc(&["1", "2", "3"])));
        assert!(sets.contains(&enc(&["5"])));
        assert!(sets.contains(&enc(&["9"])));

        let i = intersect(&a, &b, b_index.as_ref(), memory()).await.unwrap();
        assert_eq!(member_sets(&i).await, BTreeSet::from([enc(&["2"])]));
    }

    #[tokio::test]
    async fn test_composite_ids_are_content_hashes() {
        let a = block(vec![("a1", vec!["1", "2"])]).await;
        let a_index = inverted_index(&a, memory()).await.unwrap();
        let u = union(&a, &a, a_index.as_ref(), memory()).await.unwrap();

        let ids = u.block_ids().await.unwrap();
        assert_eq!(ids.len(), 1);
        let members = a.adapter().get("a1").await.unwrap().unwrap();
        assert_eq!(ids[0], composite_block_id(&members));
        assert_eq!(ids[0].len(), 64);
    }

    #[tokio::test]
    async fn test_union_runs_on_spawned_task() {
        let a = block(vec![("a1", vec!["1"])]).await;
        let b = block(vec![("b1", vec!["1", "2"])]).await;
        let u = tokio::spawn(async move {
            let b_index = inverted_index(&b, memory()).await?;
            union(&a, &b, b_index.as_ref(), memory()).await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(u.len().await.unwrap(), 1);
    }
}
