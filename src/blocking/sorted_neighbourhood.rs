//! Sorted-neighbourhood blocking
//!
//! Membership rows from both sides are sorted by key and a window of `w` rows slides over the
//! sorted list; every window position is a block named `prefix + index`.

use async_trait::async_trait;
use futures::TryStreamExt;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::dataset::Dataset;
use crate::types::Member;
use crate::{Error, Result};

use super::{build_key_index, BlockStrategy, BlockWriter, KeyIndex, KeyShape, KeySource};

pub type Comparator = Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

pub struct SortedNeighbourhoodBlockGenerator {
    key: KeySource,
    window: usize,
    comparator: Option<Comparator>,
    prefix: String,
}

impl SortedNeighbourhoodBlockGenerator {
    /// `window` must be at least 2.
    pub fn new(key: KeySource, window: usize) -> Result<Self> {
        if window < 2 {
            return Err(Error::parameter(format!(
                "sorted-neighbourhood window must be at least 2, got {}",
                window
            )));
        }
        Ok(Self {
            key,
            window,
            comparator: None,
            prefix: String::new(),
        })
    }

    /// Defaults to lexicographic order.
    pub fn comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    pub fn block_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

#[async_trait]
impl BlockStrategy for SortedNeighbourhoodBlockGenerator {
    type Keys = KeyIndex;

    async fn extract(&self, dataset: &Dataset) -> Result<KeyIndex> {
        build_key_index(dataset, &self.key, KeyShape::Tokens, None).await
    }

    async fn emit(
        &self,
        left: &KeyIndex,
        right: Option<&KeyIndex>,
        writer: &BlockWriter,
    ) -> Result<()> {
        let mut rows: Vec<(String, Member)> = Vec::new();
        for index in std::iter::once(left).chain(right) {
            let mut keys = index.keys.scan();
            while let Some((key, ids)) = keys.try_next().await? {
                for id in ids {
                    rows.push((key.clone(), Member::new(&index.dataset_id, id)));
                }
            }
        }

        match &self.comparator {
            Some(cmp) => rows.sort_by(|a, b| cmp(&a.0, &b.0)),
            None => rows.sort_by(|a, b| a.0.cmp(&b.0)),
        }

        let windows: Vec<&[(String, Member)]> = if rows.len() < self.window {
            if rows.is_empty() {
                Vec::new()
            } else {
                vec![&rows[..]]
            }
        } else {
            rows.windows(self.window).collect()
        };

        for (index, window) in windows.iter().enumerate() {
            let block_id = format!("{}{}", self.prefix, index);
            let members: BTreeSet<&Member> = window.iter().map(|(_, member)| member).collect();
            for member in members {
                writer.write(&block_id, member).await?;
            }
        }
        tracing::debug!(rows = rows.len(), windows = windows.len(), "Sorted neighbourhood finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ArrayReader;
    use crate::record::RecordSchema;
    use serde_json::json;

    async fn dataset(id: &str, rows: Vec<serde_json::Value>) -> Dataset {
        let schema = RecordSchema::builder("Item").field("keys").build().unwrap();
        Dataset::builder(schema)
            .id(id)
            .ingest(ArrayReader::new(rows))
            .await
            .unwrap()
    }

    #[test]
    fn test_window_must_be_at_least_two() {
        assert!(SortedNeighbourhoodBlockGenerator::new(KeySource::property("keys"), 1).is_err());
    }

    #[tokio::test]
    async fn test_windows_over_sorted_keys() {
        let left = dataset("l", vec![
            json!({"id": "1", "keys": ["c"]}),
            json!({"id": "2", "keys": ["a"]}),
        ]).await;
        let right = dataset("r", vec![json!({"id": "x", "keys": ["b"]})]).await;

        let writer = BlockWriter::in_memory();
        SortedNeighbourhoodBlockGenerator::new(KeySource::property("keys"), 2)
            .unwrap()
            .block_id_prefix("w")
            .generate(&left, Some(&right), &writer)
            .await
            .unwrap();
        let block = writer.finish().await.unwrap();

        // sorted: a(2) b(x) c(1)
        assert_eq!(block.block_ids().await.unwrap(), vec!["w0", "w1"]);
        assert_eq!(
            block.members("w0").await.unwrap().unwrap(),
            vec![Member::new("l", "2"), Member::new("r", "x")]
        );
        assert_eq!(
            block.members("w1").await.unwrap().unwrap(),
            vec![Member::new("l", "1"), Member::new("r", "x")]
        );
    }

    #[tokio::test]
    async fn test_short_input_is_a_single_window_and_comparator_applies() {
        let left = dataset("l", vec![
            json!({"id": "1", "keys": ["a"]}),
            json!({"id": "2", "keys": ["b"]}),
            json!({"id": "3", "keys": ["c"]}),
        ]).await;

        let writer = BlockWriter::in_memory();
        SortedNeighbourhoodBlockGenerator::new(KeySource::property("keys"), 5)
            .unwrap()
            .generate(&left, None, &writer)
            .await
            .unwrap();
        let block = writer.finish().await.unwrap();
        assert_eq!(block.sizes().await.unwrap(), vec![("0".to_string(), 3)]);

        let writer = BlockWriter::in_memory();
        SortedNeighbourhoodBlockGenerator::new(KeySource::property("keys"), 2)
            .unwrap()
            .comparator(Arc::new(|a: &str, b: &str| b.cmp(a)))
            .generate(&left, None, &writer)
            .await
            .unwrap();
        let block = writer.finish().await.unwrap();
        // reversed: c(3) b(2) a(1)
        assert_eq!(
            block.members("0").await.unwrap().unwrap(),
            vec![Member::new("l", "2"), Member::new("l", "3")]
        );
    }
}
