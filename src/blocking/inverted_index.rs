//! Inverted-index blocking with a per-token set cap
//!
//! The left dataset is indexed token -> record ids; a token whose id set grows past `set_size`
//! is blacklisted and dropped. The right dataset (if any) probes that index. Besides writing
//! blocks, [`InvertedIndexJoin`] streams the candidate id pairs of the join through an on-disk
//! spill buffer.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader, BufWriter};

use crate::config::BlockingSection;
use crate::dataset::Dataset;
use crate::types::RecordId;
use crate::{Error, Result};

use super::{build_key_index, emit_shared_keys, BlockStrategy, BlockWriter, KeyIndex, KeyShape, KeySource};

pub const DEFAULT_SPILL_BUFFER_SIZE: usize = 100_000;

pub struct InvertedIndexBlockGenerator {
    key: KeySource,
    set_size: usize,
    join: InvertedIndexJoin,
}

impl InvertedIndexBlockGenerator {
    pub fn new(key: KeySource, set_size: usize) -> Result<Self> {
        if set_size == 0 {
            return Err(Error::parameter("inverted-index set_size must be at least 1"));
        }
        Ok(Self {
            key,
            set_size,
            join: InvertedIndexJoin::default(),
        })
    }

    pub fn spill_buffer_size(mut self, size: usize) -> Self {
        self.join.spill_buffer_size = size.max(1);
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.join.work_dir = Some(dir.into());
        self
    }

    pub fn join(mut self, join: InvertedIndexJoin) -> Self {
        self.join = join;
        self
    }

    async fn index(&self, dataset: &Dataset, capped: bool) -> Result<KeyIndex> {
        let cap = capped.then_some(self.set_size);
        build_key_index(dataset, &self.key, KeyShape::Tokens, cap).await
    }

    /// Stream the candidate `(left id, right id)` pairs of the capped join.
    pub async fn candidate_pairs(
        &self,
        left: &Dataset,
        right: Option<&Dataset>,
    ) -> Result<BoxStream<'static, Result<(RecordId, RecordId)>>> {
        let left = self.index(left, true).await?;
        let right = match right {
            Some(right) => Some(self.index(right, false).await?),
            None => None,
        };
        Ok(self.join.pairs(left, right))
    }
}

#[async_trait]
impl BlockStrategy for InvertedIndexBlockGenerator {
    type Keys = KeyIndex;

    async fn extract(&self, dataset: &Dataset) -> Result<KeyIndex> {
        self.index(dataset, true).await
    }

    async fn emit(
        &self,
        left: &KeyIndex,
        right: Option<&KeyIndex>,
        writer: &BlockWriter,
    ) -> Result<()> {
        for token in &left.overflow {
            writer.blacklist_key(token).await?;
        }
        emit_shared_keys(left, right, writer).await
    }

    async fn generate(
        &self,
        left: &Dataset,
        right: Option<&Dataset>,
        writer: &BlockWriter,
    ) -> Result<()> {
        let left_keys = self.index(left, true).await?;
        let right_keys = match right {
            Some(right) => Some(self.index(right, false).await?),
            None => None,
        };
        tracing::info!(
            blacklisted = left_keys.overflow.len(),
            set_size = self.set_size,
            "Inverted index built"
        );
        self.emit(&left_keys, right_keys.as_ref(), writer).await
    }
}

/// Token join of two key indexes, spilling pairs to disk in chunks
#[derive(Debug, Clone)]
pub struct InvertedIndexJoin {
    pub spill_buffer_size: usize,
    /// Defaults to the system temp dir.
    pub work_dir: Option<PathBuf>,
}

impl Default for InvertedIndexJoin {
    fn default() -> Self {
        Self {
            spill_buffer_size: DEFAULT_SPILL_BUFFER_SIZE,
            work_dir: None,
        }
    }
}

impl From<&BlockingSection> for InvertedIndexJoin {
    fn from(section: &BlockingSection) -> Self {
        Self {
            spill_buffer_size: section.spill_buffer_size.max(1),
            work_dir: Some(section.work_dir()),
        }
    }
}

impl InvertedIndexJoin {
    /// Cross-product pairs per shared token, in ascending token order, or 2-combinations of
    /// each token's ids without a right index. Pairs sharing several tokens repeat.
    pub fn pairs(
        &self,
        left: KeyIndex,
        right: Option<KeyIndex>,
    ) -> BoxStream<'static, Result<(RecordId, RecordId)>> {
        let join = self.clone();
        Box::pin(try_stream! {
            let mut spill = SpillBuffer::new(join.spill_buffer_size, join.work_dir.clone());
            {
                let mut tokens = left.keys.scan();
                while let Some((token, left_ids)) = tokens.try_next().await? {
                    match &right {
                        Some(right) => {
                            let Some(right_ids) = right.keys.get(&token).await? else { continue };
                            for l in &left_ids {
                                for r in &right_ids {
                                    spill.push(l.clone(), r.clone()).await?;
                                }
                            }
                        }
                        None => {
                            let ids: Vec<&String> = left_ids.iter().collect();
                            for (i, l) in ids.iter().enumerate() {
                                for r in &ids[i + 1..] {
                                    spill.push((*l).clone(), (*r).clone()).await?;
                                }
                            }
                        }
                    }
                }
            }
            tracing::debug!(spilled = spill.spilled, buffered = spill.buffer.len(), "Join complete");
            let mut drained = spill.drain().await?;
            while let Some(pair) = drained.try_next().await? {
                yield pair;
            }
        })
    }
}

/// Pairs buffered in memory up to `capacity`, then appended to an anonymous temp file
struct SpillBuffer {
    capacity: usize,
    work_dir: Option<PathBuf>,
    buffer: Vec<(RecordId, RecordId)>,
    file: Option<BufWriter<File>>,
    spilled: usize,
}

impl SpillBuffer {
    fn new(capacity: usize, work_dir: Option<PathBuf>) -> Self {
        Self {
            capacity: capacity.max(1),
            work_dir,
            buffer: Vec::new(),
            file: None,
            spilled: 0,
        }
    }

    async fn push(&mut self, left: RecordId, right: RecordId) -> Result<()> {
        self.buffer.push((left, right));
        if self.buffer.len() >= self.capacity {
            self.spill().await?;
        }
        Ok(())
    }

    async fn spill(&mut self) -> Result<()> {
        if self.file.is_none() {
            let dir = self.work_dir.clone();
            let file = tokio::task::spawn_blocking(move || match dir {
                Some(dir) => tempfile::tempfile_in(dir),
                None => tempfile::tempfile(),
            })
            .await
            .map_err(|e| Error::internal(format!("spill file task failed: {}", e)))??;
            self.file = Some(BufWriter::new(File::from_std(file)));
        }
        if let Some(writer) = self.file.as_mut() {
            for pair in self.buffer.drain(..) {
                let mut line = serde_json::to_vec(&pair)?;
                line.push(b'\n');
                writer.write_all(&line).await?;
                self.spilled += 1;
            }
        }
        Ok(())
    }

    /// Spilled pairs in order, then the in-memory tail.
    async fn drain(self) -> Result<BoxStream<'static, Result<(RecordId, RecordId)>>> {
        let file = match self.file {
            Some(mut writer) => {
                writer.flush().await?;
                let mut file = writer.into_inner();
                file.seek(SeekFrom::Start(0)).await?;
                Some(file)
            }
            None => None,
        };
        let buffer = self.buffer;
        Ok(Box::pin(try_stream! {
            if let Some(file) = file {
                let mut lines = BufReader::new(file).lines();
                while let Some(line) = lines.next_line().await.map_err(Error::from)? {
                    let pair = serde_json::from_str::<(RecordId, RecordId)>(&line).map_err(Error::from)?;
                    yield pair;
                }
            }
            for pair in buffer {
                yield pair;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ArrayReader;
    use crate::record::RecordSchema;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_spill_preserves_order() {
        let dir = TempDir::new().unwrap();
        let mut spill = SpillBuffer::new(2, Some(dir.path().to_path_buf()));
        for i in 0..5 {
            spill.push(i.to_string(), "r".to_string()).await.unwrap();
        }
        assert_eq!(spill.spilled, 4);
        let ids: Vec<String> = spill
            .drain()
            .await
            .unwrap()
            .map_ok(|(left, _)| left)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test]
    async fn test_unspilled_pairs_stay_in_memory() {
        let mut spill = SpillBuffer::new(10, None);
        spill.push("a".into(), "b".into()).await.unwrap();
        assert!(spill.file.is_none());
        let pairs: Vec<_> = spill.drain().await.unwrap().try_collect().await.unwrap();
        assert_eq!(pairs, vec![("a".to_string(), "b".to_string())]);
    }

    #[tokio::test]
    async fn test_dedup_pairs_within_token() {
        let schema = RecordSchema::builder("Doc").field("tokens").build().unwrap();
        let dataset = Dataset::builder(schema)
            .id("d")
            .ingest(ArrayReader::new(vec![
                json!({"id": "1", "tokens": ["t"]}),
                json!({"id": "2", "tokens": ["t"]}),
                json!({"id": "3", "tokens": ["t", "u"]}),
            ]))
            .await
            .unwrap();

        let generator = InvertedIndexBlockGenerator::new(KeySource::property("tokens"), 10)
            .unwrap()
            .spill_buffer_size(1);
        let pairs: Vec<_> = generator
            .candidate_pairs(&dataset, None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(
            pairs,
            vec![
                ("1".to_string(), "2".to_string()),
                ("1".to_string(), "3".to_string()),
                ("2".to_string(), "3".to_string())
            ]
        );
    }
}
