//! Block generation
//!
//! Every strategy runs in two phases: per-dataset key extraction, then pairwise emission of
//! block memberships through a [`BlockWriter`]. A single dataset means deduplication; two
//! datasets mean linkage.

use async_trait::async_trait;
use futures::TryStreamExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::adapter::{KeySetAdapter, MemoryKeySetAdapter};
use crate::dataset::Dataset;
use crate::record::Record;
use crate::tokenizer::Tokenizer;
use crate::types::{Member, Value};
use crate::{Error, Result};

pub mod block;
pub mod canopy;
pub mod compose;
pub mod hash;
pub mod inverted_index;
pub mod minhash_lsh;
pub mod sorted_neighbourhood;
pub mod token;
pub mod writer;

pub use block::Block;
pub use canopy::{euclidean_distance, CanopyBlockGenerator, DistanceFn};
pub use compose::{intersect, inverted_index, union};
pub use hash::HashBlockGenerator;
pub use inverted_index::{
    InvertedIndexBlockGenerator, InvertedIndexJoin, DEFAULT_SPILL_BUFFER_SIZE,
};
pub use minhash_lsh::MinHashLshBlockGenerator;
pub use sorted_neighbourhood::{Comparator, SortedNeighbourhoodBlockGenerator};
pub use token::TokenBlockGenerator;
pub use writer::BlockWriter;

pub type KeyFn = Arc<dyn Fn(&Record) -> Result<Value> + Send + Sync>;

/// Where a generator reads its blocking key from
#[derive(Clone)]
pub enum KeySource {
    Property(String),
    Function(KeyFn),
}

impl KeySource {
    pub fn property(name: impl Into<String>) -> Self {
        KeySource::Property(name.into())
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Record) -> Result<Value> + Send + Sync + 'static,
    {
        KeySource::Function(Arc::new(f))
    }

    /// Tokens of a string property. Null yields no tokens.
    pub fn tokenized(property: impl Into<String>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        let property = property.into();
        Self::function(move |record| match record.get(&property)? {
            Value::String(text) => Ok(Value::StringList(tokenizer.tokenize(text))),
            Value::Null => Ok(Value::StringList(Vec::new())),
            other => Err(Error::blocking(format!(
                "record {}: property {} must be a string to tokenize, got {}",
                record.id(),
                property,
                other.kind()
            ))),
        })
    }

    pub fn evaluate(&self, record: &Record) -> Result<Value> {
        match self {
            KeySource::Property(name) => record.get(name).cloned(),
            KeySource::Function(f) => f(record),
        }
    }
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Property(name) => write!(f, "Property({})", name),
            KeySource::Function(_) => write!(f, "Function(..)"),
        }
    }
}

/// A single string key; null means no key.
pub(crate) fn scalar_key(record: &Record, value: Value) -> Result<Option<String>> {
    match value {
        Value::String(key) => Ok(Some(key)),
        Value::Null => Ok(None),
        other => Err(Error::blocking(format!(
            "record {}: expected a string key, got {}",
            record.id(),
            other.kind()
        ))),
    }
}

/// A list of string keys, deduplicated; null means no keys.
pub(crate) fn token_keys(record: &Record, value: Value) -> Result<BTreeSet<String>> {
    match value {
        Value::StringList(tokens) => Ok(tokens.into_iter().collect()),
        Value::Null => Ok(BTreeSet::new()),
        other => Err(Error::blocking(format!(
            "record {}: expected a list of string keys, got {}",
            record.id(),
            other.kind()
        ))),
    }
}

/// Extracted keys of one dataset: key -> record ids
#[derive(Clone)]
pub struct KeyIndex {
    pub dataset_id: String,
    pub keys: Arc<dyn KeySetAdapter>,
    /// Keys dropped because their id set grew past the index cap.
    pub overflow: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyShape {
    Scalar,
    Tokens,
}

/// Walk `dataset` and index every record under its keys.
pub(crate) async fn build_key_index(
    dataset: &Dataset,
    source: &KeySource,
    shape: KeyShape,
    cap: Option<usize>,
) -> Result<KeyIndex> {
    let keys: Arc<dyn KeySetAdapter> = Arc::new(MemoryKeySetAdapter::new());
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut overflow = BTreeSet::new();

    let mut records = dataset.records();
    while let Some(record) = records.try_next().await? {
        let value = source.evaluate(&record)?;
        let record_keys: BTreeSet<String> = match shape {
            KeyShape::Scalar => scalar_key(&record, value)?.into_iter().collect(),
            KeyShape::Tokens => token_keys(&record, value)?,
        };
        for key in record_keys {
            if overflow.contains(&key) {
                continue;
            }
            if let Some(cap) = cap {
                let count = counts.entry(key.clone()).or_default();
                *count += 1;
                if *count > cap {
                    keys.delete(&key).await?;
                    overflow.insert(key);
                    continue;
                }
            }
            keys.add(&key, record.id()).await?;
        }
    }

    let key_count = keys.len().await?;
    tracing::debug!(
        dataset_id = %dataset.id(),
        keys = key_count,
        overflow = overflow.len(),
        "Extracted blocking keys"
    );
    Ok(KeyIndex {
        dataset_id: dataset.id().to_string(),
        keys,
        overflow,
    })
}

/// Emit one block per key: every key of `left` in dedup mode, shared keys in linkage mode.
pub(crate) async fn emit_shared_keys(
    left: &KeyIndex,
    right: Option<&KeyIndex>,
    writer: &BlockWriter,
) -> Result<()> {
    let mut keys = left.keys.scan();
    while let Some((key, left_ids)) = keys.try_next().await? {
        let right_ids = match right {
            Some(right) => match right.keys.get(&key).await? {
                Some(ids) => Some((right.dataset_id.as_str(), ids)),
                None => continue,
            },
            None => None,
        };
        for id in &left_ids {
            writer.write(&key, &Member::new(&left.dataset_id, id)).await?;
        }
        if let Some((dataset_id, ids)) = right_ids {
            for id in &ids {
                writer.write(&key, &Member::new(dataset_id, id)).await?;
            }
        }
    }
    Ok(())
}

/// The two-phase protocol shared by all strategies
#[async_trait]
pub trait BlockStrategy: Send + Sync {
    type Keys: Send + Sync;

    async fn extract(&self, dataset: &Dataset) -> Result<Self::Keys>;

    async fn emit(
        &self,
        left: &Self::Keys,
        right: Option<&Self::Keys>,
        writer: &BlockWriter,
    ) -> Result<()>;

    async fn generate(
        &self,
        left: &Dataset,
        right: Option<&Dataset>,
        writer: &BlockWriter,
    ) -> Result<()> {
        let left_keys = self.extract(left).await?;
        let right_keys = match right {
            Some(right) => Some(self.extract(right).await?),
            None => None,
        };
        self.emit(&left_keys, right_keys.as_ref(), writer).await
    }
}

/// Every supported strategy
pub enum BlockGenerator {
    Hash(HashBlockGenerator),
    Token(TokenBlockGenerator),
    Canopy(CanopyBlockGenerator),
    SortedNeighbourhood(SortedNeighbourhoodBlockGenerator),
    InvertedIndex(InvertedIndexBlockGenerator),
    MinHashLsh(MinHashLshBlockGenerator),
}

impl BlockGenerator {
    pub fn name(&self) -> &'static str {
        match self {
            BlockGenerator::Hash(_) => "hash",
            BlockGenerator::Token(_) => "token",
            BlockGenerator::Canopy(_) => "canopy",
            BlockGenerator::SortedNeighbourhood(_) => "sorted_neighbourhood",
            BlockGenerator::InvertedIndex(_) => "inverted_index",
            BlockGenerator::MinHashLsh(_) => "minhash_lsh",
        }
    }

    #[tracing::instrument(skip_all, fields(strategy = self.name(), left = %left.id()))]
    pub async fn generate(
        &self,
        left: &Dataset,
        right: Option<&Dataset>,
        writer: &BlockWriter,
    ) -> Result<()> {
        match self {
            BlockGenerator::Hash(g) => g.generate(left, right, writer).await,
            BlockGenerator::Token(g) => g.generate(left, right, writer).await,
            BlockGenerator::Canopy(g) => g.generate(left, right, writer).await,
            BlockGenerator::SortedNeighbourhood(g) => g.generate(left, right, writer).await,
            BlockGenerator::InvertedIndex(g) => g.generate(left, right, writer).await,
            BlockGenerator::MinHashLsh(g) => g.generate(left, right, writer).await,
        }
    }

    /// Generate into a fresh in-memory block.
    pub async fn generate_block(
        &self,
        left: &Dataset,
        right: Option<&Dataset>,
        block_max_size: Option<usize>,
    ) -> Result<Block> {
        let writer = BlockWriter::in_memory().block_max_size(block_max_size);
        self.generate(left, right, &writer).await?;
        writer.finish().await
    }
}

macro_rules! impl_from_strategy {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for BlockGenerator {
                fn from(g: $ty) -> Self {
                    BlockGenerator::$variant(g)
                }
            }
        )*
    };
}

impl_from_strategy! {
    Hash => HashBlockGenerator,
    Token => TokenBlockGenerator,
    Canopy => CanopyBlockGenerator,
    SortedNeighbourhood => SortedNeighbourhoodBlockGenerator,
    InvertedIndex => InvertedIndexBlockGenerator,
    MinHashLsh => MinHashLshBlockGenerator,
}
