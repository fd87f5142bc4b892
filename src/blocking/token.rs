//! Token blocking: one block per token shared by records

use async_trait::async_trait;

use crate::dataset::Dataset;
use crate::Result;

use super::{build_key_index, emit_shared_keys, BlockStrategy, BlockWriter, KeyIndex, KeyShape, KeySource};

/// The key must be a list of strings; [`KeySource::tokenized`] derives one from a string.
#[derive(Debug, Clone)]
pub struct TokenBlockGenerator {
    key: KeySource,
}

impl TokenBlockGenerator {
    pub fn new(key: KeySource) -> Self {
        Self { key }
    }
}

#[async_trait]
impl BlockStrategy for TokenBlockGenerator {
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
        emit_shared_keys(left, right, writer).await
    }
}
