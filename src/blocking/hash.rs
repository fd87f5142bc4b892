//! Hash blocking: records sharing an exact scalar key share a block

use async_trait::async_trait;

use crate::dataset::Dataset;
use crate::Result;

use super::{build_key_index, emit_shared_keys, BlockStrategy, BlockWriter, KeyIndex, KeyShape, KeySource};

#[derive(Debug, Clone)]
pub struct HashBlockGenerator {
    key: KeySource,
}

impl HashBlockGenerator {
    pub fn new(key: KeySource) -> Self {
        Self { key }
    }
}

#[async_trait]
impl BlockStrategy for HashBlockGenerator {
    type Keys = KeyIndex;

    async fn extract(&self, dataset: &Dataset) -> Result<KeyIndex> {
        build_key_index(dataset, &self.key, KeyShape::Scalar, None).await
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
