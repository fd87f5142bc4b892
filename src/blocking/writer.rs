//! Capped block writer with blacklist

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::adapter::{KeySetAdapter, MemoryKeySetAdapter, ValueSet};
use crate::types::Member;
use crate::Result;

use super::Block;

#[derive(Default)]
struct WriterState {
    /// Block ids already checked against the blacklist adapter.
    seen: HashSet<String>,
    /// Distinct members per open block; tracked only when a cap is set.
    members: HashMap<String, HashSet<String>>,
    sealed: HashSet<String>,
    rows: usize,
}

/// Writes block memberships into an output adapter, enforcing `block_max_size`
///
/// A block that would grow past the cap is deleted from the output and its id blacklisted;
/// later writes to a blacklisted id are no-ops. Ids already present in the blacklist adapter
/// are never admitted.
pub struct BlockWriter {
    output: Arc<dyn KeySetAdapter>,
    blacklist: Arc<dyn KeySetAdapter>,
    block_max_size: Option<usize>,
    state: Mutex<WriterState>,
}

impl BlockWriter {
    pub fn new(output: Arc<dyn KeySetAdapter>) -> Self {
        Self {
            output,
            blacklist: Arc::new(MemoryKeySetAdapter::new()),
            block_max_size: None,
            state: Mutex::new(WriterState::default()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKeySetAdapter::new()))
    }

    pub fn blacklist(mut self, blacklist: Arc<dyn KeySetAdapter>) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn block_max_size(mut self, max: Option<usize>) -> Self {
        self.block_max_size = max;
        self
    }

    pub fn output(&self) -> &Arc<dyn KeySetAdapter> {
        &self.output
    }

    pub fn blacklist_adapter(&self) -> &Arc<dyn KeySetAdapter> {
        &self.blacklist
    }

    /// Returns whether the member is (now) part of the block.
    pub async fn write(&self, block_id: &str, member: &Member) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.sealed.contains(block_id) {
            return Ok(false);
        }
        if !state.seen.contains(block_id) {
            if self.blacklist.contains_key(block_id).await? {
                state.sealed.insert(block_id.to_string());
                return Ok(false);
            }
            state.seen.insert(block_id.to_string());
        }

        let encoded = member.encode();
        if let Some(max) = self.block_max_size {
            let members = state.members.entry(block_id.to_string()).or_default();
            if members.contains(&encoded) {
                return Ok(true);
            }
            if members.len() + 1 > max {
                self.seal(&mut state, block_id).await?;
                tracing::debug!(block_id, max, "Block exceeded size cap; blacklisted");
                return Ok(false);
            }
            members.insert(encoded.clone());
        }

        self.output.add(block_id, &encoded).await?;
        state.rows += 1;
        Ok(true)
    }

    /// Blacklist `block_id` and drop whatever was written under it.
    pub async fn blacklist_key(&self, block_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.sealed.contains(block_id) {
            return Ok(());
        }
        self.seal(&mut state, block_id).await
    }

    async fn seal(&self, state: &mut WriterState, block_id: &str) -> Result<()> {
        self.output.delete(block_id).await?;
        self.blacklist.set(block_id, ValueSet::new()).await?;
        state.members.remove(block_id);
        state.sealed.insert(block_id.to_string());
        Ok(())
    }

    /// Log a summary and return the written block.
    pub async fn finish(self) -> Result<Block> {
        let state = self.state.into_inner();
        let blocks = self.output.len().await?;
        tracing::info!(
            blocks,
            rows = state.rows,
            blacklisted = state.sealed.len(),
            "Block generation finished"
        );
        Ok(Block::new(self.output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cap_seals_and_blacklists() {
        let writer = BlockWriter::in_memory().block_max_size(Some(2));
        assert!(writer.write("k", &Member::new("d", "1")).await.unwrap());
        assert!(writer.write("k", &Member::new("d", "1")).await.unwrap());
        assert!(writer.write("k", &Member::new("d", "2")).await.unwrap());
        assert!(!writer.write("k", &Member::new("d", "3")).await.unwrap());
        // never re-admitted
        assert!(!writer.write("k", &Member::new("d", "4")).await.unwrap());
        assert!(writer.write("j", &Member::new("d", "1")).await.unwrap());

        let blacklist = writer.blacklist_adapter().clone();
        let block = writer.finish().await.unwrap();
        assert!(blacklist.contains_key("k").await.unwrap());
        assert!(block.members("k").await.unwrap().is_none());
        assert_eq!(block.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_preexisting_blacklist_is_honoured() {
        let blacklist: Arc<dyn KeySetAdapter> = Arc::new(MemoryKeySetAdapter::new());
        blacklist.set("stop", ValueSet::new()).await.unwrap();

        let writer = BlockWriter::in_memory().blacklist(blacklist);
        assert!(!writer.write("stop", &Member::new("d", "1")).await.unwrap());
        assert!(writer.write("go", &Member::new("d", "1")).await.unwrap());
    }
}
