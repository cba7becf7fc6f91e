//! The ordered block sequence
//!
//! `Chain` is the persisted chain document: a container whose single
//! field is the block sequence, index 0 being genesis.

use crate::core::block::{Block, BlockHash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chain structure errors
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("block {index} has serial {got}, expected {expected}")]
    SerialMismatch {
        index: usize,
        expected: u64,
        got: u64,
    },
    #[error("block {index} does not link to its parent")]
    BrokenLink { index: usize },
    #[error("block {index} is not newer than its parent")]
    NonIncreasingTimestamp { index: usize },
}

/// Ordered sequence of committed blocks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chain {
    #[serde(rename = "Blocks")]
    blocks: Vec<Block>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.blocks.iter()
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Keep only the first `keep` blocks
    pub fn truncate(&mut self, keep: usize) {
        self.blocks.truncate(keep);
    }

    /// Identity hash of every block, in chain order
    pub fn hashes(&self) -> Vec<BlockHash> {
        self.blocks.iter().map(Block::hash).collect()
    }

    pub fn tip_hash(&self) -> Option<BlockHash> {
        self.blocks.last().map(Block::hash)
    }

    /// Check the structural invariants of the whole sequence: serials
    /// are the 1-based position, parent hashes link, timestamps climb.
    pub fn verify(&self) -> Result<(), ChainError> {
        for (index, block) in self.blocks.iter().enumerate() {
            let expected = index as u64 + 1;
            if block.header.serial_no != expected {
                return Err(ChainError::SerialMismatch {
                    index,
                    expected,
                    got: block.header.serial_no,
                });
            }
            if index > 0 {
                let parent = &self.blocks[index - 1];
                if block.header.parent_hash != parent.hash() {
                    return Err(ChainError::BrokenLink { index });
                }
                if block.header.created_at <= parent.header.created_at {
                    return Err(ChainError::NonIncreasingTimestamp { index });
                }
            }
        }
        Ok(())
    }
}
