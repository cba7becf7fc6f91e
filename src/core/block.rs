//! Blocks and block identity
//!
//! A block packages an ordered transaction list under a header linking
//! it to its parent. A block's identity hash is the SHA-256 digest of
//! its canonical JSON encoding.

use crate::core::transaction::Transaction;
use crate::crypto::sha256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 32-byte block identity digest, hex-encoded on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHash([u8; 32]);

impl BlockHash {
    /// Tip hash before any block has been committed
    pub const ZERO: BlockHash = BlockHash([0u8; 32]);

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex characters, for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<[u8; 32]> for BlockHash {
    fn from(digest: [u8; 32]) -> Self {
        Self(digest)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(serde::de::Error::custom)?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected a 32-byte hex digest"))?;
        Ok(BlockHash(digest))
    }
}

/// Block metadata linking it into the chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Identity hash of the previous block
    #[serde(rename = "ParentHash")]
    pub parent_hash: BlockHash,
    /// Creation time in Unix nanoseconds
    #[serde(rename = "CreatedAt")]
    pub created_at: i64,
    /// 1-based position in the chain
    #[serde(rename = "SerialNo")]
    pub serial_no: u64,
}

/// A block in the ledger chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "Header")]
    pub header: BlockHeader,
    #[serde(rename = "Transactions")]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Identity hash: digest of the block's canonical encoding
    pub fn hash(&self) -> BlockHash {
        let encoded = serde_json::to_vec(self).expect("block encoding is infallible");
        BlockHash(sha256(&encoded))
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}
