//! Chain persistence
//!
//! Stores the authoritative block sequence as a single JSON document,
//! rewritten in full on every save. The store is an object rooted at
//! a data directory, constructed once per node and passed by
//! reference; there is no ambient global path.

use crate::core::block::Block;
use crate::core::chain::Chain;
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Persistence errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Name of the chain document inside the data directory
pub const CHAIN_FILE: &str = "chain.json";

/// File-backed store for the ordered block sequence
#[derive(Debug)]
pub struct BlockStore {
    data_dir: PathBuf,
}

impl BlockStore {
    /// Create a store rooted at the given data directory
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn chain_path(&self) -> PathBuf {
        self.data_dir.join(CHAIN_FILE)
    }

    /// Whether a chain document has been saved yet
    pub fn exists(&self) -> bool {
        self.chain_path().exists()
    }

    /// Load the persisted chain, empty if none has been saved yet
    pub fn load(&self) -> Result<Chain, StorageError> {
        let path = self.chain_path();
        if !path.exists() {
            return Ok(Chain::new());
        }

        let file = fs::File::open(&path)?;
        let reader = BufReader::new(file);
        let chain = serde_json::from_reader(reader)?;
        Ok(chain)
    }

    /// Overwrite the persisted chain. Writes a temporary file first
    /// and renames it into place, so a crash mid-write never leaves a
    /// torn document.
    pub fn save(&self, chain: &Chain) -> Result<(), StorageError> {
        let temp_path = self.data_dir.join("chain.tmp");
        let file = fs::File::create(&temp_path)?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, chain)?;

        fs::rename(&temp_path, self.chain_path())?;
        Ok(())
    }

    /// Keep only the first `keep` blocks. Used during reorgs.
    pub fn truncate(&self, keep: usize) -> Result<(), StorageError> {
        let mut chain = self.load()?;
        chain.truncate(keep);
        self.save(&chain)
    }

    /// Append one block to the persisted sequence
    pub fn append(&self, block: &Block) -> Result<(), StorageError> {
        let mut chain = self.load()?;
        chain.push(block.clone());
        self.save(&chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{BlockHash, BlockHeader};
    use crate::core::transaction::{Transaction, TxKind};
    use std::io::Write;

    fn block(serial_no: u64, parent_hash: BlockHash) -> Block {
        Block::new(
            BlockHeader {
                parent_hash,
                created_at: serial_no as i64 * 1_000,
                serial_no,
            },
            vec![Transaction {
                from: "system".into(),
                to: "alice".into(),
                amount: 10,
                timestamp: serial_no as i64 * 100,
                kind: TxKind::Reward,
                serial_no,
            }],
        )
    }

    fn linked_chain(length: usize) -> Chain {
        let mut chain = Chain::new();
        let mut parent = BlockHash::ZERO;
        for i in 0..length {
            let b = block(i as u64 + 1, parent);
            parent = b.hash();
            chain.push(b);
        }
        chain
    }

    #[test]
    fn test_load_without_document_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(temp_dir.path()).unwrap();

        assert!(!store.exists());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(temp_dir.path()).unwrap();
        let chain = linked_chain(3);

        store.save(&chain).unwrap();
        assert!(store.exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.hashes(), chain.hashes());
    }

    #[test]
    fn test_truncate_keeps_prefix() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(temp_dir.path()).unwrap();
        let chain = linked_chain(5);
        store.save(&chain).unwrap();

        store.truncate(2).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.hashes(), chain.hashes()[..2]);
    }

    #[test]
    fn test_append_extends_document() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(temp_dir.path()).unwrap();
        let chain = linked_chain(2);
        store.save(&chain).unwrap();

        let next = block(3, chain.tip_hash().unwrap());
        store.append(&next).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.tip_hash(), Some(next.hash()));
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = BlockStore::open(temp_dir.path()).unwrap();

        let mut file = fs::File::create(temp_dir.path().join(CHAIN_FILE)).unwrap();
        file.write_all(b"{ not json").unwrap();

        assert!(matches!(
            store.load(),
            Err(StorageError::Serialization(_))
        ));
    }
}
