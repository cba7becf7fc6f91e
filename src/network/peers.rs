//! Known-peer bookkeeping
//!
//! A deduplicated set of peer addresses, persisted as JSON in the
//! node's data directory and loaded at startup.

use crate::storage::block_store::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Name of the peer-set document inside the data directory
pub const PEERS_FILE: &str = "peers.json";

/// Deduplicated set of known peer addresses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerSet {
    addresses: BTreeSet<String>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address; blank addresses are rejected. Returns whether
    /// the set changed.
    pub fn add(&mut self, address: impl Into<String>) -> bool {
        let address = address.into();
        if address.is_empty() {
            return false;
        }
        self.addresses.insert(address)
    }

    pub fn remove(&mut self, address: &str) -> bool {
        self.addresses.remove(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// All known addresses, in stable order
    pub fn addresses(&self) -> Vec<String> {
        self.addresses.iter().cloned().collect()
    }

    /// Load the persisted peer set, empty if none exists
    pub fn load(data_dir: &Path) -> Result<Self, StorageError> {
        let path = data_dir.join(PEERS_FILE);
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = fs::File::open(&path)?;
        let peers = serde_json::from_reader(BufReader::new(file))?;
        Ok(peers)
    }

    /// Persist the peer set, write-temp-then-rename
    pub fn save(&self, data_dir: &Path) -> Result<(), StorageError> {
        let temp_path = data_dir.join("peers.tmp");
        let file = fs::File::create(&temp_path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        fs::rename(&temp_path, data_dir.join(PEERS_FILE))?;
        Ok(())
    }
}

impl Extend<String> for PeerSet {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        for address in iter {
            self.add(address);
        }
    }
}
