//! Node orchestration
//!
//! Wires the ledger state, block store, peer set and consensus engine
//! together: serves peer queries and runs periodic reconciliation
//! rounds against the known peers.

use crate::consensus::{ChainSummary, ConsensusEngine, ConsensusError, RoundOutcome};
use crate::core::state::{LedgerError, LedgerState};
use crate::network::client::{PeerQuery, TcpPeerClient};
use crate::network::peers::PeerSet;
use crate::network::server::{Server, ServerContext};
use crate::storage::block_store::{BlockStore, StorageError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Port to listen on
    pub port: u16,
    /// Initial peers to reconcile against
    pub bootstrap_peers: Vec<String>,
    /// Data directory for the chain and peer documents
    pub data_dir: PathBuf,
    /// Time between reconciliation rounds
    pub reconcile_interval: Duration,
    /// Address peers should use to reach this node
    pub public_address: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bootstrap_peers: Vec::new(),
            data_dir: PathBuf::from(".ledger_data"),
            reconcile_interval: Duration::from_secs(30),
            public_address: None,
        }
    }
}

/// A ledger node
pub struct Node {
    config: NodeConfig,
    state: Arc<RwLock<LedgerState>>,
    store: Arc<BlockStore>,
    peers: Arc<RwLock<PeerSet>>,
    engine: ConsensusEngine,
    client: TcpPeerClient,
}

impl Node {
    /// Load or create the node's chain and rebuild its state by replay
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let store = Arc::new(BlockStore::open(&config.data_dir)?);
        let chain = store.load()?;
        let state = LedgerState::rebuild_from(&chain)?;
        log::info!(
            "loaded chain of {} block(s), {} account(s)",
            chain.len(),
            state.balances().len()
        );

        let mut peers = PeerSet::load(&config.data_dir)?;
        for peer in &config.bootstrap_peers {
            peers.add(peer.clone());
        }

        let state = Arc::new(RwLock::new(state));
        let peers = Arc::new(RwLock::new(peers));
        let engine = ConsensusEngine::new(state.clone(), store.clone());

        Ok(Self {
            config,
            state,
            store,
            peers,
            engine,
            client: TcpPeerClient::new(),
        })
    }

    pub fn state(&self) -> Arc<RwLock<LedgerState>> {
        self.state.clone()
    }

    pub fn store(&self) -> Arc<BlockStore> {
        self.store.clone()
    }

    /// Address this node reports in its own summaries
    fn public_address(&self) -> String {
        self.config
            .public_address
            .clone()
            .unwrap_or_else(|| format!("127.0.0.1:{}", self.config.port))
    }

    async fn local_summary(&self) -> Result<ChainSummary, StorageError> {
        let chain = self.store.load()?;
        let state = self.state.read().await;
        Ok(ChainSummary {
            address: self.public_address(),
            chain_hashes: chain.hashes(),
            last_serial: state.last_block_serial(),
        })
    }

    /// Serve peer queries and reconcile on an interval, until the
    /// enclosing task is cancelled
    pub async fn run(&self) -> Result<(), NodeError> {
        let server = Server::bind(self.config.port).await?;
        let ctx = ServerContext {
            address: self.public_address(),
            state: self.state.clone(),
            store: self.store.clone(),
            peers: self.peers.clone(),
        };
        tokio::spawn(server.run(ctx));

        let mut ticker = tokio::time::interval(self.config.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // rounds run back to back on this task, never overlapping
        loop {
            ticker.tick().await;
            match self.reconcile_round().await {
                Ok(RoundOutcome::Resynced {
                    divergence,
                    applied,
                    skipped,
                }) => log::info!(
                    "resynced: divergence at {}, {} applied, {} skipped",
                    divergence,
                    applied,
                    skipped
                ),
                Ok(RoundOutcome::InSync) => log::debug!("chain in sync"),
                Err(e) => log::warn!("reconciliation round failed: {}", e),
            }
        }
    }

    /// One reconciliation round: gather peer summaries, resolve the
    /// consensus chain, merge agreeing mempools, persist learned peers.
    pub async fn reconcile_round(&self) -> Result<RoundOutcome, NodeError> {
        let addresses = self.peers.read().await.addresses();
        if addresses.is_empty() {
            log::debug!("no known peers, skipping round");
            return Ok(RoundOutcome::InSync);
        }

        // query every peer concurrently; unreachable peers drop out of
        // this round's vote
        let queries = addresses.iter().map(|addr| {
            let client = self.client.clone();
            async move { (addr.clone(), client.get_peer_state(addr).await) }
        });
        let results = futures::future::join_all(queries).await;

        let mut summaries = Vec::new();
        let mut learned = Vec::new();
        for (addr, result) in results {
            match result {
                Ok(snapshot) => {
                    learned.extend(snapshot.peers);
                    summaries.push(snapshot.summary);
                }
                Err(e) => log::debug!("peer {} excluded from round: {}", addr, e),
            }
        }

        let local = self.local_summary().await?;
        let outcome = match self.engine.reconcile(&self.client, &local, &summaries).await {
            Ok(outcome) => outcome,
            Err(ConsensusError::NoUsableSummaries) | Err(ConsensusError::NoImprovement) => {
                RoundOutcome::InSync
            }
            Err(ConsensusError::PeerUnavailable(e)) => {
                log::warn!("consensus peer unavailable, retrying next round: {}", e);
                RoundOutcome::InSync
            }
            Err(e) => return Err(e.into()),
        };

        // the local view may have changed during resync
        let local = self.local_summary().await?;
        let adopted = self
            .engine
            .merge_peer_mempools(&self.client, &local, &summaries)
            .await;
        if adopted > 0 {
            log::info!("adopted {} pending transaction(s) from peers", adopted);
        }

        {
            let own = self.public_address();
            let mut peers = self.peers.write().await;
            peers.extend(learned.into_iter().filter(|addr| *addr != own));
            peers.save(&self.config.data_dir)?;
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> NodeConfig {
        NodeConfig {
            port: 0,
            bootstrap_peers: vec!["10.0.0.9:8080".to_string()],
            data_dir: dir.to_path_buf(),
            reconcile_interval: Duration::from_secs(1),
            public_address: None,
        }
    }

    #[tokio::test]
    async fn test_node_starts_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let node = Node::new(config(temp_dir.path())).unwrap();

        assert_eq!(node.state.read().await.last_block_serial(), 0);
        assert!(node.peers.read().await.contains("10.0.0.9:8080"));
    }

    #[tokio::test]
    async fn test_round_without_peers_is_in_sync() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut cfg = config(temp_dir.path());
        cfg.bootstrap_peers.clear();
        let node = Node::new(cfg).unwrap();

        let outcome = node.reconcile_round().await.unwrap();
        assert_eq!(outcome, RoundOutcome::InSync);
    }

    #[tokio::test]
    async fn test_round_tolerates_unreachable_peers() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut node = Node::new(config(temp_dir.path())).unwrap();
        node.client = TcpPeerClient::with_timeout(Duration::from_millis(100));

        // the only peer is unreachable, so no summary is usable
        let outcome = node.reconcile_round().await.unwrap();
        assert_eq!(outcome, RoundOutcome::InSync);
    }
}
