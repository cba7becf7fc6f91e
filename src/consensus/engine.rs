//! Consensus reconciliation engine
//!
//! Compares the local chain-hash history against peer summaries,
//! selects the chain most distinct nodes agree on, and rolls the
//! local node onto it by truncating the store, rebuilding the ledger
//! state from the retained prefix and replaying the peer's blocks
//! through the normal commit path.
//!
//! This is a majority-of-reporting-nodes heuristic, not a
//! cryptographic proof; it assumes most live peers are honest.

use crate::core::block::BlockHash;
use crate::core::state::{LedgerError, LedgerState};
use crate::network::client::{PeerError, PeerQuery};
use crate::storage::block_store::{BlockStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Reconciliation round errors
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("no peer reported a usable chain summary")]
    NoUsableSummaries,
    #[error("consensus chain offers no blocks past the divergence point")]
    NoImprovement,
    #[error("consensus peer unavailable: {0}")]
    PeerUnavailable(#[from] PeerError),
    #[error("storage failure during resync: {0}")]
    Storage(#[from] StorageError),
    #[error("retained chain prefix failed to replay: {0}")]
    Replay(#[from] LedgerError),
}

/// One node's view of its own chain, as reported to peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSummary {
    /// Network address of the reporting node
    #[serde(rename = "Address")]
    pub address: String,
    /// Identity hash of every block, in chain order
    #[serde(rename = "ChainHashes")]
    pub chain_hashes: Vec<BlockHash>,
    /// The reporting node's last committed block serial
    #[serde(rename = "LastSerialNo")]
    pub last_serial: u64,
}

impl ChainSummary {
    pub fn tip_hash(&self) -> Option<BlockHash> {
        self.chain_hashes.last().copied()
    }
}

/// Two hash histories describe the same lineage when they match at the
/// tip position of the shorter one. Empty histories agree only with
/// each other.
pub fn chains_agree(a: &[BlockHash], b: &[BlockHash]) -> bool {
    if a.is_empty() || b.is_empty() {
        return a.len() == b.len();
    }
    let idx = a.len().min(b.len()) - 1;
    a[idx] == b[idx]
}

/// First index at which the two histories disagree. `None` means fully
/// synced; `Some(shorter.len())` means the shorter history is a strict
/// prefix and divergence begins exactly where it ends.
///
/// `shorter` must not be longer than `longer`; callers order the
/// arguments, and the contract is checked in debug builds.
pub fn chain_diff_idx(shorter: &[BlockHash], longer: &[BlockHash]) -> Option<usize> {
    debug_assert!(shorter.len() <= longer.len());

    if shorter.len() == longer.len() && chains_agree(shorter, longer) {
        return None;
    }

    for (idx, hash) in shorter.iter().enumerate() {
        if longer[idx] != *hash {
            return Some(idx);
        }
    }

    Some(shorter.len())
}

/// Select the summary most distinct reporting nodes agree on.
///
/// Summaries are deduplicated by address (empty addresses are
/// ignored) and grouped by tip hash, keeping the first-seen summary
/// per group. Each unordered pair of groups whose histories agree is
/// one lineage: the pair's accumulated votes merge onto the group with
/// the strictly higher committed serial, a tie landing on the
/// later-seen group. That tie rule is deliberate and stable, not
/// incidental. The winner is the group with the most votes,
/// earliest-seen winning a count tie.
pub fn compute_consensus(summaries: &[ChainSummary]) -> Option<ChainSummary> {
    struct Group {
        summary: ChainSummary,
        votes: usize,
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut by_tip: HashMap<BlockHash, usize> = HashMap::new();
    let mut seen_addresses: HashSet<&str> = HashSet::new();

    for summary in summaries {
        if summary.address.is_empty() || !seen_addresses.insert(&summary.address) {
            continue;
        }
        let Some(tip) = summary.tip_hash() else {
            continue;
        };
        match by_tip.get(&tip) {
            Some(&idx) => groups[idx].votes += 1,
            None => {
                by_tip.insert(tip, groups.len());
                groups.push(Group {
                    summary: summary.clone(),
                    votes: 1,
                });
            }
        }
    }

    if groups.is_empty() {
        return None;
    }

    let mut votes: Vec<usize> = groups.iter().map(|g| g.votes).collect();
    for i in 0..groups.len() {
        for j in (i + 1)..groups.len() {
            if chains_agree(
                &groups[i].summary.chain_hashes,
                &groups[j].summary.chain_hashes,
            ) {
                if groups[i].summary.last_serial > groups[j].summary.last_serial {
                    votes[i] += votes[j];
                } else {
                    votes[j] += votes[i];
                }
            }
        }
    }

    let mut winner = 0;
    for idx in 1..groups.len() {
        if votes[idx] > votes[winner] {
            winner = idx;
        }
    }

    Some(groups.swap_remove(winner).summary)
}

/// Outcome of one reconciliation round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// Local chain already matches the consensus chain
    InSync,
    /// Chain was rolled back and replayed onto the consensus lineage
    Resynced {
        /// Chain position where local and consensus history split
        divergence: usize,
        /// Peer blocks committed this round
        applied: usize,
        /// Peer blocks that failed validation and were skipped
        skipped: usize,
    },
}

/// Drives reconciliation rounds over the shared node state
pub struct ConsensusEngine {
    state: Arc<RwLock<LedgerState>>,
    store: Arc<BlockStore>,
}

impl ConsensusEngine {
    pub fn new(state: Arc<RwLock<LedgerState>>, store: Arc<BlockStore>) -> Self {
        Self { state, store }
    }

    /// Run one reconciliation round against the given peer summaries.
    ///
    /// The write lock is held for the whole truncate/rebuild/replay
    /// sequence, so a transaction submitted concurrently never
    /// observes a half-rebuilt state.
    pub async fn reconcile<C: PeerQuery>(
        &self,
        client: &C,
        local: &ChainSummary,
        peers: &[ChainSummary],
    ) -> Result<RoundOutcome, ConsensusError> {
        let consensus = compute_consensus(peers).ok_or(ConsensusError::NoUsableSummaries)?;

        let divergence = if local.chain_hashes.len() <= consensus.chain_hashes.len() {
            chain_diff_idx(&local.chain_hashes, &consensus.chain_hashes)
        } else {
            chain_diff_idx(&consensus.chain_hashes, &local.chain_hashes)
        };

        let Some(divergence) = divergence else {
            return Ok(RoundOutcome::InSync);
        };

        if consensus.chain_hashes.len() <= divergence {
            return Err(ConsensusError::NoImprovement);
        }

        // fetch before taking the write lock; every block is
        // re-validated on commit anyway
        let blocks = client
            .get_peer_blocks(&consensus.address, divergence)
            .await?;

        log::info!(
            "chain diverges from consensus at {}, adopting {} block(s) from {}",
            divergence,
            blocks.len(),
            consensus.address
        );

        let mut state = self.state.write().await;
        self.store.truncate(divergence)?;
        let mut rebuilt = LedgerState::rebuild_from(&self.store.load()?)?;

        let mut applied = 0;
        let mut skipped = 0;
        for block in &blocks {
            match rebuilt.commit_block(block) {
                Ok(()) => {
                    self.store.append(block)?;
                    applied += 1;
                }
                Err(e) => {
                    // partial resync is tolerated; the next round
                    // picks up from wherever this one got to
                    log::warn!("skipping peer block {}: {}", block.header.serial_no, e);
                    skipped += 1;
                }
            }
        }
        *state = rebuilt;

        Ok(RoundOutcome::Resynced {
            divergence,
            applied,
            skipped,
        })
    }

    /// Adopt pending transactions from peers that share our lineage.
    /// Individual rejections (stale, already applied) are logged and
    /// skipped; returns how many transactions were adopted.
    pub async fn merge_peer_mempools<C: PeerQuery>(
        &self,
        client: &C,
        local: &ChainSummary,
        peers: &[ChainSummary],
    ) -> usize {
        let mut adopted = 0;

        for peer in peers {
            if !chains_agree(&peer.chain_hashes, &local.chain_hashes) {
                continue;
            }
            let snapshot = match client.get_peer_state(&peer.address).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    log::debug!("peer {} unavailable for mempool merge: {}", peer.address, e);
                    continue;
                }
            };

            let mut state = self.state.write().await;
            for tx in snapshot.mempool {
                match state.add_transaction(tx) {
                    Ok(()) => adopted += 1,
                    Err(e) => log::debug!("rejected transaction from {}: {}", peer.address, e),
                }
            }
        }

        adopted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::block::{Block, BlockHeader};
    use crate::core::chain::Chain;
    use crate::core::transaction::{Transaction, TxKind};
    use crate::network::message::NodeState;
    use std::sync::Mutex;
    use std::time::Duration;

    fn hash(byte: u8) -> BlockHash {
        BlockHash::from([byte; 32])
    }

    fn summary(address: &str, hashes: &[u8], last_serial: u64) -> ChainSummary {
        ChainSummary {
            address: address.to_string(),
            chain_hashes: hashes.iter().map(|&b| hash(b)).collect(),
            last_serial,
        }
    }

    #[test]
    fn test_chains_agree_at_shorter_tip() {
        let short = vec![hash(1), hash(2)];
        let long = vec![hash(1), hash(2), hash(3)];
        assert!(chains_agree(&short, &long));
        assert!(chains_agree(&long, &short));

        let forked = vec![hash(1), hash(9), hash(3)];
        assert!(!chains_agree(&short, &forked));
    }

    #[test]
    fn test_chains_agree_empty() {
        let empty: Vec<BlockHash> = vec![];
        assert!(chains_agree(&empty, &empty));
        assert!(!chains_agree(&empty, &[hash(1)]));
    }

    #[test]
    fn test_diff_idx_identical() {
        let hashes = vec![hash(1), hash(2), hash(3)];
        assert_eq!(chain_diff_idx(&hashes, &hashes), None);
    }

    #[test]
    fn test_diff_idx_fork() {
        let a = vec![hash(1), hash(2), hash(3)];
        let b = vec![hash(1), hash(2), hash(9)];
        assert_eq!(chain_diff_idx(&a, &b), Some(2));
    }

    #[test]
    fn test_diff_idx_strict_prefix() {
        let short = vec![hash(1), hash(2), hash(3)];
        let long = vec![hash(1), hash(2), hash(3), hash(4), hash(5)];
        assert_eq!(chain_diff_idx(&short, &long), Some(3));
    }

    #[test]
    fn test_consensus_majority_wins() {
        // three peers on H1's lineage, one forked peer at the same height
        let peers = vec![
            summary("p1", &[1, 2, 3], 3),
            summary("p2", &[1, 2, 3], 3),
            summary("p3", &[1, 2, 3], 3),
            summary("p4", &[1, 2, 9], 3),
        ];
        let winner = compute_consensus(&peers).unwrap();
        assert_eq!(winner.tip_hash(), Some(hash(3)));
        assert_eq!(winner.address, "p1");
    }

    #[test]
    fn test_consensus_agreeing_groups_back_the_longer_chain() {
        // two peers lag one block behind a third; their votes carry over
        let peers = vec![
            summary("p1", &[1, 2], 2),
            summary("p2", &[1, 2], 2),
            summary("p3", &[1, 2, 3], 3),
        ];
        let winner = compute_consensus(&peers).unwrap();
        assert_eq!(winner.address, "p3");
        assert_eq!(winner.chain_hashes.len(), 3);
    }

    #[test]
    fn test_consensus_equal_serial_tie_lands_on_second_group() {
        let peers = vec![
            summary("p1", &[1, 2], 2),
            summary("p2", &[1], 2),
        ];
        let winner = compute_consensus(&peers).unwrap();
        assert_eq!(winner.address, "p2");
    }

    #[test]
    fn test_consensus_dedupes_addresses_and_skips_blank_ones() {
        let peers = vec![
            summary("p1", &[1, 2, 9], 3),
            summary("p1", &[1, 2, 9], 3),
            summary("p1", &[1, 2, 9], 3),
            summary("", &[1, 2, 9], 3),
            summary("p2", &[1, 2, 3], 3),
            summary("p3", &[1, 2, 3], 3),
        ];
        let winner = compute_consensus(&peers).unwrap();
        assert_eq!(winner.tip_hash(), Some(hash(3)));
    }

    #[test]
    fn test_consensus_empty_input() {
        assert!(compute_consensus(&[]).is_none());
        // a summary with no blocks cannot vote for a tip
        assert!(compute_consensus(&[summary("p1", &[], 0)]).is_none());
    }

    // ------------------------------------------------------------------
    // Engine rounds against a scripted peer
    // ------------------------------------------------------------------

    struct ScriptedPeer {
        blocks: Vec<Block>,
        mempool: Vec<Transaction>,
        summary: ChainSummary,
        block_requests: Mutex<Vec<usize>>,
    }

    impl PeerQuery for ScriptedPeer {
        async fn get_peer_state(&self, _address: &str) -> Result<NodeState, PeerError> {
            Ok(NodeState {
                peers: vec![],
                summary: self.summary.clone(),
                balances: HashMap::new(),
                mempool: self.mempool.clone(),
            })
        }

        async fn get_peer_blocks(
            &self,
            _address: &str,
            from_index: usize,
        ) -> Result<Vec<Block>, PeerError> {
            self.block_requests.lock().unwrap().push(from_index);
            Ok(self.blocks.get(from_index..).unwrap_or_default().to_vec())
        }

        async fn ping(&self, _address: &str) -> Result<Duration, PeerError> {
            Ok(Duration::ZERO)
        }
    }

    fn tx(serial: u64, timestamp: i64, kind: TxKind) -> Transaction {
        Transaction {
            from: if kind == TxKind::Genesis {
                "alice".into()
            } else {
                "system".into()
            },
            to: "alice".into(),
            amount: 100,
            timestamp,
            kind,
            serial_no: serial,
        }
    }

    /// A valid chain of `length` blocks: genesis mint, then rewards
    fn build_chain(length: usize) -> Chain {
        let mut state = LedgerState::new();
        let mut chain = Chain::new();
        for i in 0..length {
            let serial = i as u64 + 1;
            let kind = if i == 0 { TxKind::Genesis } else { TxKind::Reward };
            let block = Block::new(
                BlockHeader {
                    parent_hash: state.last_block_hash(),
                    created_at: serial as i64 * 1_000,
                    serial_no: serial,
                },
                vec![tx(serial, serial as i64 * 100, kind)],
            );
            state.commit_block(&block).unwrap();
            chain.push(block);
        }
        chain
    }

    fn engine_over(
        chain: &Chain,
        dir: &std::path::Path,
    ) -> (ConsensusEngine, Arc<RwLock<LedgerState>>, Arc<BlockStore>) {
        let store = Arc::new(BlockStore::open(dir).unwrap());
        store.save(chain).unwrap();
        let state = Arc::new(RwLock::new(LedgerState::rebuild_from(chain).unwrap()));
        let engine = ConsensusEngine::new(state.clone(), store.clone());
        (engine, state, store)
    }

    fn summary_of(address: &str, chain: &Chain) -> ChainSummary {
        ChainSummary {
            address: address.to_string(),
            chain_hashes: chain.hashes(),
            last_serial: chain.len() as u64,
        }
    }

    #[tokio::test]
    async fn test_resync_fetches_exactly_the_missing_suffix() {
        let full = build_chain(5);
        let mut local_chain = full.clone();
        local_chain.truncate(3);

        let temp_dir = tempfile::tempdir().unwrap();
        let (engine, state, store) = engine_over(&local_chain, temp_dir.path());

        let peer = ScriptedPeer {
            blocks: full.blocks().to_vec(),
            mempool: vec![],
            summary: summary_of("peer:1", &full),
            block_requests: Mutex::new(vec![]),
        };

        let local = summary_of("local:1", &local_chain);
        let outcome = engine
            .reconcile(&peer, &local, &[peer.summary.clone()])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RoundOutcome::Resynced {
                divergence: 3,
                applied: 2,
                skipped: 0,
            }
        );
        assert_eq!(*peer.block_requests.lock().unwrap(), vec![3]);
        assert_eq!(store.load().unwrap().hashes(), full.hashes());
        assert_eq!(state.read().await.last_block_serial(), 5);
    }

    #[tokio::test]
    async fn test_matching_chains_take_no_action() {
        let chain = build_chain(3);
        let temp_dir = tempfile::tempdir().unwrap();
        let (engine, _state, store) = engine_over(&chain, temp_dir.path());

        let peer = ScriptedPeer {
            blocks: chain.blocks().to_vec(),
            mempool: vec![],
            summary: summary_of("peer:1", &chain),
            block_requests: Mutex::new(vec![]),
        };

        let local = summary_of("local:1", &chain);
        let outcome = engine
            .reconcile(&peer, &local, &[peer.summary.clone()])
            .await
            .unwrap();

        assert_eq!(outcome, RoundOutcome::InSync);
        assert!(peer.block_requests.lock().unwrap().is_empty());
        assert_eq!(store.load().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fork_is_rolled_back_onto_the_consensus_lineage() {
        let consensus_chain = build_chain(5);

        // local node followed a different lineage after block 2
        let mut local_chain = consensus_chain.clone();
        local_chain.truncate(2);
        let mut local_state = LedgerState::rebuild_from(&local_chain).unwrap();
        let stray = local_state.create_block(vec![tx(10, i64::MAX - 10, TxKind::Reward)]);
        local_state.commit_block(&stray).unwrap();
        local_chain.push(stray);

        let temp_dir = tempfile::tempdir().unwrap();
        let (engine, state, store) = engine_over(&local_chain, temp_dir.path());

        let peer = ScriptedPeer {
            blocks: consensus_chain.blocks().to_vec(),
            mempool: vec![],
            summary: summary_of("peer:1", &consensus_chain),
            block_requests: Mutex::new(vec![]),
        };

        let local = summary_of("local:1", &local_chain);
        let outcome = engine
            .reconcile(&peer, &local, &[peer.summary.clone()])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RoundOutcome::Resynced {
                divergence: 2,
                applied: 3,
                skipped: 0,
            }
        );
        assert_eq!(store.load().unwrap().hashes(), consensus_chain.hashes());
        assert_eq!(state.read().await.last_block_serial(), 5);
    }

    #[tokio::test]
    async fn test_no_usable_summaries_is_a_no_op() {
        let chain = build_chain(2);
        let temp_dir = tempfile::tempdir().unwrap();
        let (engine, _state, store) = engine_over(&chain, temp_dir.path());

        let peer = ScriptedPeer {
            blocks: vec![],
            mempool: vec![],
            summary: summary_of("", &chain),
            block_requests: Mutex::new(vec![]),
        };

        let local = summary_of("local:1", &chain);
        let result = engine.reconcile(&peer, &local, &[]).await;
        assert!(matches!(result, Err(ConsensusError::NoUsableSummaries)));
        assert_eq!(store.load().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mempool_merge_tolerates_rejects() {
        let chain = build_chain(2);
        let temp_dir = tempfile::tempdir().unwrap();
        let (engine, state, _store) = engine_over(&chain, temp_dir.path());

        let good = Transaction {
            from: "alice".into(),
            to: "bob".into(),
            amount: 50,
            timestamp: i64::MAX - 5,
            kind: TxKind::Transfer,
            serial_no: 40,
        };
        let stale = Transaction {
            from: "alice".into(),
            to: "bob".into(),
            amount: 50,
            timestamp: 0,
            kind: TxKind::Transfer,
            serial_no: 41,
        };

        let peer = ScriptedPeer {
            blocks: chain.blocks().to_vec(),
            mempool: vec![good, stale],
            summary: summary_of("peer:1", &chain),
            block_requests: Mutex::new(vec![]),
        };

        let local = summary_of("local:1", &chain);
        let adopted = engine
            .merge_peer_mempools(&peer, &local, &[peer.summary.clone()])
            .await;

        assert_eq!(adopted, 1);
        let state = state.read().await;
        assert_eq!(state.balance(&"bob".into()), Some(50));
        assert_eq!(state.mempool().len(), 1);
    }

    #[tokio::test]
    async fn test_mempool_merge_skips_forked_peers() {
        let chain = build_chain(2);
        let forked = build_chain(3);
        let temp_dir = tempfile::tempdir().unwrap();
        let (engine, state, _store) = engine_over(&chain, temp_dir.path());

        let mut fork_summary = summary_of("peer:1", &forked);
        fork_summary.chain_hashes[1] = hash(0xEE);

        let peer = ScriptedPeer {
            blocks: vec![],
            mempool: vec![Transaction {
                from: "alice".into(),
                to: "bob".into(),
                amount: 50,
                timestamp: i64::MAX - 5,
                kind: TxKind::Transfer,
                serial_no: 40,
            }],
            summary: fork_summary.clone(),
            block_requests: Mutex::new(vec![]),
        };

        let local = summary_of("local:1", &chain);
        let adopted = engine
            .merge_peer_mempools(&peer, &local, &[fork_summary])
            .await;

        assert_eq!(adopted, 0);
        assert!(state.read().await.mempool().is_empty());
    }
}
