//! Mini-Ledger: a minimal distributed account ledger
//!
//! A node maintains an append-only chain of blocks, account balances
//! derived from it, and a pool of pending transactions, and
//! periodically reconciles its chain against peers using a
//! majority-agreement rule:
//! - account-model transactions (transfer, genesis, reward)
//! - single-path block validation and commit
//! - atomic JSON chain persistence
//! - majority chain selection with rollback and replay
//! - TCP peer queries (state snapshot, block range, liveness ping)
//!
//! # Example
//!
//! ```rust
//! use mini_ledger::core::LedgerState;
//!
//! let mut state = LedgerState::new();
//!
//! let genesis = state.create_genesis("alice".into(), 1_000);
//! state.add_transaction(genesis).unwrap();
//!
//! let tx = state.create_transfer("alice".into(), "bob".into(), 250);
//! state.add_transaction(tx).unwrap();
//!
//! assert_eq!(state.balance(&"bob".into()), Some(250));
//! assert_eq!(state.total_supply(), 1_000);
//! ```

pub mod cli;
pub mod consensus;
pub mod core;
pub mod crypto;
pub mod network;
pub mod storage;

// Re-export commonly used types
pub use consensus::{
    chain_diff_idx, chains_agree, compute_consensus, ChainSummary, ConsensusEngine,
    ConsensusError, RoundOutcome,
};
pub use self::core::{
    AccountAddress, Block, BlockHash, BlockHeader, Chain, ChainError, LedgerError, LedgerState,
    Transaction, TxKind,
};
pub use network::{
    Message, Node, NodeConfig, NodeError, NodeState, PeerError, PeerQuery, PeerSet, TcpPeerClient,
};
pub use storage::{BlockStore, StorageError};
