//! Majority-agreement chain reconciliation

pub mod engine;

pub use engine::{
    chain_diff_idx, chains_agree, compute_consensus, ChainSummary, ConsensusEngine,
    ConsensusError, RoundOutcome,
};
