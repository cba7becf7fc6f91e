//! Core ledger types and state machine

pub mod block;
pub mod chain;
pub mod state;
pub mod transaction;

pub use block::{Block, BlockHash, BlockHeader};
pub use chain::{Chain, ChainError};
pub use state::{LedgerError, LedgerState};
pub use transaction::{AccountAddress, Transaction, TxKind, REWARD_SENDER};
