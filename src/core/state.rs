//! Ledger state machine
//!
//! `LedgerState` owns the account balances, the mempool and the
//! chain-tip metadata of one node. `commit_block` is the only
//! operation that advances the tip, and `apply_transaction` the only
//! place balances change; reorgs rebuild the whole state by replaying
//! a chain prefix through the same commit path.

use crate::core::block::{Block, BlockHash, BlockHeader};
use crate::core::chain::Chain;
use crate::core::transaction::{AccountAddress, Transaction, TxKind, REWARD_SENDER};
use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;

/// Transaction and block validation errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("block serial out of order: expected {expected}, got {got}")]
    SerialOutOfOrder { expected: u64, got: u64 },
    #[error("parent hash does not match the chain tip")]
    ParentHashMismatch,
    #[error("block must be newer than the chain tip")]
    StaleBlockTimestamp,
    #[error("transaction must be newer than the last accepted transaction")]
    StaleTxTimestamp,
    #[error("transfer to the sending account is not allowed")]
    SelfTransfer,
    #[error("unknown sender account {0}")]
    UnknownSender(AccountAddress),
    #[error("transaction amount must be positive")]
    ZeroAmount,
    #[error("insufficient balance: have {balance}, need {amount}")]
    InsufficientBalance { balance: u64, amount: u64 },
    #[error("genesis transactions are only valid before the first block")]
    LateGenesis,
    #[error("transaction {index}: {source}")]
    AtIndex {
        index: usize,
        #[source]
        source: Box<LedgerError>,
    },
}

impl LedgerError {
    fn at(index: usize, source: LedgerError) -> LedgerError {
        LedgerError::AtIndex {
            index,
            source: Box::new(source),
        }
    }
}

fn now_nanos() -> i64 {
    Utc::now()
        .timestamp_nanos_opt()
        .expect("system clock within nanosecond range")
}

/// Account balances, pending transactions and chain-tip metadata for
/// one node. A pure function of the committed chain prefix it was
/// built from, plus whatever has entered the mempool since.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerState {
    balances: HashMap<AccountAddress, u64>,
    mempool: Vec<Transaction>,
    last_block_serial: u64,
    last_block_timestamp: i64,
    last_block_hash: BlockHash,
    last_tx_timestamp: i64,
    last_tx_serial: u64,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a fresh state by replaying a chain prefix through the
    /// normal commit path
    pub fn rebuild_from(chain: &Chain) -> Result<Self, LedgerError> {
        let mut state = Self::new();
        for block in chain.iter() {
            state.commit_block(block)?;
        }
        Ok(state)
    }

    pub fn balances(&self) -> &HashMap<AccountAddress, u64> {
        &self.balances
    }

    pub fn balance(&self, account: &AccountAddress) -> Option<u64> {
        self.balances.get(account).copied()
    }

    pub fn mempool(&self) -> &[Transaction] {
        &self.mempool
    }

    pub fn last_block_serial(&self) -> u64 {
        self.last_block_serial
    }

    pub fn last_block_timestamp(&self) -> i64 {
        self.last_block_timestamp
    }

    pub fn last_block_hash(&self) -> BlockHash {
        self.last_block_hash
    }

    pub fn last_tx_timestamp(&self) -> i64 {
        self.last_tx_timestamp
    }

    fn next_block_serial(&self) -> u64 {
        self.last_block_serial + 1
    }

    // ------------------------------------------------------------------
    // Transaction construction
    // ------------------------------------------------------------------

    /// Build a transfer between two accounts
    pub fn create_transfer(
        &mut self,
        from: AccountAddress,
        to: AccountAddress,
        amount: u64,
    ) -> Transaction {
        self.build_tx(from, to, amount, TxKind::Transfer)
    }

    /// Build a genesis minting transaction for an account
    pub fn create_genesis(&mut self, account: AccountAddress, amount: u64) -> Transaction {
        self.build_tx(account.clone(), account, amount, TxKind::Genesis)
    }

    /// Build a reward minting transaction
    pub fn create_reward(&mut self, to: AccountAddress, amount: u64) -> Transaction {
        self.build_tx(REWARD_SENDER.into(), to, amount, TxKind::Reward)
    }

    fn build_tx(
        &mut self,
        from: AccountAddress,
        to: AccountAddress,
        amount: u64,
        kind: TxKind,
    ) -> Transaction {
        let tx = Transaction {
            from,
            to,
            amount,
            // the clock may not tick between two calls; keep timestamps
            // strictly increasing anyway
            timestamp: now_nanos().max(self.last_tx_timestamp + 1),
            kind,
            serial_no: self.last_tx_serial + 1,
        };
        self.last_tx_serial = tx.serial_no;
        tx
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Check a transaction against the current balances and tip
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), LedgerError> {
        match tx.kind {
            TxKind::Genesis if self.last_block_serial == 0 => return Ok(()),
            TxKind::Genesis => return Err(LedgerError::LateGenesis),
            TxKind::Reward => return Ok(()),
            TxKind::Transfer => {}
        }

        if tx.from == tx.to {
            return Err(LedgerError::SelfTransfer);
        }
        let balance = match self.balances.get(&tx.from) {
            Some(balance) => *balance,
            None => return Err(LedgerError::UnknownSender(tx.from.clone())),
        };
        if tx.amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        if tx.timestamp <= self.last_tx_timestamp {
            return Err(LedgerError::StaleTxTimestamp);
        }
        if balance < tx.amount {
            return Err(LedgerError::InsufficientBalance {
                balance,
                amount: tx.amount,
            });
        }
        Ok(())
    }

    /// Move the transaction's value and advance the tx watermarks.
    /// The only place balances change; callers validate first.
    fn apply_transaction(&mut self, tx: &Transaction) {
        if !tx.kind.mints() {
            if let Some(balance) = self.balances.get_mut(&tx.from) {
                *balance -= tx.amount;
            }
        }
        *self.balances.entry(tx.to.clone()).or_insert(0) += tx.amount;
        self.last_tx_timestamp = self.last_tx_timestamp.max(tx.timestamp);
        self.last_tx_serial = self.last_tx_serial.max(tx.serial_no);
    }

    /// Validate, apply and enqueue a pending transaction. Fails
    /// without mutation when validation fails.
    pub fn add_transaction(&mut self, tx: Transaction) -> Result<(), LedgerError> {
        self.validate_transaction(&tx)?;
        self.apply_transaction(&tx);
        self.mempool.push(tx);
        Ok(())
    }

    /// Fail-fast validation of a sequence. Application is simulated on
    /// a scratch copy so later entries see the effects of earlier
    /// ones; the real state is untouched.
    pub fn validate_transaction_list(&self, txs: &[Transaction]) -> Result<(), LedgerError> {
        let mut scratch = self.clone();
        for (index, tx) in txs.iter().enumerate() {
            scratch
                .validate_transaction(tx)
                .map_err(|source| LedgerError::at(index, source))?;
            scratch.apply_transaction(tx);
        }
        Ok(())
    }

    /// Fail-fast add of a sequence. Entries before a failing index
    /// stay applied; callers needing all-or-nothing rebuild from the
    /// chain instead.
    pub fn add_transaction_list(&mut self, txs: Vec<Transaction>) -> Result<(), LedgerError> {
        for (index, tx) in txs.into_iter().enumerate() {
            self.add_transaction(tx)
                .map_err(|source| LedgerError::at(index, source))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Blocks
    // ------------------------------------------------------------------

    /// Package transactions into the next block at the current tip
    pub fn create_block(&self, transactions: Vec<Transaction>) -> Block {
        Block::new(
            BlockHeader {
                parent_hash: self.last_block_hash,
                created_at: now_nanos().max(self.last_block_timestamp + 1),
                serial_no: self.next_block_serial(),
            },
            transactions,
        )
    }

    /// Check a block against the tip without mutating anything. The
    /// first block is accepted with any parent hash, serial 1.
    pub fn validate_block(&self, block: &Block) -> Result<(), LedgerError> {
        if self.last_block_serial == 0 {
            if block.header.serial_no != 1 {
                return Err(LedgerError::SerialOutOfOrder {
                    expected: 1,
                    got: block.header.serial_no,
                });
            }
            return self.validate_transaction_list(&block.transactions);
        }

        if block.header.parent_hash != self.last_block_hash {
            return Err(LedgerError::ParentHashMismatch);
        }
        if block.header.serial_no != self.next_block_serial() {
            return Err(LedgerError::SerialOutOfOrder {
                expected: self.next_block_serial(),
                got: block.header.serial_no,
            });
        }
        if block.header.created_at <= self.last_block_timestamp {
            return Err(LedgerError::StaleBlockTimestamp);
        }
        self.validate_transaction_list(&block.transactions)
    }

    /// Validate a block, apply its transactions in order, advance the
    /// tip to it and clear the mempool. Every ingestion path funnels
    /// through here exactly once per block; validation completes
    /// before the first mutation.
    pub fn commit_block(&mut self, block: &Block) -> Result<(), LedgerError> {
        self.validate_block(block)?;

        for tx in &block.transactions {
            self.apply_transaction(tx);
        }

        self.last_block_hash = block.hash();
        self.last_block_serial = block.header.serial_no;
        self.last_block_timestamp = block.header.created_at;
        self.mempool.clear();
        Ok(())
    }

    /// Total value held across all accounts
    pub fn total_supply(&self) -> u64 {
        self.balances.values().sum()
    }
}
