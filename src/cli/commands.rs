//! CLI command handlers
//!
//! One-shot commands operate through `AppState`, which rebuilds the
//! ledger state from the persisted chain and keeps the mempool in a
//! pending-transactions document between invocations.

use crate::core::block::Block;
use crate::core::chain::Chain;
use crate::core::state::LedgerState;
use crate::core::transaction::{AccountAddress, Transaction};
use crate::storage::block_store::BlockStore;
use chrono::DateTime;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Name of the pending-transactions document inside the data directory
pub const MEMPOOL_FILE: &str = "mempool.json";

/// Application state for one-shot commands
pub struct AppState {
    pub state: LedgerState,
    pub store: BlockStore,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Load the chain, rebuild the ledger state by replay and re-admit
    /// any pending transactions saved by earlier invocations
    pub fn open(data_dir: PathBuf) -> CliResult<Self> {
        let store = BlockStore::open(&data_dir)?;
        let chain = store.load()?;
        let state = LedgerState::rebuild_from(&chain)?;

        let mut app = Self {
            state,
            store,
            data_dir,
        };
        app.load_mempool()?;
        Ok(app)
    }

    fn mempool_path(&self) -> PathBuf {
        self.data_dir.join(MEMPOOL_FILE)
    }

    fn load_mempool(&mut self) -> CliResult<()> {
        let path = self.mempool_path();
        if !path.exists() {
            return Ok(());
        }

        let file = fs::File::open(&path)?;
        let pending: Vec<Transaction> = serde_json::from_reader(BufReader::new(file))?;
        for tx in pending {
            if let Err(e) = self.state.add_transaction(tx) {
                log::warn!("dropping stale pending transaction: {}", e);
            }
        }
        Ok(())
    }

    /// Persist the current mempool for the next invocation
    pub fn save_mempool(&self) -> CliResult<()> {
        let file = fs::File::create(self.mempool_path())?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.state.mempool())?;
        Ok(())
    }

    fn clear_mempool_file(&self) -> CliResult<()> {
        let path = self.mempool_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Package the current mempool into a block and commit it.
    ///
    /// The committed state is rebuilt from the persisted chain first,
    /// so the block's transactions pass through the commit path
    /// exactly once rather than being applied again on top of their
    /// own mempool effects.
    pub fn seal_block(&mut self) -> CliResult<Block> {
        let txs = self.state.mempool().to_vec();
        let block = self.state.create_block(txs);

        let chain = self.store.load()?;
        let mut committed = LedgerState::rebuild_from(&chain)?;
        committed.commit_block(&block)?;

        self.store.append(&block)?;
        self.state = committed;
        self.clear_mempool_file()?;
        Ok(block)
    }
}

/// Initialise a ledger, optionally minting genesis balances
pub fn cmd_init(data_dir: PathBuf, fund: Vec<(String, u64)>) -> CliResult<()> {
    let store = BlockStore::open(&data_dir)?;
    if store.exists() {
        println!("ledger already initialised at {:?}", data_dir);
        return Ok(());
    }
    store.save(&Chain::new())?;

    if fund.is_empty() {
        println!("initialised empty ledger at {:?}", data_dir);
        return Ok(());
    }

    let mut app = AppState::open(data_dir)?;
    for (account, amount) in fund {
        let tx = app.state.create_genesis(account.into(), amount);
        app.state.add_transaction(tx)?;
    }
    let block = app.seal_block()?;

    println!("initialised ledger at {:?}", app.data_dir);
    println!(
        "   genesis block {} minted {} account(s)",
        block.hash().short(),
        block.tx_count()
    );
    Ok(())
}

/// Queue a transfer into the local mempool
pub fn cmd_submit(app: &mut AppState, from: String, to: String, amount: u64) -> CliResult<()> {
    let tx = app.state.create_transfer(from.into(), to.into(), amount);
    let serial_no = tx.serial_no;
    app.state.add_transaction(tx)?;
    app.save_mempool()?;

    println!(
        "queued transaction {} ({} pending)",
        serial_no,
        app.state.mempool().len()
    );
    Ok(())
}

/// Queue a reward (minting) transaction
pub fn cmd_reward(app: &mut AppState, to: String, amount: u64) -> CliResult<()> {
    let tx = app.state.create_reward(to.into(), amount);
    let serial_no = tx.serial_no;
    app.state.add_transaction(tx)?;
    app.save_mempool()?;

    println!(
        "queued reward {} ({} pending)",
        serial_no,
        app.state.mempool().len()
    );
    Ok(())
}

/// Package the mempool into a block and commit it
pub fn cmd_seal(app: &mut AppState) -> CliResult<()> {
    if app.state.mempool().is_empty() {
        println!("nothing to seal, mempool is empty");
        return Ok(());
    }

    let block = app.seal_block()?;
    println!(
        "sealed block {} ({}, {} transaction(s))",
        block.header.serial_no,
        block.hash().short(),
        block.tx_count()
    );
    Ok(())
}

/// Show account balances
pub fn cmd_balances(app: &AppState) -> CliResult<()> {
    let mut balances: Vec<(&AccountAddress, &u64)> = app.state.balances().iter().collect();
    balances.sort_by(|a, b| a.0.cmp(b.0));

    if balances.is_empty() {
        println!("no accounts yet");
        return Ok(());
    }

    println!("balances (including pending transactions):");
    for (account, balance) in balances {
        println!("   {:<24} {}", account, balance);
    }
    println!("   total supply: {}", app.state.total_supply());
    Ok(())
}

/// Show the committed chain
pub fn cmd_chain(app: &AppState) -> CliResult<()> {
    let chain = app.store.load()?;
    if chain.is_empty() {
        println!("chain is empty");
        return Ok(());
    }

    println!("chain: {} block(s)", chain.len());
    for block in chain.iter() {
        let created = DateTime::from_timestamp_nanos(block.header.created_at);
        println!(
            "   #{:<4} {}  {} tx  {}",
            block.header.serial_no,
            block.hash().short(),
            block.tx_count(),
            created.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(())
}

/// Show pending transactions
pub fn cmd_mempool(app: &AppState) -> CliResult<()> {
    if app.state.mempool().is_empty() {
        println!("mempool is empty");
        return Ok(());
    }

    println!("{} pending transaction(s):", app.state.mempool().len());
    for tx in app.state.mempool() {
        println!(
            "   #{:<4} {:<12} {} -> {}  {}",
            tx.serial_no, tx.kind, tx.from, tx.to, tx.amount
        );
    }
    Ok(())
}

/// Check the structural integrity of the stored chain
pub fn cmd_verify(data_dir: &Path) -> CliResult<()> {
    let store = BlockStore::open(data_dir)?;
    let chain = store.load()?;

    chain.verify()?;
    let state = LedgerState::rebuild_from(&chain)?;

    println!(
        "chain of {} block(s) verified, {} account(s), total supply {}",
        chain.len(),
        state.balances().len(),
        state.total_supply()
    );
    Ok(())
}
