//! Mini-Ledger CLI
//!
//! Command-line interface for operating a ledger node and inspecting
//! its local state.

use clap::{Parser, Subcommand};
use mini_ledger::cli::commands::{
    self, AppState, CliResult,
};
use mini_ledger::network::{Node, NodeConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ledger")]
#[command(version = "0.1.0")]
#[command(about = "A minimal distributed account ledger", long_about = None)]
struct Cli {
    /// Data directory for the chain and peer documents
    #[arg(short, long, default_value = ".ledger_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialise a ledger, optionally funding genesis accounts
    Init {
        /// Genesis funding as ACCOUNT=AMOUNT (repeatable)
        #[arg(long, value_parser = parse_funding)]
        fund: Vec<(String, u64)>,
    },

    /// Queue a transfer into the local mempool
    Submit {
        /// Sending account
        #[arg(short, long)]
        from: String,

        /// Receiving account
        #[arg(short, long)]
        to: String,

        /// Amount to transfer
        #[arg(short, long)]
        amount: u64,
    },

    /// Queue a reward (minting) transaction
    Reward {
        /// Receiving account
        #[arg(short, long)]
        to: String,

        /// Amount to mint
        #[arg(short, long)]
        amount: u64,
    },

    /// Package the mempool into a block and commit it
    Seal,

    /// Show account balances
    Balances,

    /// Show the committed chain
    Chain,

    /// Show pending transactions
    Mempool,

    /// Check the structural integrity of the stored chain
    Verify,

    /// Run the networked node
    Node {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Bootstrap peer address (repeatable)
        #[arg(long = "peer")]
        peers: Vec<String>,

        /// Seconds between reconciliation rounds
        #[arg(long, default_value = "30")]
        interval: u64,

        /// Address peers can reach this node at
        #[arg(long)]
        public_address: Option<String>,
    },
}

fn parse_funding(value: &str) -> Result<(String, u64), String> {
    let (account, amount) = value
        .split_once('=')
        .ok_or_else(|| format!("expected ACCOUNT=AMOUNT, got '{value}'"))?;
    if account.is_empty() {
        return Err(format!("empty account in '{value}'"));
    }
    let amount = amount
        .parse()
        .map_err(|e| format!("bad amount in '{value}': {e}"))?;
    Ok((account.to_string(), amount))
}

async fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Commands::Init { fund } => commands::cmd_init(cli.data_dir, fund)?,

        Commands::Submit { from, to, amount } => {
            let mut app = AppState::open(cli.data_dir)?;
            commands::cmd_submit(&mut app, from, to, amount)?;
        }

        Commands::Reward { to, amount } => {
            let mut app = AppState::open(cli.data_dir)?;
            commands::cmd_reward(&mut app, to, amount)?;
        }

        Commands::Seal => {
            let mut app = AppState::open(cli.data_dir)?;
            commands::cmd_seal(&mut app)?;
        }

        Commands::Balances => {
            let app = AppState::open(cli.data_dir)?;
            commands::cmd_balances(&app)?;
        }

        Commands::Chain => {
            let app = AppState::open(cli.data_dir)?;
            commands::cmd_chain(&app)?;
        }

        Commands::Mempool => {
            let app = AppState::open(cli.data_dir)?;
            commands::cmd_mempool(&app)?;
        }

        Commands::Verify => commands::cmd_verify(&cli.data_dir)?,

        Commands::Node {
            port,
            peers,
            interval,
            public_address,
        } => {
            let config = NodeConfig {
                port,
                bootstrap_peers: peers,
                data_dir: cli.data_dir,
                reconcile_interval: Duration::from_secs(interval),
                public_address,
            };
            let node = Node::new(config)?;

            tokio::select! {
                result = node.run() => result?,
                _ = tokio::signal::ctrl_c() => {
                    log::info!("shutting down");
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
