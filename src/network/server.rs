//! Peer query server
//!
//! Accepts connections and answers state snapshot, block range and
//! liveness queries from the shared node state.

use crate::consensus::ChainSummary;
use crate::core::state::LedgerState;
use crate::network::message::{Message, MessageCodec, NodeState};
use crate::network::peers::PeerSet;
use crate::storage::block_store::BlockStore;
use futures::{SinkExt, StreamExt};
use std::io;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_util::codec::Framed;

/// Shared handles the server answers queries from
#[derive(Clone)]
pub struct ServerContext {
    /// Address this node reports in its own summary
    pub address: String,
    pub state: Arc<RwLock<LedgerState>>,
    pub store: Arc<BlockStore>,
    pub peers: Arc<RwLock<PeerSet>>,
}

/// TCP server for peer queries
pub struct Server {
    listener: TcpListener,
    port: u16,
}

impl Server {
    /// Bind to a port and create the server
    pub async fn bind(port: u16) -> Result<Self, io::Error> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr).await?;
        log::info!("listening on {}", addr);

        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept and serve connections until the task is dropped
    pub async fn run(self, ctx: ServerContext) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, ctx).await {
                            log::debug!("connection from {} ended: {}", addr, e);
                        }
                    });
                }
                Err(e) => log::warn!("accept failed: {}", e),
            }
        }
    }
}

/// Answer queries on one connection until the peer hangs up
async fn serve_connection(stream: TcpStream, ctx: ServerContext) -> Result<(), io::Error> {
    let mut framed = Framed::new(stream, MessageCodec);

    while let Some(msg) = framed.next().await {
        let reply = match msg? {
            Message::GetState => Message::State(snapshot(&ctx).await?),
            Message::GetBlocks { from_index } => {
                let chain = ctx.store.load().map_err(into_io)?;
                let blocks = chain
                    .blocks()
                    .get(from_index..)
                    .unwrap_or_default()
                    .to_vec();
                Message::Blocks(blocks)
            }
            Message::Ping(nonce) => Message::Pong(nonce),
            other => {
                log::debug!("ignoring {} message", other.type_name());
                continue;
            }
        };
        framed.send(reply).await?;
    }

    Ok(())
}

/// Assemble the node's public snapshot
async fn snapshot(ctx: &ServerContext) -> Result<NodeState, io::Error> {
    let chain = ctx.store.load().map_err(into_io)?;
    let state = ctx.state.read().await;
    let peers = ctx.peers.read().await;

    Ok(NodeState {
        peers: peers.addresses(),
        summary: ChainSummary {
            address: ctx.address.clone(),
            chain_hashes: chain.hashes(),
            last_serial: state.last_block_serial(),
        },
        balances: state.balances().clone(),
        mempool: state.mempool().to_vec(),
    })
}

fn into_io(e: crate::storage::block_store::StorageError) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}
