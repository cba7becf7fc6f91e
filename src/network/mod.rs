//! Peer networking
//!
//! Wire messages, the query client and server, known-peer
//! bookkeeping, and the node that ties them together.

pub mod client;
pub mod message;
pub mod node;
pub mod peers;
pub mod server;

pub use client::{PeerError, PeerQuery, TcpPeerClient};
pub use message::{Message, NodeState};
pub use node::{Node, NodeConfig, NodeError};
pub use peers::PeerSet;
pub use server::{Server, ServerContext};
