//! Peer query client
//!
//! One connection per query with a bounded timeout. An unreachable or
//! slow peer yields a `PeerError` and drops out of the current
//! reconciliation round; it is never fatal to the node.

use crate::core::block::Block;
use crate::network::message::{Message, MessageCodec, NodeState};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

/// Default per-query timeout
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Peer communication errors
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer timed out")]
    TimedOut,
    #[error("peer closed the connection")]
    Disconnected,
    #[error("unexpected reply: {0}")]
    UnexpectedReply(&'static str),
}

/// Queries the consensus engine issues against remote peers
pub trait PeerQuery {
    /// Fetch a peer's public state snapshot
    fn get_peer_state(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<NodeState, PeerError>> + Send;

    /// Fetch a peer's blocks from a chain position onward
    fn get_peer_blocks(
        &self,
        address: &str,
        from_index: usize,
    ) -> impl Future<Output = Result<Vec<Block>, PeerError>> + Send;

    /// Probe a peer for liveness, returning the round-trip time
    fn ping(&self, address: &str) -> impl Future<Output = Result<Duration, PeerError>> + Send;
}

/// TCP implementation of the peer queries
#[derive(Debug, Clone)]
pub struct TcpPeerClient {
    timeout: Duration,
}

impl TcpPeerClient {
    pub fn new() -> Self {
        Self {
            timeout: QUERY_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send one request and wait for its reply on a fresh connection
    async fn request(&self, address: &str, msg: Message) -> Result<Message, PeerError> {
        let attempt = async {
            let stream = TcpStream::connect(address)
                .await
                .map_err(|e| PeerError::ConnectionFailed(e.to_string()))?;
            let mut framed = Framed::new(stream, MessageCodec);

            framed.send(msg).await?;

            match framed.next().await {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(e)) => Err(PeerError::Io(e)),
                None => Err(PeerError::Disconnected),
            }
        };

        timeout(self.timeout, attempt)
            .await
            .map_err(|_| PeerError::TimedOut)?
    }
}

impl Default for TcpPeerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerQuery for TcpPeerClient {
    async fn get_peer_state(&self, address: &str) -> Result<NodeState, PeerError> {
        match self.request(address, Message::GetState).await? {
            Message::State(state) => Ok(state),
            other => Err(PeerError::UnexpectedReply(other.type_name())),
        }
    }

    async fn get_peer_blocks(
        &self,
        address: &str,
        from_index: usize,
    ) -> Result<Vec<Block>, PeerError> {
        match self.request(address, Message::GetBlocks { from_index }).await? {
            Message::Blocks(blocks) => Ok(blocks),
            other => Err(PeerError::UnexpectedReply(other.type_name())),
        }
    }

    async fn ping(&self, address: &str) -> Result<Duration, PeerError> {
        let nonce = Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
        let started = Instant::now();

        match self.request(address, Message::Ping(nonce)).await? {
            Message::Pong(reply) if reply == nonce => Ok(started.elapsed()),
            Message::Pong(_) => Err(PeerError::UnexpectedReply("Pong nonce mismatch")),
            other => Err(PeerError::UnexpectedReply(other.type_name())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_peer_times_out_or_fails() {
        let client = TcpPeerClient::with_timeout(Duration::from_millis(200));
        // reserved TEST-NET address, nothing listens there
        let result = client.ping("192.0.2.1:1").await;
        assert!(matches!(
            result,
            Err(PeerError::ConnectionFailed(_)) | Err(PeerError::TimedOut)
        ));
    }
}
