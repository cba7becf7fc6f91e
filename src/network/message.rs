//! Wire messages for peer queries
//!
//! Request/response pairs exchanged between nodes. Messages are JSON
//! bodies behind magic + length framing.

use crate::consensus::ChainSummary;
use crate::core::block::Block;
use crate::core::transaction::{AccountAddress, Transaction};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::codec::{Decoder, Encoder};

/// Magic bytes for message framing
pub const MAGIC: [u8; 4] = [0x4C, 0x44, 0x47, 0x52]; // "LDGR"

/// Snapshot of a node's public state, served to peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    /// Addresses this node knows about
    #[serde(rename = "PeerSet")]
    pub peers: Vec<String>,
    /// The node's own chain summary
    #[serde(rename = "Summary")]
    pub summary: ChainSummary,
    #[serde(rename = "Balances")]
    pub balances: HashMap<AccountAddress, u64>,
    #[serde(rename = "TxMempool")]
    pub mempool: Vec<Transaction>,
}

/// Peer query messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Request the node's state snapshot
    GetState,

    /// State snapshot response
    State(NodeState),

    /// Request blocks from a chain position onward
    GetBlocks { from_index: usize },

    /// Requested blocks, in chain order
    Blocks(Vec<Block>),

    /// Liveness probe
    Ping(u64),

    /// Liveness response
    Pong(u64),
}

impl Message {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::GetState => "GetState",
            Message::State(_) => "State",
            Message::GetBlocks { .. } => "GetBlocks",
            Message::Blocks(_) => "Blocks",
            Message::Ping(_) => "Ping",
            Message::Pong(_) => "Pong",
        }
    }
}

/// Message codec for length-prefixed framing
pub struct MessageCodec;

impl Encoder<Message> for MessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item
            .to_bytes()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        // Magic (4) + Length (4) + Data
        dst.reserve(8 + data.len());
        dst.put_slice(&MAGIC);
        dst.put_u32(data.len() as u32);
        dst.put_slice(&data);

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least header
        if src.len() < 8 {
            return Ok(None);
        }

        // Check magic
        if src[..4] != MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Invalid magic bytes",
            ));
        }

        // Get length
        let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

        // Check if we have full message
        if src.len() < 8 + len {
            return Ok(None);
        }

        // Skip header
        src.advance(8);

        // Extract message data
        let data = src.split_to(len);

        // Deserialize
        let msg = Message::from_bytes(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization() {
        let msg = Message::GetBlocks { from_index: 3 };
        let bytes = msg.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();

        if let Message::GetBlocks { from_index } = decoded {
            assert_eq!(from_index, 3);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_message_codec_round_trip() {
        let mut codec = MessageCodec;
        let msg = Message::Ping(12345);

        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        if let Message::Ping(nonce) = decoded {
            assert_eq!(nonce, 12345);
        } else {
            panic!("Wrong message type");
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_waits_for_full_frame() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::new();
        codec.encode(Message::Ping(1), &mut buf).unwrap();

        let partial_len = buf.len() - 2;
        let mut partial = BytesMut::from(&buf[..partial_len]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn test_codec_rejects_bad_magic() {
        let mut codec = MessageCodec;
        let mut buf = BytesMut::from(&b"XXXX\x00\x00\x00\x00"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }
}
