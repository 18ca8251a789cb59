// Messages exchanged between simulated nodes

use super::NetworkError;
use crate::core::{Block, Hash256, Serializable, Transaction};

/// Command name field, zero padded
const COMMAND_SIZE: usize = 12;
/// Command plus little-endian u32 payload length
const FRAME_HEADER_SIZE: usize = COMMAND_SIZE + 4;

/// Network message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Transaction(Transaction),
    Block(Block),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Transaction(_) => "tx",
            Message::Block(_) => "block",
        }
    }

    /// Txid or block hash of the payload
    pub fn inventory_hash(&self) -> Hash256 {
        match self {
            Message::Transaction(tx) => tx.txid(),
            Message::Block(block) => block.hash(),
        }
    }

    /// Frame: 12-byte command, payload length, canonical payload
    pub fn encode(&self) -> Vec<u8> {
        let payload = match self {
            Message::Transaction(tx) => tx.serialize(),
            Message::Block(block) => block.serialize(),
        };

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        let mut command = [0u8; COMMAND_SIZE];
        let name = self.command().as_bytes();
        command[..name.len()].copy_from_slice(name);
        frame.extend_from_slice(&command);
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self, NetworkError> {
        if frame.len() < FRAME_HEADER_SIZE {
            return Err(NetworkError::Truncated {
                needed: FRAME_HEADER_SIZE,
                available: frame.len(),
            });
        }

        let (command, rest) = frame.split_at(COMMAND_SIZE);
        let (length, payload) = rest.split_at(4);
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(length);
        let length = u32::from_le_bytes(length_bytes) as usize;

        if payload.len() != length {
            return Err(NetworkError::Truncated {
                needed: FRAME_HEADER_SIZE + length,
                available: frame.len(),
            });
        }

        let name = String::from_utf8_lossy(command);
        match name.trim_end_matches('\0') {
            "tx" => Ok(Message::Transaction(Transaction::deserialize(payload)?)),
            "block" => Ok(Message::Block(Block::deserialize(payload)?)),
            other => Err(NetworkError::UnknownCommand(other.to_string())),
        }
    }
}
