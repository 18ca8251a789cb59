// Storage layer: persisted chain and pending transactions

mod blockchain_db;
mod memory;
mod utxo_set;

pub use blockchain_db::BlockchainDB;
pub use memory::MemoryStore;
pub use utxo_set::{Utxo, UtxoSet};

use crate::core::{Block, DecodeError, Hash256, Transaction};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("failed to decode stored record: {0}")]
    Decode(#[from] DecodeError),

    #[error("corrupt store: {0}")]
    Corrupt(String),
}

/// Durable home of the chain and the mempool.
///
/// Only source-of-truth data goes through here. The UTXO set and indexes
/// are rebuilt from `load_blocks` when a ledger opens.
pub trait BlockStore: Send + Sync {
    /// Every stored block, genesis first
    fn load_blocks(&self) -> Result<Vec<Block>, StorageError>;

    /// Append the block at `height`, which must be one past the stored tip.
    /// Either the whole block is stored or nothing is.
    fn append_block(&self, height: u32, block: &Block) -> Result<(), StorageError>;

    fn put_pending(&self, tx: &Transaction) -> Result<(), StorageError>;

    fn remove_pending(&self, txid: &Hash256) -> Result<(), StorageError>;

    fn load_pending(&self) -> Result<Vec<Transaction>, StorageError>;
}
