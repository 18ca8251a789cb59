// coinsim: an educational UTXO ledger with proof-of-work mining
// and a price-time priority exchange

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod engine;
pub mod exchange;
pub mod ledger;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use cli::{Cli, CliHandler};
pub use config::{ChainParams, NodeConfig};
pub use consensus::{BlockValidator, Miner, Target, ValidationError};
pub use core::{Address, Block, BlockHeader, KeyPair, OutPoint, Script, Transaction, TxInput, TxOutput};
pub use engine::{Engine, EngineError};
pub use exchange::{Exchange, OrderRequest, Side, TradingPair};
pub use ledger::{BlockId, Ledger, LedgerError, MineOutcome};
pub use network::{Message, Network, Node};
pub use storage::{BlockStore, BlockchainDB, MemoryStore, UtxoSet, Utxo};
