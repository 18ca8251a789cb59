// CLI commands

use crate::config::{ConfigError, NodeConfig};
use crate::core::{Address, Block, Hash256, KeyError, format_amount};
use crate::engine::{Engine, EngineError};
use crate::ledger::{BlockId, MineOutcome};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "coinsim")]
#[command(about = "Educational UTXO ledger simulator", long_about = None)]
pub struct Cli {
    /// JSON node configuration
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory (overrides the config file)
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Get blockchain info
    Info,

    /// Wallet commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Mine blocks paying the reward to an address
    Mine {
        /// Reward address (uses default if not specified)
        #[arg(short, long)]
        address: Option<String>,
        /// Number of blocks
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,
    },

    /// Block commands
    #[command(subcommand)]
    Block(BlockCommands),

    /// Transaction commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Replay the whole chain from genesis
    Validate,
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Create a new address
    NewAddress,

    /// List all addresses
    List,

    /// Get balance for an address
    Balance {
        /// Address to check (uses default if not specified)
        address: Option<String>,
    },

    /// Send coins to an address
    Send {
        /// Recipient address
        to: String,
        /// Amount in satoshis
        amount: u64,
        /// Transaction fee in satoshis
        #[arg(short, long, default_value = "1000")]
        fee: u64,
    },

    /// Transactions touching an address
    History {
        /// Address (uses default if not specified)
        address: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum BlockCommands {
    /// Get block by hash or height
    Get {
        /// Block hash or height
        id: String,
    },

    /// Get blockchain height
    Height,

    /// Get best block hash
    BestBlock,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Show a confirmed or pending transaction as JSON
    Get {
        txid: String,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("failed to render JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no default address; create one with 'wallet new-address'")]
    NoDefaultAddress,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// CLI handler
pub struct CliHandler {
    engine: Engine,
}

impl CliHandler {
    /// Resolve the configuration and open the node it describes
    pub fn new(config_path: Option<&PathBuf>, data_dir: Option<PathBuf>) -> Result<Self, CliError> {
        let mut config = match config_path {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };
        if let Some(dir) = data_dir {
            config.data_dir = dir;
        }

        Ok(Self {
            engine: Engine::open(&config)?,
        })
    }

    /// Handle CLI command
    pub fn handle(&self, command: Commands) -> Result<(), CliError> {
        match command {
            Commands::Info => self.info(),
            Commands::Wallet(cmd) => self.handle_wallet(cmd),
            Commands::Mine { address, count } => self.mine(address, count),
            Commands::Block(cmd) => self.handle_block(cmd),
            Commands::Tx(cmd) => self.handle_tx(cmd),
            Commands::Validate => {
                let height = self.engine.validate_chain()?;
                println!("Chain valid up to height {}", height);
                Ok(())
            }
        }
    }

    fn address_or_default(&self, address: Option<String>) -> Result<Address, CliError> {
        match address {
            Some(address) => Ok(address.parse()?),
            None => self.engine.default_address().ok_or(CliError::NoDefaultAddress),
        }
    }

    /// Get blockchain info
    fn info(&self) -> Result<(), CliError> {
        let ledger = self.engine.ledger();

        println!("Blockchain Info:");
        println!("  Height: {}", ledger.height());
        println!("  Best block: {}", ledger.tip_hash());
        println!("  UTXO count: {}", ledger.utxo_snapshot().count());
        println!("  Pending transactions: {}", ledger.mempool_len());

        Ok(())
    }

    /// Handle wallet commands
    fn handle_wallet(&self, cmd: WalletCommands) -> Result<(), CliError> {
        match cmd {
            WalletCommands::NewAddress => {
                let address = self.engine.create_wallet()?;
                println!("New address: {}", address);
            }
            WalletCommands::List => {
                let addresses = self.engine.addresses();
                println!("Addresses ({}):", addresses.len());
                for address in addresses {
                    println!("  {}", address);
                }
            }
            WalletCommands::Balance { address } => {
                let address = self.address_or_default(address)?;
                let balance = self.engine.get_balance(&address);

                println!("Balance for {}:", address);
                println!("  {} satoshis ({} coins)", balance, format_amount(balance));
                println!("  {} unspent outputs", self.engine.get_utxos(&address).len());
            }
            WalletCommands::Send { to, amount, fee } => {
                let from = self.address_or_default(None)?;
                let to: Address = to.parse()?;
                let txid = self.engine.send(&from, &to, amount, fee)?;

                println!("Transaction submitted:");
                println!("  TXID: {}", txid);
                println!("  Amount: {} coins, fee {}", format_amount(amount), format_amount(fee));
            }
            WalletCommands::History { address } => {
                let address = self.address_or_default(address)?;
                let history = self.engine.history(&address);

                println!("History for {} ({} transactions):", address, history.len());
                for entry in history {
                    match entry.block_height {
                        Some(height) => println!("  {} (height {})", entry.txid, height),
                        None => println!("  {} (pending)", entry.txid),
                    }
                }
            }
        }
        Ok(())
    }

    fn mine(&self, address: Option<String>, count: u32) -> Result<(), CliError> {
        let miner = self.address_or_default(address)?;
        let stop = AtomicBool::new(false);

        for _ in 0..count {
            match self.engine.mine_block(&miner, &stop)? {
                MineOutcome::Mined {
                    height,
                    block,
                    result,
                } => {
                    println!("✓ Mined block {} at height {}", block.hash(), height);
                    println!(
                        "  Nonce: {} ({} attempts in {:.2?})",
                        result.nonce, result.attempts, result.duration
                    );
                    println!("  Transactions: {}", block.transactions.len());
                }
                MineOutcome::Cancelled => {
                    println!("Mining cancelled");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Handle block commands
    fn handle_block(&self, cmd: BlockCommands) -> Result<(), CliError> {
        let ledger = self.engine.ledger();
        match cmd {
            BlockCommands::Get { id } => {
                let id: BlockId = id.parse().map_err(CliError::InvalidArgument)?;
                let block = self
                    .engine
                    .get_block(&id)
                    .ok_or_else(|| CliError::NotFound(format!("block {id}")))?;
                self.print_block(&block);
            }
            BlockCommands::Height => {
                println!("Blockchain height: {}", ledger.height());
            }
            BlockCommands::BestBlock => {
                println!("Best block: {}", ledger.tip_hash());
            }
        }
        Ok(())
    }

    fn handle_tx(&self, cmd: TxCommands) -> Result<(), CliError> {
        match cmd {
            TxCommands::Get { txid } => {
                let txid: Hash256 = txid
                    .parse()
                    .map_err(|_| CliError::InvalidArgument(format!("bad txid: {txid}")))?;
                let lookup = self
                    .engine
                    .get_transaction(&txid)
                    .ok_or_else(|| CliError::NotFound(format!("transaction {txid}")))?;
                println!("{}", serde_json::to_string_pretty(&lookup)?);
            }
        }
        Ok(())
    }

    /// Print block information
    fn print_block(&self, block: &Block) {
        println!("Block:");
        println!("  Hash: {}", block.hash());
        println!("  Previous: {}", block.header.prev_block_hash);
        println!("  Merkle root: {}", block.header.merkle_root);
        println!("  Timestamp: {}", block.header.timestamp);
        println!("  Bits: {:#010x}", block.header.bits);
        println!("  Nonce: {}", block.header.nonce);
        println!("  Transactions: {}", block.transactions.len());

        for (i, tx) in block.transactions.iter().enumerate() {
            println!("    [{}] {}", i, tx.txid());
        }
    }
}
