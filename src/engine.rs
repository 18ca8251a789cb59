//! Single-process facade over the ledger, a local keystore and the
//! exchange. This is the surface a CLI or API layer talks to.

use crate::config::{ChainParams, ConfigError, NodeConfig};
use crate::core::{Address, Amount, Block, Hash256, OutPoint, Transaction};
use crate::exchange::{
    Balance, BookSnapshot, Exchange, ExchangeError, Order, OrderId, OrderRequest, Placement,
    Trade, TradingPair,
};
use crate::ledger::{BlockId, Ledger, LedgerError, MineOutcome, TxLookup};
use crate::storage::{BlockchainDB, StorageError, Utxo};
use crate::wallet::{Keystore, TransactionBuilder, WalletError};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error("failed to prepare data directory: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Engine {
    ledger: Ledger,
    keystore: Mutex<Keystore>,
    keystore_path: Option<PathBuf>,
    exchange: Mutex<Exchange>,
}

impl Engine {
    /// Everything in memory; nothing survives the process
    pub fn in_memory(params: ChainParams) -> Result<Self, EngineError> {
        params.check()?;
        Ok(Self {
            ledger: Ledger::new(params)?,
            keystore: Mutex::new(Keystore::new()),
            keystore_path: None,
            exchange: Mutex::new(Exchange::new()),
        })
    }

    /// Blocks and pending transactions in sled under the data directory,
    /// keys in its keystore file
    pub fn open(config: &NodeConfig) -> Result<Self, EngineError> {
        config.params.check()?;
        fs::create_dir_all(&config.data_dir)?;

        let db = BlockchainDB::new(config.blocks_path())?;
        let ledger = Ledger::open(config.params.clone(), Arc::new(db))?;

        let keystore_path = config.keystore_path();
        let keystore = Keystore::open(&keystore_path)?;
        log::info!(
            "Opened {} at height {} with {} keys",
            config.data_dir.display(),
            ledger.height(),
            keystore.count()
        );

        Ok(Self {
            ledger,
            keystore: Mutex::new(keystore),
            keystore_path: Some(keystore_path),
            exchange: Mutex::new(Exchange::new()),
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    fn keystore(&self) -> MutexGuard<'_, Keystore> {
        self.keystore.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exchange(&self) -> MutexGuard<'_, Exchange> {
        self.exchange.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Wallet

    /// Generate a key pair, persisting the keystore when file-backed
    pub fn create_wallet(&self) -> Result<Address, EngineError> {
        let mut keystore = self.keystore();
        let address = keystore.new_address();
        if let Some(path) = &self.keystore_path {
            keystore.save(path)?;
        }
        log::info!("Created address {}", address);
        Ok(address)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.keystore().list_addresses()
    }

    pub fn default_address(&self) -> Option<Address> {
        self.keystore().default_address().cloned()
    }

    /// Build, sign and submit a payment from a keystore address
    pub fn send(
        &self,
        from: &Address,
        to: &Address,
        amount: Amount,
        fee: Amount,
    ) -> Result<Hash256, EngineError> {
        let tx = {
            let keystore = self.keystore();
            TransactionBuilder::new(&keystore, &self.ledger).build(from, to, amount, fee)?
        };
        self.submit_transaction(tx)
    }

    // Ledger

    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, EngineError> {
        Ok(self.ledger.submit_transaction(tx)?)
    }

    pub fn mine_block(&self, miner: &Address, stop: &AtomicBool) -> Result<MineOutcome, EngineError> {
        Ok(self.ledger.mine_block(miner, stop)?)
    }

    pub fn get_balance(&self, address: &Address) -> Amount {
        self.ledger.get_balance(address)
    }

    pub fn get_utxos(&self, address: &Address) -> Vec<(OutPoint, Utxo)> {
        self.ledger.get_utxos(address)
    }

    pub fn get_block(&self, id: &BlockId) -> Option<Block> {
        self.ledger.get_block(id)
    }

    pub fn get_transaction(&self, txid: &Hash256) -> Option<TxLookup> {
        self.ledger.get_transaction(txid)
    }

    pub fn history(&self, address: &Address) -> Vec<TxLookup> {
        self.ledger.history(address)
    }

    /// Full replay from genesis; returns the tip height
    pub fn validate_chain(&self) -> Result<u32, EngineError> {
        Ok(self.ledger.validate_chain()?)
    }

    // Exchange

    pub fn deposit(&self, owner: &str, asset: &str, amount: u64) -> Result<Balance, EngineError> {
        Ok(self.exchange().deposit(owner, asset, amount)?)
    }

    pub fn exchange_balance(&self, owner: &str, asset: &str) -> Balance {
        self.exchange().balance(owner, asset)
    }

    pub fn place_order(&self, request: OrderRequest) -> Result<Placement, EngineError> {
        Ok(self.exchange().place_order(request)?)
    }

    pub fn cancel_order(&self, owner: &str, id: OrderId) -> Result<Order, EngineError> {
        Ok(self.exchange().cancel_order(owner, id)?)
    }

    pub fn get_orderbook(&self, pair: &TradingPair) -> BookSnapshot {
        self.exchange().get_orderbook(pair)
    }

    pub fn trades(&self) -> Vec<Trade> {
        self.exchange().trades().to_vec()
    }
}
