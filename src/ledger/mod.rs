//! The ledger: one chain, its UTXO set and mempool, behind a single lock.
//!
//! Admission and block application hold the write lock for the whole
//! validate-persist-apply sequence, so a failure at any step leaves the state
//! untouched. Queries take the read lock. Mining builds a template under the
//! read lock, searches for a nonce with no lock held, then submits the result
//! like any other block.

mod mempool;
mod state;

pub use mempool::{Mempool, MempoolEntry};
pub use state::{LedgerState, TxLocation};

use crate::config::ChainParams;
use crate::consensus::{
    ChainError, Miner, MiningOutcome, MiningResult, ValidationError, reward_for_height,
    validate_chain,
};
use crate::core::{
    Address, Amount, Block, BlockHeader, Hash256, KeyError, OutPoint, Script, Transaction,
    TxOutput,
};
use crate::storage::{BlockStore, StorageError, Utxo, UtxoSet};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("chain replay failed: {0}")]
    Chain(#[from] ChainError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("block {0} is already in the chain")]
    KnownBlock(Hash256),

    #[error("nothing to mine: mempool is empty and empty blocks are disabled")]
    EmptyTemplate,

    #[error("replayed UTXO set differs from the live one")]
    StateDivergence,
}

/// Block lookup key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    Height(u32),
    Hash(Hash256),
}

impl FromStr for BlockId {
    type Err = String;

    /// Decimal heights, otherwise a 64-character hex hash
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(height) = s.parse::<u32>() {
            return Ok(BlockId::Height(height));
        }
        s.parse::<Hash256>()
            .map(BlockId::Hash)
            .map_err(|_| format!("not a block height or hash: {s}"))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockId::Height(height) => write!(f, "{height}"),
            BlockId::Hash(hash) => write!(f, "{hash}"),
        }
    }
}

/// A transaction and, when confirmed, the height of its block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxLookup {
    pub txid: Hash256,
    pub transaction: Transaction,
    pub block_height: Option<u32>,
}

/// Result of a mining attempt
#[derive(Debug)]
pub enum MineOutcome {
    Mined {
        height: u32,
        block: Block,
        result: MiningResult,
    },
    Cancelled,
}

/// Shared handle to one node's ledger
pub struct Ledger {
    params: ChainParams,
    state: RwLock<LedgerState>,
    store: Option<Arc<dyn BlockStore>>,
}

impl Ledger {
    /// In-memory ledger holding just the genesis block
    pub fn new(params: ChainParams) -> Result<Self, LedgerError> {
        let state = LedgerState::from_chain(vec![params.genesis_block()], &params)?;
        Ok(Self {
            params,
            state: RwLock::new(state),
            store: None,
        })
    }

    /// Open a ledger over `store`, replaying whatever it holds. An empty
    /// store is initialised with the genesis block.
    pub fn open(params: ChainParams, store: Arc<dyn BlockStore>) -> Result<Self, LedgerError> {
        let mut blocks = store.load_blocks()?;
        if blocks.is_empty() {
            let genesis = params.genesis_block();
            store.append_block(0, &genesis)?;
            log::info!("Initialised store with genesis {}", genesis.hash());
            blocks.push(genesis);
        }

        let mut state = LedgerState::from_chain(blocks, &params)?;
        log::info!("Replayed chain to height {}", state.height());

        for tx in store.load_pending()? {
            let txid = tx.txid();
            match state.check_transaction(&tx) {
                Ok(fee) if !state.is_known_transaction(&txid) => {
                    state.mempool.insert(tx, fee);
                }
                Ok(_) => store.remove_pending(&txid)?,
                Err(err) => {
                    log::warn!("Dropping stored pending transaction {}: {}", txid, err);
                    store.remove_pending(&txid)?;
                }
            }
        }

        Ok(Self {
            params,
            state: RwLock::new(state),
            store: Some(store),
        })
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate `tx` against the current tip and add it to the mempool
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash256, LedgerError> {
        let txid = tx.txid();
        let mut state = self.write();

        if state.is_known_transaction(&txid) {
            return Err(ValidationError::DuplicateTransaction(txid).into());
        }

        let fee = state.check_transaction(&tx)?;
        if let Some(store) = &self.store {
            store.put_pending(&tx)?;
        }
        state.mempool.insert(tx, fee);

        log::debug!("Accepted {} into mempool (fee {})", txid, fee);
        Ok(txid)
    }

    /// Candidate block paying reward and fees to `miner`, nonce unsolved
    pub fn block_template(&self, miner: &Address) -> Result<Block, LedgerError> {
        let state = self.read();
        let ctx = state.next_context(&self.params);

        let limit = self.params.max_block_transactions.saturating_sub(1);
        let selected = state.mempool.select(limit);
        if selected.is_empty() && !self.params.allow_empty_blocks {
            return Err(LedgerError::EmptyTemplate);
        }

        let fees = selected
            .iter()
            .try_fold(0 as Amount, |acc, entry| acc.checked_add(entry.fee))
            .ok_or_else(|| ValidationError::Malformed("fee total overflows".to_string()))?;
        let reward = reward_for_height(ctx.height, &self.params)
            .checked_add(fees)
            .ok_or_else(|| ValidationError::Malformed("reward overflows".to_string()))?;

        let coinbase = Transaction::coinbase(
            vec![TxOutput::new(reward, Script::lock(miner)?)],
            ctx.height,
        );
        let mut transactions = vec![coinbase];
        transactions.extend(selected.into_iter().map(|entry| entry.tx.clone()));

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as u32)
            .unwrap_or(0);
        let timestamp = state.tip().map_or(now, |tip| now.max(tip.header.timestamp));

        log::debug!(
            "Template for height {}: {} transactions, fees {}",
            ctx.height,
            transactions.len(),
            fees
        );

        let header = BlockHeader::new(
            1,
            ctx.prev_hash,
            Block::calculate_merkle_root(&transactions),
            timestamp,
            ctx.expected_bits,
            0,
        );
        Ok(Block::new(header, transactions))
    }

    /// Validate, persist and apply a block extending the tip. Returns its
    /// height.
    pub fn submit_block(&self, block: Block) -> Result<u32, LedgerError> {
        let hash = block.hash();
        let mut state = self.write();

        if state.block_height(&hash).is_some() {
            return Err(LedgerError::KnownBlock(hash));
        }

        let height = state.next_height();
        let fees = state.check_block(&block, &self.params)?;

        if let Some(store) = &self.store {
            store.append_block(height, &block)?;
        }

        let tx_count = block.transactions.len();
        let removed = state.apply_block(block);

        if let Some(store) = &self.store {
            for txid in &removed {
                if let Err(err) = store.remove_pending(txid) {
                    log::warn!("Failed to drop pending {} from store: {}", txid, err);
                }
            }
        }

        log::info!(
            "Block {} committed at height {} ({} txs, fees {})",
            hash,
            height,
            tx_count,
            fees
        );
        Ok(height)
    }

    /// Build a template, search for a nonce without holding the lock, then
    /// submit. A tip that moved meanwhile surfaces as `ChainMismatch`.
    pub fn mine_block(&self, miner: &Address, stop: &AtomicBool) -> Result<MineOutcome, LedgerError> {
        let mut block = self.block_template(miner)?;

        match Miner::new(block.header.bits).mine(&mut block.header, stop) {
            MiningOutcome::Cancelled => Ok(MineOutcome::Cancelled),
            MiningOutcome::Found(result) => {
                log::debug!(
                    "Found nonce {} after {} attempts ({:.1} H/s)",
                    result.nonce,
                    result.attempts,
                    result.hash_rate()
                );
                let height = self.submit_block(block.clone())?;
                Ok(MineOutcome::Mined {
                    height,
                    block,
                    result,
                })
            }
        }
    }

    /// Height of the tip
    pub fn height(&self) -> u32 {
        self.read().height()
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.read().tip().map_or_else(Hash256::zero, Block::hash)
    }

    pub fn get_block(&self, id: &BlockId) -> Option<Block> {
        let state = self.read();
        let height = match id {
            BlockId::Height(height) => *height,
            BlockId::Hash(hash) => state.block_height(hash)?,
        };
        state.block_at(height).cloned()
    }

    /// Copy of the whole chain, genesis first
    pub fn chain(&self) -> Vec<Block> {
        self.read().chain.clone()
    }

    pub fn get_balance(&self, address: &Address) -> Amount {
        self.read().utxo.get_balance(address)
    }

    pub fn get_utxos(&self, address: &Address) -> Vec<(OutPoint, Utxo)> {
        self.read().utxo.get_utxos_for(address)
    }

    /// UTXOs a new transaction may spend now: not claimed by a pending
    /// transaction and not locked past the next block
    pub fn spendable_utxos(&self, address: &Address) -> Vec<(OutPoint, Utxo)> {
        let state = self.read();
        let claimed = state.mempool.claimed_outpoints();
        let next_height = state.next_height();

        state
            .utxo
            .get_utxos_for(address)
            .into_iter()
            .filter(|(outpoint, utxo)| {
                !claimed.contains(outpoint) && utxo.output.is_spendable_at(next_height)
            })
            .collect()
    }

    /// Confirmed transactions first, then pending ones
    pub fn get_transaction(&self, txid: &Hash256) -> Option<TxLookup> {
        let state = self.read();
        if let Some((tx, height)) = state.confirmed_transaction(txid) {
            return Some(TxLookup {
                txid: *txid,
                transaction: tx.clone(),
                block_height: Some(height),
            });
        }
        state.mempool.get(txid).map(|entry| TxLookup {
            txid: *txid,
            transaction: entry.tx.clone(),
            block_height: None,
        })
    }

    /// Every transaction paying to or spending from `address`, chain order,
    /// followed by pending ones in arrival order
    pub fn history(&self, address: &Address) -> Vec<TxLookup> {
        let state = self.read();

        let touches = |tx: &Transaction| {
            tx.outputs
                .iter()
                .any(|output| output.script_pubkey.pays_to(address))
                || tx.inputs.iter().any(|input| {
                    state
                        .confirmed_output(&input.previous_output.txid, input.previous_output.vout)
                        .is_some_and(|output| output.script_pubkey.pays_to(address))
                })
        };

        let mut history: Vec<TxLookup> = state
            .chain
            .iter()
            .enumerate()
            .flat_map(|(height, block)| {
                block
                    .transactions
                    .iter()
                    .map(move |tx| (height as u32, tx))
            })
            .filter(|(_, tx)| touches(*tx))
            .map(|(height, tx)| TxLookup {
                txid: tx.txid(),
                transaction: tx.clone(),
                block_height: Some(height),
            })
            .collect();

        history.extend(
            state
                .mempool
                .by_arrival()
                .into_iter()
                .filter(|entry| touches(&entry.tx))
                .map(|entry| TxLookup {
                    txid: entry.txid,
                    transaction: entry.tx.clone(),
                    block_height: None,
                }),
        );

        history
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.read()
            .mempool
            .by_arrival()
            .into_iter()
            .map(|entry| entry.tx.clone())
            .collect()
    }

    pub fn mempool_len(&self) -> usize {
        self.read().mempool.len()
    }

    pub fn utxo_snapshot(&self) -> UtxoSet {
        self.read().utxo.clone()
    }

    /// Replay the chain from genesis and check it reproduces the live UTXO
    /// set. Returns the tip height.
    pub fn validate_chain(&self) -> Result<u32, LedgerError> {
        let state = self.read();
        let rebuilt = validate_chain(&state.chain, &self.params)?;
        if rebuilt != state.utxo {
            return Err(LedgerError::StateDivergence);
        }
        Ok(state.height())
    }
}
