// Chain plus the state derived from it

use super::mempool::Mempool;
use crate::config::ChainParams;
use crate::consensus::{
    BlockContext, BlockValidator, ChainError, ValidationError, validate_chain,
    validate_transaction,
};
use crate::core::{Amount, Block, Hash256, Transaction, TxOutput};
use crate::storage::UtxoSet;
use std::collections::HashMap;

/// Where a confirmed transaction lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLocation {
    pub height: u32,
    pub index: usize,
}

/// The canonical chain and everything derived from it. Only the chain is a
/// source of truth; the rest is rebuilt by `from_chain`.
#[derive(Debug, Clone)]
pub struct LedgerState {
    pub(crate) chain: Vec<Block>,
    pub(crate) utxo: UtxoSet,
    pub(crate) mempool: Mempool,
    tx_index: HashMap<Hash256, TxLocation>,
    block_index: HashMap<Hash256, u32>,
}

impl LedgerState {
    /// Replay `chain` from genesis
    pub fn from_chain(chain: Vec<Block>, params: &ChainParams) -> Result<Self, ChainError> {
        let utxo = validate_chain(&chain, params)?;

        let mut state = Self {
            chain: Vec::with_capacity(chain.len()),
            utxo,
            mempool: Mempool::new(),
            tx_index: HashMap::new(),
            block_index: HashMap::new(),
        };
        for block in chain {
            state.index_block(block);
        }
        Ok(state)
    }

    fn index_block(&mut self, block: Block) {
        let height = self.chain.len() as u32;
        for (index, txid) in block.txids().into_iter().enumerate() {
            self.tx_index.insert(txid, TxLocation { height, index });
        }
        self.block_index.insert(block.hash(), height);
        self.chain.push(block);
    }

    /// Height of the tip
    pub fn height(&self) -> u32 {
        self.chain.len().saturating_sub(1) as u32
    }

    /// Height the next block will have
    pub fn next_height(&self) -> u32 {
        self.chain.len() as u32
    }

    pub fn tip(&self) -> Option<&Block> {
        self.chain.last()
    }

    pub fn next_context(&self, params: &ChainParams) -> BlockContext {
        BlockContext::next(&self.chain, params)
    }

    pub fn block_at(&self, height: u32) -> Option<&Block> {
        self.chain.get(height as usize)
    }

    pub fn block_height(&self, hash: &Hash256) -> Option<u32> {
        self.block_index.get(hash).copied()
    }

    pub fn locate(&self, txid: &Hash256) -> Option<TxLocation> {
        self.tx_index.get(txid).copied()
    }

    pub fn confirmed_transaction(&self, txid: &Hash256) -> Option<(&Transaction, u32)> {
        let location = self.locate(txid)?;
        let tx = self
            .block_at(location.height)?
            .transactions
            .get(location.index)?;
        Some((tx, location.height))
    }

    /// The output a confirmed transaction created, spent or not
    pub fn confirmed_output(&self, txid: &Hash256, vout: u32) -> Option<&TxOutput> {
        let (tx, _) = self.confirmed_transaction(txid)?;
        tx.outputs.get(vout as usize)
    }

    pub fn is_known_transaction(&self, txid: &Hash256) -> bool {
        self.tx_index.contains_key(txid) || self.mempool.contains(txid)
    }

    /// Validate a transaction for inclusion in the next block; returns the fee
    pub fn check_transaction(&self, tx: &Transaction) -> Result<Amount, ValidationError> {
        validate_transaction(tx, &self.utxo, self.next_height())
    }

    /// Validate a block extending the tip; returns the fees it collects
    pub fn check_block(&self, block: &Block, params: &ChainParams) -> Result<Amount, ValidationError> {
        let ctx = self.next_context(params);
        BlockValidator::new(params).validate_block(block, &ctx, &self.utxo)
    }

    /// Advance the tip with a block that passed `check_block`. Mined
    /// transactions leave the mempool, and pending transactions the block
    /// invalidated are evicted. Returns every txid that left the mempool.
    pub fn apply_block(&mut self, block: Block) -> Vec<Hash256> {
        let height = self.next_height();
        self.utxo.apply_block(&block, height);

        let mut removed = Vec::new();
        for txid in block.txids() {
            if self.mempool.remove(&txid).is_some() {
                removed.push(txid);
            }
        }
        self.index_block(block);

        // Losers of a conflict, or spends the new tip made invalid
        let next_height = self.next_height();
        let evicted: Vec<(Hash256, ValidationError)> = self
            .mempool
            .by_arrival()
            .into_iter()
            .filter_map(|entry| {
                validate_transaction(&entry.tx, &self.utxo, next_height)
                    .err()
                    .map(|err| (entry.txid, err))
            })
            .collect();

        for (txid, err) in evicted {
            log::warn!("Evicting {} from mempool: {}", txid, err);
            self.mempool.remove(&txid);
            removed.push(txid);
        }

        removed
    }
}
