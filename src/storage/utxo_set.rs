// UTXO (Unspent Transaction Output) set management

use crate::core::{Address, Amount, Block, OutPoint, Transaction, TxOutput};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// UTXO - contains the output and metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub output: TxOutput,
    pub height: u32,       // Block height where this UTXO was created
    pub is_coinbase: bool, // Whether this is a coinbase output
}

impl Utxo {
    pub fn new(output: TxOutput, height: u32, is_coinbase: bool) -> Self {
        Self {
            output,
            height,
            is_coinbase,
        }
    }
}

/// Unspent outputs of the canonical chain.
///
/// Never persisted: it is a fold over the chain and is rebuilt by replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    utxos: HashMap<OutPoint, Utxo>,
}

impl UtxoSet {
    /// Create an empty UTXO set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a UTXO
    pub fn add_utxo(&mut self, outpoint: OutPoint, utxo: Utxo) {
        self.utxos.insert(outpoint, utxo);
    }

    /// Get a UTXO
    pub fn get_utxo(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.utxos.get(outpoint)
    }

    /// Remove a UTXO (spent)
    pub fn remove_utxo(&mut self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos.remove(outpoint)
    }

    /// Check if a UTXO exists
    pub fn has_utxo(&self, outpoint: &OutPoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &Utxo)> {
        self.utxos.iter()
    }

    /// Get balance for an address
    pub fn get_balance(&self, address: &Address) -> Amount {
        self.utxos
            .values()
            .filter(|utxo| utxo.output.script_pubkey.pays_to(address))
            .map(|utxo| utxo.output.value)
            .sum()
    }

    /// Get all UTXOs paying to an address, in outpoint order
    pub fn get_utxos_for(&self, address: &Address) -> Vec<(OutPoint, Utxo)> {
        let mut utxos: Vec<(OutPoint, Utxo)> = self
            .utxos
            .iter()
            .filter(|(_, utxo)| utxo.output.script_pubkey.pays_to(address))
            .map(|(outpoint, utxo)| (*outpoint, utxo.clone()))
            .collect();
        utxos.sort_by_key(|(outpoint, _)| *outpoint);
        utxos
    }

    /// Count total UTXOs
    pub fn count(&self) -> usize {
        self.utxos.len()
    }

    /// Spend a transaction's inputs and create its outputs
    pub fn apply_transaction(&mut self, tx: &Transaction, height: u32) {
        for input in &tx.inputs {
            self.utxos.remove(&input.previous_output);
        }

        let txid = tx.txid();
        let is_coinbase = tx.is_coinbase();
        for (vout, output) in tx.outputs.iter().enumerate() {
            self.utxos.insert(
                OutPoint::new(txid, vout as u32),
                Utxo::new(output.clone(), height, is_coinbase),
            );
        }
    }

    /// Apply every transaction of an already validated block
    pub fn apply_block(&mut self, block: &Block, height: u32) {
        for tx in &block.transactions {
            self.apply_transaction(tx, height);
        }
    }
}
