// Pending transactions awaiting inclusion

use crate::core::{Amount, Hash256, OutPoint, Transaction};
use std::collections::{HashMap, HashSet};

/// A validated transaction with its cached fee
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub txid: Hash256,
    pub fee: Amount,
    /// Admission order, used to break fee ties
    pub arrival: u64,
}

/// Individually valid transactions keyed by txid. Entries may conflict with
/// each other; the block template and the post-commit sweep resolve that.
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    next_arrival: u64,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// Insert an already validated transaction. Returns false if present.
    pub fn insert(&mut self, tx: Transaction, fee: Amount) -> bool {
        let txid = tx.txid();
        if self.entries.contains_key(&txid) {
            return false;
        }

        let arrival = self.next_arrival;
        self.next_arrival += 1;
        self.entries.insert(
            txid,
            MempoolEntry {
                tx,
                txid,
                fee,
                arrival,
            },
        );
        true
    }

    pub fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        self.entries.remove(txid)
    }

    /// Entries by fee descending, then arrival
    pub fn by_priority(&self) -> Vec<&MempoolEntry> {
        let mut entries: Vec<&MempoolEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| b.fee.cmp(&a.fee).then(a.arrival.cmp(&b.arrival)));
        entries
    }

    /// Entries in arrival order
    pub fn by_arrival(&self) -> Vec<&MempoolEntry> {
        let mut entries: Vec<&MempoolEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.arrival);
        entries
    }

    /// Greedy selection for a block: highest fee first, skipping any entry
    /// that spends an outpoint an earlier pick already spends.
    pub fn select(&self, limit: usize) -> Vec<&MempoolEntry> {
        let mut spent: HashSet<OutPoint> = HashSet::new();
        let mut selected = Vec::new();

        for entry in self.by_priority() {
            if selected.len() >= limit {
                break;
            }

            let conflicts = entry
                .tx
                .inputs
                .iter()
                .any(|input| spent.contains(&input.previous_output));
            if conflicts {
                log::debug!("Skipping {} in template: conflicts with a higher-fee pick", entry.txid);
                continue;
            }

            spent.extend(entry.tx.inputs.iter().map(|input| input.previous_output));
            selected.push(entry);
        }

        selected
    }

    /// Every outpoint some pending transaction spends
    pub fn claimed_outpoints(&self) -> HashSet<OutPoint> {
        self.entries
            .values()
            .flat_map(|entry| entry.tx.inputs.iter().map(|input| input.previous_output))
            .collect()
    }
}
