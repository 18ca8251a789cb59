// In-process BlockStore

use super::{BlockStore, StorageError};
use crate::core::{Block, Hash256, Transaction};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    blocks: Vec<Block>,
    pending: BTreeMap<Hash256, Transaction>,
}

/// Keeps everything in memory. Sharing one behind an `Arc` lets a second
/// ledger reopen what the first one wrote.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BlockStore for MemoryStore {
    fn load_blocks(&self) -> Result<Vec<Block>, StorageError> {
        Ok(self.lock().blocks.clone())
    }

    fn append_block(&self, height: u32, block: &Block) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if height as usize != inner.blocks.len() {
            return Err(StorageError::Corrupt(format!(
                "append at height {height}, store expects {}",
                inner.blocks.len()
            )));
        }
        inner.blocks.push(block.clone());
        Ok(())
    }

    fn put_pending(&self, tx: &Transaction) -> Result<(), StorageError> {
        self.lock().pending.insert(tx.txid(), tx.clone());
        Ok(())
    }

    fn remove_pending(&self, txid: &Hash256) -> Result<(), StorageError> {
        self.lock().pending.remove(txid);
        Ok(())
    }

    fn load_pending(&self) -> Result<Vec<Transaction>, StorageError> {
        Ok(self.lock().pending.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParams;

    #[test]
    fn test_append_and_load() {
        let store = MemoryStore::new();
        let genesis = ChainParams::regtest().genesis_block();

        store.append_block(0, &genesis).unwrap();
        assert!(store.append_block(5, &genesis).is_err());
        assert_eq!(store.load_blocks().unwrap(), vec![genesis]);
    }
}
