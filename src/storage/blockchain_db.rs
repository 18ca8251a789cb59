// Blockchain database using sled

use super::{BlockStore, StorageError};
use crate::core::{Block, Hash256, Serializable, Transaction};
use sled::{Batch, Db, Tree};
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

const TIP_KEY: &[u8] = b"tip";
const HEIGHT_KEY: &[u8] = b"height";
const MEMPOOL_TREE: &str = "mempool";

/// Attempts to take the file lock a just-dropped handle may still hold
const LOCK_ATTEMPTS: u32 = 40;
const LOCK_BACKOFF: Duration = Duration::from_millis(25);

/// Blockchain database
pub struct BlockchainDB {
    db: Db,
    mempool: Tree,
}

impl BlockchainDB {
    /// Open (or create) a blockchain database.
    ///
    /// sled releases its file lock from a background thread after the last
    /// handle drops, so reopening a path within one process retries briefly.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut attempt = 1;
        loop {
            match sled::open(path) {
                Ok(db) => return Self::from_db(db),
                Err(sled::Error::Io(err)) if is_lock_contention(&err) && attempt < LOCK_ATTEMPTS => {
                    log::debug!("{} still locked (attempt {}), retrying", path.display(), attempt);
                    attempt += 1;
                    thread::sleep(LOCK_BACKOFF);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Create an in-memory database (for testing)
    pub fn memory() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let mempool = db.open_tree(MEMPOOL_TREE)?;
        Ok(Self { db, mempool })
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StorageError> {
        match self.db.get(Self::block_key(hash))? {
            Some(data) => Ok(Some(Block::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Get block hash by height
    pub fn get_hash_by_height(&self, height: u32) -> Result<Option<Hash256>, StorageError> {
        self.db
            .get(Self::height_key(height))?
            .map(|data| Self::decode_hash(&data))
            .transpose()
    }

    /// Get block by height
    pub fn get_block_by_height(&self, height: u32) -> Result<Option<Block>, StorageError> {
        match self.get_hash_by_height(height)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    /// Get the chain tip (best block hash)
    pub fn get_tip(&self) -> Result<Option<Hash256>, StorageError> {
        self.db
            .get(TIP_KEY)?
            .map(|data| Self::decode_hash(&data))
            .transpose()
    }

    /// Height of the stored tip, `None` when no block is stored
    pub fn get_chain_height(&self) -> Result<Option<u32>, StorageError> {
        match self.db.get(HEIGHT_KEY)? {
            Some(data) => {
                let bytes = <[u8; 4]>::try_from(&data[..]).map_err(|_| {
                    StorageError::Corrupt(format!("invalid height data length: {}", data.len()))
                })?;
                Ok(Some(u32::from_le_bytes(bytes)))
            }
            None => Ok(None),
        }
    }

    /// Manually flush database (call after batch operations)
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn decode_hash(data: &[u8]) -> Result<Hash256, StorageError> {
        Hash256::from_slice(data)
            .ok_or_else(|| StorageError::Corrupt(format!("invalid hash length: {}", data.len())))
    }

    // Helper: create key for block storage
    fn block_key(hash: &Hash256) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(b'b'); // 'b' for block
        key.extend_from_slice(hash.as_bytes());
        key
    }

    // Helper: create key for height index (big-endian so keys sort by height)
    fn height_key(height: u32) -> Vec<u8> {
        let mut key = Vec::with_capacity(5);
        key.push(b'h'); // 'h' for height
        key.extend_from_slice(&height.to_be_bytes());
        key
    }
}

fn is_lock_contention(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.to_string().contains("could not acquire lock")
}

impl BlockStore for BlockchainDB {
    fn load_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let Some(tip_height) = self.get_chain_height()? else {
            return Ok(Vec::new());
        };

        let mut blocks = Vec::with_capacity(tip_height as usize + 1);
        for height in 0..=tip_height {
            let block = self
                .get_block_by_height(height)?
                .ok_or_else(|| StorageError::Corrupt(format!("missing block at height {height}")))?;
            blocks.push(block);
        }

        if let (Some(tip), Some(last)) = (self.get_tip()?, blocks.last()) {
            if tip != last.hash() {
                return Err(StorageError::Corrupt(
                    "tip does not match the block at the stored height".to_string(),
                ));
            }
        }

        Ok(blocks)
    }

    fn append_block(&self, height: u32, block: &Block) -> Result<(), StorageError> {
        let expected = self.get_chain_height()?.map_or(0, |tip| tip + 1);
        if height != expected {
            return Err(StorageError::Corrupt(format!(
                "append at height {height}, store expects {expected}"
            )));
        }

        let hash = block.hash();
        let mut batch = Batch::default();
        batch.insert(Self::block_key(&hash), block.serialize());
        batch.insert(Self::height_key(height), hash.as_bytes().as_slice());
        batch.insert(TIP_KEY, hash.as_bytes().as_slice());
        batch.insert(HEIGHT_KEY, height.to_le_bytes().as_slice());

        self.db.apply_batch(batch)?;
        self.flush()
    }

    fn put_pending(&self, tx: &Transaction) -> Result<(), StorageError> {
        self.mempool.insert(tx.txid().as_bytes(), tx.serialize())?;
        Ok(())
    }

    fn remove_pending(&self, txid: &Hash256) -> Result<(), StorageError> {
        self.mempool.remove(txid.as_bytes())?;
        Ok(())
    }

    fn load_pending(&self) -> Result<Vec<Transaction>, StorageError> {
        self.mempool
            .iter()
            .map(|item| -> Result<Transaction, StorageError> {
                let (_, value) = item?;
                Ok(Transaction::deserialize(&value)?)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainParams;
    use crate::core::{KeyPair, OutPoint, Script, TxInput, TxOutput};

    fn pending_tx() -> Transaction {
        let kp = KeyPair::generate();
        Transaction::new(
            vec![TxInput::new(OutPoint::new(Hash256::new([4; 32]), 1))],
            vec![TxOutput::new(10, Script::lock(&kp.address).unwrap())],
        )
    }

    #[test]
    fn test_store_and_get_block() {
        let db = BlockchainDB::memory().unwrap();
        let block = ChainParams::regtest().genesis_block();

        db.append_block(0, &block).unwrap();

        let hash = block.hash();
        assert_eq!(db.get_block(&hash).unwrap().unwrap(), block);
        assert_eq!(db.get_hash_by_height(0).unwrap(), Some(hash));
        assert_eq!(db.get_block_by_height(0).unwrap().unwrap(), block);
        assert_eq!(db.get_tip().unwrap(), Some(hash));
        assert_eq!(db.get_chain_height().unwrap(), Some(0));
    }

    #[test]
    fn test_empty_store() {
        let db = BlockchainDB::memory().unwrap();
        assert_eq!(db.get_chain_height().unwrap(), None);
        assert!(db.load_blocks().unwrap().is_empty());
        assert!(db.get_tip().unwrap().is_none());
    }

    #[test]
    fn test_append_rejects_gap() {
        let db = BlockchainDB::memory().unwrap();
        let block = ChainParams::regtest().genesis_block();

        assert!(matches!(
            db.append_block(1, &block),
            Err(StorageError::Corrupt(_))
        ));
        db.append_block(0, &block).unwrap();
        assert!(db.append_block(0, &block).is_err());
    }

    #[test]
    fn test_pending_transactions() {
        let db = BlockchainDB::memory().unwrap();
        let tx = pending_tx();

        db.put_pending(&tx).unwrap();
        assert_eq!(db.load_pending().unwrap(), vec![tx.clone()]);

        db.remove_pending(&tx.txid()).unwrap();
        assert!(db.load_pending().unwrap().is_empty());
    }

    #[test]
    fn test_reopen_on_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let block = ChainParams::regtest().genesis_block();
        let tx = pending_tx();

        {
            let db = BlockchainDB::new(temp_dir.path()).unwrap();
            db.append_block(0, &block).unwrap();
            db.put_pending(&tx).unwrap();
            db.flush().unwrap();
        }

        let db = BlockchainDB::new(temp_dir.path()).unwrap();
        assert_eq!(db.load_blocks().unwrap(), vec![block]);
        assert_eq!(db.load_pending().unwrap(), vec![tx]);
    }

    #[test]
    fn test_repeated_reopen_in_process() {
        let temp_dir = tempfile::tempdir().unwrap();
        let block = ChainParams::regtest().genesis_block();

        {
            let db = BlockchainDB::new(temp_dir.path()).unwrap();
            db.append_block(0, &block).unwrap();
        }

        // Each handle is dropped right before the next open
        for _ in 0..10 {
            let db = BlockchainDB::new(temp_dir.path()).unwrap();
            assert_eq!(db.get_chain_height().unwrap(), Some(0));
        }
    }

    #[test]
    fn test_lock_contention_detection() {
        let held = io::Error::new(
            io::ErrorKind::Other,
            "could not acquire lock on \"db\": Os { code: 11, kind: WouldBlock }",
        );
        assert!(is_lock_contention(&held));
        assert!(is_lock_contention(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_lock_contention(&io::Error::from(io::ErrorKind::NotFound)));
    }
}
