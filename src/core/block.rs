// Block data structures

use super::serialize::{DecodeError, read_array, read_count, read_u32, write_varint};
use crate::core::merkle::{MerkleProof, MerkleTree};
use crate::core::{Amount, Hash256, Script, Serializable, Transaction, TxOutput, hash256};
use std::io::{Cursor, Read};

/// Serialized header size in bytes
pub const HEADER_SIZE: usize = 80;

/// Block header - 80 bytes
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockHeader {
    /// Block version
    pub version: u32,
    /// Hash of the previous block
    pub prev_block_hash: Hash256,
    /// Merkle root of all transactions in the block
    pub merkle_root: Hash256,
    /// Block timestamp (Unix epoch)
    pub timestamp: u32,
    /// Difficulty target (compact format)
    pub bits: u32,
    /// Nonce for proof-of-work
    pub nonce: u32,
}

impl BlockHeader {
    /// Create a new block header
    pub fn new(
        version: u32,
        prev_block_hash: Hash256,
        merkle_root: Hash256,
        timestamp: u32,
        bits: u32,
        nonce: u32,
    ) -> Self {
        Self {
            version,
            prev_block_hash,
            merkle_root,
            timestamp,
            bits,
            nonce,
        }
    }

    /// Calculate the hash of this block header
    pub fn hash(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    /// Serialize the block header (always 80 bytes)
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.prev_block_hash.as_bytes());
        buf.extend_from_slice(self.merkle_root.as_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// Deserialize a block header
    pub fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            version: read_u32(reader)?,
            prev_block_hash: Hash256::new(read_array::<32, _>(reader)?),
            merkle_root: Hash256::new(read_array::<32, _>(reader)?),
            timestamp: read_u32(reader)?,
            bits: read_u32(reader)?,
            nonce: read_u32(reader)?,
        })
    }
}

/// Block - contains header and transactions
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// Transactions in this block, coinbase first
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Create a new block
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    /// Deterministic genesis block. Its coinbase pays to the all-zero key
    /// hash, which no public key hashes to, so the output is unspendable.
    pub fn genesis(reward: Amount, timestamp: u32, bits: u32) -> Self {
        let coinbase_output = TxOutput::new(reward, Script::p2pkh([0u8; 20]));
        let coinbase_tx = Transaction::coinbase(vec![coinbase_output], 0);

        let merkle_root = Self::calculate_merkle_root(std::slice::from_ref(&coinbase_tx));

        // Genesis is accepted by identity, not by proof-of-work
        let header = BlockHeader::new(1, Hash256::zero(), merkle_root, timestamp, bits, 0);

        Self {
            header,
            transactions: vec![coinbase_tx],
        }
    }

    /// Transaction ids in block order
    pub fn txids(&self) -> Vec<Hash256> {
        self.transactions.iter().map(Transaction::txid).collect()
    }

    /// Calculate Merkle root from transactions
    pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash256 {
        let txids: Vec<Hash256> = transactions.iter().map(Transaction::txid).collect();
        MerkleTree::build(&txids).root()
    }

    /// Inclusion proof for the transaction at `index`
    pub fn merkle_proof(&self, index: usize) -> Option<MerkleProof> {
        MerkleTree::build(&self.txids()).prove(index)
    }

    /// Get the block hash
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Coinbase transaction, if the block is well formed
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.header.prev_block_hash == Hash256::zero()
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = self.header.serialize();

        write_varint(&mut buf, self.transactions.len() as u64);
        for tx in &self.transactions {
            buf.extend_from_slice(&tx.serialize());
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(data);

        let header = BlockHeader::from_reader(&mut cursor)?;

        let tx_count = read_count(&mut cursor)?;
        let mut transactions = Vec::with_capacity(tx_count.min(1024));
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(&mut cursor)?);
        }

        let consumed = cursor.position() as usize;
        if consumed != data.len() {
            return Err(DecodeError::TrailingBytes(data.len() - consumed));
        }

        Ok(Self {
            header,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::merkle;

    fn sample_header() -> BlockHeader {
        BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 1234567890, 0x1d00ffff, 0)
    }

    #[test]
    fn test_block_header_serialization() {
        let header = sample_header();
        let serialized = header.serialize();
        assert_eq!(serialized.len(), HEADER_SIZE);

        let deserialized = BlockHeader::from_reader(&mut Cursor::new(serialized)).unwrap();
        assert_eq!(header, deserialized);
    }

    #[test]
    fn test_block_hash_covers_nonce() {
        let header = sample_header();
        let hash = header.hash();
        assert_eq!(hash, header.hash());

        let mut bumped = header.clone();
        bumped.nonce = 1;
        assert_ne!(hash, bumped.hash());
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis(50, 1_700_000_000, 0x207fffff);
        assert!(genesis.is_genesis());
        assert_eq!(genesis.transactions.len(), 1);
        assert!(genesis.coinbase().is_some());
        assert_eq!(genesis, Block::genesis(50, 1_700_000_000, 0x207fffff));
        assert_ne!(genesis.hash(), Block::genesis(49, 1_700_000_000, 0x207fffff).hash());
    }

    #[test]
    fn test_merkle_root_single_tx() {
        let genesis = Block::genesis(50, 0, 0x207fffff);
        let tx = &genesis.transactions[0];
        assert_eq!(Block::calculate_merkle_root(std::slice::from_ref(tx)), tx.txid());
    }

    #[test]
    fn test_merkle_root_no_tx_is_sentinel() {
        assert_eq!(Block::calculate_merkle_root(&[]), merkle::empty_root());
    }

    #[test]
    fn test_block_merkle_proof() {
        let mut block = Block::genesis(50, 0, 0x207fffff);
        for height in 1..4 {
            let tx = Transaction::coinbase(vec![TxOutput::new(1, Script::p2pkh([1; 20]))], height);
            block.transactions.push(tx);
        }
        block.header.merkle_root = Block::calculate_merkle_root(&block.transactions);

        let proof = block.merkle_proof(2).unwrap();
        assert!(proof.verify(&block.transactions[2].txid(), &block.header.merkle_root));
    }

    #[test]
    fn test_block_serialization() {
        let block = Block::genesis(50, 1_700_000_000, 0x207fffff);
        let bytes = block.serialize();
        assert_eq!(Block::deserialize(&bytes).unwrap(), block);
        assert!(Block::deserialize(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_json_form_keeps_binary_hash() {
        let block = Block::genesis(50, 1_700_000_000, 0x207fffff);
        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();

        assert_eq!(back.hash(), block.hash());
        assert_eq!(back.serialize(), block.serialize());
    }
}
