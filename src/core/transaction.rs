// Transaction data structures

use super::serialize::{
    DecodeError, read_array, read_count, read_u32, read_u64, read_var_bytes, write_var_bytes,
    write_varint,
};
use crate::core::{Amount, Hash256, Script, Serializable, Witness, hash256};
use std::fmt;
use std::io::{Cursor, Read};

/// Reference to a specific output of an earlier transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TxInput {
    /// Output being spent
    pub previous_output: OutPoint,
    /// Signature and public key proving ownership
    pub witness: Witness,
    /// Sequence number (unused, kept at 0xffffffff)
    pub sequence: u32,
}

impl TxInput {
    /// Create a new, unsigned transaction input
    pub fn new(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            witness: Witness::empty(),
            sequence: 0xffffffff,
        }
    }

    fn write(&self, buf: &mut Vec<u8>, with_witness: bool) {
        buf.extend_from_slice(self.previous_output.txid.as_bytes());
        buf.extend_from_slice(&self.previous_output.vout.to_le_bytes());
        if with_witness {
            self.witness.write(buf);
        } else {
            Witness::empty().write(buf);
        }
        buf.extend_from_slice(&self.sequence.to_le_bytes());
    }

    fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self, DecodeError> {
        let txid = Hash256::new(read_array::<32, _>(reader)?);
        let vout = read_u32(reader)?;
        let witness = Witness::read(reader)?;
        let sequence = read_u32(reader)?;

        Ok(Self {
            previous_output: OutPoint::new(txid, vout),
            witness,
            sequence,
        })
    }
}

/// Transaction output - specifies amount and recipient
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TxOutput {
    /// Amount in satoshis
    pub value: Amount,
    /// Spending condition
    pub script_pubkey: Script,
    /// Earliest block height at which this output may be spent (0 = no lock)
    pub lock_height: u32,
}

impl TxOutput {
    /// Create a new transaction output
    pub fn new(value: Amount, script_pubkey: Script) -> Self {
        Self {
            value,
            script_pubkey,
            lock_height: 0,
        }
    }

    /// Output that cannot be spent before `lock_height`
    pub fn locked_until(value: Amount, script_pubkey: Script, lock_height: u32) -> Self {
        Self {
            value,
            script_pubkey,
            lock_height,
        }
    }

    /// Whether a transaction mined at `height` may spend this output
    pub fn is_spendable_at(&self, height: u32) -> bool {
        height >= self.lock_height
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.value.to_le_bytes());
        write_var_bytes(buf, &self.script_pubkey.to_bytes());
        buf.extend_from_slice(&self.lock_height.to_le_bytes());
    }

    fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self, DecodeError> {
        let value = read_u64(reader)?;
        let script_pubkey = Script::from_bytes(&read_var_bytes(reader)?)?;
        let lock_height = read_u32(reader)?;

        Ok(Self {
            value,
            script_pubkey,
            lock_height,
        })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    /// Transaction version
    pub version: u32,
    /// Transaction inputs
    pub inputs: Vec<TxInput>,
    /// Transaction outputs
    pub outputs: Vec<TxOutput>,
    /// For a coinbase, the height of the block it opens
    pub lock_time: u32,
}

impl Transaction {
    /// Create a new transaction
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Create a coinbase transaction (mining reward). It has no inputs; the
    /// block height in `lock_time` keeps every coinbase txid distinct.
    pub fn coinbase(outputs: Vec<TxOutput>, height: u32) -> Self {
        Self {
            version: 1,
            inputs: Vec::new(),
            outputs,
            lock_time: height,
        }
    }

    /// Check if this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Calculate transaction ID (double SHA256 of serialized tx)
    pub fn txid(&self) -> Hash256 {
        hash256(&self.serialize())
    }

    /// Digest every input signs: the transaction with all witnesses blanked
    pub fn signature_hash(&self) -> Hash256 {
        hash256(&self.encode(false))
    }

    /// Calculate total output value, `None` on overflow
    pub fn total_output_value(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    fn encode(&self, with_witness: bool) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.extend_from_slice(&self.version.to_le_bytes());

        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            input.write(&mut buf, with_witness);
        }

        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            output.write(&mut buf);
        }

        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf
    }

    /// Deserialize from a reader (used when decoding blocks)
    pub fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self, DecodeError> {
        let version = read_u32(reader)?;

        let input_count = read_count(reader)?;
        let mut inputs = Vec::with_capacity(input_count.min(1024));
        for _ in 0..input_count {
            inputs.push(TxInput::read(reader)?);
        }

        let output_count = read_count(reader)?;
        let mut outputs = Vec::with_capacity(output_count.min(1024));
        for _ in 0..output_count {
            outputs.push(TxOutput::read(reader)?);
        }

        let lock_time = read_u32(reader)?;

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        self.encode(true)
    }

    fn deserialize(data: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(data);
        let tx = Self::from_reader(&mut cursor)?;
        let consumed = cursor.position() as usize;
        if consumed != data.len() {
            return Err(DecodeError::TrailingBytes(data.len() - consumed));
        }
        Ok(tx)
    }
}
