// Locking predicates and their witnesses (pay-to-pubkey-hash)

use crate::core::keys::{self, Address, KeyError};
use crate::core::serialize::{DecodeError, read_var_bytes, write_var_bytes};
use crate::core::{Hash256, TxOutput, hash160};
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Opcodes for P2PKH script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Duplicate the top stack item
    OpDup = 0x76,
    /// Hash the top stack item with HASH160
    OpHash160 = 0xa9,
    /// Push 20 bytes (pubkey hash size)
    OpPushBytes20 = 0x14,
    /// Verify that the top two items are equal
    OpEqualVerify = 0x88,
    /// Check signature
    OpCheckSig = 0xac,
}

/// P2PKH script length: 3 opcodes + 20-byte hash + 2 opcodes
const P2PKH_LEN: usize = 25;

/// Locking predicate attached to every output.
///
/// Only one kind exists today; new kinds become new variants and
/// [`Script::unlock`] grows a match arm, while the ledger keeps calling
/// [`authorize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Script {
    /// OP_DUP OP_HASH160 <pubKeyHash> OP_EQUALVERIFY OP_CHECKSIG
    P2pkh {
        #[serde(with = "hex::serde")]
        pubkey_hash: [u8; 20],
    },
}

impl Script {
    /// Lock to the holder of `address`
    pub fn lock(address: &Address) -> Result<Self, KeyError> {
        Ok(Self::p2pkh(address.to_pubkey_hash()?))
    }

    pub fn p2pkh(pubkey_hash: [u8; 20]) -> Self {
        Script::P2pkh { pubkey_hash }
    }

    /// Address this predicate pays to
    pub fn address(&self) -> Address {
        match self {
            Script::P2pkh { pubkey_hash } => Address::from_pubkey_hash(pubkey_hash),
        }
    }

    /// Whether this predicate pays to `address`
    pub fn pays_to(&self, address: &Address) -> bool {
        match (self, address.to_pubkey_hash()) {
            (Script::P2pkh { pubkey_hash }, Ok(hash)) => *pubkey_hash == hash,
            _ => false,
        }
    }

    /// Evaluate the predicate. Both the key-hash match and the signature
    /// must hold.
    pub fn unlock(&self, public_key: &[u8], signature: &[u8], message_hash: &Hash256) -> bool {
        match self {
            Script::P2pkh { pubkey_hash } => {
                hash160(public_key) == *pubkey_hash
                    && keys::verify(public_key, message_hash, signature)
            }
        }
    }

    /// Canonical script bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Script::P2pkh { pubkey_hash } => {
                let mut script = Vec::with_capacity(P2PKH_LEN);
                script.push(OpCode::OpDup as u8);
                script.push(OpCode::OpHash160 as u8);
                script.push(OpCode::OpPushBytes20 as u8);
                script.extend_from_slice(pubkey_hash);
                script.push(OpCode::OpEqualVerify as u8);
                script.push(OpCode::OpCheckSig as u8);
                script
            }
        }
    }

    /// Parse canonical script bytes
    pub fn from_bytes(script: &[u8]) -> Result<Self, DecodeError> {
        if script.len() != P2PKH_LEN {
            return Err(DecodeError::UnknownScript(format!(
                "length {}",
                script.len()
            )));
        }

        let expected = [
            (0, OpCode::OpDup),
            (1, OpCode::OpHash160),
            (2, OpCode::OpPushBytes20),
            (23, OpCode::OpEqualVerify),
            (24, OpCode::OpCheckSig),
        ];
        for (pos, op) in expected {
            if script[pos] != op as u8 {
                return Err(DecodeError::UnknownScript(format!(
                    "expected {op:?} at byte {pos}"
                )));
            }
        }

        let mut pubkey_hash = [0u8; 20];
        pubkey_hash.copy_from_slice(&script[3..23]);
        Ok(Self::p2pkh(pubkey_hash))
    }
}

/// Unlocking data carried by an input
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Witness {
    /// DER-encoded ECDSA signature over the transaction's signature hash
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
    /// Compressed public key
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
}

impl Witness {
    pub fn new(signature: Vec<u8>, public_key: Vec<u8>) -> Self {
        Self {
            signature,
            public_key,
        }
    }

    /// Placeholder used while the signature hash is computed
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.signature.is_empty() && self.public_key.is_empty()
    }

    pub(crate) fn write(&self, buf: &mut Vec<u8>) {
        write_var_bytes(buf, &self.signature);
        write_var_bytes(buf, &self.public_key);
    }

    pub(crate) fn read<R: Read + ?Sized>(reader: &mut R) -> Result<Self, DecodeError> {
        let signature = read_var_bytes(reader)?;
        let public_key = read_var_bytes(reader)?;
        Ok(Self {
            signature,
            public_key,
        })
    }
}

/// The ledger's single authorization entry point
pub fn authorize(output: &TxOutput, witness: &Witness, message_hash: &Hash256) -> bool {
    output
        .script_pubkey
        .unlock(&witness.public_key, &witness.signature, message_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::KeyPair;
    use crate::core::hash256;

    #[test]
    fn test_p2pkh_script_creation() {
        let pubkey_hash = [0x12; 20];
        let script = Script::p2pkh(pubkey_hash).to_bytes();

        assert_eq!(script.len(), 25);
        assert_eq!(script[0], OpCode::OpDup as u8);
        assert_eq!(script[1], OpCode::OpHash160 as u8);
        assert_eq!(script[2], OpCode::OpPushBytes20 as u8);
        assert_eq!(&script[3..23], &pubkey_hash);
        assert_eq!(script[23], OpCode::OpEqualVerify as u8);
        assert_eq!(script[24], OpCode::OpCheckSig as u8);
    }

    #[test]
    fn test_parse_script_pubkey() {
        let script = Script::p2pkh([0x12; 20]);
        assert_eq!(Script::from_bytes(&script.to_bytes()).unwrap(), script);

        let mut bad = script.to_bytes();
        bad[24] = 0x00;
        assert!(matches!(
            Script::from_bytes(&bad),
            Err(DecodeError::UnknownScript(_))
        ));
        assert!(Script::from_bytes(&[0x76]).is_err());
    }

    #[test]
    fn test_lock_embeds_address_hash() {
        let kp = KeyPair::generate();
        let script = Script::lock(&kp.address).unwrap();

        assert_eq!(script, Script::p2pkh(kp.pubkey_hash()));
        assert_eq!(script.address(), kp.address);
        assert!(script.pays_to(&kp.address));
        assert!(!script.pays_to(&KeyPair::generate().address));
    }

    #[test]
    fn test_full_p2pkh_verification() {
        let kp = KeyPair::generate();
        let script = Script::lock(&kp.address).unwrap();
        let tx_hash = hash256(b"tx");

        let sig = kp.sign(&tx_hash);
        assert!(script.unlock(&kp.pubkey_bytes(), &sig, &tx_hash));
    }

    #[test]
    fn test_p2pkh_verification_wrong_key() {
        let owner = KeyPair::generate();
        let thief = KeyPair::generate();
        let script = Script::lock(&owner.address).unwrap();
        let tx_hash = hash256(b"tx");

        // Valid signature, but the key does not hash to the locked address
        let sig = thief.sign(&tx_hash);
        assert!(!script.unlock(&thief.pubkey_bytes(), &sig, &tx_hash));
    }

    #[test]
    fn test_p2pkh_right_key_wrong_signature() {
        let owner = KeyPair::generate();
        let script = Script::lock(&owner.address).unwrap();

        // Key matches the hash, signature is over a different message
        let sig = owner.sign(&hash256(b"other"));
        assert!(!script.unlock(&owner.pubkey_bytes(), &sig, &hash256(b"tx")));
    }

    #[test]
    fn test_authorize_uses_output_predicate() {
        let kp = KeyPair::generate();
        let output = TxOutput::new(1000, Script::lock(&kp.address).unwrap());
        let msg = hash256(b"sighash");

        let witness = Witness::new(kp.sign(&msg), kp.pubkey_bytes());
        assert!(authorize(&output, &witness, &msg));
        assert!(!authorize(&output, &Witness::empty(), &msg));
    }
}
