// Key pairs, addresses and ECDSA signing over secp256k1

use crate::core::{Hash256, hash160};
use rand::rngs::OsRng;
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Base58Check version byte for pay-to-pubkey-hash addresses
pub const ADDRESS_VERSION: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Human-readable address: Base58Check(version || HASH160(pubkey))
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Create address from public key hash
    pub fn from_pubkey_hash(hash: &[u8; 20]) -> Self {
        Self(
            bs58::encode(hash)
                .with_check_version(ADDRESS_VERSION)
                .into_string(),
        )
    }

    /// Get address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the 20-byte pubkey hash, checking version and checksum
    pub fn to_pubkey_hash(&self) -> Result<[u8; 20], KeyError> {
        decode_address(&self.0)
    }
}

fn decode_address(s: &str) -> Result<[u8; 20], KeyError> {
    let decoded = bs58::decode(s)
        .with_check(Some(ADDRESS_VERSION))
        .into_vec()
        .map_err(|e| KeyError::InvalidAddress(format!("{s}: {e}")))?;

    // Decoded payload keeps the version byte in front
    match decoded.split_first() {
        Some((_, payload)) => payload
            .try_into()
            .map_err(|_| KeyError::InvalidAddress(format!("{s}: bad length {}", payload.len()))),
        None => Err(KeyError::InvalidAddress(format!("{s}: empty"))),
    }
}

impl FromStr for Address {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_address(s)?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Address {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        decode_address(&value)?;
        Ok(Self(value))
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key pair
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    pub address: Address,
}

impl KeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        Self::from_secret_key(&secp, secret_key)
    }

    /// Rebuild a key pair from its 32-byte secret. Zero and values at or
    /// above the curve order are rejected.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let secret_key =
            SecretKey::from_slice(bytes).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(Self::from_secret_key(&secp, secret_key))
    }

    fn from_secret_key<C: secp256k1::Signing>(secp: &Secp256k1<C>, secret_key: SecretKey) -> Self {
        let public_key = secret_key.public_key(secp);
        let address = derive_address(&public_key);
        Self {
            secret_key,
            public_key,
            address,
        }
    }

    /// Raw secret bytes (for keystore persistence)
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret_key.secret_bytes()
    }

    /// Compressed public key bytes
    pub fn pubkey_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    /// Get pubkey hash
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.public_key.serialize())
    }

    /// Sign a 32-byte message hash, DER-encoded
    pub fn sign(&self, message_hash: &Hash256) -> Vec<u8> {
        let secp = Secp256k1::signing_only();
        let message = Message::from_digest(*message_hash.as_bytes());
        secp.sign_ecdsa(&message, &self.secret_key)
            .serialize_der()
            .to_vec()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

pub fn generate_keypair() -> KeyPair {
    KeyPair::generate()
}

/// HASH160 of the compressed key, Base58Check encoded
pub fn derive_address(public_key: &PublicKey) -> Address {
    Address::from_pubkey_hash(&hash160(&public_key.serialize()))
}

/// Sign with a raw secret. Nonces are RFC6979-deterministic.
pub fn sign(secret: &[u8; 32], message_hash: &Hash256) -> Result<Signature, KeyError> {
    let secp = Secp256k1::signing_only();
    let secret_key =
        SecretKey::from_slice(secret).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
    let message = Message::from_digest(*message_hash.as_bytes());
    Ok(secp.sign_ecdsa(&message, &secret_key))
}

/// Verify a DER signature. Malformed keys or signatures simply fail.
pub fn verify(public_key: &[u8], message_hash: &Hash256, signature: &[u8]) -> bool {
    let Ok(public_key) = PublicKey::from_slice(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(signature) else {
        return false;
    };
    let secp = Secp256k1::verification_only();
    let message = Message::from_digest(*message_hash.as_bytes());
    secp.verify_ecdsa(&message, &signature, &public_key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash256;

    #[test]
    fn test_keypair_generation() {
        let kp = KeyPair::generate();

        assert_eq!(kp.pubkey_bytes().len(), 33); // Compressed pubkey
        assert_eq!(kp.address, derive_address(&kp.public_key));
        assert_eq!(kp.address.to_pubkey_hash().unwrap(), kp.pubkey_hash());
    }

    #[test]
    fn test_address_derivation_is_deterministic() {
        let kp = KeyPair::from_secret_bytes(&[0x11; 32]).unwrap();
        let again = KeyPair::from_secret_bytes(&[0x11; 32]).unwrap();
        assert_eq!(kp.address, again.address);
        assert!(kp.address.as_str().starts_with('1'));
    }

    #[test]
    fn test_address_conversion() {
        let hash = [0x12; 20];
        let addr = Address::from_pubkey_hash(&hash);

        let decoded = addr.to_pubkey_hash().unwrap();
        assert_eq!(hash, decoded);
        assert_eq!(addr.as_str().parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn test_address_rejects_bad_checksum() {
        let addr = Address::from_pubkey_hash(&[0x12; 20]).to_string();
        let mut corrupted: Vec<char> = addr.chars().collect();
        let last = corrupted.len() - 1;
        corrupted[last] = if corrupted[last] == '1' { '2' } else { '1' };
        let corrupted: String = corrupted.into_iter().collect();

        assert!(matches!(
            corrupted.parse::<Address>(),
            Err(KeyError::InvalidAddress(_))
        ));
        assert!("not-an-address".parse::<Address>().is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let msg = hash256(b"spend");

        let sig = kp.sign(&msg);
        assert!(verify(&kp.pubkey_bytes(), &msg, &sig));
        assert!(!verify(&kp.pubkey_bytes(), &hash256(b"other"), &sig));
    }

    #[test]
    fn test_signatures_are_deterministic() {
        let kp = KeyPair::from_secret_bytes(&[0x22; 32]).unwrap();
        let msg = hash256(b"same message");
        assert_eq!(kp.sign(&msg), kp.sign(&msg));

        let raw = sign(&[0x22; 32], &msg).unwrap();
        assert_eq!(raw.serialize_der().to_vec(), kp.sign(&msg));
    }

    #[test]
    fn test_invalid_secret_rejected() {
        let msg = hash256(b"x");
        assert!(matches!(sign(&[0u8; 32], &msg), Err(KeyError::InvalidKey(_))));
        assert!(matches!(sign(&[0xff; 32], &msg), Err(KeyError::InvalidKey(_))));
        assert!(KeyPair::from_secret_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_verify_never_panics_on_garbage() {
        let msg = hash256(b"x");
        assert!(!verify(&[], &msg, &[]));
        assert!(!verify(&[2u8; 33], &msg, &[0x30, 0x01]));
        let kp = KeyPair::generate();
        assert!(!verify(&kp.pubkey_bytes(), &msg, &[1, 2, 3]));
    }
}
