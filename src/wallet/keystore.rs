// Key management

use super::WalletError;
use crate::core::{Address, KeyError, KeyPair};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// On-disk form of one key: the secret in hex plus the address it derives
#[derive(Serialize, Deserialize)]
struct StoredKey {
    #[serde(with = "hex::serde")]
    secret: Vec<u8>,
    address: Address,
}

#[derive(Serialize, Deserialize)]
struct StoredKeystore {
    keys: Vec<StoredKey>,
    default_address: Option<Address>,
}

/// Keystore - manages multiple key pairs
#[derive(Debug, Default)]
pub struct Keystore {
    keys: HashMap<Address, KeyPair>,
    default_address: Option<Address>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a fresh key. The first one becomes the default address.
    pub fn new_address(&mut self) -> Address {
        self.insert(KeyPair::generate())
    }

    /// Add an existing key pair, returning its address
    pub fn insert(&mut self, keypair: KeyPair) -> Address {
        let address = keypair.address.clone();
        if self.default_address.is_none() {
            self.default_address = Some(address.clone());
        }
        self.keys.insert(address.clone(), keypair);
        address
    }

    pub fn get_keypair(&self, address: &Address) -> Option<&KeyPair> {
        self.keys.get(address)
    }

    /// All addresses, sorted
    pub fn list_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.keys.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn default_address(&self) -> Option<&Address> {
        self.default_address.as_ref()
    }

    pub fn set_default(&mut self, address: Address) -> Result<(), WalletError> {
        if !self.keys.contains_key(&address) {
            return Err(WalletError::UnknownAddress(address));
        }
        self.default_address = Some(address);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Write the keystore as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), WalletError> {
        let mut keys: Vec<StoredKey> = self
            .keys
            .values()
            .map(|keypair| StoredKey {
                secret: keypair.secret_bytes().to_vec(),
                address: keypair.address.clone(),
            })
            .collect();
        keys.sort_by(|a, b| a.address.cmp(&b.address));

        let stored = StoredKeystore {
            keys,
            default_address: self.default_address.clone(),
        };
        fs::write(path, serde_json::to_string_pretty(&stored)?)?;
        Ok(())
    }

    /// Read a keystore written by [`Keystore::save`]. Every secret is
    /// re-derived and must reproduce its recorded address.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        let stored: StoredKeystore = serde_json::from_str(&fs::read_to_string(path)?)?;

        let mut keys = HashMap::new();
        for entry in stored.keys {
            let secret: [u8; 32] = entry.secret.as_slice().try_into().map_err(|_| {
                KeyError::InvalidKey(format!("secret is {} bytes", entry.secret.len()))
            })?;
            let keypair = KeyPair::from_secret_bytes(&secret)?;
            if keypair.address != entry.address {
                return Err(KeyError::InvalidKey(format!(
                    "secret does not derive {}",
                    entry.address
                ))
                .into());
            }
            keys.insert(keypair.address.clone(), keypair);
        }

        if let Some(default) = &stored.default_address {
            if !keys.contains_key(default) {
                return Err(WalletError::UnknownAddress(default.clone()));
            }
        }

        Ok(Self {
            keys,
            default_address: stored.default_address,
        })
    }

    /// Load `path` if it exists, otherwise start empty
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WalletError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}
