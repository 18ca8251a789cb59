// Wallet: local keys and transaction building

mod keystore;
mod tx_builder;

pub use keystore::Keystore;
pub use tx_builder::TransactionBuilder;

use crate::core::{Address, Amount, KeyError};
use thiserror::Error;

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("keystore I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("keystore file is malformed: {0}")]
    Format(#[from] serde_json::Error),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("address {0} is not in the keystore")]
    UnknownAddress(Address),

    #[error("keystore has no addresses")]
    NoAddress,

    #[error("insufficient funds: have {available}, need {needed}")]
    InsufficientFunds { available: Amount, needed: Amount },

    #[error("payment amount must be positive")]
    ZeroAmount,
}
