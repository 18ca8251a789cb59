// Consensus parameters and node configuration

use crate::core::{Amount, Block, COIN};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid parameter: {0}")]
    Invalid(String),
}

/// Consensus constants. Every node on a chain must agree on these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    /// Block subsidy at height 0
    pub initial_reward: Amount,
    /// Blocks between reward halvings
    pub halving_interval: u32,
    /// Blocks between difficulty adjustments
    pub retarget_interval: u32,
    /// Desired seconds between blocks
    pub target_block_time: u32,
    /// Easiest allowed target, compact form
    pub pow_limit_bits: u32,
    /// Target of the genesis block and the first retarget window
    pub initial_bits: u32,
    /// Genesis header timestamp
    pub genesis_timestamp: u32,
    /// Upper bound on transactions per block, coinbase included
    pub max_block_transactions: usize,
    /// Whether a template with only a coinbase may be mined
    pub allow_empty_blocks: bool,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            initial_reward: 50 * COIN,
            halving_interval: 50,
            retarget_interval: 20,
            target_block_time: 10,
            pow_limit_bits: 0x207fffff,
            initial_bits: 0x1f00ffff,
            genesis_timestamp: 1_700_000_000,
            max_block_transactions: 1000,
            allow_empty_blocks: true,
        }
    }
}

impl ChainParams {
    /// Minimum-difficulty parameters; blocks are found in a handful of hashes
    pub fn regtest() -> Self {
        Self {
            initial_bits: 0x207fffff,
            ..Self::default()
        }
    }

    /// The genesis block these parameters define
    pub fn genesis_block(&self) -> Block {
        Block::genesis(self.initial_reward, self.genesis_timestamp, self.initial_bits)
    }

    /// Reject parameter sets the schedules cannot work with
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.halving_interval == 0 {
            return Err(ConfigError::Invalid("halving_interval must be positive".into()));
        }
        if self.retarget_interval < 2 {
            return Err(ConfigError::Invalid("retarget_interval must be at least 2".into()));
        }
        if self.target_block_time == 0 {
            return Err(ConfigError::Invalid("target_block_time must be positive".into()));
        }
        if self.max_block_transactions == 0 {
            return Err(ConfigError::Invalid(
                "max_block_transactions must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for a persistent node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory holding the block database and keystore
    pub data_dir: PathBuf,
    pub params: ChainParams,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            params: ChainParams::default(),
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.params.check()?;
        Ok(config)
    }

    pub fn blocks_path(&self) -> PathBuf {
        self.data_dir.join("blocks")
    }

    pub fn keystore_path(&self) -> PathBuf {
        self.data_dir.join("keystore.json")
    }
}
