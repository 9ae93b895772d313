//! Ledger configuration

use crate::constants::*;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ledger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Path to the database directory.
    pub path: PathBuf,

    /// Stake declared by the genesis block.
    pub genesis_stake: i64,

    /// Coinbase reward.
    pub subsidy: i64,

    /// Coinbase data of the genesis block.
    pub genesis_coinbase_data: String,

    /// Refuse to append blocks the stake gate rejects. When off, the gate
    /// outcome is only logged.
    pub enforce_stake_gate: bool,

    /// Flush to disk after every committed batch.
    pub flush_on_commit: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/ledger.db"),
            genesis_stake: GENESIS_STAKE,
            subsidy: SUBSIDY,
            genesis_coinbase_data: GENESIS_COINBASE_DATA.to_string(),
            enforce_stake_gate: false,
            flush_on_commit: true,
        }
    }
}

impl LedgerConfig {
    /// Default configuration rooted at `path`
    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
