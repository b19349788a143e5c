//! Pool client configuration
//!
//! Settings the core consumes: pool contract, miner account, share
//! difficulty, directories and batching thresholds. Loaded from a YAML
//! file by the front-end; the flag parsing itself lives outside this
//! crate.

use crate::error::{Error, Result};
use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_claim_threshold() -> u64 {
    10
}

fn default_batch_threshold() -> usize {
    4
}

fn default_submit_interval_secs() -> u64 {
    300
}

fn default_dag_dir() -> PathBuf {
    PathBuf::from(".ethash")
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("pool-state")
}

/// Core configuration for one pool session. `contract`, `miner` and
/// `share_difficulty` are immutable for the session; changing them across
/// runs triggers reconciliation of persisted shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool contract address; block templates must pay out to it
    pub contract: Address,

    /// Miner account credited for submitted claims
    pub miner: Address,

    /// Pool share difficulty (distinct from the block difficulty)
    pub share_difficulty: U256,

    /// Directory holding the epoch DAG files
    #[serde(default = "default_dag_dir")]
    pub dag_dir: PathBuf,

    /// Directory for the persisted repository state
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Minimum claimable shares before a claim is built
    #[serde(default = "default_claim_threshold")]
    pub claim_threshold: u64,

    /// Claims per sealed batch
    #[serde(default = "default_batch_threshold")]
    pub batch_threshold: usize,

    /// Seconds between submission rounds when the batch threshold is not hit
    #[serde(default = "default_submit_interval_secs")]
    pub submit_interval_secs: u64,
}

impl PoolConfig {
    /// Load and validate a configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings a session cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.contract.is_zero() {
            return Err(Error::config("pool contract address must be set"));
        }
        if self.miner.is_zero() {
            return Err(Error::config("miner address must be set"));
        }
        if self.share_difficulty.is_zero() {
            return Err(Error::config("share difficulty must be positive"));
        }
        if self.claim_threshold == 0 {
            return Err(Error::config("claim threshold must be at least 1"));
        }
        if self.submit_interval_secs == 0 {
            return Err(Error::config("submit interval must be positive"));
        }
        Ok(())
    }

    /// Submission round interval
    pub fn submit_interval(&self) -> Duration {
        Duration::from_secs(self.submit_interval_secs)
    }
}
