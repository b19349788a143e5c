//! Error handling for the pool client core
//!
//! One flat error type covering share admission, claim construction, the
//! DAG proof pipeline and persistence, with enough context to report back
//! to the submission orchestrator.

use ethereum_types::{Address, U256};
use thiserror::Error;

/// Result type alias for pool client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the pool client core
#[derive(Error, Debug)]
pub enum Error {
    /// Share was mined against a different pool contract
    #[error("inconsistent coinbase address: share({share:#x}) vs. expected({expected:#x})")]
    InconsistentCoinbase { share: Address, expected: Address },

    /// Share difficulty does not match the configured pool difficulty
    #[error("inconsistent difficulty: expected {expected:#x}, got {share:#x}")]
    InconsistentDifficulty { share: U256, expected: U256 },

    /// Share with the same header hash and nonce is already pooled
    #[error("duplicated share: {share_id}")]
    DuplicateShare { share_id: String },

    /// Share would break the monotone counter order inside a claim
    #[error("share counter {counter:#x} is not above the claim's last counter")]
    OutOfOrderShare { counter: U256 },

    /// Claims only hold shares of a single miner and difficulty
    #[error("share does not belong in this claim: {message}")]
    ForeignShare { message: String },

    /// DAG proof requested before the Merkle tree was built
    #[error("DAG proof not built for share {share_id}")]
    ProofNotBuilt { share_id: String },

    /// Merkle tree API misuse (registration after insert, gaps, ...)
    #[error("merkle tree error: {message}")]
    Tree { message: String },

    /// Persisted key absent; normal on first run
    #[error("no persisted state under key {key}")]
    NotFound { key: String },

    /// Persisted blob exists but does not decode
    #[error("corrupt persisted state under key {key}: {message}")]
    CorruptState { key: String, message: String },

    /// Storage backend I/O failure
    #[error("storage error for key {key}: {message}")]
    Storage { key: String, message: String },

    /// DAG file or directory problem outside the retry loop
    #[error("DAG I/O error at {path}: {message}")]
    DagIo { path: String, message: String },

    /// Long-running DAG work was cancelled via the token
    #[error("operation was cancelled: {operation}")]
    Cancelled { operation: String },

    /// User chose to abort at the session reconciliation prompt
    #[error("aborted by user during session reconciliation")]
    Aborted,

    /// Configuration errors
    #[error("configuration error: {message}")]
    Config { message: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Serialization errors from the blob store encoding
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

impl Error {
    /// Create a claim-membership error
    pub fn foreign_share(message: impl Into<String>) -> Self {
        Self::ForeignShare {
            message: message.into(),
        }
    }

    /// Create a merkle tree error
    pub fn tree(message: impl Into<String>) -> Self {
        Self::Tree {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a DAG I/O error
    pub fn dag_io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DagIo {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// True for share rejections the ingest path reports back to the miner
    /// without touching repository state.
    pub fn is_share_rejection(&self) -> bool {
        matches!(
            self,
            Error::InconsistentCoinbase { .. }
                | Error::InconsistentDifficulty { .. }
                | Error::DuplicateShare { .. }
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::InconsistentCoinbase { .. } => "coinbase",
            Error::InconsistentDifficulty { .. } => "difficulty",
            Error::DuplicateShare { .. } => "duplicate",
            Error::OutOfOrderShare { .. } => "claim_order",
            Error::ForeignShare { .. } => "claim_membership",
            Error::ProofNotBuilt { .. } => "proof",
            Error::Tree { .. } => "mtree",
            Error::NotFound { .. } => "not_found",
            Error::CorruptState { .. } => "corrupt_state",
            Error::Storage { .. } => "storage",
            Error::DagIo { .. } => "dag_io",
            Error::Cancelled { .. } => "cancelled",
            Error::Aborted => "aborted",
            Error::Config { .. } => "config",
            Error::Io(_) => "io",
            Error::Yaml(_) => "yaml",
            Error::Encoding(_) => "encoding",
        }
    }
}
