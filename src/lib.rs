//! Ethash pool client core
//!
//! Aggregates proof-of-work shares produced by a local miner, proves them
//! against the Ethash DAG, batches them into Merkle-rooted claims and keeps
//! the whole pipeline crash-safe on disk:
//! - Durable share repository with the timestamp/counter ordering rule
//! - Claim lifecycle: build, seal, submit-tracking
//! - Sparse Merkle proofs over the epoch DAG with selective branch storage
//! - Typed blob storage with per-key atomic replace
//!
//! The RPC transport, keystore, miner-facing server and submission
//! orchestrator live outside this crate and talk to it through the types
//! re-exported here.

pub mod claim;
pub mod config;
pub mod dag;
pub mod error;
pub mod ethash;
pub mod logging;
pub mod mtree;
pub mod repo;
pub mod share;
pub mod storage;
pub mod types;

pub use claim::Claim;
pub use config::PoolConfig;
pub use dag::{CancelToken, Dataset};
pub use error::{Error, Result};
pub use repo::{Prompt, StdinPrompt, TimestampClaimRepo};
pub use share::Share;
pub use storage::{FileStorage, MemoryStorage, PersistentStorage};
pub use types::{BlockHeader, Nonce, SolutionState, Word};

/// Application information
pub const APP_NAME: &str = "ethpool-client";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
