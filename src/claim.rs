//! Claims: Merkle-evidenced share batches
//!
//! A claim is an ordered batch of shares submitted together to the pool
//! contract. Counters must be strictly increasing in claim order so the
//! contract can bind the batch to a canonical ordering and reject replays;
//! the share-index evidence is the integer Merkle root the orchestrator
//! computes over the counters once the batch is final.

use crate::error::{Error, Result};
use crate::share::Share;
use ethereum_types::{H256, U256};

/// Parallel argument vectors for the on-chain claim submission
#[derive(Debug, Clone, Default)]
pub struct ClaimArgs {
    pub rlp_headers: Vec<Vec<u8>>,
    pub nonces: Vec<U256>,
    pub mix_digests: Vec<H256>,
    pub counters: Vec<U256>,
    pub dag_elements: Vec<Vec<U256>>,
    pub dag_proofs: Vec<Vec<U256>>,
}

/// An ordered batch of shares awaiting submission
#[derive(Clone, Debug, Default)]
pub struct Claim {
    shares: Vec<Share>,
    share_index: U256,
}

impl Claim {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a claim from its persisted parts; the stored order is
    /// already canonical.
    pub(crate) fn from_parts(shares: Vec<Share>, share_index: U256) -> Self {
        Self {
            shares,
            share_index,
        }
    }

    /// Append a share. All shares of a claim belong to one miner at one
    /// difficulty, and counters must strictly increase.
    pub fn add_share(&mut self, share: Share) -> Result<()> {
        if let Some(last) = self.shares.last() {
            if share.miner_address() != last.miner_address() {
                return Err(Error::foreign_share(format!(
                    "miner {:#x} does not match claim miner {:#x}",
                    share.miner_address(),
                    last.miner_address()
                )));
            }
            if share.share_difficulty() != last.share_difficulty() {
                return Err(Error::foreign_share(format!(
                    "difficulty {:#x} does not match claim difficulty {:#x}",
                    share.share_difficulty(),
                    last.share_difficulty()
                )));
            }
            if share.counter() <= last.counter() {
                return Err(Error::OutOfOrderShare {
                    counter: share.counter(),
                });
            }
        }
        self.shares.push(share);
        Ok(())
    }

    pub fn num_shares(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn get_share(&self, index: usize) -> Option<&Share> {
        self.shares.get(index)
    }

    pub fn shares(&self) -> impl Iterator<Item = &Share> {
        self.shares.iter()
    }

    /// Mutable share access for the orchestrator's proof-building pass
    pub fn shares_mut(&mut self) -> impl Iterator<Item = &mut Share> {
        self.shares.iter_mut()
    }

    /// Counter of the last admitted share, the admission floor for the next
    pub fn last_counter(&self) -> Option<U256> {
        self.shares.last().map(|s| s.counter())
    }

    /// Share counters in claim order
    pub fn counters(&self) -> Vec<U256> {
        self.shares.iter().map(|s| s.counter()).collect()
    }

    /// Set the Merkle root over the share counters
    pub fn set_evidence(&mut self, share_index: U256) {
        self.share_index = share_index;
    }

    /// The Merkle root over the share counters, zero until set
    pub fn evidence(&self) -> U256 {
        self.share_index
    }

    /// Assemble the parallel vectors the contract call needs. Requires
    /// every share's DAG proof to have been built.
    pub fn submission_args(&self) -> Result<ClaimArgs> {
        let mut args = ClaimArgs::default();
        for share in &self.shares {
            args.rlp_headers.push(share.rlp_header_without_nonce());
            args.nonces.push(share.nonce().to_u256());
            args.mix_digests.push(share.mix_digest());
            args.counters.push(share.counter());
            args.dag_elements.push(share.dag_element_array()?);
            args.dag_proofs.push(share.dag_proof_array()?);
        }
        Ok(args)
    }
}
