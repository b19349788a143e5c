//! Proof-of-work shares
//!
//! A share is one miner solution meeting the pool difficulty: the block
//! template it was mined on, the nonce and mix digest, and the solution
//! strength. Each share can grow a Merkle proof over the epoch DAG tying
//! its nonce to the dataset elements hashimoto touched.

use crate::dag::{self, CancelToken, Dataset};
use crate::error::{Error, Result};
use crate::ethash;
use crate::mtree::{DagMerkleTree, SpHash};
use crate::types::{BlockHeader, Nonce, SolutionState};
use ethereum_types::{Address, H256, U256};
use std::fmt;
use tracing::debug;

/// One candidate solution submitted by the local miner
#[derive(Clone)]
pub struct Share {
    header: BlockHeader,
    nonce: Nonce,
    mix_digest: H256,
    share_difficulty: U256,
    miner: Address,
    solution_state: SolutionState,
    /// Built lazily by the orchestrator, never persisted
    dag_tree: Option<DagMerkleTree>,
}

impl Share {
    pub fn new(
        header: BlockHeader,
        nonce: Nonce,
        mix_digest: H256,
        share_difficulty: U256,
        miner: Address,
        solution_state: SolutionState,
    ) -> Self {
        Self {
            header,
            nonce,
            mix_digest,
            share_difficulty,
            miner,
            solution_state,
            dag_tree: None,
        }
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn nonce(&self) -> Nonce {
        self.nonce
    }

    pub fn mix_digest(&self) -> H256 {
        self.mix_digest
    }

    /// Block difficulty of the template (not the pool share difficulty)
    pub fn difficulty(&self) -> U256 {
        self.header.difficulty
    }

    pub fn share_difficulty(&self) -> U256 {
        self.share_difficulty
    }

    pub fn miner_address(&self) -> Address {
        self.miner
    }

    pub fn solution_state(&self) -> SolutionState {
        self.solution_state
    }

    /// True if the share also satisfies the block difficulty, i.e. it is a
    /// valid block the orchestrator may fast-path.
    pub fn full_solution(&self) -> bool {
        self.solution_state == SolutionState::Full
    }

    pub fn number_u64(&self) -> u64 {
        self.header.number_u64()
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp()
    }

    pub fn hash_no_nonce(&self) -> H256 {
        self.header.hash_no_nonce()
    }

    pub fn rlp_header_without_nonce(&self) -> Vec<u8> {
        self.header.rlp_without_nonce()
    }

    /// Unique identifier inside the repository: sealed header hash plus
    /// nonce.
    pub fn id(&self) -> String {
        format!(
            "{:#x}-{}",
            self.header.seal_hash(self.nonce, self.mix_digest),
            self.nonce.value()
        )
    }

    /// Per-claim ordering key and contract-side anti-replay token:
    /// `(timestamp << 64) | nonce`.
    pub fn counter(&self) -> U256 {
        (U256::from(self.timestamp()) << 64) | self.nonce.to_u256()
    }

    /// Compact 16-byte identifier: low half of the PoW hash.
    pub fn hash(&self) -> SpHash {
        let full = self.hash_no_nonce();
        let mut out = [0u8; SpHash::SIZE];
        out.copy_from_slice(&full.as_bytes()[SpHash::SIZE..]);
        SpHash(out)
    }

    /// Whether the DAG proof tree has been built
    pub fn has_dag_tree(&self) -> bool {
        self.dag_tree.is_some()
    }

    /// Build the Merkle proof over the epoch DAG for this share's
    /// verification indices. Idempotent; a second call is a no-op. Blocks
    /// for minutes when the epoch's dataset must first be materialized, so
    /// the orchestrator calls this outside any repository lock.
    pub fn build_dag_tree(&mut self, dataset: &Dataset, cancel: &CancelToken) -> Result<()> {
        if self.dag_tree.is_some() {
            return Ok(());
        }
        let number = self.number_u64();
        let indices = dataset.verification_indices(number, self.hash_no_nonce(), self.nonce);
        debug!(share = %self.id(), count = indices.len(), "verification indices computed");
        dataset.ensure(number, cancel)?;
        let rows = Dataset::size(number) / ethash::MIX_BYTES as u64;
        let tree = dag::build_proof_tree(dataset, Dataset::epoch(number), &indices, rows, cancel)?;
        self.dag_tree = Some(tree);
        Ok(())
    }

    /// Opened DAG elements as flat 256-bit limbs, four per element.
    pub fn dag_element_array(&self) -> Result<Vec<U256>> {
        let tree = self.tree()?;
        let mut out = Vec::new();
        for word in tree.all_dag_elements()? {
            out.extend_from_slice(&word.to_uint256_array());
        }
        Ok(out)
    }

    /// Concatenated proof branches as 256-bit words, two path hashes each.
    pub fn dag_proof_array(&self) -> Result<Vec<U256>> {
        let tree = self.tree()?;
        Ok(tree
            .all_branches_array()?
            .iter()
            .map(|b| b.to_u256())
            .collect())
    }

    fn tree(&self) -> Result<&DagMerkleTree> {
        self.dag_tree.as_ref().ok_or_else(|| Error::ProofNotBuilt {
            share_id: self.id(),
        })
    }

    #[cfg(test)]
    pub(crate) fn attach_tree(&mut self, tree: DagMerkleTree) {
        self.dag_tree = Some(tree);
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("id", &self.id())
            .field("timestamp", &self.timestamp())
            .field("miner", &self.miner)
            .field("state", &self.solution_state)
            .finish()
    }
}
