//! Sparse Merkle tree over the Ethash dataset
//!
//! Built in a single streaming pass over all `dataset_size / 128` elements.
//! Only two kinds of nodes survive the pass: nodes sitting on the path of a
//! pre-registered verification index (plus their siblings, which form the
//! opening branches) and nodes of one pre-registered "stored level" that
//! serves as a checkpoint for later opens of the same epoch.
//!
//! Node hashes are 16 bytes (low half of keccak-256) so that two path
//! hashes pack into one 256-bit word on the wire.

use crate::error::{Error, Result};
use crate::types::{keccak256, Word};
use ethereum_types::U256;
use std::collections::HashMap;
use std::fmt;

/// 16-byte Merkle node hash
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SpHash(pub [u8; 16]);

impl SpHash {
    /// Number of bytes per node hash
    pub const SIZE: usize = 16;
}

impl fmt::Debug for SpHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpHash(0x{})", hex::encode(self.0))
    }
}

/// Two consecutive path hashes packed into one 256-bit word
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchElement(pub [u8; 32]);

impl BranchElement {
    /// Pack two node hashes; `first` occupies the high-order bytes.
    pub fn pack(first: SpHash, second: SpHash) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..SpHash::SIZE].copy_from_slice(&first.0);
        bytes[SpHash::SIZE..].copy_from_slice(&second.0);
        Self(bytes)
    }

    /// Big-endian integer view for ABI encoding
    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }
}

impl fmt::Debug for BranchElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BranchElement(0x{})", hex::encode(self.0))
    }
}

fn low_half(hash: ethereum_types::H256) -> SpHash {
    let mut out = [0u8; SpHash::SIZE];
    out.copy_from_slice(&hash.as_bytes()[SpHash::SIZE..]);
    SpHash(out)
}

/// Hash of a 128-byte dataset element
pub fn leaf_hash(word: &Word) -> SpHash {
    low_half(keccak256(&word.0))
}

/// Hash of two child nodes
pub fn node_hash(left: &SpHash, right: &SpHash) -> SpHash {
    let mut buf = [0u8; 2 * SpHash::SIZE];
    buf[..SpHash::SIZE].copy_from_slice(&left.0);
    buf[SpHash::SIZE..].copy_from_slice(&right.0);
    low_half(keccak256(&buf))
}

/// A subtree root awaiting its right sibling during the streaming pass
#[derive(Clone, Copy)]
struct PendingNode {
    level: u32,
    hash: SpHash,
    /// Leaf range [start, end) this subtree covers
    start: u64,
    end: u64,
}

/// Streaming sparse Merkle tree
#[derive(Clone, Default)]
pub struct DagMerkleTree {
    /// Verification indices in registration order (duplicates preserved)
    reg_order: Vec<u32>,
    /// Sorted unique registered indices for range queries
    registered: Vec<u32>,
    elements: HashMap<u32, Word>,
    branches: HashMap<u32, Vec<SpHash>>,
    stack: Vec<PendingNode>,
    next_index: u64,
    stored_level: Option<u32>,
    stored_nodes: Vec<SpHash>,
    root: Option<SpHash>,
}

impl DagMerkleTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add leaf indices that must be openable after `finalize`. Must be
    /// called before the first `insert`.
    pub fn register_index(&mut self, indices: &[u32]) -> Result<()> {
        self.ensure_not_started("register_index")?;
        self.reg_order.extend_from_slice(indices);
        self.registered = self.reg_order.clone();
        self.registered.sort_unstable();
        self.registered.dedup();
        Ok(())
    }

    /// Keep every node at level `depth - retain` above the leaves as an
    /// epoch checkpoint. `depth` is the tree height in bits. Only nodes
    /// completed during the streaming pass are checkpointed; the partial
    /// right spine is not.
    pub fn register_stored_level(&mut self, depth: u32, retain: u32) -> Result<()> {
        self.ensure_not_started("register_stored_level")?;
        self.stored_level = Some(depth.saturating_sub(retain));
        Ok(())
    }

    /// Feed the 128-byte word for leaf `index`. Indices must be strictly
    /// increasing from 0.
    pub fn insert(&mut self, word: Word, index: u32) -> Result<()> {
        if self.root.is_some() {
            return Err(Error::tree("insert after finalize"));
        }
        if u64::from(index) != self.next_index {
            return Err(Error::tree(format!(
                "non-sequential insert: expected {}, got {}",
                self.next_index, index
            )));
        }
        if self.registered.binary_search(&index).is_ok() {
            self.elements.insert(index, word);
            self.branches.entry(index).or_default();
        }
        let node = PendingNode {
            level: 0,
            hash: leaf_hash(&word),
            start: u64::from(index),
            end: u64::from(index) + 1,
        };
        self.note_stored(&node);
        self.push_node(node, true);
        self.next_index += 1;
        Ok(())
    }

    /// Complete the upper levels from retained nodes and fix the root.
    /// Leaves on the partial right spine are paired with themselves so that
    /// every registered leaf ends up with exactly `height` siblings.
    pub fn finalize(&mut self) -> Result<()> {
        if self.root.is_some() {
            return Ok(());
        }
        if self.next_index == 0 {
            return Err(Error::tree("finalize on empty tree"));
        }
        if let Some(&max) = self.registered.last() {
            if u64::from(max) >= self.next_index {
                return Err(Error::tree(format!(
                    "registered index {} beyond inserted leaves {}",
                    max, self.next_index
                )));
            }
        }
        let mut cur = match self.stack.pop() {
            Some(node) => node,
            None => return Err(Error::tree("no pending nodes to finalize")),
        };
        while let Some(top) = self.stack.pop() {
            while top.level > cur.level {
                cur = self.combine_self(cur);
            }
            cur = self.combine(top, cur, false);
        }
        self.root = Some(cur.hash);
        Ok(())
    }

    /// Merkle root; available after `finalize`.
    pub fn root(&self) -> Result<SpHash> {
        self.root.ok_or_else(|| Error::tree("root requested before finalize"))
    }

    /// Registered leaves in registration order.
    pub fn all_dag_elements(&self) -> Result<Vec<Word>> {
        self.ensure_finalized()?;
        self.reg_order
            .iter()
            .map(|i| {
                self.elements
                    .get(i)
                    .copied()
                    .ok_or_else(|| Error::tree(format!("no element captured for index {}", i)))
            })
            .collect()
    }

    /// Opening branch (sibling hashes bottom-up) per registered leaf, in
    /// registration order.
    pub fn all_branches(&self) -> Result<Vec<Vec<SpHash>>> {
        self.ensure_finalized()?;
        self.reg_order
            .iter()
            .map(|i| {
                self.branches
                    .get(i)
                    .cloned()
                    .ok_or_else(|| Error::tree(format!("no branch recorded for index {}", i)))
            })
            .collect()
    }

    /// All branches concatenated and packed two hashes per 256-bit word,
    /// the shape the claim contract consumes.
    pub fn all_branches_array(&self) -> Result<Vec<BranchElement>> {
        let mut out = Vec::new();
        for branch in self.all_branches()? {
            for pair in branch.chunks(2) {
                let second = pair.get(1).copied().unwrap_or_default();
                out.push(BranchElement::pack(pair[0], second));
            }
        }
        Ok(out)
    }

    /// Checkpoint nodes of the stored level, left to right.
    pub fn stored_level_nodes(&self) -> &[SpHash] {
        &self.stored_nodes
    }

    /// Stored level (distance from the leaves), if registered.
    pub fn stored_level(&self) -> Option<u32> {
        self.stored_level
    }

    fn ensure_not_started(&self, operation: &str) -> Result<()> {
        if self.next_index > 0 || self.root.is_some() {
            return Err(Error::tree(format!("{} after first insert", operation)));
        }
        Ok(())
    }

    fn ensure_finalized(&self) -> Result<()> {
        if self.root.is_none() {
            return Err(Error::tree("tree not finalized"));
        }
        Ok(())
    }

    fn push_node(&mut self, mut node: PendingNode, record_stored: bool) {
        while let Some(top) = self.stack.last() {
            if top.level != node.level {
                break;
            }
            let left = self.stack.pop().expect("checked non-empty");
            node = self.combine(left, node, record_stored);
        }
        self.stack.push(node);
    }

    fn combine(&mut self, left: PendingNode, right: PendingNode, record_stored: bool) -> PendingNode {
        for index in self.registered_in(left.start, left.end) {
            if let Some(branch) = self.branches.get_mut(&index) {
                branch.push(right.hash);
            }
        }
        for index in self.registered_in(right.start, right.end) {
            if let Some(branch) = self.branches.get_mut(&index) {
                branch.push(left.hash);
            }
        }
        let parent = PendingNode {
            level: left.level + 1,
            hash: node_hash(&left.hash, &right.hash),
            start: left.start,
            end: right.end,
        };
        if record_stored {
            self.note_stored(&parent);
        }
        parent
    }

    /// Pair an unpaired right-spine node with itself. Such a node always
    /// sits at an even position of its level, so verification keeps the
    /// plain index-bit walk.
    fn combine_self(&mut self, node: PendingNode) -> PendingNode {
        for index in self.registered_in(node.start, node.end) {
            if let Some(branch) = self.branches.get_mut(&index) {
                branch.push(node.hash);
            }
        }
        PendingNode {
            level: node.level + 1,
            hash: node_hash(&node.hash, &node.hash),
            start: node.start,
            end: node.end,
        }
    }

    fn note_stored(&mut self, node: &PendingNode) {
        if self.stored_level == Some(node.level) {
            self.stored_nodes.push(node.hash);
        }
    }

    fn registered_in(&self, start: u64, end: u64) -> Vec<u32> {
        let lo = self.registered.partition_point(|&i| u64::from(i) < start);
        let hi = self.registered.partition_point(|&i| u64::from(i) < end);
        self.registered[lo..hi].to_vec()
    }
}

/// Hash `word` up `branch` and compare against `root`. Used by tests and
/// by claim self-verification before submission.
pub fn verify_branch(mut index: u64, word: &Word, branch: &[SpHash], root: SpHash) -> bool {
    let mut hash = leaf_hash(word);
    for sibling in branch {
        hash = if index & 1 == 0 {
            node_hash(&hash, sibling)
        } else {
            node_hash(sibling, &hash)
        };
        index >>= 1;
    }
    hash == root
}
