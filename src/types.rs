//! Core types for the pool client
//!
//! Block header, nonce and DAG element types shared by the share pipeline,
//! with canonical RLP encodings and the serialization views the blob store
//! relies on.

use ethereum_types::{Address, Bloom, H256, H64, U256};
use rlp::RlpStream;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Keccak-256 convenience wrapper used across the proof pipeline
pub(crate) fn keccak256(data: &[u8]) -> H256 {
    H256::from_slice(&Keccak256::digest(data))
}

/// Proof-of-work nonce (8 bytes, big-endian on the wire)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Nonce(pub u64);

impl Nonce {
    /// Create a new nonce
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the nonce value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Convert to bytes (big-endian, Ethereum block nonce convention)
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Big-endian H64 view used by the seal RLP
    pub fn to_h64(&self) -> H64 {
        H64::from(self.to_be_bytes())
    }

    /// Nonce as an unsigned big integer, for counter composition
    pub fn to_u256(&self) -> U256 {
        U256::from(self.0)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Solution strength reported by the miner-facing endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolutionState {
    /// Meets the pool share difficulty only
    Partial,
    /// Also meets the block difficulty, i.e. a valid block
    Full,
}

impl SolutionState {
    /// Wire representation (small integer, stable across sessions)
    pub fn as_u8(&self) -> u8 {
        match self {
            SolutionState::Partial => 1,
            SolutionState::Full => 2,
        }
    }

    /// Parse the wire representation
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(SolutionState::Partial),
            2 => Some(SolutionState::Full),
            _ => None,
        }
    }
}

impl Serialize for SolutionState {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for SolutionState {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        SolutionState::from_u8(value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid solution state {}", value)))
    }
}

/// Block template the miner worked on: the 13 header fields that enter the
/// nonce-free RLP, in canonical order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent_hash: H256,
    pub uncle_hash: H256,
    /// Pool contract address; shares mined for another contract are rejected
    pub coinbase: Address,
    pub state_root: H256,
    pub tx_root: H256,
    pub receipt_root: H256,
    pub bloom: Bloom,
    pub difficulty: U256,
    pub number: U256,
    pub gas_limit: U256,
    pub gas_used: U256,
    pub time: U256,
    pub extra: Vec<u8>,
}

impl BlockHeader {
    /// Canonical RLP of the 13 fields, without nonce and mix digest.
    pub fn rlp_without_nonce(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(13);
        self.append_base_fields(&mut stream);
        stream.out().to_vec()
    }

    /// Keccak-256 of the nonce-free RLP; the PoW input hash.
    pub fn hash_no_nonce(&self) -> H256 {
        keccak256(&self.rlp_without_nonce())
    }

    /// Full 15-field sealed RLP including mix digest and nonce.
    pub fn seal_rlp(&self, nonce: Nonce, mix_digest: H256) -> Vec<u8> {
        let mut stream = RlpStream::new_list(15);
        self.append_base_fields(&mut stream);
        stream.append(&mix_digest);
        stream.append(&nonce.to_h64());
        stream.out().to_vec()
    }

    /// Hash of the sealed header; identifies the exact block candidate.
    pub fn seal_hash(&self, nonce: Nonce, mix_digest: H256) -> H256 {
        keccak256(&self.seal_rlp(nonce, mix_digest))
    }

    /// Header timestamp in seconds, as the repository orders shares by it.
    pub fn timestamp(&self) -> u64 {
        self.time.low_u64()
    }

    /// Block number as u64 for epoch arithmetic.
    pub fn number_u64(&self) -> u64 {
        self.number.low_u64()
    }

    fn append_base_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.parent_hash);
        stream.append(&self.uncle_hash);
        stream.append(&self.coinbase);
        stream.append(&self.state_root);
        stream.append(&self.tx_root);
        stream.append(&self.receipt_root);
        stream.append(&self.bloom);
        stream.append(&self.difficulty);
        stream.append(&self.number);
        stream.append(&self.gas_limit);
        stream.append(&self.gas_used);
        stream.append(&self.time);
        stream.append(&self.extra);
    }
}

/// One 128-byte Ethash dataset element
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Word(pub [u8; 128]);

impl Word {
    /// Number of bytes per dataset element
    pub const SIZE: usize = 128;

    /// Split into four 256-bit big-endian limbs, the `uint256[4]` the
    /// contract receives per opened element.
    pub fn to_uint256_array(&self) -> [U256; 4] {
        let mut out = [U256::zero(); 4];
        for (i, limb) in out.iter_mut().enumerate() {
            *limb = U256::from_big_endian(&self.0[i * 32..(i + 1) * 32]);
        }
        out
    }
}

impl From<[u8; 128]> for Word {
    fn from(bytes: [u8; 128]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word(0x{}..)", hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlp::Rlp;

    fn sample_header() -> BlockHeader {
        BlockHeader {
            parent_hash: H256::repeat_byte(0x11),
            coinbase: Address::repeat_byte(0x22),
            difficulty: U256::from(131_072u64),
            number: U256::from(42u64),
            gas_limit: U256::from(8_000_000u64),
            time: U256::from(1_500_000_000u64),
            extra: b"pool".to_vec(),
            ..Default::default()
        }
    }

    #[test]
    fn test_nonce_bytes() {
        let nonce = Nonce::new(0x0102030405060708);
        assert_eq!(
            nonce.to_be_bytes(),
            [1, 2, 3, 4, 5, 6, 7, 8],
            "block nonces are big-endian"
        );
        assert_eq!(nonce.to_string(), "0102030405060708");
        assert_eq!(nonce.to_u256(), U256::from(0x0102030405060708u64));
    }

    #[test]
    fn test_solution_state_wire_values() {
        assert_eq!(SolutionState::Partial.as_u8(), 1);
        assert_eq!(SolutionState::Full.as_u8(), 2);
        assert_eq!(SolutionState::from_u8(2), Some(SolutionState::Full));
        assert_eq!(SolutionState::from_u8(0), None);
        assert_eq!(SolutionState::from_u8(3), None);
    }

    #[test]
    fn test_rlp_without_nonce_is_13_items() {
        let header = sample_header();
        let encoded = header.rlp_without_nonce();
        let rlp = Rlp::new(&encoded);
        assert_eq!(rlp.item_count().unwrap(), 13);
        let number: U256 = rlp.val_at(8).unwrap();
        assert_eq!(number, U256::from(42u64));
        let extra: Vec<u8> = rlp.val_at(12).unwrap();
        assert_eq!(extra, b"pool".to_vec());
    }

    #[test]
    fn test_seal_rlp_extends_base() {
        let header = sample_header();
        let nonce = Nonce::new(7);
        let mix = H256::repeat_byte(0x33);
        let sealed = header.seal_rlp(nonce, mix);
        let rlp = Rlp::new(&sealed);
        assert_eq!(rlp.item_count().unwrap(), 15);
        let mix_out: H256 = rlp.val_at(13).unwrap();
        assert_eq!(mix_out, mix);
        let nonce_out: H64 = rlp.val_at(14).unwrap();
        assert_eq!(nonce_out, nonce.to_h64());
    }

    #[test]
    fn test_hashes_are_deterministic_and_distinct() {
        let header = sample_header();
        assert_eq!(header.hash_no_nonce(), header.hash_no_nonce());
        let sealed = header.seal_hash(Nonce::new(1), H256::zero());
        assert_ne!(sealed, header.hash_no_nonce());
        assert_ne!(sealed, header.seal_hash(Nonce::new(2), H256::zero()));
    }

    #[test]
    fn test_word_uint256_split() {
        let mut bytes = [0u8; 128];
        bytes[31] = 1; // limb 0 == 1
        bytes[32] = 0xff; // limb 1 has its top byte set
        let word = Word(bytes);
        let limbs = word.to_uint256_array();
        assert_eq!(limbs[0], U256::one());
        assert_eq!(limbs[1], U256::from(0xff) << 248);
        assert_eq!(limbs[2], U256::zero());
        assert_eq!(limbs[3], U256::zero());
    }

    #[test]
    fn test_header_serde_roundtrip() {
        let header = sample_header();
        let bytes = bincode::serialize(&header).unwrap();
        let back: BlockHeader = bincode::deserialize(&bytes).unwrap();
        assert_eq!(header, back);
    }
}
