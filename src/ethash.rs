//! Ethash algorithm primitives
//!
//! Epoch sizing, seed chain, light-cache generation and the hashimoto mix
//! loop. The pipeline consumes this module for three things: dataset sizes,
//! the verification-index sequence a nonce must open, and on-demand dataset
//! items when materializing the DAG file.

use crate::types::{Nonce, Word};
use byteorder::{ByteOrder, LittleEndian};
use ethereum_types::{H256, U256, U512};
use sha3::{Digest, Keccak256, Keccak512};
use tracing::debug;

/// Blocks per DAG epoch
pub const EPOCH_LENGTH: u64 = 30_000;
/// Bytes per hash item (keccak-512 output)
pub const HASH_BYTES: usize = 64;
/// Bytes per dataset row (mix width)
pub const MIX_BYTES: usize = 128;
/// Ethash dataset revision, part of the DAG file name
pub const REVISION: u32 = 23;

const HASH_WORDS: usize = 16;
const MIX_WORDS: usize = 32;
const DATASET_PARENTS: u32 = 256;
const CACHE_ROUNDS: usize = 3;
const ACCESSES: usize = 64;
const CACHE_BYTES_INIT: u64 = 1 << 24;
const CACHE_BYTES_GROWTH: u64 = 1 << 17;
const DATASET_BYTES_INIT: u64 = 1 << 30;
const DATASET_BYTES_GROWTH: u64 = 1 << 23;

/// Epoch of a block number
pub fn epoch(block_number: u64) -> u64 {
    block_number / EPOCH_LENGTH
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

/// Light cache size in bytes for an epoch: largest size below the linear
/// bound whose 64-byte row count is prime.
pub fn cache_size(epoch: u64) -> u64 {
    let mut size = CACHE_BYTES_INIT + CACHE_BYTES_GROWTH * epoch - HASH_BYTES as u64;
    while !is_prime(size / HASH_BYTES as u64) {
        size -= 2 * HASH_BYTES as u64;
    }
    size
}

/// Full dataset size in bytes for an epoch (prime count of 128-byte rows).
pub fn dataset_size(epoch: u64) -> u64 {
    let mut size = DATASET_BYTES_INIT + DATASET_BYTES_GROWTH * epoch - MIX_BYTES as u64;
    while !is_prime(size / MIX_BYTES as u64) {
        size -= 2 * MIX_BYTES as u64;
    }
    size
}

/// Seed hash of an epoch: keccak-256 chained from 32 zero bytes.
pub fn seed_hash(epoch: u64) -> H256 {
    let mut seed = [0u8; 32];
    for _ in 0..epoch {
        seed = Keccak256::digest(seed).into();
    }
    H256(seed)
}

/// Boundary a result hash must stay below to meet `difficulty`:
/// 2^256 / difficulty.
pub fn boundary_from_difficulty(difficulty: U256) -> U256 {
    if difficulty <= U256::one() {
        return U256::MAX;
    }
    let wide = (U512::one() << 256) / U512::from(difficulty);
    let mut be = [0u8; 64];
    wide.to_big_endian(&mut be);
    U256::from_big_endian(&be[32..])
}

#[inline]
fn fnv(a: u32, b: u32) -> u32 {
    a.wrapping_mul(0x0100_0193) ^ b
}

fn fnv_hash(mix: &mut [u32], data: &[u32]) {
    for (m, d) in mix.iter_mut().zip(data) {
        *m = fnv(*m, *d);
    }
}

fn keccak512(data: &[u8]) -> [u8; HASH_BYTES] {
    Keccak512::digest(data).into()
}

/// Pseudo-random cache from which dataset items are derived on demand.
/// ~16 MiB at epoch 0, growing slowly; build once per epoch and share.
pub struct LightCache {
    epoch: u64,
    full_size: u64,
    cache: Vec<u32>,
}

impl LightCache {
    /// Generate the cache for an epoch. Takes a few seconds; callers memoize
    /// per epoch (see `dag::Dataset`).
    pub fn new(epoch: u64) -> Self {
        let size = cache_size(epoch) as usize;
        let rows = size / HASH_BYTES;
        debug!(epoch, size, "generating ethash light cache");

        let mut bytes = vec![0u8; size];
        let mut item = keccak512(seed_hash(epoch).as_bytes());
        bytes[..HASH_BYTES].copy_from_slice(&item);
        for offset in (HASH_BYTES..size).step_by(HASH_BYTES) {
            item = keccak512(&item);
            bytes[offset..offset + HASH_BYTES].copy_from_slice(&item);
        }

        // Low-round memo-hash mix over the sequential fill
        let mut temp = [0u8; HASH_BYTES];
        for _ in 0..CACHE_ROUNDS {
            for row in 0..rows {
                let src = ((row + rows - 1) % rows) * HASH_BYTES;
                let dst = row * HASH_BYTES;
                let xor =
                    (LittleEndian::read_u32(&bytes[dst..]) as usize % rows) * HASH_BYTES;
                for k in 0..HASH_BYTES {
                    temp[k] = bytes[src + k] ^ bytes[xor + k];
                }
                bytes[dst..dst + HASH_BYTES].copy_from_slice(&keccak512(&temp));
            }
        }

        let mut cache = vec![0u32; size / 4];
        LittleEndian::read_u32_into(&bytes, &mut cache);
        Self {
            epoch,
            full_size: dataset_size(epoch),
            cache,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Full dataset size in bytes for this cache's epoch
    pub fn full_size(&self) -> u64 {
        self.full_size
    }

    /// Compute the 64-byte dataset item `index` from the cache.
    pub fn calc_dataset_item(&self, index: u32) -> [u8; HASH_BYTES] {
        let rows = (self.cache.len() / HASH_WORDS) as u32;
        let base = ((index % rows) as usize) * HASH_WORDS;

        let mut int_mix = [0u32; HASH_WORDS];
        int_mix.copy_from_slice(&self.cache[base..base + HASH_WORDS]);
        int_mix[0] ^= index;

        let mut mix = [0u8; HASH_BYTES];
        LittleEndian::write_u32_into(&int_mix, &mut mix);
        mix = keccak512(&mix);
        LittleEndian::read_u32_into(&mix, &mut int_mix);

        for p in 0..DATASET_PARENTS {
            let parent =
                (fnv(index ^ p, int_mix[(p as usize) % HASH_WORDS]) % rows) as usize;
            fnv_hash(
                &mut int_mix,
                &self.cache[parent * HASH_WORDS..(parent + 1) * HASH_WORDS],
            );
        }

        LittleEndian::write_u32_into(&int_mix, &mut mix);
        keccak512(&mix)
    }

    /// Compute the 128-byte dataset row `row` (two consecutive items).
    pub fn calc_dataset_row(&self, row: u32) -> Word {
        let mut out = [0u8; MIX_BYTES];
        out[..HASH_BYTES].copy_from_slice(&self.calc_dataset_item(2 * row));
        out[HASH_BYTES..].copy_from_slice(&self.calc_dataset_item(2 * row + 1));
        Word(out)
    }

    /// The hashimoto mix loop. Returns the mix digest, the result hash and
    /// the sequence of 128-byte row indices the loop touched; that sequence
    /// is exactly what a claim proof must open against the DAG Merkle root.
    pub fn hashimoto(&self, hash_no_nonce: H256, nonce: Nonce) -> (H256, H256, Vec<u32>) {
        let rows = (self.full_size / MIX_BYTES as u64) as u32;

        let mut seed_data = [0u8; 40];
        seed_data[..32].copy_from_slice(hash_no_nonce.as_bytes());
        LittleEndian::write_u64(&mut seed_data[32..], nonce.value());
        let seed = keccak512(&seed_data);
        let seed_head = LittleEndian::read_u32(&seed);

        let mut mix = [0u32; MIX_WORDS];
        for (i, m) in mix.iter_mut().enumerate() {
            *m = LittleEndian::read_u32(&seed[(i % HASH_WORDS) * 4..]);
        }

        let mut indices = Vec::with_capacity(ACCESSES);
        let mut temp = [0u32; MIX_WORDS];
        for i in 0..ACCESSES {
            let row = fnv(i as u32 ^ seed_head, mix[i % MIX_WORDS]) % rows;
            indices.push(row);
            LittleEndian::read_u32_into(&self.calc_dataset_row(row).0, &mut temp);
            fnv_hash(&mut mix, &temp);
        }

        let mut compressed = [0u32; MIX_WORDS / 4];
        for i in (0..MIX_WORDS).step_by(4) {
            compressed[i / 4] = fnv(fnv(fnv(mix[i], mix[i + 1]), mix[i + 2]), mix[i + 3]);
        }
        let mut digest = [0u8; 32];
        LittleEndian::write_u32_into(&compressed, &mut digest);

        let mut result_input = [0u8; HASH_BYTES + 32];
        result_input[..HASH_BYTES].copy_from_slice(&seed);
        result_input[HASH_BYTES..].copy_from_slice(&digest);
        let result = H256::from_slice(&Keccak256::digest(result_input));

        (H256(digest), result, indices)
    }

    /// Dataset row indices a proof for `(hash_no_nonce, nonce)` must open.
    pub fn verification_indices(&self, hash_no_nonce: H256, nonce: Nonce) -> Vec<u32> {
        self.hashimoto(hash_no_nonce, nonce).2
    }

    /// Light share verification: the reported mix digest must match and the
    /// result hash must meet the share difficulty.
    pub fn verify(
        &self,
        hash_no_nonce: H256,
        nonce: Nonce,
        mix_digest: H256,
        difficulty: U256,
    ) -> bool {
        if difficulty.is_zero() {
            return false;
        }
        let (mix, result, _) = self.hashimoto(hash_no_nonce, nonce);
        mix == mix_digest
            && U256::from_big_endian(result.as_bytes()) <= boundary_from_difficulty(difficulty)
    }

    #[cfg(test)]
    pub(crate) fn with_cache(cache: Vec<u32>, full_size: u64) -> Self {
        assert_eq!(cache.len() % HASH_WORDS, 0);
        Self {
            epoch: 0,
            full_size,
            cache,
        }
    }
}
