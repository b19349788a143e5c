//! On-disk Ethash dataset
//!
//! Materializes the epoch dataset from the light cache and streams it back
//! as 128-byte words for proof construction. Dataset files follow the
//! standard disk format: an 8-byte magic prefix followed by contiguous
//! 64-byte items.
//!
//! Opening the file retries indefinitely with a 10 second backoff; a short
//! read mid-file means the dataset is damaged in a way that could produce
//! invalid proofs, so it terminates the process.

use crate::error::{Error, Result};
use crate::ethash::{self, LightCache};
use crate::mtree::DagMerkleTree;
use crate::types::Word;
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// Magic number prefixing every dataset file
pub const DAG_MAGIC: u64 = 0xfee1_dead_badd_cafe;

const OPEN_RETRY_DELAY: Duration = Duration::from_secs(10);
const ITEMS_PER_CHUNK: u64 = 16_384;
const CANCEL_CHECK_WORDS: u32 = 1 << 16;

/// Cooperative cancellation flag for long DAG operations. Cloned handles
/// share one flag; cancellation surfaces as `Error::Cancelled`.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::cancelled(operation))
        } else {
            Ok(())
        }
    }
}

/// Dataset directory plus a per-epoch memo of light caches, so that many
/// shares of one epoch reuse a single cache instead of regenerating it.
pub struct Dataset {
    dir: PathBuf,
    caches: Mutex<HashMap<u64, Arc<LightCache>>>,
}

impl Dataset {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Epoch of a block number
    pub fn epoch(block_number: u64) -> u64 {
        ethash::epoch(block_number)
    }

    /// Dataset size in bytes for a block number
    pub fn size(block_number: u64) -> u64 {
        ethash::dataset_size(ethash::epoch(block_number))
    }

    /// Path of the epoch's dataset file
    pub fn path(&self, epoch: u64) -> PathBuf {
        let seed = ethash::seed_hash(epoch);
        self.dir.join(format!(
            "full-R{}-{}",
            ethash::REVISION,
            hex::encode(&seed.as_bytes()[..8])
        ))
    }

    /// Shared light cache for the block's epoch, generated at most once.
    pub fn light_cache(&self, block_number: u64) -> Arc<LightCache> {
        let epoch = ethash::epoch(block_number);
        let mut caches = self.caches.lock();
        caches
            .entry(epoch)
            .or_insert_with(|| Arc::new(LightCache::new(epoch)))
            .clone()
    }

    /// Dataset row indices a proof for `(hash_no_nonce, nonce)` must open.
    pub fn verification_indices(
        &self,
        block_number: u64,
        hash_no_nonce: ethereum_types::H256,
        nonce: crate::types::Nonce,
    ) -> Vec<u32> {
        self.light_cache(block_number)
            .verification_indices(hash_no_nonce, nonce)
    }

    /// Materialize the epoch's dataset file if it is not already on disk.
    /// Generation computes every item from the light cache across all CPU
    /// cores and lands the file atomically; expect minutes of work and
    /// check `cancel` to bail out early.
    pub fn ensure(&self, block_number: u64, cancel: &CancelToken) -> Result<PathBuf> {
        let epoch = ethash::epoch(block_number);
        let path = self.path(epoch);
        if path.exists() {
            return Ok(path);
        }
        std::fs::create_dir_all(&self.dir)?;
        let cache = self.light_cache(block_number);
        self.generate(&path, &cache, cancel)?;
        Ok(path)
    }

    fn generate(&self, path: &Path, cache: &LightCache, cancel: &CancelToken) -> Result<()> {
        let full_size = cache.full_size();
        let items = full_size / ethash::HASH_BYTES as u64;
        let workers = num_cpus::get().max(1);
        info!(
            epoch = cache.epoch(),
            size = full_size,
            workers,
            "generating ethash dataset"
        );

        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        let mut writer = BufWriter::new(tmp.as_file());
        let mut magic = [0u8; 8];
        LittleEndian::write_u64(&mut magic, DAG_MAGIC);
        writer.write_all(&magic)?;

        let report_step = (items / 20).max(1);
        let mut next_report = report_step;
        let mut done: u64 = 0;
        let mut chunk_buf = vec![0u8; (ITEMS_PER_CHUNK as usize) * ethash::HASH_BYTES];
        while done < items {
            cancel.check("DAG generation")?;
            let chunk_len = ITEMS_PER_CHUNK.min(items - done);
            let buf = &mut chunk_buf[..(chunk_len as usize) * ethash::HASH_BYTES];

            // fan the chunk out across worker threads, one contiguous
            // sub-range of items each
            let per_worker = (chunk_len as usize).div_ceil(workers);
            thread::scope(|scope| {
                for (w, slice) in buf
                    .chunks_mut(per_worker * ethash::HASH_BYTES)
                    .enumerate()
                {
                    let first = done + (w * per_worker) as u64;
                    scope.spawn(move || {
                        for (k, item) in slice.chunks_mut(ethash::HASH_BYTES).enumerate() {
                            item.copy_from_slice(
                                &cache.calc_dataset_item((first + k as u64) as u32),
                            );
                        }
                    });
                }
            });

            writer.write_all(buf)?;
            done += chunk_len;
            if done >= next_report {
                info!(
                    epoch = cache.epoch(),
                    percent = done * 100 / items,
                    "dataset generation progress"
                );
                next_report += report_step;
            }
        }
        writer.flush()?;
        drop(writer);
        tmp.persist(path)
            .map_err(|e| Error::dag_io(path.display().to_string(), e.to_string()))?;
        info!(path = %path.display(), "ethash dataset ready");
        Ok(())
    }

    /// Stream the epoch's dataset as 128-byte words, feeding `sink` with
    /// each word and its index in order. Open failures retry forever with
    /// a 10 s backoff; a torn word terminates the process.
    pub fn stream_words<F>(&self, epoch: u64, mut sink: F, cancel: &CancelToken) -> Result<()>
    where
        F: FnMut(Word, u32) -> Result<()>,
    {
        let path = self.path(epoch);
        let file = self.open_with_retry(&path, cancel)?;
        let mut reader = BufReader::with_capacity(1 << 20, file);

        let mut magic = [0u8; 8];
        if reader.read_exact(&mut magic).is_err() {
            abort_malformed(&path, "missing magic prefix");
        }

        let mut buf = [0u8; Word::SIZE];
        let mut index: u32 = 0;
        loop {
            if index % CANCEL_CHECK_WORDS == 0 {
                cancel.check("DAG streaming")?;
            }
            let filled = fill_word(&mut reader, &mut buf)?;
            if filled == 0 {
                break;
            }
            if filled != Word::SIZE {
                abort_malformed(&path, "truncated dataset element");
            }
            sink(Word(buf), index)?;
            index += 1;
        }
        Ok(())
    }

    fn open_with_retry(&self, path: &Path, cancel: &CancelToken) -> Result<File> {
        loop {
            cancel.check("DAG open")?;
            match File::open(path) {
                Ok(file) => return Ok(file),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "reading DAG file failed, retrying in 10s"
                    );
                    std::thread::sleep(OPEN_RETRY_DELAY);
                }
            }
        }
    }
}

fn fill_word(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn abort_malformed(path: &Path, reason: &str) -> ! {
    error!(path = %path.display(), reason, "malformed DAG dataset, aborting");
    std::process::exit(1);
}

/// Build the Merkle proof tree for `indices` by streaming the epoch's
/// dataset once. `rows` is the dataset length in 128-byte resolution and
/// fixes the stored-level depth.
pub(crate) fn build_proof_tree(
    dataset: &Dataset,
    epoch: u64,
    indices: &[u32],
    rows: u64,
    cancel: &CancelToken,
) -> Result<DagMerkleTree> {
    let mut tree = DagMerkleTree::new();
    tree.register_index(indices)?;
    let depth = if rows > 1 {
        64 - (rows - 1).leading_zeros()
    } else {
        0
    };
    tree.register_stored_level(depth, 10)?;
    dataset.stream_words(epoch, |word, i| tree.insert(word, i), cancel)?;
    tree.finalize()?;
    Ok(tree)
}
