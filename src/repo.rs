//! Timestamp claim repository
//!
//! Durable store for active shares and the claim queues. Shares at the
//! maximum observed timestamp are held back from claims: a claim only ever
//! contains shares whose timestamps are strictly below the newest one, so
//! every counter in claim *k* is below every counter in claim *k+1* and the
//! contract's anti-replay ordering can never be violated between batches.
//!
//! Two locks split the hot paths: the share book (ingest) and the claim
//! queues (orchestrator). When both are needed the share lock is taken
//! first.

use crate::claim::Claim;
use crate::error::{Error, Result};
use crate::share::Share;
use crate::storage::{self, PersistentStorage};
use crate::types::{BlockHeader, Nonce, SolutionState};
use ethereum_types::{Address, H256, U256};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Storage key for the active share map
pub const ACTIVE_SHARES_KEY: &str = "active_shares";
/// Storage key for claims built but not yet sealed into a batch
pub const ACTIVE_CLAIMS_KEY: &str = "active_claims";
/// Storage key for the sealed batch awaiting on-chain resolution
pub const OPEN_CLAIMS_KEY: &str = "open_claims";

/// User interaction capability, consumed only during session
/// reconciliation when persisted shares disagree with the configuration.
pub trait Prompt: Send + Sync {
    /// Present `message` and return the user's answer line.
    fn ask(&self, message: &str) -> String;
}

/// Production prompt reading from the controlling terminal
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&self, message: &str) -> String {
        use std::io::{BufRead, Write};
        print!("{}", message);
        std::io::stdout().flush().ok();
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line).ok();
        line.trim().to_string()
    }
}

/// Serialized view of a share; the DAG tree is rebuilt on demand and never
/// stored.
#[derive(Serialize, Deserialize)]
struct ShareRecord {
    header: BlockHeader,
    nonce: Nonce,
    mix_digest: H256,
    share_difficulty: U256,
    miner: Address,
    solution_state: SolutionState,
}

impl ShareRecord {
    fn from_share(share: &Share) -> Self {
        Self {
            header: share.header().clone(),
            nonce: share.nonce(),
            mix_digest: share.mix_digest(),
            share_difficulty: share.share_difficulty(),
            miner: share.miner_address(),
            solution_state: share.solution_state(),
        }
    }

    fn into_share(self) -> Share {
        Share::new(
            self.header,
            self.nonce,
            self.mix_digest,
            self.share_difficulty,
            self.miner,
            self.solution_state,
        )
    }
}

#[derive(Serialize, Deserialize)]
struct ClaimRecord {
    shares: Vec<ShareRecord>,
    share_index: U256,
}

impl ClaimRecord {
    fn from_claim(claim: &Claim) -> Self {
        Self {
            shares: claim.shares().map(ShareRecord::from_share).collect(),
            share_index: claim.evidence(),
        }
    }

    fn into_claim(self) -> Claim {
        let shares = self.shares.into_iter().map(ShareRecord::into_share).collect();
        Claim::from_parts(shares, self.share_index)
    }
}

/// Share-side state, guarded by the first lock
struct ShareBook {
    active: HashMap<String, Share>,
    /// Maximum header timestamp among active shares
    recent_timestamp: u64,
    /// Claimable shares: timestamp strictly below the maximum
    no_shares: u64,
    /// Shares at the maximum timestamp, held back from claims
    no_recent_shares: u64,
}

impl ShareBook {
    fn scan(active: &HashMap<String, Share>) -> (u64, u64, u64) {
        let recent = active.values().map(Share::timestamp).max().unwrap_or(0);
        let mut no_shares = 0;
        let mut no_recent = 0;
        for share in active.values() {
            if share.timestamp() == recent {
                no_recent += 1;
            } else {
                no_shares += 1;
            }
        }
        (recent, no_shares, no_recent)
    }

    fn clear(&mut self) {
        self.active.clear();
        self.recent_timestamp = 0;
        self.no_shares = 0;
        self.no_recent_shares = 0;
    }
}

/// Claim-side state, guarded by the second lock
#[derive(Default)]
struct ClaimQueues {
    /// Built since the last seal, not yet part of a batch
    active: Vec<Claim>,
    /// The sealed batch awaiting on-chain resolution
    open: Vec<Claim>,
}

/// Thread-safe repository of shares and claims with the timestamp rule
pub struct TimestampClaimRepo {
    shares: Mutex<ShareBook>,
    claims: Mutex<ClaimQueues>,
    storage: Arc<dyn PersistentStorage>,
    diff: U256,
    miner: Address,
    coinbase: Address,
}

impl std::fmt::Debug for TimestampClaimRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampClaimRepo").finish_non_exhaustive()
    }
}

impl TimestampClaimRepo {
    /// Load persisted state and reconcile it against the session
    /// configuration. A changed contract address silently discards the old
    /// session; a changed miner or difficulty asks the user to either
    /// discard (1) or abort (2). `Error::Aborted` means the caller should
    /// exit and rerun with the previous settings.
    pub fn new(
        diff: U256,
        miner: Address,
        coinbase: Address,
        storage: Arc<dyn PersistentStorage>,
        prompt: &dyn Prompt,
    ) -> Result<Self> {
        let mut active = load_active_shares(storage.as_ref());
        let mut active_claims = load_claims(storage.as_ref(), ACTIVE_CLAIMS_KEY);
        let mut open_claims = load_claims(storage.as_ref(), OPEN_CLAIMS_KEY);

        let changed_coinbase = active.values().any(|s| s.header().coinbase != coinbase);
        let changed_miner = active.values().any(|s| s.miner_address() != miner);
        let changed_diff = active.values().any(|s| s.share_difficulty() != diff);

        if changed_coinbase {
            info!(
                count = active.len(),
                "pool contract address changed, discarding shares from last session"
            );
            active.clear();
            active_claims.clear();
            open_claims.clear();
        } else if changed_miner {
            let old_miner = active
                .values()
                .find(|s| s.miner_address() != miner)
                .map(Share::miner_address)
                .unwrap_or(miner);
            let message = format!(
                "You have {} shares from last session mined by {:#x} that were \
                 not submitted to the contract.\n\
                 However you are going to run the pool client with different miner {:#x}.\n\
                 Please choose one of the following options:\n\
                 1. Discard those shares and continue with the new miner.\n\
                 2. Abort and rerun with --miner {:#x}\n\
                 Enter 1 or 2: ",
                active.len(),
                old_miner,
                miner,
                old_miner
            );
            confirm_discard(prompt, &message)?;
            active.clear();
            active_claims.clear();
            open_claims.clear();
        } else if changed_diff {
            let old_diff = active
                .values()
                .find(|s| s.share_difficulty() != diff)
                .map(Share::share_difficulty)
                .unwrap_or(diff);
            let message = format!(
                "You have {} shares from last session with difficulty {} that were \
                 not submitted to the contract.\n\
                 However you are going to run the pool client with different share \
                 difficulty {}.\n\
                 Please choose one of the following options:\n\
                 1. Discard those shares and continue with the new difficulty.\n\
                 2. Abort and rerun with --diff {}\n\
                 Enter 1 or 2: ",
                active.len(),
                old_diff,
                diff,
                old_diff
            );
            confirm_discard(prompt, &message)?;
            active.clear();
            active_claims.clear();
            open_claims.clear();
        }

        let (recent_timestamp, no_shares, no_recent_shares) = ShareBook::scan(&active);
        info!(no_shares, "loaded claimable shares");
        info!(recent_timestamp, no_recent_shares, "loaded session state");

        Ok(Self {
            shares: Mutex::new(ShareBook {
                active,
                recent_timestamp,
                no_shares,
                no_recent_shares,
            }),
            claims: Mutex::new(ClaimQueues {
                active: active_claims,
                open: open_claims,
            }),
            storage,
            diff,
            miner,
            coinbase,
        })
    }

    /// Validate and admit a share, updating the timestamp counters:
    /// a newer timestamp promotes all held-back shares to claimable.
    pub fn add_share(&self, share: Share) -> Result<()> {
        let mut book = self.shares.lock();
        if share.header().coinbase != self.coinbase {
            return Err(Error::InconsistentCoinbase {
                share: share.header().coinbase,
                expected: self.coinbase,
            });
        }
        if share.share_difficulty() != self.diff {
            return Err(Error::InconsistentDifficulty {
                share: share.share_difficulty(),
                expected: self.diff,
            });
        }
        let id = share.id();
        if book.active.contains_key(&id) {
            return Err(Error::DuplicateShare { share_id: id });
        }
        let timestamp = share.timestamp();
        book.active.insert(id, share);
        if timestamp == book.recent_timestamp {
            book.no_recent_shares += 1;
        } else if timestamp < book.recent_timestamp {
            book.no_shares += 1;
        } else {
            book.no_shares += book.no_recent_shares;
            book.no_recent_shares = 1;
            book.recent_timestamp = timestamp;
        }
        Ok(())
    }

    /// Build a claim from every share below the newest timestamp, provided
    /// at least `threshold` of them exist. Selected shares leave the active
    /// set; shares at the newest timestamp stay for the next round. A
    /// successful build triggers a best-effort persistence checkpoint.
    pub fn get_current_claim(&self, threshold: u64) -> Option<Claim> {
        let claim = {
            let mut book = self.shares.lock();
            debug!(
                no_shares = book.no_shares,
                recent_timestamp = book.recent_timestamp,
                no_recent_shares = book.no_recent_shares,
                "claim eligibility"
            );
            if book.no_shares == 0 || book.no_shares < threshold {
                return None;
            }

            let recent = book.recent_timestamp;
            let mut picks: Vec<(U256, String)> = book
                .active
                .iter()
                .filter(|(_, s)| s.timestamp() < recent)
                .map(|(id, s)| (s.counter(), id.clone()))
                .collect();
            picks.sort();

            let mut claim = Claim::new();
            let mut retained = 0;
            for (counter, id) in picks {
                let Some(share) = book.active.remove(&id) else {
                    continue;
                };
                if claim.last_counter() == Some(counter) {
                    // same timestamp and nonce under two headers; keep the
                    // second for the next claim rather than emit a batch
                    // the contract would reject
                    warn!(share = %id, "duplicate counter held back");
                    book.active.insert(id, share);
                    retained += 1;
                    continue;
                }
                if let Err(e) = claim.add_share(share) {
                    warn!(share = %id, error = %e, "share dropped during claim build");
                }
            }
            book.no_shares = retained;
            claim
        };

        if let Err(e) = self.persist(self.storage.as_ref()) {
            warn!(error = %e, "persistence checkpoint failed, continuing");
        }
        Some(claim)
    }

    /// Queue a claim for the next batch seal. Despite the name this is the
    /// unsealed queue; the name mirrors the submission orchestrator's view
    /// of a claim it is about to open on chain.
    pub fn put_open_claim(&self, claim: Claim) {
        self.claims.lock().active.push(claim);
    }

    /// Roll back the most recently queued claim (LIFO). Callers only ever
    /// remove the claim they just appended after a failed submission.
    pub fn remove_open_claim(&self) -> Option<Claim> {
        self.claims.lock().active.pop()
    }

    /// Atomically seal the unsealed queue into the open-claims snapshot,
    /// replacing any previous snapshot.
    pub fn seal_claim_batch(&self) {
        let mut queues = self.claims.lock();
        queues.open = std::mem::take(&mut queues.active);
    }

    /// Claim `index` of the sealed snapshot
    pub fn get_open_claim(&self, index: usize) -> Option<Claim> {
        self.claims.lock().open.get(index).cloned()
    }

    /// Size of the sealed snapshot
    pub fn num_open_claims(&self) -> usize {
        self.claims.lock().open.len()
    }

    /// Claims built since the last seal; the orchestrator's batch threshold
    pub fn num_active_claims(&self) -> usize {
        self.claims.lock().active.len()
    }

    /// Drop the sealed snapshot once every claim in it is resolved
    pub fn reset_open_claims(&self) {
        self.claims.lock().open.clear();
    }

    /// Total number of pooled shares, for boot telemetry
    pub fn no_active_shares(&self) -> u64 {
        let book = self.shares.lock();
        book.no_shares + book.no_recent_shares
    }

    /// Write all three collections to storage. Atomic per key only; a crash
    /// between keys is reconciled at next load.
    pub fn persist(&self, storage: &dyn PersistentStorage) -> Result<()> {
        let book = self.shares.lock();
        let queues = self.claims.lock();

        debug!(shares = book.active.len(), "saving active shares");
        let share_records: BTreeMap<&String, ShareRecord> = book
            .active
            .iter()
            .map(|(id, share)| (id, ShareRecord::from_share(share)))
            .collect();
        storage::persist(storage, &share_records, ACTIVE_SHARES_KEY)?;

        debug!(claims = queues.active.len(), "saving active claims");
        let records: Vec<ClaimRecord> = queues.active.iter().map(ClaimRecord::from_claim).collect();
        storage::persist(storage, &records, ACTIVE_CLAIMS_KEY)?;

        debug!(claims = queues.open.len(), "saving open claims");
        let records: Vec<ClaimRecord> = queues.open.iter().map(ClaimRecord::from_claim).collect();
        storage::persist(storage, &records, OPEN_CLAIMS_KEY)?;
        Ok(())
    }
}

fn confirm_discard(prompt: &dyn Prompt, message: &str) -> Result<()> {
    loop {
        match prompt.ask(message).trim() {
            "1" => {
                info!("discarding shares from last session");
                return Ok(());
            }
            "2" => return Err(Error::Aborted),
            _ => continue,
        }
    }
}

fn load_active_shares(storage: &dyn PersistentStorage) -> HashMap<String, Share> {
    match storage::load::<BTreeMap<String, ShareRecord>>(storage, ACTIVE_SHARES_KEY) {
        Ok(records) => records
            .into_iter()
            .map(|(id, record)| (id, record.into_share()))
            .collect(),
        Err(Error::NotFound { .. }) => {
            debug!("no persisted shares, starting with an empty pool");
            HashMap::new()
        }
        Err(e) => {
            warn!(error = %e, "couldn't load active shares from last session, starting empty");
            HashMap::new()
        }
    }
}

fn load_claims(storage: &dyn PersistentStorage, key: &str) -> Vec<Claim> {
    match storage::load::<Vec<ClaimRecord>>(storage, key) {
        Ok(records) => records.into_iter().map(ClaimRecord::into_claim).collect(),
        Err(Error::NotFound { .. }) => Vec::new(),
        Err(e) => {
            warn!(key, error = %e, "couldn't load claims from last session, starting empty");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use parking_lot::Mutex as PlMutex;
    use std::collections::VecDeque;

    const DIFF: u64 = 1000;

    fn contract() -> Address {
        Address::repeat_byte(0xcc)
    }

    fn miner() -> Address {
        Address::repeat_byte(0x0a)
    }

    fn share(timestamp: u64, nonce: u64) -> Share {
        share_for(timestamp, nonce, miner(), contract(), DIFF)
    }

    fn share_for(timestamp: u64, nonce: u64, miner: Address, coinbase: Address, diff: u64) -> Share {
        let header = BlockHeader {
            coinbase,
            time: U256::from(timestamp),
            number: U256::from(1u64),
            ..Default::default()
        };
        Share::new(
            header,
            Nonce::new(nonce),
            H256::zero(),
            U256::from(diff),
            miner,
            SolutionState::Partial,
        )
    }

    /// Prompt answering from a script; panics when drained
    struct ScriptedPrompt {
        answers: PlMutex<VecDeque<&'static str>>,
    }

    impl ScriptedPrompt {
        fn new(answers: &[&'static str]) -> Self {
            Self {
                answers: PlMutex::new(answers.iter().copied().collect()),
            }
        }
    }

    impl Prompt for ScriptedPrompt {
        fn ask(&self, _message: &str) -> String {
            self.answers
                .lock()
                .pop_front()
                .expect("prompt script exhausted")
                .to_string()
        }
    }

    /// Prompt that must never fire
    struct NoPrompt;

    impl Prompt for NoPrompt {
        fn ask(&self, _message: &str) -> String {
            panic!("unexpected reconciliation prompt");
        }
    }

    fn fresh_repo(storage: Arc<MemoryStorage>) -> TimestampClaimRepo {
        TimestampClaimRepo::new(U256::from(DIFF), miner(), contract(), storage, &NoPrompt)
            .unwrap()
    }

    #[test]
    fn test_empty_storage_boots_empty() {
        let repo = fresh_repo(Arc::new(MemoryStorage::new()));
        assert_eq!(repo.no_active_shares(), 0);
        assert_eq!(repo.num_open_claims(), 0);
        assert_eq!(repo.num_active_claims(), 0);
    }

    #[test]
    fn test_scenario_a_basic_batching() {
        let repo = fresh_repo(Arc::new(MemoryStorage::new()));
        repo.add_share(share(100, 1)).unwrap();
        repo.add_share(share(100, 2)).unwrap();
        repo.add_share(share(200, 3)).unwrap();

        {
            let book = repo.shares.lock();
            assert_eq!(book.no_shares, 2);
            assert_eq!(book.no_recent_shares, 1);
            assert_eq!(book.recent_timestamp, 200);
        }

        let claim = repo.get_current_claim(2).expect("threshold met");
        assert_eq!(claim.num_shares(), 2);
        assert!(claim.shares().all(|s| s.timestamp() == 100));

        let book = repo.shares.lock();
        assert_eq!(book.active.len(), 1);
        assert_eq!(book.no_shares, 0);
        assert_eq!(book.no_recent_shares, 1);
    }

    #[test]
    fn test_scenario_b_threshold_not_met() {
        let repo = fresh_repo(Arc::new(MemoryStorage::new()));
        repo.add_share(share(50, 1)).unwrap();
        repo.add_share(share(60, 2)).unwrap();

        assert!(repo.get_current_claim(2).is_none());
        let book = repo.shares.lock();
        assert_eq!(book.no_shares, 1);
        assert_eq!(book.no_recent_shares, 1);
        assert_eq!(book.active.len(), 2);
    }

    #[test]
    fn test_scenario_c_duplicate_rejection() {
        let repo = fresh_repo(Arc::new(MemoryStorage::new()));
        repo.add_share(share(100, 1)).unwrap();
        let err = repo.add_share(share(100, 1)).unwrap_err();
        assert!(matches!(err, Error::DuplicateShare { .. }));

        let book = repo.shares.lock();
        assert_eq!(book.no_shares + book.no_recent_shares, 1);
    }

    #[test]
    fn test_rejections_leave_state_untouched() {
        let repo = fresh_repo(Arc::new(MemoryStorage::new()));
        let err = repo
            .add_share(share_for(10, 1, miner(), Address::repeat_byte(0xdd), DIFF))
            .unwrap_err();
        assert!(matches!(err, Error::InconsistentCoinbase { .. }));

        let err = repo
            .add_share(share_for(10, 1, miner(), contract(), 999))
            .unwrap_err();
        assert!(matches!(err, Error::InconsistentDifficulty { .. }));

        assert_eq!(repo.no_active_shares(), 0);
    }

    #[test]
    fn test_first_share_sets_recent_timestamp() {
        let repo = fresh_repo(Arc::new(MemoryStorage::new()));
        // empty pool, recent == 0; a share at timestamp 0 counts as recent
        repo.add_share(share(0, 1)).unwrap();
        {
            let book = repo.shares.lock();
            assert_eq!(book.recent_timestamp, 0);
            assert_eq!(book.no_recent_shares, 1);
            assert_eq!(book.no_shares, 0);
        }
        // and nothing is claimable yet
        assert!(repo.get_current_claim(0).is_none());
    }

    #[test]
    fn test_zero_threshold_never_builds_empty_claim() {
        let repo = fresh_repo(Arc::new(MemoryStorage::new()));
        assert!(repo.get_current_claim(0).is_none());
        repo.add_share(share(5, 1)).unwrap();
        assert!(repo.get_current_claim(0).is_none(), "only recent shares");
    }

    #[test]
    fn test_scenario_f_ordering_across_claims() {
        let repo = fresh_repo(Arc::new(MemoryStorage::new()));
        repo.add_share(share(10, 1)).unwrap();
        repo.add_share(share(20, 2)).unwrap();
        repo.add_share(share(30, 3)).unwrap();

        let c1 = repo.get_current_claim(1).unwrap();
        assert_eq!(c1.num_shares(), 2);

        repo.add_share(share(30, 4)).unwrap();
        repo.add_share(share(40, 5)).unwrap();

        let c2 = repo.get_current_claim(1).unwrap();
        assert_eq!(c2.num_shares(), 2);
        assert!(c2.shares().all(|s| s.timestamp() == 30));

        let max_c1 = c1.counters().into_iter().max().unwrap();
        let min_c2 = c2.counters().into_iter().min().unwrap();
        assert!(max_c1 < min_c2);
    }

    #[test]
    fn test_claims_come_out_counter_sorted() {
        let repo = fresh_repo(Arc::new(MemoryStorage::new()));
        for (ts, nonce) in [(30u64, 9u64), (10, 5), (20, 1), (10, 2), (99, 1)] {
            repo.add_share(share(ts, nonce)).unwrap();
        }
        let claim = repo.get_current_claim(1).unwrap();
        let counters = claim.counters();
        assert_eq!(counters.len(), 4);
        assert!(counters.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_claim_queue_lifecycle() {
        let repo = fresh_repo(Arc::new(MemoryStorage::new()));
        repo.add_share(share(10, 1)).unwrap();
        repo.add_share(share(20, 2)).unwrap();
        let claim = repo.get_current_claim(1).unwrap();

        repo.put_open_claim(claim.clone());
        assert_eq!(repo.num_active_claims(), 1);
        assert_eq!(repo.num_open_claims(), 0);

        // failed submission rolls back the most recent claim
        let rolled_back = repo.remove_open_claim().unwrap();
        assert_eq!(rolled_back.num_shares(), claim.num_shares());
        assert_eq!(repo.num_active_claims(), 0);

        repo.put_open_claim(claim.clone());
        repo.put_open_claim(claim);
        repo.seal_claim_batch();
        assert_eq!(repo.num_active_claims(), 0);
        assert_eq!(repo.num_open_claims(), 2);
        assert!(repo.get_open_claim(0).is_some());
        assert!(repo.get_open_claim(2).is_none());

        repo.reset_open_claims();
        assert_eq!(repo.num_open_claims(), 0);
    }

    #[test]
    fn test_seal_replaces_previous_snapshot() {
        let repo = fresh_repo(Arc::new(MemoryStorage::new()));
        repo.put_open_claim(Claim::new());
        repo.seal_claim_batch();
        assert_eq!(repo.num_open_claims(), 1);
        // nothing new queued; sealing again replaces with an empty batch
        repo.seal_claim_batch();
        assert_eq!(repo.num_open_claims(), 0);
    }

    #[test]
    fn test_persist_roundtrip() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let repo = fresh_repo(storage.clone());
            repo.add_share(share(10, 1)).unwrap();
            repo.add_share(share(20, 2)).unwrap();
            repo.add_share(share(30, 3)).unwrap();
            let mut claim = repo.get_current_claim(1).unwrap();
            claim.set_evidence(U256::from(0xbeefu64));
            repo.put_open_claim(claim);
            repo.seal_claim_batch();
            repo.persist(storage.as_ref()).unwrap();
        }

        let reloaded = fresh_repo(storage);
        assert_eq!(reloaded.no_active_shares(), 1);
        assert_eq!(reloaded.num_open_claims(), 1);
        let claim = reloaded.get_open_claim(0).unwrap();
        assert_eq!(claim.num_shares(), 2);
        assert_eq!(claim.evidence(), U256::from(0xbeefu64));
        assert!(claim.counters().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_persist_is_idempotent() {
        let storage = Arc::new(MemoryStorage::new());
        let repo = fresh_repo(storage.clone());
        repo.add_share(share(10, 1)).unwrap();
        repo.add_share(share(20, 2)).unwrap();
        repo.put_open_claim(Claim::new());

        repo.persist(storage.as_ref()).unwrap();
        let first: Vec<_> = [ACTIVE_SHARES_KEY, ACTIVE_CLAIMS_KEY, OPEN_CLAIMS_KEY]
            .iter()
            .map(|k| storage.blob(k).unwrap())
            .collect();
        repo.persist(storage.as_ref()).unwrap();
        let second: Vec<_> = [ACTIVE_SHARES_KEY, ACTIVE_CLAIMS_KEY, OPEN_CLAIMS_KEY]
            .iter()
            .map(|k| storage.blob(k).unwrap())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_checkpoint_failure_still_yields_claim() {
        let storage = Arc::new(MemoryStorage::new());
        let repo = fresh_repo(storage.clone());
        repo.add_share(share(10, 1)).unwrap();
        repo.add_share(share(20, 2)).unwrap();
        storage.set_fail_persist(true);
        let claim = repo.get_current_claim(1);
        assert!(claim.is_some(), "state is best-effort on persist failure");
    }

    #[test]
    fn test_scenario_d_contract_change_discards_silently() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let repo = fresh_repo(storage.clone());
            for nonce in 0..5 {
                repo.add_share(share(10 + nonce, nonce)).unwrap();
            }
            repo.persist(storage.as_ref()).unwrap();
        }

        let repo = TimestampClaimRepo::new(
            U256::from(DIFF),
            miner(),
            Address::repeat_byte(0xee),
            storage,
            &NoPrompt,
        )
        .unwrap();
        assert_eq!(repo.no_active_shares(), 0);
    }

    #[test]
    fn test_scenario_e_difficulty_change_prompts() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let repo = fresh_repo(storage.clone());
            for nonce in 0..3 {
                repo.add_share(share(10, nonce)).unwrap();
            }
            repo.persist(storage.as_ref()).unwrap();
        }

        // garbage answers are re-asked until 1 is accepted
        let prompt = ScriptedPrompt::new(&["yes", "0", "1"]);
        let repo = TimestampClaimRepo::new(
            U256::from(2000u64),
            miner(),
            contract(),
            storage.clone(),
            &prompt,
        )
        .unwrap();
        assert_eq!(repo.no_active_shares(), 0);

        // storage still holds the old shares; answering 2 aborts
        let prompt = ScriptedPrompt::new(&["2"]);
        let err = TimestampClaimRepo::new(
            U256::from(2000u64),
            miner(),
            contract(),
            storage,
            &prompt,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Aborted));
    }

    #[test]
    fn test_miner_change_prompts() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let repo = fresh_repo(storage.clone());
            repo.add_share(share(10, 1)).unwrap();
            repo.persist(storage.as_ref()).unwrap();
        }

        let prompt = ScriptedPrompt::new(&["1"]);
        let repo = TimestampClaimRepo::new(
            U256::from(DIFF),
            Address::repeat_byte(0x0b),
            contract(),
            storage,
            &prompt,
        )
        .unwrap();
        assert_eq!(repo.no_active_shares(), 0);
    }

    #[test]
    fn test_counter_bookkeeping_invariants() {
        use proptest::prelude::*;

        proptest!(|(adds in proptest::collection::vec((0u64..16, 0u64..32), 1..60))| {
            let repo = fresh_repo(Arc::new(MemoryStorage::new()));
            for (timestamp, nonce) in adds {
                // duplicates are a legal rejection, everything else admits
                let _ = repo.add_share(share(timestamp, nonce));
                let book = repo.shares.lock();
                prop_assert_eq!(
                    book.no_shares + book.no_recent_shares,
                    book.active.len() as u64
                );
                if !book.active.is_empty() {
                    let max = book.active.values().map(Share::timestamp).max().unwrap();
                    prop_assert_eq!(book.recent_timestamp, max);
                    let recent = book
                        .active
                        .values()
                        .filter(|s| s.timestamp() == max)
                        .count() as u64;
                    prop_assert_eq!(book.no_recent_shares, recent);
                }
            }
            // any claim built now contains only below-maximum timestamps
            let recent = repo.shares.lock().recent_timestamp;
            if let Some(claim) = repo.get_current_claim(1) {
                prop_assert!(claim.shares().all(|s| s.timestamp() < recent));
            }
        });
    }

    #[test]
    fn test_unchanged_config_keeps_session() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let repo = fresh_repo(storage.clone());
            repo.add_share(share(10, 1)).unwrap();
            repo.add_share(share(20, 2)).unwrap();
            repo.persist(storage.as_ref()).unwrap();
        }

        let repo = fresh_repo(storage);
        assert_eq!(repo.no_active_shares(), 2);
        let book = repo.shares.lock();
        assert_eq!(book.recent_timestamp, 20);
        assert_eq!(book.no_shares, 1);
        assert_eq!(book.no_recent_shares, 1);
    }
}
