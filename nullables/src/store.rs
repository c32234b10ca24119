//! Nullable store: thread-safe in-memory storage for testing.
//!
//! Every trait method takes a single mutex for its table, so the uniqueness
//! and insert-if-absent guarantees hold exactly as in a real backend.
//! Transient contention can be injected to exercise retry paths.

use provote_store::{
    AttemptLog, IdempotencyRecord, IdempotencyState, IdempotencyStore, PollDirectory, PollInfo,
    Reservation, ReserveOutcome, ScopedKey, StoreError, VoteAttempt, VoteStore,
};
use provote_types::{NewVote, OptionId, PollId, Timestamp, VoteId, VoteRecord, VoterIdentity};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct VoteTables {
    by_id: BTreeMap<VoteId, VoteRecord>,
    by_voter: HashMap<(PollId, VoterIdentity), VoteId>,
    next_id: u64,
}

/// An in-memory implementation of every storage trait.
/// Thread-safe for use with tokio's multi-threaded runtime.
pub struct NullStore {
    votes: Mutex<VoteTables>,
    keys: Mutex<HashMap<String, IdempotencyRecord>>,
    polls: Mutex<HashMap<PollId, PollInfo>>,
    attempts: Mutex<Vec<VoteAttempt>>,
    next_token: AtomicU64,
    inserts_to_fail: AtomicU32,
    insert_calls: AtomicU64,
}

impl NullStore {
    pub fn new() -> Self {
        Self {
            votes: Mutex::new(VoteTables::default()),
            keys: Mutex::new(HashMap::new()),
            polls: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
            inserts_to_fail: AtomicU32::new(0),
            insert_calls: AtomicU64::new(0),
        }
    }

    /// Make the next `n` calls to `insert_unique` fail with `Contention`.
    pub fn fail_next_inserts(&self, n: u32) {
        self.inserts_to_fail.store(n, Ordering::SeqCst);
    }

    /// Total `insert_unique` calls, including injected failures.
    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Register an open poll with the given option ids.
    pub fn add_open_poll(&self, poll: u64, options: &[u64]) {
        self.polls.lock().unwrap().insert(
            PollId::new(poll),
            PollInfo {
                id: PollId::new(poll),
                options: options.iter().copied().map(OptionId::new).collect(),
                is_active: true,
                closes_at: None,
            },
        );
    }

    /// Total number of stored votes across all polls.
    pub fn vote_total(&self) -> usize {
        self.votes.lock().unwrap().by_id.len()
    }

    /// Number of stored idempotency records.
    pub fn key_count(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    fn take_injected_failure(&self) -> bool {
        self.inserts_to_fail
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn owned_record<'a>(
        keys: &'a mut HashMap<String, IdempotencyRecord>,
        reservation: &Reservation,
    ) -> Result<&'a mut IdempotencyRecord, StoreError> {
        match keys.get_mut(&reservation.storage_key) {
            Some(rec)
                if rec.token == reservation.token && rec.state == IdempotencyState::Reserved =>
            {
                Ok(rec)
            }
            Some(_) => Err(StoreError::Conflict(format!(
                "reservation {} on {} is no longer held",
                reservation.token, reservation.storage_key
            ))),
            None => Err(StoreError::NotFound(reservation.storage_key.clone())),
        }
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VoteStore for NullStore {
    fn insert_unique(&self, vote: NewVote) -> Result<VoteRecord, StoreError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_failure() {
            return Err(StoreError::Contention("injected deadlock".into()));
        }

        let mut tables = self.votes.lock().unwrap();
        let index_key = (vote.poll, vote.voter.clone());
        if tables.by_voter.contains_key(&index_key) {
            return Err(StoreError::Duplicate(format!("{} on {}", vote.voter, vote.poll)));
        }
        tables.next_id += 1;
        let record = vote.into_record(VoteId::new(tables.next_id));
        tables.by_voter.insert(index_key, record.id);
        tables.by_id.insert(record.id, record.clone());
        Ok(record)
    }

    fn get_vote(&self, id: VoteId) -> Result<Option<VoteRecord>, StoreError> {
        Ok(self.votes.lock().unwrap().by_id.get(&id).cloned())
    }

    fn find_vote(
        &self,
        poll: PollId,
        voter: &VoterIdentity,
    ) -> Result<Option<VoteRecord>, StoreError> {
        let tables = self.votes.lock().unwrap();
        Ok(tables
            .by_voter
            .get(&(poll, voter.clone()))
            .and_then(|id| tables.by_id.get(id))
            .cloned())
    }

    fn count_votes(&self, poll: PollId) -> Result<u64, StoreError> {
        Ok(self
            .votes
            .lock()
            .unwrap()
            .by_id
            .values()
            .filter(|v| v.poll == poll)
            .count() as u64)
    }

    fn delete_poll_votes(&self, poll: PollId) -> Result<u64, StoreError> {
        let mut tables = self.votes.lock().unwrap();
        let before = tables.by_id.len();
        tables.by_id.retain(|_, v| v.poll != poll);
        tables.by_voter.retain(|(p, _), _| *p != poll);
        Ok((before - tables.by_id.len()) as u64)
    }
}

impl IdempotencyStore for NullStore {
    fn reserve_key(
        &self,
        key: &ScopedKey,
        poll: PollId,
        option: OptionId,
        now: Timestamp,
        reservation_ttl_ms: u64,
        retention_ms: u64,
    ) -> Result<ReserveOutcome, StoreError> {
        let storage_key = key.storage_key();
        let mut keys = self.keys.lock().unwrap();

        let reclaimed = match keys.get(&storage_key) {
            None => false,
            Some(rec) if rec.is_reclaimable(now, reservation_ttl_ms) => true,
            Some(rec) if rec.state == IdempotencyState::Completed => {
                return Ok(ReserveOutcome::Completed(rec.clone()));
            }
            Some(rec) => {
                return Ok(ReserveOutcome::InFlight {
                    reserved_at: rec.updated_at,
                });
            }
        };

        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        keys.insert(
            storage_key.clone(),
            IdempotencyRecord {
                storage_key: storage_key.clone(),
                state: IdempotencyState::Reserved,
                token,
                poll,
                option,
                vote: None,
                created_at: now,
                updated_at: now,
                expires_at: now.plus_millis(retention_ms),
            },
        );
        Ok(ReserveOutcome::Reserved(Reservation {
            storage_key,
            token,
            reclaimed,
        }))
    }

    fn get_key(&self, key: &ScopedKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.keys.lock().unwrap().get(&key.storage_key()).cloned())
    }

    fn complete_key(
        &self,
        reservation: &Reservation,
        vote: &VoteRecord,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        let mut keys = self.keys.lock().unwrap();
        let rec = Self::owned_record(&mut keys, reservation)?;
        rec.state = IdempotencyState::Completed;
        rec.vote = Some(vote.clone());
        rec.updated_at = now;
        Ok(())
    }

    fn fail_key(&self, reservation: &Reservation, now: Timestamp) -> Result<(), StoreError> {
        let mut keys = self.keys.lock().unwrap();
        let rec = Self::owned_record(&mut keys, reservation)?;
        rec.state = IdempotencyState::Failed;
        rec.updated_at = now;
        Ok(())
    }

    fn purge_expired(&self, now: Timestamp) -> Result<usize, StoreError> {
        let mut keys = self.keys.lock().unwrap();
        let before = keys.len();
        keys.retain(|_, rec| !rec.is_expired(now));
        Ok(before - keys.len())
    }
}

impl PollDirectory for NullStore {
    fn put_poll(&self, poll: &PollInfo) -> Result<(), StoreError> {
        self.polls.lock().unwrap().insert(poll.id, poll.clone());
        Ok(())
    }

    fn get_poll(&self, poll: PollId) -> Result<Option<PollInfo>, StoreError> {
        Ok(self.polls.lock().unwrap().get(&poll).cloned())
    }
}

impl AttemptLog for NullStore {
    fn record_attempt(&self, attempt: &VoteAttempt) -> Result<(), StoreError> {
        self.attempts.lock().unwrap().push(attempt.clone());
        Ok(())
    }

    fn attempts_for_poll(&self, poll: PollId) -> Result<Vec<VoteAttempt>, StoreError> {
        Ok(self
            .attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.poll == poll)
            .cloned()
            .collect())
    }

    fn purge_attempts_before(&self, cutoff: Timestamp) -> Result<usize, StoreError> {
        let mut attempts = self.attempts.lock().unwrap();
        let before = attempts.len();
        attempts.retain(|a| a.at >= cutoff);
        Ok(before - attempts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provote_types::IdempotencyKey;

    fn new_vote(poll: u64, user: u64, option: u64) -> NewVote {
        NewVote {
            poll: PollId::new(poll),
            option: OptionId::new(option),
            voter: VoterIdentity::User(user),
            created_at: Timestamp::from_secs(1),
            idempotency_key: None,
        }
    }

    fn scoped(key: &str) -> ScopedKey {
        ScopedKey::new(
            "cast_vote",
            VoterIdentity::User(1),
            IdempotencyKey::parse(key).unwrap(),
        )
    }

    fn reserve(store: &NullStore, key: &ScopedKey, now_ms: u64) -> ReserveOutcome {
        store
            .reserve_key(
                key,
                PollId::new(1),
                OptionId::new(1),
                Timestamp::from_millis(now_ms),
                1_000,
                60_000,
            )
            .unwrap()
    }

    #[test]
    fn second_vote_for_same_poll_is_duplicate() {
        let store = NullStore::new();
        let first = store.insert_unique(new_vote(1, 1, 10)).unwrap();
        let err = store.insert_unique(new_vote(1, 1, 11)).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(
            store.find_vote(PollId::new(1), &VoterIdentity::User(1)).unwrap(),
            Some(first)
        );
    }

    #[test]
    fn same_voter_may_vote_on_different_polls() {
        let store = NullStore::new();
        store.insert_unique(new_vote(1, 1, 10)).unwrap();
        store.insert_unique(new_vote(2, 1, 20)).unwrap();
        assert_eq!(store.vote_total(), 2);
    }

    #[test]
    fn injected_failures_are_transient_and_bounded() {
        let store = NullStore::new();
        store.fail_next_inserts(2);
        assert!(store.insert_unique(new_vote(1, 1, 10)).unwrap_err().is_transient());
        assert!(store.insert_unique(new_vote(1, 1, 10)).unwrap_err().is_transient());
        assert!(store.insert_unique(new_vote(1, 1, 10)).is_ok());
        assert_eq!(store.insert_calls(), 3);
    }

    #[test]
    fn delete_poll_votes_cascades() {
        let store = NullStore::new();
        store.insert_unique(new_vote(1, 1, 10)).unwrap();
        store.insert_unique(new_vote(1, 2, 10)).unwrap();
        store.insert_unique(new_vote(2, 1, 10)).unwrap();
        assert_eq!(store.delete_poll_votes(PollId::new(1)).unwrap(), 2);
        assert_eq!(store.count_votes(PollId::new(1)).unwrap(), 0);
        assert!(store.insert_unique(new_vote(1, 1, 11)).is_ok());
    }

    #[test]
    fn reserve_is_exclusive_until_released() {
        let store = NullStore::new();
        let key = scoped("k1");
        let ReserveOutcome::Reserved(r) = reserve(&store, &key, 0) else {
            panic!("first caller must reserve");
        };
        assert!(!r.reclaimed);
        assert!(matches!(reserve(&store, &key, 10), ReserveOutcome::InFlight { .. }));

        store.fail_key(&r, Timestamp::from_millis(20)).unwrap();
        let ReserveOutcome::Reserved(r2) = reserve(&store, &key, 30) else {
            panic!("failed key must be reclaimable");
        };
        assert!(r2.reclaimed);
        assert_ne!(r.token, r2.token);
    }

    #[test]
    fn completed_key_replays() {
        let store = NullStore::new();
        let key = scoped("k1");
        let ReserveOutcome::Reserved(r) = reserve(&store, &key, 0) else {
            panic!("expected reservation");
        };
        let vote = store.insert_unique(new_vote(1, 1, 1)).unwrap();
        store.complete_key(&r, &vote, Timestamp::from_millis(5)).unwrap();

        match reserve(&store, &key, 10) {
            ReserveOutcome::Completed(rec) => assert_eq!(rec.vote, Some(vote)),
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[test]
    fn stale_reservation_is_taken_over_and_old_holder_loses() {
        let store = NullStore::new();
        let key = scoped("k1");
        let ReserveOutcome::Reserved(old) = reserve(&store, &key, 0) else {
            panic!("expected reservation");
        };
        let ReserveOutcome::Reserved(new) = reserve(&store, &key, 1_000) else {
            panic!("stale reservation must be reclaimable");
        };
        assert!(new.reclaimed);
        let vote = store.insert_unique(new_vote(1, 1, 1)).unwrap();
        assert!(matches!(
            store.complete_key(&old, &vote, Timestamp::from_millis(1_001)),
            Err(StoreError::Conflict(_))
        ));
        assert!(store.complete_key(&new, &vote, Timestamp::from_millis(1_001)).is_ok());
    }

    #[test]
    fn purge_removes_only_expired() {
        let store = NullStore::new();
        reserve(&store, &scoped("old"), 0);
        reserve(&store, &scoped("new"), 30_000);
        assert_eq!(store.purge_expired(Timestamp::from_millis(60_000)).unwrap(), 1);
        assert_eq!(store.key_count(), 1);
    }
}
