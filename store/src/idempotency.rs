//! Idempotency record storage trait.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::StoreError;
use provote_types::{IdempotencyKey, OptionId, PollId, Timestamp, VoteRecord, VoterIdentity};

/// An idempotency key scoped to the voter and the endpoint that received it.
///
/// Two voters using the same client key never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopedKey {
    pub endpoint: &'static str,
    pub voter: VoterIdentity,
    pub key: IdempotencyKey,
}

impl ScopedKey {
    pub fn new(endpoint: &'static str, voter: VoterIdentity, key: IdempotencyKey) -> Self {
        Self {
            endpoint,
            voter,
            key,
        }
    }

    /// Flat storage key: `endpoint|voter|key`.
    pub fn storage_key(&self) -> String {
        format!("{}|{}|{}", self.endpoint, self.voter, self.key)
    }
}

impl fmt::Display for ScopedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyState {
    Reserved,
    Completed,
    Failed,
}

/// Persistent state of one scoped idempotency key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub storage_key: String,
    pub state: IdempotencyState,
    /// Identifies the reservation holder; bumped on every takeover.
    pub token: u64,
    /// The request the key was first reserved for.
    pub poll: PollId,
    pub option: OptionId,
    /// Replayable result, present once completed.
    pub vote: Option<VoteRecord>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// After this instant the record is garbage regardless of state.
    pub expires_at: Timestamp,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Whether a `Reserved` record is past its reservation TTL.
    pub fn is_stale_reservation(&self, now: Timestamp, reservation_ttl_ms: u64) -> bool {
        self.state == IdempotencyState::Reserved
            && self.updated_at.has_expired(reservation_ttl_ms, now)
    }

    /// Whether a new caller may take this record over as a fresh reservation.
    pub fn is_reclaimable(&self, now: Timestamp, reservation_ttl_ms: u64) -> bool {
        self.is_expired(now)
            || self.state == IdempotencyState::Failed
            || self.is_stale_reservation(now, reservation_ttl_ms)
    }
}

/// Proof of holding a reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub storage_key: String,
    pub token: u64,
    /// True if a failed, stale or expired record was taken over.
    pub reclaimed: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReserveOutcome {
    /// The caller now holds the key and must complete or fail it.
    Reserved(Reservation),
    /// Another caller holds a live reservation.
    InFlight { reserved_at: Timestamp },
    /// The key already completed; replay the stored result.
    Completed(IdempotencyRecord),
}

/// Storage for idempotency records.
pub trait IdempotencyStore {
    /// Atomic insert-if-absent.
    ///
    /// Absent keys and reclaimable records (failed, reservation older than
    /// `reservation_ttl_ms`, or past `expires_at`) become a new reservation
    /// owned by the caller with `expires_at = now + retention_ms`. A live
    /// reservation yields `InFlight`; a completed record yields `Completed`.
    fn reserve_key(
        &self,
        key: &ScopedKey,
        poll: PollId,
        option: OptionId,
        now: Timestamp,
        reservation_ttl_ms: u64,
        retention_ms: u64,
    ) -> Result<ReserveOutcome, StoreError>;

    fn get_key(&self, key: &ScopedKey) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// `Reserved → Completed`, storing the replayable vote.
    ///
    /// Returns [`StoreError::Conflict`] if `reservation` no longer owns the key.
    fn complete_key(
        &self,
        reservation: &Reservation,
        vote: &VoteRecord,
        now: Timestamp,
    ) -> Result<(), StoreError>;

    /// `Reserved → Failed`, releasing the key for a later retry.
    ///
    /// Returns [`StoreError::Conflict`] if `reservation` no longer owns the key.
    fn fail_key(&self, reservation: &Reservation, now: Timestamp) -> Result<(), StoreError>;

    /// Delete every record with `expires_at <= now`. Returns the count removed.
    fn purge_expired(&self, now: Timestamp) -> Result<usize, StoreError>;
}
