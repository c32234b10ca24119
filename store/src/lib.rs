//! Abstract storage traits for the provote admission engine.
//!
//! Every storage backend (LMDB, in-memory for testing) implements these
//! traits. The rest of the codebase depends only on the traits.
//!
//! The two primitives correctness hangs on are [`VoteStore::insert_unique`]
//! (a uniqueness constraint on `(poll, voter)`) and
//! [`IdempotencyStore::reserve_key`] (atomic insert-if-absent). Both must be
//! atomic in the backend itself; callers never check-then-insert.

pub mod attempt;
pub mod directory;
pub mod error;
pub mod fraud;
pub mod idempotency;
pub mod vote;

pub use attempt::{AttemptLog, AttemptOutcome, VoteAttempt};
pub use directory::{OptionCheck, PollDirectory, PollInfo};
pub use error::StoreError;
pub use fraud::{
    FingerprintActivity, FraudStateStore, RateWindow, ReputationEntry, Severity, Sighting,
};
pub use idempotency::{
    IdempotencyRecord, IdempotencyState, IdempotencyStore, Reservation, ReserveOutcome, ScopedKey,
};
pub use vote::VoteStore;
