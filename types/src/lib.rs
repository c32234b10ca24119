//! Fundamental types for the provote admission engine.
//!
//! This crate defines the value types shared across every other crate in the
//! workspace: poll/option/vote identifiers, voter identities, idempotency keys,
//! timestamps and clocks, and the tunable admission parameters.

pub mod digest;
pub mod error;
pub mod ids;
pub mod jitter;
pub mod key;
pub mod params;
pub mod time;
pub mod vote;

pub use error::ValidationError;
pub use ids::{OptionId, PollId, VoteId, VoterIdentity};
pub use jitter::Jitter;
pub use key::IdempotencyKey;
pub use params::AdmissionParams;
pub use time::{Clock, SystemClock, Timestamp};
pub use vote::{NewVote, VoteRecord};
