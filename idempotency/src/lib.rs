//! Idempotency key resolution for cast-vote requests.
//!
//! A key moves through `absent → reserved → {completed, failed}`. The
//! [`IdempotencyResolver`] relies on the store's atomic insert-if-absent to
//! make exactly one concurrent caller the owner of a key; everyone else waits
//! for that owner to finish and then replays its result.

pub mod error;
pub mod resolver;

pub use error::IdempotencyError;
pub use resolver::{IdempotencyResolver, Resolution, Resolved, ResolverSettings};

/// Endpoint scope for cast-vote keys.
pub const CAST_VOTE_ENDPOINT: &str = "cast_vote";
