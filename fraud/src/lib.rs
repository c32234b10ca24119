//! Fraud screening for vote admission.
//!
//! The [`FraudGate`] composes three parts into one admit/deny decision:
//!
//! - [`ReputationTracker`]: per-identity trust with escalating blocks
//! - [`RateLimiter`]: sliding-window request counting
//! - [`PatternAnalyzer`]: stateless automation scoring over recent timing
//!   and shared device fingerprints
//!
//! All mutable state lives behind [`FraudStateStore`](provote_store::FraudStateStore);
//! [`MemoryFraudStore`] keeps it in sharded maps so that unrelated identities
//! never contend on a lock.

pub mod error;
pub mod gate;
pub mod pattern;
pub mod rate_limit;
pub mod reputation;
pub mod state;

pub use error::FraudError;
pub use gate::{Decision, DenyReason, FraudGate, Subject};
pub use pattern::{FingerprintProfile, PatternAnalyzer, RequestSignals};
pub use rate_limit::{RateDecision, RateLimiter};
pub use reputation::{ReputationPolicy, ReputationTracker, ViolationKind};
pub use state::MemoryFraudStore;
