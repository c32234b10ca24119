//! Vote admission: the top-level `cast_vote` entry point.
//!
//! [`AdmissionEngine`] ties the fraud gate, the idempotency resolver and the
//! durable vote store together so that each `(voter, poll)` pair is recorded
//! at most once, however many identical requests race for it.

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod shutdown;
pub mod spans;

pub use config::{ConfigError, ServiceConfig};
pub use engine::{AdmissionEngine, AdmissionStore, CastVoteRequest, GcReport, VoteOutcome};
pub use error::{AdmissionError, GcError};
pub use metrics::AdmissionMetrics;
pub use retry::{retry_transient, RandomJitter, Retried, RetryError, RetryPolicy};
pub use shutdown::ShutdownController;
