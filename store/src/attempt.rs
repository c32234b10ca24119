//! Vote attempt audit log.

use serde::{Deserialize, Serialize};

use crate::StoreError;
use provote_types::{IdempotencyKey, OptionId, PollId, Timestamp, VoteId, VoterIdentity};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Created(VoteId),
    Idempotent(VoteId),
    /// Rejected with a stable machine-readable code.
    Rejected(String),
}

/// One cast-vote call, whatever its outcome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoteAttempt {
    pub poll: PollId,
    pub option: OptionId,
    pub voter: VoterIdentity,
    pub idempotency_key: Option<IdempotencyKey>,
    /// Network identity used for rate limiting and reputation (usually the IP).
    pub client: String,
    pub fingerprint: Option<String>,
    pub outcome: AttemptOutcome,
    /// Pattern-analysis score, when the fraud gate got that far.
    pub risk_score: Option<f64>,
    pub at: Timestamp,
}

impl VoteAttempt {
    pub fn succeeded(&self) -> bool {
        !matches!(self.outcome, AttemptOutcome::Rejected(_))
    }
}

/// Append-only record of vote attempts that got past the fraud gate.
pub trait AttemptLog {
    fn record_attempt(&self, attempt: &VoteAttempt) -> Result<(), StoreError>;

    /// Attempts for a poll, oldest first.
    fn attempts_for_poll(&self, poll: PollId) -> Result<Vec<VoteAttempt>, StoreError>;

    /// Delete attempts made before `cutoff`. Returns how many were removed.
    fn purge_attempts_before(&self, cutoff: Timestamp) -> Result<usize, StoreError>;
}
