use provote_fraud::{DenyReason, FraudError};
use provote_idempotency::IdempotencyError;
use provote_store::StoreError;
use provote_types::{OptionId, PollId, Timestamp};
use thiserror::Error;

/// Why a cast-vote request was not admitted.
///
/// Every variant is a structured reason; the HTTP layer picks a status code
/// from the variant alone.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum AdmissionError {
    #[error("identity is blocked until {until}")]
    Blocked { until: Timestamp },

    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("request pattern looks automated (risk {score:.2})")]
    SuspiciousPattern { score: f64 },

    /// The voter already voted for a different option in this poll.
    #[error("already voted for {existing_option} in {poll}")]
    DuplicateVote {
        poll: PollId,
        existing_option: OptionId,
    },

    /// Storage stayed unavailable through every retry. Safe to retry with
    /// the same idempotency key.
    #[error("transient storage failure: {reason}")]
    TransientStorageFailure { reason: String, retry_after_ms: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AdmissionError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "blocked",
            Self::RateLimited { .. } => "rate_limited",
            Self::SuspiciousPattern { .. } => "suspicious_pattern",
            Self::DuplicateVote { .. } => "duplicate_vote",
            Self::TransientStorageFailure { .. } => "transient_storage_failure",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Whether repeating the identical request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::TransientStorageFailure { .. }
        )
    }

    /// Whether the fraud gate turned the request away.
    pub fn is_fraud_denial(&self) -> bool {
        matches!(
            self,
            Self::Blocked { .. } | Self::RateLimited { .. } | Self::SuspiciousPattern { .. }
        )
    }

    /// Suggested client back-off, where one applies.
    pub fn retry_after_ms(&self, now: Timestamp) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms }
            | Self::TransientStorageFailure { retry_after_ms, .. } => Some(*retry_after_ms),
            Self::Blocked { until } => Some(now.elapsed_since(*until)),
            _ => None,
        }
    }
}

impl From<DenyReason> for AdmissionError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Blocked { until } => Self::Blocked { until },
            DenyReason::RateLimited { retry_after_ms } => Self::RateLimited { retry_after_ms },
            DenyReason::SuspiciousPattern { score } => Self::SuspiciousPattern { score },
        }
    }
}

/// A garbage-collection pass stopped part way.
#[derive(Debug, Error)]
pub enum GcError {
    #[error("purging idempotency keys: {0}")]
    Keys(#[from] IdempotencyError),

    #[error("purging vote attempts: {0}")]
    Attempts(#[from] StoreError),

    #[error("purging fraud state: {0}")]
    Fraud(#[from] FraudError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limits_and_transient_failures_are_retryable() {
        assert!(AdmissionError::RateLimited { retry_after_ms: 5 }.is_retryable());
        assert!(AdmissionError::TransientStorageFailure {
            reason: "deadlock".into(),
            retry_after_ms: 100
        }
        .is_retryable());
        assert!(!AdmissionError::DuplicateVote {
            poll: PollId::new(1),
            existing_option: OptionId::new(2)
        }
        .is_retryable());
        assert!(!AdmissionError::InvalidRequest("x".into()).is_retryable());
    }

    #[test]
    fn storage_and_duplicate_errors_are_not_fraud_denials() {
        assert!(!AdmissionError::DuplicateVote {
            poll: PollId::new(1),
            existing_option: OptionId::new(2)
        }
        .is_fraud_denial());
        assert!(!AdmissionError::TransientStorageFailure {
            reason: "deadlock".into(),
            retry_after_ms: 100
        }
        .is_fraud_denial());
    }

    #[test]
    fn deny_reasons_keep_their_code() {
        let reasons = [
            DenyReason::Blocked {
                until: Timestamp::from_secs(9),
            },
            DenyReason::RateLimited { retry_after_ms: 1 },
            DenyReason::SuspiciousPattern { score: 0.9 },
        ];
        for reason in reasons {
            let code = reason.code();
            let err = AdmissionError::from(reason);
            assert_eq!(err.code(), code);
            assert!(err.is_fraud_denial());
        }
    }

    #[test]
    fn block_retry_hint_counts_down() {
        let err = AdmissionError::Blocked {
            until: Timestamp::from_secs(100),
        };
        assert_eq!(err.retry_after_ms(Timestamp::from_secs(40)), Some(60_000));
    }
}
