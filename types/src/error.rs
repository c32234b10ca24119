//! Validation errors for value types and parameters.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid idempotency key: {0}")]
    InvalidIdempotencyKey(String),

    #[error("invalid voter identity: {0}")]
    InvalidVoter(String),

    #[error("invalid admission parameter `{field}`: {reason}")]
    InvalidParam { field: &'static str, reason: String },
}
