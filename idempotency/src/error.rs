use provote_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// Another caller still holds the key after the wait budget ran out.
    #[error("idempotency key {key} is still in flight after {waited_ms}ms")]
    InFlight { key: String, waited_ms: u64 },

    #[error("idempotency store error: {0}")]
    Store(#[from] StoreError),
}

impl IdempotencyError {
    /// Whether the caller may retry the whole operation with the same key.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InFlight { .. } => true,
            Self::Store(e) => e.is_transient(),
        }
    }
}
