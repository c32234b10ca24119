use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected the write.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// Lock timeout, deadlock or a busy writer. Safe to retry.
    #[error("storage contention: {0}")]
    Contention(String),

    /// The caller's view of a record is stale (e.g. its reservation was reclaimed).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database is corrupted: {0}")]
    Corruption(String),
}

impl StoreError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}
