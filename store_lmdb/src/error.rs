use provote_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LmdbError {
    #[error("LMDB error: {0}")]
    Heed(String),

    /// Reader table full or map resized under us; retrying can succeed.
    #[error("LMDB busy: {0}")]
    Busy(String),

    #[error("LMDB corruption: {0}")]
    Corrupted(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbError {
    fn from(e: heed::Error) -> Self {
        match e {
            heed::Error::Mdb(heed::MdbError::ReadersFull)
            | heed::Error::Mdb(heed::MdbError::MapResized) => LmdbError::Busy(e.to_string()),
            heed::Error::Mdb(heed::MdbError::Corrupted) => LmdbError::Corrupted(e.to_string()),
            other => LmdbError::Heed(other.to_string()),
        }
    }
}

impl From<bincode::Error> for LmdbError {
    fn from(e: bincode::Error) -> Self {
        LmdbError::Serialization(e.to_string())
    }
}

impl From<LmdbError> for StoreError {
    fn from(e: LmdbError) -> Self {
        match e {
            LmdbError::Busy(msg) => StoreError::Contention(msg),
            LmdbError::Corrupted(msg) => StoreError::Corruption(msg),
            LmdbError::NotFound(key) => StoreError::NotFound(key),
            LmdbError::Duplicate(key) => StoreError::Duplicate(key),
            LmdbError::Conflict(msg) => StoreError::Conflict(msg),
            LmdbError::Serialization(msg) => StoreError::Serialization(msg),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
