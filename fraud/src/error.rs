use provote_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FraudError {
    #[error("fraud state store error: {0}")]
    Store(#[from] StoreError),
}
