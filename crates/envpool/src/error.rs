use crate::store::StoreError;

/// Failures surfaced by pool operations.
///
/// Exhaustion is not listed here: an empty pool is an expected outcome and
/// is reported through `ClaimOutcome::Exhausted`.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Environment with URL {0} already exists")]
    DuplicateResource(String),

    #[error("Environment not found or already released")]
    LeaseNotFound,

    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, PoolError>;
