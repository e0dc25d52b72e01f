use thiserror::Error;

/// Errors from the table backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional guard failed; the whole transaction was cancelled.
    /// `index` is the position of the first failing op in the request.
    #[error("condition check failed for operation {index} ({key})")]
    ConditionFailed { index: usize, key: String },

    #[error("transaction has {requested} items, limit is {limit}")]
    TooManyItems { requested: usize, limit: usize },

    #[error("transaction has no operations")]
    EmptyTransaction,

    /// Item attributes could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Index of the failing op when the transaction was cancelled by a guard.
    pub fn failed_condition(&self) -> Option<usize> {
        match self {
            StoreError::ConditionFailed { index, .. } => Some(*index),
            _ => None,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
