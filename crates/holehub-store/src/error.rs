use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Key '{bucket}/{key}' already exists")]
    Conflict { bucket: String, key: String },

    #[error("Value at '{bucket}/{key}' is not a counter: {value}")]
    NotACounter {
        bucket: String,
        key: String,
        value: String,
    },

    #[error("Corrupt value at '{bucket}/{key}': {reason}")]
    Corrupt {
        bucket: String,
        key: String,
        reason: String,
    },
}

impl StoreError {
    pub fn corrupt(bucket: &str, key: &str, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            bucket: bucket.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}
