pub mod ledger;
pub mod memory;
pub mod otps;
pub mod sessions;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A live session already exists for the phone number.
    #[error("a pending session already exists for this phone number")]
    SessionConflict,

    /// A transaction with the same reference was already recorded.
    #[error("a transaction with this reference already exists")]
    DuplicateReference,
}
