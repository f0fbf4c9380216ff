use rust_decimal::Decimal;
use thiserror::Error;

use crate::db::StoreError;
use crate::providers::ProviderError;

/// Top-level error for engine and route code. Conversation-level problems
/// (bad command, wrong PIN, cancelled session) are answered over SMS and never
/// become a `ServiceError`; anything that does reach this type is either a
/// client fault on the REST surface or an internal fault worth logging.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("authentication failed")]
    Authentication,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("session state error: {0}")]
    State(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(StoreError::Database(err))
    }
}
