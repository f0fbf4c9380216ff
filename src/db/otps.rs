//! One-time codes for phone verification and PIN resets. A new code replaces
//! any outstanding one for the same purpose; consumption is a single guarded
//! update so a code can never verify twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::StoreError;

pub const PURPOSE_PHONE_VERIFICATION: &str = "phone_verification";
pub const PURPOSE_PIN_RESET: &str = "pin_reset";

#[derive(Debug, Clone)]
pub struct NewOtp {
    pub user_id: Uuid,
    pub phone_number: String,
    pub code: String,
    pub purpose: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    async fn create(&self, new: NewOtp) -> Result<(), StoreError>;

    async fn consume(&self, user_id: Uuid, purpose: &str, code: &str) -> Result<bool, StoreError>;
}

pub struct OtpRepository {
    pool: PgPool,
}

impl OtpRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OtpStore for OtpRepository {
    async fn create(&self, new: NewOtp) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM otps WHERE user_id = $1 AND purpose = $2")
            .bind(new.user_id)
            .bind(&new.purpose)
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "INSERT INTO otps (user_id, phone_number, code, purpose, expires_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(new.user_id)
        .bind(&new.phone_number)
        .bind(&new.code)
        .bind(&new.purpose)
        .bind(new.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume(&self, user_id: Uuid, purpose: &str, code: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE otps SET consumed = TRUE \
             WHERE user_id = $1 AND purpose = $2 AND code = $3 \
               AND consumed = FALSE AND expires_at > now()",
        )
        .bind(user_id)
        .bind(purpose)
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
