//! Conversation sessions. One live session per phone number (unique index);
//! expired rows are invisible to every lookup and swept in the background.
//! `begin_execution` is the claim that makes PIN acceptance execute at most
//! once when the gateway redelivers a message.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::StoreError;

pub const STEP_AWAITING_CONFIRMATION: &str = "awaiting_confirmation";
pub const STEP_AWAITING_PIN: &str = "awaiting_pin";
pub const STEP_AWAITING_USSD_PIN: &str = "awaiting_ussd_pin";
pub const STEP_EXECUTING: &str = "executing";

/// How many characters of the session id form the USSD approval code.
pub const SHORT_CODE_LEN: usize = 4;

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: String,
    pub phone_number: String,
    pub user_id: Uuid,
    /// Stored as text; the engine parses it and treats unknown values as
    /// corrupt state.
    pub current_step: String,
    pub pin_attempts: i32,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn short_code(&self) -> &str {
        let start = self.id.len().saturating_sub(SHORT_CODE_LEN);
        self.id.get(start..).unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: String,
    pub phone_number: String,
    pub user_id: Uuid,
    pub current_step: String,
    pub payload: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_active(&self, phone: &str) -> Result<Option<Session>, StoreError>;

    /// Live-session lookup by the last characters of the id, scoped to the
    /// phone number, case-insensitive.
    async fn find_by_short_code(
        &self,
        phone: &str,
        code: &str,
    ) -> Result<Option<Session>, StoreError>;

    /// Clears expired rows for the phone then inserts. A race against
    /// another live session surfaces as [`StoreError::SessionConflict`].
    async fn create(&self, new: NewSession) -> Result<Session, StoreError>;

    async fn set_step(&self, id: &str, step: &str) -> Result<(), StoreError>;

    /// Atomic attempt-count increment. `Ok(None)` means the session is
    /// already gone.
    async fn record_failed_pin(&self, id: &str) -> Result<Option<i32>, StoreError>;

    /// Claim the session for execution: advance a live `awaiting_pin` /
    /// `awaiting_ussd_pin` session to `executing`. Exactly one concurrent
    /// caller gets `true`.
    async fn begin_execution(&self, id: &str) -> Result<bool, StoreError>;

    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    async fn purge_expired(&self) -> Result<u64, StoreError>;
}

const SESSION_COLUMNS: &str =
    "id, phone_number, user_id, current_step, pin_attempts, payload, created_at, expires_at";

pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SessionRepository {
    async fn find_active(&self, phone: &str) -> Result<Option<Session>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sms_sessions \
             WHERE phone_number = $1 AND expires_at > now()"
        );
        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn find_by_short_code(
        &self,
        phone: &str,
        code: &str,
    ) -> Result<Option<Session>, StoreError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sms_sessions \
             WHERE phone_number = $1 AND expires_at > now() \
               AND lower(right(id, $2)) = lower($3)"
        );
        let session = sqlx::query_as::<_, Session>(&sql)
            .bind(phone)
            .bind(SHORT_CODE_LEN as i32)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn create(&self, new: NewSession) -> Result<Session, StoreError> {
        sqlx::query("DELETE FROM sms_sessions WHERE phone_number = $1 AND expires_at <= now()")
            .bind(&new.phone_number)
            .execute(&self.pool)
            .await?;

        let sql = format!(
            "INSERT INTO sms_sessions (id, phone_number, user_id, current_step, payload, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {SESSION_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, Session>(&sql)
            .bind(&new.id)
            .bind(&new.phone_number)
            .bind(new.user_id)
            .bind(&new.current_step)
            .bind(&new.payload)
            .bind(new.expires_at)
            .fetch_one(&self.pool)
            .await;

        match inserted {
            Ok(session) => Ok(session),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::SessionConflict)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn set_step(&self, id: &str, step: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE sms_sessions SET current_step = $1 WHERE id = $2")
            .bind(step)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_failed_pin(&self, id: &str) -> Result<Option<i32>, StoreError> {
        let row: Option<(i32,)> = sqlx::query_as(
            "UPDATE sms_sessions SET pin_attempts = pin_attempts + 1 \
             WHERE id = $1 RETURNING pin_attempts",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(attempts,)| attempts))
    }

    async fn begin_execution(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sms_sessions SET current_step = $1 \
             WHERE id = $2 AND current_step IN ($3, $4) AND expires_at > now()",
        )
        .bind(STEP_EXECUTING)
        .bind(id)
        .bind(STEP_AWAITING_PIN)
        .bind(STEP_AWAITING_USSD_PIN)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM sms_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sms_sessions WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
