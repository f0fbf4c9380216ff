//! Account and transaction persistence. Balance changes go through a single
//! guarded delta operation so concurrent spends can never drive a wallet
//! negative, and status transitions are guarded in SQL so completion and
//! failure are one-shot.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::StoreError;
use crate::providers::FundingAccount;

pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

pub const KIND_INTERNAL: &str = "internal";
pub const KIND_BANK: &str = "bank";
pub const KIND_AIRTIME: &str = "airtime";
pub const KIND_FUNDING: &str = "funding";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct UserAccount {
    pub id: Uuid,
    pub phone_number: String,
    pub full_name: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub pin_hash: String,
    pub wallet_balance: Decimal,
    pub is_phone_verified: bool,
    pub is_identity_verified: bool,
    #[serde(skip_serializing)]
    pub identity_ref: Option<String>,
    pub funding_account: Option<serde_json::Value>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    /// Registered and allowed to transact.
    pub fn is_usable(&self) -> bool {
        self.is_phone_verified && self.is_active()
    }

    pub fn funding_details(&self) -> Option<FundingAccount> {
        self.funding_account
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn first_name(&self) -> &str {
        self.full_name.split_whitespace().next().unwrap_or("there")
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub phone_number: String,
    pub full_name: String,
    pub email: Option<String>,
    pub pin_hash: String,
    pub identity_ref: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TransactionRecord {
    pub reference: String,
    pub sender_id: Uuid,
    pub recipient_id: Option<Uuid>,
    pub recipient_phone: Option<String>,
    pub recipient_name: String,
    pub recipient_account: Option<String>,
    pub recipient_bank_code: Option<String>,
    pub recipient_bank_name: Option<String>,
    pub amount: Decimal,
    pub fee: Decimal,
    pub currency: String,
    pub description: Option<String>,
    pub transfer_kind: String,
    pub initiated_via: String,
    pub status: String,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    pub fn total(&self) -> Decimal {
        self.amount + self.fee
    }

    pub fn is_processing(&self) -> bool {
        self.status == STATUS_PROCESSING
    }
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub reference: String,
    pub sender_id: Uuid,
    pub recipient_id: Option<Uuid>,
    pub recipient_phone: Option<String>,
    pub recipient_name: String,
    pub recipient_account: Option<String>,
    pub recipient_bank_code: Option<String>,
    pub recipient_bank_name: Option<String>,
    pub amount: Decimal,
    pub fee: Decimal,
    pub description: Option<String>,
    pub transfer_kind: String,
    pub initiated_via: String,
}

#[derive(Debug, Clone, Default)]
pub struct TxStats {
    pub sent: Decimal,
    pub received: Decimal,
    pub count: i64,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn find_account(&self, id: Uuid) -> Result<Option<UserAccount>, StoreError>;

    async fn find_account_by_phone(&self, phone: &str) -> Result<Option<UserAccount>, StoreError>;

    async fn find_account_by_email(&self, email: &str) -> Result<Option<UserAccount>, StoreError>;

    async fn find_account_by_identity_ref(
        &self,
        reference: &str,
    ) -> Result<Option<UserAccount>, StoreError>;

    async fn create_account(&self, new: NewAccount) -> Result<UserAccount, StoreError>;

    async fn mark_phone_verified(&self, id: Uuid) -> Result<(), StoreError>;

    async fn update_pin_hash(&self, id: Uuid, pin_hash: &str) -> Result<(), StoreError>;

    async fn attach_funding_account(
        &self,
        id: Uuid,
        account: &FundingAccount,
    ) -> Result<(), StoreError>;

    /// Atomically apply a signed delta to a wallet and return the new
    /// balance. Debits carry a `balance >= debit` guard in the same
    /// statement; `Ok(None)` means the guard failed (or the account does not
    /// exist) and nothing moved.
    async fn adjust_balance(&self, id: Uuid, delta: Decimal)
        -> Result<Option<Decimal>, StoreError>;

    async fn create_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<TransactionRecord, StoreError>;

    /// Transition `processing -> completed`. Returns whether this call made
    /// the transition; redeliveries get `false`.
    async fn complete_transaction(
        &self,
        reference: &str,
        provider_ref: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Transition `processing -> failed`, recording the reason. Same
    /// one-shot contract as [`complete_transaction`](Self::complete_transaction).
    async fn fail_transaction(&self, reference: &str, reason: &str) -> Result<bool, StoreError>;

    async fn find_transaction(
        &self,
        reference: &str,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    async fn find_transaction_for_user(
        &self,
        reference: &str,
        user_id: Uuid,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    async fn recent_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    async fn transaction_stats(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<TxStats, StoreError>;
}

const USER_COLUMNS: &str = "id, phone_number, full_name, email, pin_hash, wallet_balance, \
     is_phone_verified, is_identity_verified, identity_ref, funding_account, status, \
     created_at, updated_at";

const TX_COLUMNS: &str = "reference, sender_id, recipient_id, recipient_phone, recipient_name, \
     recipient_account, recipient_bank_code, recipient_bank_name, amount, fee, currency, \
     description, transfer_kind, initiated_via, status, provider_ref, failure_reason, \
     created_at, completed_at";

// Postgres-backed ledger
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for LedgerRepository {
    async fn find_account(&self, id: Uuid) -> Result<Option<UserAccount>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let account = sqlx::query_as::<_, UserAccount>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn find_account_by_phone(&self, phone: &str) -> Result<Option<UserAccount>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE phone_number = $1");
        let account = sqlx::query_as::<_, UserAccount>(&sql)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<UserAccount>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE lower(email) = lower($1)");
        let account = sqlx::query_as::<_, UserAccount>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn find_account_by_identity_ref(
        &self,
        reference: &str,
    ) -> Result<Option<UserAccount>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE identity_ref = $1");
        let account = sqlx::query_as::<_, UserAccount>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        Ok(account)
    }

    async fn create_account(&self, new: NewAccount) -> Result<UserAccount, StoreError> {
        let sql = format!(
            "INSERT INTO users (phone_number, full_name, email, pin_hash, identity_ref, is_identity_verified) \
             VALUES ($1, $2, $3, $4, $5, TRUE) RETURNING {USER_COLUMNS}"
        );
        let account = sqlx::query_as::<_, UserAccount>(&sql)
            .bind(&new.phone_number)
            .bind(&new.full_name)
            .bind(&new.email)
            .bind(&new.pin_hash)
            .bind(&new.identity_ref)
            .fetch_one(&self.pool)
            .await?;
        Ok(account)
    }

    async fn mark_phone_verified(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET is_phone_verified = TRUE, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_pin_hash(&self, id: Uuid, pin_hash: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET pin_hash = $1, updated_at = now() WHERE id = $2")
            .bind(pin_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn attach_funding_account(
        &self,
        id: Uuid,
        account: &FundingAccount,
    ) -> Result<(), StoreError> {
        let details = serde_json::to_value(account)?;
        sqlx::query("UPDATE users SET funding_account = $1, updated_at = now() WHERE id = $2")
            .bind(details)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn adjust_balance(
        &self,
        id: Uuid,
        delta: Decimal,
    ) -> Result<Option<Decimal>, StoreError> {
        let row: Option<(Decimal,)> = if delta < Decimal::ZERO {
            sqlx::query_as(
                "UPDATE users SET wallet_balance = wallet_balance - $1, updated_at = now() \
                 WHERE id = $2 AND wallet_balance >= $1 RETURNING wallet_balance",
            )
            .bind(-delta)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                "UPDATE users SET wallet_balance = wallet_balance + $1, updated_at = now() \
                 WHERE id = $2 RETURNING wallet_balance",
            )
            .bind(delta)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        };
        Ok(row.map(|(balance,)| balance))
    }

    async fn create_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<TransactionRecord, StoreError> {
        let sql = format!(
            "INSERT INTO transactions (reference, sender_id, recipient_id, recipient_phone, \
             recipient_name, recipient_account, recipient_bank_code, recipient_bank_name, \
             amount, fee, description, transfer_kind, initiated_via) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             RETURNING {TX_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(&new.reference)
            .bind(new.sender_id)
            .bind(new.recipient_id)
            .bind(&new.recipient_phone)
            .bind(&new.recipient_name)
            .bind(&new.recipient_account)
            .bind(&new.recipient_bank_code)
            .bind(&new.recipient_bank_name)
            .bind(new.amount)
            .bind(new.fee)
            .bind(&new.description)
            .bind(&new.transfer_kind)
            .bind(&new.initiated_via)
            .fetch_one(&self.pool)
            .await;
        match inserted {
            Ok(record) => Ok(record),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::DuplicateReference)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn complete_transaction(
        &self,
        reference: &str,
        provider_ref: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'completed', \
             provider_ref = COALESCE($2, provider_ref), completed_at = now() \
             WHERE reference = $1 AND status = 'processing'",
        )
        .bind(reference)
        .bind(provider_ref)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail_transaction(&self, reference: &str, reason: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'failed', failure_reason = $2, completed_at = now() \
             WHERE reference = $1 AND status = 'processing'",
        )
        .bind(reference)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_transaction(
        &self,
        reference: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let sql = format!("SELECT {TX_COLUMNS} FROM transactions WHERE reference = $1");
        let record = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_transaction_for_user(
        &self,
        reference: &str,
        user_id: Uuid,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let sql = format!(
            "SELECT {TX_COLUMNS} FROM transactions \
             WHERE reference = $1 AND (sender_id = $2 OR recipient_id = $2)"
        );
        let record = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(reference)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn recent_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let sql = format!(
            "SELECT {TX_COLUMNS} FROM transactions \
             WHERE sender_id = $1 OR recipient_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        );
        let records = sqlx::query_as::<_, TransactionRecord>(&sql)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    async fn transaction_stats(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<TxStats, StoreError> {
        // funding rows carry the user on both sides; they are received, not sent
        let (sent, received, count): (Decimal, Decimal, i64) = sqlx::query_as(
            "SELECT \
                COALESCE(SUM(CASE WHEN sender_id = $1 AND transfer_kind <> 'funding' \
                    THEN amount + fee ELSE 0 END), 0), \
                COALESCE(SUM(CASE WHEN recipient_id = $1 THEN amount ELSE 0 END), 0), \
                COUNT(*) \
             FROM transactions \
             WHERE (sender_id = $1 OR recipient_id = $1) \
               AND status = 'completed' AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(TxStats {
            sent,
            received,
            count,
        })
    }
}
