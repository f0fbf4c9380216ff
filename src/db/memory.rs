//! In-memory store implementations with the same guard semantics as the
//! Postgres repositories. They back the test suite and make local runs
//! possible without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::ledger::{
    LedgerStore, NewAccount, NewTransaction, TransactionRecord, TxStats, UserAccount,
    KIND_FUNDING, STATUS_COMPLETED, STATUS_FAILED, STATUS_PROCESSING,
};
use super::otps::{NewOtp, OtpStore};
use super::sessions::{
    NewSession, Session, SessionStore, STEP_AWAITING_CONFIRMATION, STEP_AWAITING_PIN,
    STEP_AWAITING_USSD_PIN, STEP_EXECUTING,
};
use super::StoreError;
use crate::providers::FundingAccount;

#[derive(Default)]
pub struct MemoryLedger {
    accounts: Mutex<HashMap<Uuid, UserAccount>>,
    transactions: Mutex<Vec<TransactionRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct insert for tests that need a pre-funded account.
    pub fn put_account(&self, account: UserAccount) {
        self.accounts.lock().unwrap().insert(account.id, account);
    }

    pub fn all_transactions(&self) -> Vec<TransactionRecord> {
        self.transactions.lock().unwrap().clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn find_account(&self, id: Uuid) -> Result<Option<UserAccount>, StoreError> {
        Ok(self.accounts.lock().unwrap().get(&id).cloned())
    }

    async fn find_account_by_phone(&self, phone: &str) -> Result<Option<UserAccount>, StoreError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.phone_number == phone)
            .cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> Result<Option<UserAccount>, StoreError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .values()
            .find(|a| {
                a.email
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(email))
            })
            .cloned())
    }

    async fn find_account_by_identity_ref(
        &self,
        reference: &str,
    ) -> Result<Option<UserAccount>, StoreError> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .values()
            .find(|a| a.identity_ref.as_deref() == Some(reference))
            .cloned())
    }

    async fn create_account(&self, new: NewAccount) -> Result<UserAccount, StoreError> {
        let now = Utc::now();
        let account = UserAccount {
            id: Uuid::new_v4(),
            phone_number: new.phone_number,
            full_name: new.full_name,
            email: new.email,
            pin_hash: new.pin_hash,
            wallet_balance: Decimal::ZERO,
            is_phone_verified: false,
            is_identity_verified: true,
            identity_ref: Some(new.identity_ref),
            funding_account: None,
            status: "active".to_string(),
            created_at: now,
            updated_at: now,
        };
        self.accounts
            .lock()
            .unwrap()
            .insert(account.id, account.clone());
        Ok(account)
    }

    async fn mark_phone_verified(&self, id: Uuid) -> Result<(), StoreError> {
        if let Some(account) = self.accounts.lock().unwrap().get_mut(&id) {
            account.is_phone_verified = true;
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_pin_hash(&self, id: Uuid, pin_hash: &str) -> Result<(), StoreError> {
        if let Some(account) = self.accounts.lock().unwrap().get_mut(&id) {
            account.pin_hash = pin_hash.to_string();
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn attach_funding_account(
        &self,
        id: Uuid,
        funding: &FundingAccount,
    ) -> Result<(), StoreError> {
        if let Some(account) = self.accounts.lock().unwrap().get_mut(&id) {
            account.funding_account = Some(serde_json::to_value(funding)?);
            account.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn adjust_balance(
        &self,
        id: Uuid,
        delta: Decimal,
    ) -> Result<Option<Decimal>, StoreError> {
        let mut accounts = self.accounts.lock().unwrap();
        let Some(account) = accounts.get_mut(&id) else {
            return Ok(None);
        };
        if delta < Decimal::ZERO && account.wallet_balance < -delta {
            return Ok(None);
        }
        account.wallet_balance += delta;
        account.updated_at = Utc::now();
        Ok(Some(account.wallet_balance))
    }

    async fn create_transaction(
        &self,
        new: NewTransaction,
    ) -> Result<TransactionRecord, StoreError> {
        if self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .any(|t| t.reference == new.reference)
        {
            return Err(StoreError::DuplicateReference);
        }
        let record = TransactionRecord {
            reference: new.reference,
            sender_id: new.sender_id,
            recipient_id: new.recipient_id,
            recipient_phone: new.recipient_phone,
            recipient_name: new.recipient_name,
            recipient_account: new.recipient_account,
            recipient_bank_code: new.recipient_bank_code,
            recipient_bank_name: new.recipient_bank_name,
            amount: new.amount,
            fee: new.fee,
            currency: "NGN".to_string(),
            description: new.description,
            transfer_kind: new.transfer_kind,
            initiated_via: new.initiated_via,
            status: STATUS_PROCESSING.to_string(),
            provider_ref: None,
            failure_reason: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.transactions.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn complete_transaction(
        &self,
        reference: &str,
        provider_ref: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut transactions = self.transactions.lock().unwrap();
        match transactions
            .iter_mut()
            .find(|t| t.reference == reference && t.status == STATUS_PROCESSING)
        {
            Some(record) => {
                record.status = STATUS_COMPLETED.to_string();
                if let Some(provider_ref) = provider_ref {
                    record.provider_ref = Some(provider_ref.to_string());
                }
                record.completed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn fail_transaction(&self, reference: &str, reason: &str) -> Result<bool, StoreError> {
        let mut transactions = self.transactions.lock().unwrap();
        match transactions
            .iter_mut()
            .find(|t| t.reference == reference && t.status == STATUS_PROCESSING)
        {
            Some(record) => {
                record.status = STATUS_FAILED.to_string();
                record.failure_reason = Some(reason.to_string());
                record.completed_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_transaction(
        &self,
        reference: &str,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.reference == reference)
            .cloned())
    }

    async fn find_transaction_for_user(
        &self,
        reference: &str,
        user_id: Uuid,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .find(|t| {
                t.reference == reference
                    && (t.sender_id == user_id || t.recipient_id == Some(user_id))
            })
            .cloned())
    }

    async fn recent_transactions(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|t| t.sender_id == user_id || t.recipient_id == Some(user_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn transaction_stats(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<TxStats, StoreError> {
        let transactions = self.transactions.lock().unwrap();
        let mut stats = TxStats::default();
        for t in transactions.iter() {
            let involved = t.sender_id == user_id || t.recipient_id == Some(user_id);
            if !involved || t.status != STATUS_COMPLETED || t.created_at < since {
                continue;
            }
            if t.sender_id == user_id && t.transfer_kind != KIND_FUNDING {
                stats.sent += t.total();
            }
            if t.recipient_id == Some(user_id) {
                stats.received += t.amount;
            }
            stats.count += 1;
        }
        Ok(stats)
    }
}

#[derive(Default)]
pub struct MemorySessions {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct insert for tests (expired or corrupt sessions included).
    pub fn put(&self, session: Session) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }
}

fn live(session: &Session) -> bool {
    session.expires_at > Utc::now()
}

#[async_trait]
impl SessionStore for MemorySessions {
    async fn find_active(&self, phone: &str) -> Result<Option<Session>, StoreError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| s.phone_number == phone && live(s))
            .cloned())
    }

    async fn find_by_short_code(
        &self,
        phone: &str,
        code: &str,
    ) -> Result<Option<Session>, StoreError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .values()
            .find(|s| {
                s.phone_number == phone && live(s) && s.short_code().eq_ignore_ascii_case(code)
            })
            .cloned())
    }

    async fn create(&self, new: NewSession) -> Result<Session, StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.retain(|_, s| !(s.phone_number == new.phone_number && !live(s)));
        if sessions.values().any(|s| s.phone_number == new.phone_number) {
            return Err(StoreError::SessionConflict);
        }
        let session = Session {
            id: new.id,
            phone_number: new.phone_number,
            user_id: new.user_id,
            current_step: new.current_step,
            pin_attempts: 0,
            payload: new.payload,
            created_at: Utc::now(),
            expires_at: new.expires_at,
        };
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn set_step(&self, id: &str, step: &str) -> Result<(), StoreError> {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(id) {
            session.current_step = step.to_string();
        }
        Ok(())
    }

    async fn record_failed_pin(&self, id: &str) -> Result<Option<i32>, StoreError> {
        Ok(self.sessions.lock().unwrap().get_mut(id).map(|session| {
            session.pin_attempts += 1;
            session.pin_attempts
        }))
    }

    async fn begin_execution(&self, id: &str) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        match sessions.get_mut(id) {
            Some(session)
                if live(session)
                    && (session.current_step == STEP_AWAITING_PIN
                        || session.current_step == STEP_AWAITING_USSD_PIN) =>
            {
                session.current_step = STEP_EXECUTING.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.lock().unwrap().remove(id).is_some())
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| live(s));
        Ok((before - sessions.len()) as u64)
    }
}

struct StoredOtp {
    user_id: Uuid,
    code: String,
    purpose: String,
    consumed: bool,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryOtps {
    codes: Mutex<Vec<StoredOtp>>,
}

impl MemoryOtps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspection helper for tests that need the code out-of-band.
    pub fn current_code(&self, user_id: Uuid, purpose: &str) -> Option<String> {
        self.codes
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.user_id == user_id && c.purpose == purpose && !c.consumed)
            .map(|c| c.code.clone())
    }
}

#[async_trait]
impl OtpStore for MemoryOtps {
    async fn create(&self, new: NewOtp) -> Result<(), StoreError> {
        let mut codes = self.codes.lock().unwrap();
        codes.retain(|c| !(c.user_id == new.user_id && c.purpose == new.purpose));
        codes.push(StoredOtp {
            user_id: new.user_id,
            code: new.code,
            purpose: new.purpose,
            consumed: false,
            expires_at: new.expires_at,
        });
        Ok(())
    }

    async fn consume(&self, user_id: Uuid, purpose: &str, code: &str) -> Result<bool, StoreError> {
        let mut codes = self.codes.lock().unwrap();
        match codes.iter_mut().find(|c| {
            c.user_id == user_id
                && c.purpose == purpose
                && c.code == code
                && !c.consumed
                && c.expires_at > Utc::now()
        }) {
            Some(stored) => {
                stored.consumed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
