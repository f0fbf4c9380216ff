//! Shared fixture wiring an [`Engine`] to the in-memory stores and sandbox
//! providers. Unit tests across the engine modules build on this.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use super::session::TransactionIntent;
use super::{new_session_id, pin, Engine, EngineConfig};
use crate::db::ledger::{LedgerStore, NewAccount, UserAccount};
use crate::db::memory::{MemoryLedger, MemoryOtps, MemorySessions};
use crate::db::sessions::{NewSession, Session, SessionStore};
use crate::providers::sandbox::{
    SandboxBankFeed, SandboxIdentityVerifier, SandboxMoneyMovement, SandboxNotifier,
};

pub(crate) struct TestKit {
    pub engine: Arc<Engine>,
    pub ledger: Arc<MemoryLedger>,
    pub sessions: Arc<MemorySessions>,
    pub otps: Arc<MemoryOtps>,
    pub notifier: Arc<SandboxNotifier>,
}

pub(crate) fn harness() -> TestKit {
    harness_with(EngineConfig::default())
}

pub(crate) fn harness_with(config: EngineConfig) -> TestKit {
    let ledger = Arc::new(MemoryLedger::new());
    let sessions = Arc::new(MemorySessions::new());
    let otps = Arc::new(MemoryOtps::new());
    let notifier = Arc::new(SandboxNotifier::new());
    let engine = Arc::new(Engine::new(
        ledger.clone(),
        sessions.clone(),
        otps.clone(),
        notifier.clone(),
        Arc::new(SandboxBankFeed),
        Arc::new(SandboxMoneyMovement),
        Arc::new(SandboxIdentityVerifier),
        config,
    ));
    TestKit {
        engine,
        ledger,
        sessions,
        otps,
        notifier,
    }
}

impl TestKit {
    /// A verified, active account with the given PIN and opening balance.
    pub(crate) async fn seed_account(
        &self,
        phone: &str,
        pin_code: &str,
        balance: Decimal,
    ) -> UserAccount {
        self.seed_named_account(phone, "Ada Obi", pin_code, balance)
            .await
    }

    pub(crate) async fn seed_named_account(
        &self,
        phone: &str,
        name: &str,
        pin_code: &str,
        balance: Decimal,
    ) -> UserAccount {
        let account = self
            .ledger
            .create_account(NewAccount {
                phone_number: phone.to_string(),
                full_name: name.to_string(),
                email: None,
                pin_hash: pin::hash(pin_code).unwrap(),
                identity_ref: format!("SBXID{phone}"),
            })
            .await
            .unwrap();
        self.ledger.mark_phone_verified(account.id).await.unwrap();
        if balance > Decimal::ZERO {
            self.ledger.adjust_balance(account.id, balance).await.unwrap();
        }
        self.ledger.find_account(account.id).await.unwrap().unwrap()
    }

    /// A live session at the given step holding the staged intent.
    pub(crate) async fn seed_session(
        &self,
        account: &UserAccount,
        intent: TransactionIntent,
        step: &str,
    ) -> Session {
        self.sessions
            .create(NewSession {
                id: new_session_id(),
                phone_number: account.phone_number.clone(),
                user_id: account.id,
                current_step: step.to_string(),
                payload: serde_json::to_value(&intent).unwrap(),
                expires_at: Utc::now() + Duration::seconds(300),
            })
            .await
            .unwrap()
    }
}
