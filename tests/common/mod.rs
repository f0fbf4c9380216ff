//! End-to-end fixture: the engine wired to in-memory stores and sandbox
//! providers, driven purely through inbound SMS/USSD traffic.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use textpay::db::ledger::{LedgerStore, UserAccount};
use textpay::db::memory::{MemoryLedger, MemoryOtps, MemorySessions};
use textpay::db::otps::PURPOSE_PHONE_VERIFICATION;
use textpay::engine::{phone, Engine, EngineConfig};
use textpay::providers::banks::CachedBankDirectory;
use textpay::providers::sandbox::{
    SandboxBankFeed, SandboxIdentityVerifier, SandboxMoneyMovement, SandboxNotifier,
};

pub struct World {
    pub engine: Arc<Engine>,
    pub ledger: Arc<MemoryLedger>,
    pub sessions: Arc<MemorySessions>,
    pub otps: Arc<MemoryOtps>,
    pub notifier: Arc<SandboxNotifier>,
}

pub fn world() -> World {
    world_with(EngineConfig::default())
}

pub fn world_with(config: EngineConfig) -> World {
    let ledger = Arc::new(MemoryLedger::new());
    let sessions = Arc::new(MemorySessions::new());
    let otps = Arc::new(MemoryOtps::new());
    let notifier = Arc::new(SandboxNotifier::new());
    let banks = Arc::new(CachedBankDirectory::new(
        Arc::new(SandboxBankFeed),
        Duration::from_secs(3600),
    ));
    let engine = Arc::new(Engine::new(
        ledger.clone(),
        sessions.clone(),
        otps.clone(),
        notifier.clone(),
        banks,
        Arc::new(SandboxMoneyMovement),
        Arc::new(SandboxIdentityVerifier),
        config,
    ));
    World {
        engine,
        ledger,
        sessions,
        otps,
        notifier,
    }
}

impl World {
    /// Deliver one inbound SMS and collect the replies it triggered.
    pub async fn sms(&self, from: &str, text: &str) -> Vec<String> {
        let before = self.notifier.sent().len();
        self.engine.route_sms(from, text).await;
        self.notifier
            .sent()
            .into_iter()
            .skip(before)
            .map(|m| m.body)
            .collect()
    }

    /// The single reply an SMS is expected to produce.
    pub async fn sms_reply(&self, from: &str, text: &str) -> String {
        let mut replies = self.sms(from, text).await;
        assert_eq!(
            replies.len(),
            1,
            "expected exactly one reply to {text:?}, got {replies:?}"
        );
        replies.remove(0)
    }

    pub async fn ussd(&self, session: &str, msisdn: &str, text: &str) -> String {
        self.engine
            .clone()
            .route_ussd(session, msisdn, text)
            .await
    }

    /// Walk REG + VERIFY so the phone ends up with a usable wallet.
    pub async fn register_verified(
        &self,
        msisdn: &str,
        id_number: &str,
        pin_code: &str,
    ) -> UserAccount {
        self.sms(msisdn, &format!("REG {id_number} {pin_code}")).await;
        let canonical = phone::normalize_or_raw(msisdn);
        let account = self
            .ledger
            .find_account_by_phone(&canonical)
            .await
            .unwrap()
            .expect("registration should have created the account");
        let code = self
            .otps
            .current_code(account.id, PURPOSE_PHONE_VERIFICATION)
            .expect("a verification code should be waiting");
        self.sms(msisdn, &format!("VERIFY {code}")).await;
        self.ledger.find_account(account.id).await.unwrap().unwrap()
    }

    pub async fn balance(&self, account: &UserAccount) -> Decimal {
        self.ledger
            .find_account(account.id)
            .await
            .unwrap()
            .unwrap()
            .wallet_balance
    }

    /// USSD approval executes off the request path; poll until the ledger
    /// holds `at_least` transactions and none is still processing.
    pub async fn settle(&self, at_least: usize) {
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let transactions = self.ledger.all_transactions();
            if transactions.len() >= at_least && !transactions.iter().any(|t| t.is_processing()) {
                return;
            }
        }
        panic!("transactions still processing after polling");
    }
}
