//! Store-level guarantees the conversation layer leans on: the atomic
//! balance guard under contention, one-shot status transitions, reference
//! uniqueness and the one-live-session-per-phone rule.

use std::sync::Arc;

use futures::future::join_all;
use rust_decimal::Decimal;
use serde_json::json;
use textpay::db::ledger::{
    LedgerStore, NewAccount, NewTransaction, UserAccount, KIND_BANK, KIND_FUNDING,
    STATUS_COMPLETED, STATUS_FAILED, STATUS_PROCESSING,
};
use textpay::db::memory::{MemoryLedger, MemorySessions};
use textpay::db::sessions::{NewSession, SessionStore, STEP_AWAITING_CONFIRMATION, STEP_AWAITING_PIN};
use textpay::db::StoreError;
use textpay::engine::pin;
use uuid::Uuid;

async fn funded_account(ledger: &MemoryLedger, phone: &str, balance: i64) -> UserAccount {
    let account = ledger
        .create_account(NewAccount {
            phone_number: phone.to_string(),
            full_name: "Store Probe".to_string(),
            email: None,
            pin_hash: pin::hash("1234").unwrap(),
            identity_ref: format!("SBXID{}", &phone[4..]),
        })
        .await
        .unwrap();
    ledger
        .adjust_balance(account.id, Decimal::from(balance))
        .await
        .unwrap();
    account
}

fn bank_payout(sender: Uuid, reference: &str) -> NewTransaction {
    NewTransaction {
        reference: reference.to_string(),
        sender_id: sender,
        recipient_id: None,
        recipient_phone: None,
        recipient_name: "ADAEZE EZE".to_string(),
        recipient_account: Some("0123456789".to_string()),
        recipient_bank_code: Some("058".to_string()),
        recipient_bank_name: Some("Guaranty Trust Bank".to_string()),
        amount: Decimal::from(2_000),
        fee: Decimal::from(35),
        description: None,
        transfer_kind: KIND_BANK.to_string(),
        initiated_via: "sms".to_string(),
    }
}

fn staged_session(phone: &str, id: &str, ttl_secs: i64) -> NewSession {
    NewSession {
        id: id.to_string(),
        phone_number: phone.to_string(),
        user_id: Uuid::new_v4(),
        current_step: STEP_AWAITING_CONFIRMATION.to_string(),
        payload: json!({}),
        expires_at: chrono::Utc::now() + chrono::Duration::seconds(ttl_secs),
    }
}

#[tokio::test]
async fn concurrent_debits_never_overdraw() {
    let ledger = Arc::new(MemoryLedger::new());
    let account = funded_account(&ledger, "+2348031110001", 1_000).await;

    let debits = (0..10).map(|_| {
        let ledger = ledger.clone();
        let id = account.id;
        async move { ledger.adjust_balance(id, Decimal::from(-300)).await.unwrap() }
    });
    let outcomes = join_all(debits).await;

    let applied = outcomes.iter().filter(|o| o.is_some()).count();
    assert_eq!(applied, 3, "only three 300 debits fit into 1000");

    let after = ledger.find_account(account.id).await.unwrap().unwrap();
    assert_eq!(after.wallet_balance, Decimal::from(100));
    // Each winner saw the balance it produced; the lowest is the final one.
    assert_eq!(
        outcomes.into_iter().flatten().min(),
        Some(Decimal::from(100))
    );
}

#[tokio::test]
async fn settlement_lands_exactly_once() {
    let ledger = MemoryLedger::new();
    let sender = funded_account(&ledger, "+2348031110002", 5_000).await;

    let record = ledger
        .create_transaction(bank_payout(sender.id, "TXSETTLE01"))
        .await
        .unwrap();
    assert_eq!(record.status, STATUS_PROCESSING);

    assert!(ledger
        .complete_transaction("TXSETTLE01", Some("SBX_TRF_9"))
        .await
        .unwrap());
    // A replayed settlement and a late failure both bounce off.
    assert!(!ledger
        .complete_transaction("TXSETTLE01", Some("SBX_TRF_9"))
        .await
        .unwrap());
    assert!(!ledger
        .fail_transaction("TXSETTLE01", "late bounce")
        .await
        .unwrap());

    let stored = ledger.find_transaction("TXSETTLE01").await.unwrap().unwrap();
    assert_eq!(stored.status, STATUS_COMPLETED);
    assert_eq!(stored.provider_ref.as_deref(), Some("SBX_TRF_9"));
    assert!(stored.failure_reason.is_none());
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn failure_is_terminal_too() {
    let ledger = MemoryLedger::new();
    let sender = funded_account(&ledger, "+2348031110003", 5_000).await;
    ledger
        .create_transaction(bank_payout(sender.id, "TXBOUNCE01"))
        .await
        .unwrap();

    assert!(ledger
        .fail_transaction("TXBOUNCE01", "transfer declined by receiving bank")
        .await
        .unwrap());
    assert!(!ledger
        .complete_transaction("TXBOUNCE01", Some("SBX_TRF_1"))
        .await
        .unwrap());

    let stored = ledger.find_transaction("TXBOUNCE01").await.unwrap().unwrap();
    assert_eq!(stored.status, STATUS_FAILED);
    assert_eq!(
        stored.failure_reason.as_deref(),
        Some("transfer declined by receiving bank")
    );
    assert!(stored.provider_ref.is_none());
}

#[tokio::test]
async fn references_are_unique() {
    let ledger = MemoryLedger::new();
    let account = funded_account(&ledger, "+2348031110004", 1_000).await;

    let mut funding = bank_payout(account.id, "FND_PSP_77");
    funding.recipient_id = Some(account.id);
    funding.transfer_kind = KIND_FUNDING.to_string();

    ledger.create_transaction(funding.clone()).await.unwrap();
    let err = ledger.create_transaction(funding).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateReference));
}

#[tokio::test]
async fn a_phone_holds_one_live_session() {
    let sessions = MemorySessions::new();
    let phone = "+2348031110005";

    sessions
        .create(staged_session(phone, "SMS_1_aaaa1111", 300))
        .await
        .unwrap();
    let err = sessions
        .create(staged_session(phone, "SMS_2_bbbb2222", 300))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SessionConflict));

    // The slot frees as soon as the first conversation ends.
    assert!(sessions.delete("SMS_1_aaaa1111").await.unwrap());
    sessions
        .create(staged_session(phone, "SMS_3_cccc3333", 300))
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_sessions_do_not_hold_the_slot() {
    let sessions = MemorySessions::new();
    let phone = "+2348031110006";

    sessions
        .create(staged_session(phone, "SMS_4_dddd4444", -5))
        .await
        .unwrap();
    assert!(sessions.find_active(phone).await.unwrap().is_none());

    sessions
        .create(staged_session(phone, "SMS_5_eeee5555", 300))
        .await
        .unwrap();
    let live = sessions.find_active(phone).await.unwrap().unwrap();
    assert_eq!(live.id, "SMS_5_eeee5555");
}

#[tokio::test]
async fn purge_sweeps_only_expired_rows() {
    let sessions = MemorySessions::new();

    sessions
        .create(staged_session("+2348031110007", "SMS_6_ffff6666", -5))
        .await
        .unwrap();
    sessions
        .create(staged_session("+2348031110008", "SMS_7_abab7777", 300))
        .await
        .unwrap();

    assert_eq!(sessions.purge_expired().await.unwrap(), 1);
    assert!(sessions
        .find_active("+2348031110008")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn execution_claim_has_a_single_winner_under_contention() {
    let sessions = Arc::new(MemorySessions::new());
    let mut new = staged_session("+2348031110009", "SMS_8_cdcd8888", 300);
    new.current_step = STEP_AWAITING_PIN.to_string();
    sessions.create(new).await.unwrap();

    let claims = join_all((0..4).map(|_| {
        let sessions = sessions.clone();
        async move { sessions.begin_execution("SMS_8_cdcd8888").await.unwrap() }
    }))
    .await;

    assert_eq!(claims.into_iter().filter(|won| *won).count(), 1);
}

#[tokio::test]
async fn short_codes_are_scoped_and_case_insensitive() {
    let sessions = MemorySessions::new();
    let phone = "+2348031110010";

    let created = sessions
        .create(staged_session(phone, "SMS_9_efefabcd", 300))
        .await
        .unwrap();
    assert_eq!(created.short_code(), "abcd");

    // Handsets shout; the lookup should not care.
    let found = sessions
        .find_by_short_code(phone, "ABCD")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, created.id);

    // Codes only match the phone that owns the session.
    assert!(sessions
        .find_by_short_code("+2348039999999", "ABCD")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn pin_attempts_count_up_and_vanish_with_the_session() {
    let sessions = MemorySessions::new();
    sessions
        .create(staged_session("+2348031110011", "SMS_10_badc0101", 300))
        .await
        .unwrap();

    assert_eq!(
        sessions.record_failed_pin("SMS_10_badc0101").await.unwrap(),
        Some(1)
    );
    assert_eq!(
        sessions.record_failed_pin("SMS_10_badc0101").await.unwrap(),
        Some(2)
    );

    assert!(sessions.delete("SMS_10_badc0101").await.unwrap());
    assert_eq!(
        sessions.record_failed_pin("SMS_10_badc0101").await.unwrap(),
        None
    );
}
