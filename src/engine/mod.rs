//! The conversational transaction engine: command parsing, the per-phone
//! session state machine, and money movement with compensating refunds.
//! Everything external (stores, SMS delivery, providers) comes in through
//! trait objects so the whole engine runs against in-memory fakes.

pub mod command;
pub mod dispatcher;
pub mod events;
pub mod executor;
pub mod fees;
pub mod phone;
pub mod pin;
pub mod registration;
pub mod session;
#[cfg(test)]
pub(crate) mod testkit;
pub mod ussd;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::db::ledger::LedgerStore;
use crate::db::otps::OtpStore;
use crate::db::sessions::SessionStore;
use crate::providers::{BankDirectory, IdentityVerifier, MoneyMovementProvider, Notifier};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Dial string users punch in to approve a payment by USSD.
    pub ussd_service_code: String,
    pub session_ttl_secs: i64,
    pub otp_ttl_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ussd_service_code: "*347*456#".to_string(),
            session_ttl_secs: 300,
            otp_ttl_secs: 300,
        }
    }
}

pub struct Engine {
    pub(crate) ledger: Arc<dyn LedgerStore>,
    pub(crate) sessions: Arc<dyn SessionStore>,
    pub(crate) otps: Arc<dyn OtpStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) banks: Arc<dyn BankDirectory>,
    pub(crate) money: Arc<dyn MoneyMovementProvider>,
    pub(crate) identity: Arc<dyn IdentityVerifier>,
    pub(crate) config: EngineConfig,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        sessions: Arc<dyn SessionStore>,
        otps: Arc<dyn OtpStore>,
        notifier: Arc<dyn Notifier>,
        banks: Arc<dyn BankDirectory>,
        money: Arc<dyn MoneyMovementProvider>,
        identity: Arc<dyn IdentityVerifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            sessions,
            otps,
            notifier,
            banks,
            money,
            identity,
            config,
        }
    }

    /// Send an SMS, logging delivery failures instead of surfacing them:
    /// notification problems must never block or roll back ledger work.
    pub(crate) async fn notify(&self, phone: &str, message: &str) {
        if let Err(err) = self.notifier.send(phone, message).await {
            tracing::warn!("failed to send SMS to {phone}: {err}");
        }
    }

    pub(crate) fn session_deadline(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.config.session_ttl_secs)
    }

    pub(crate) fn otp_deadline(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.config.otp_ttl_secs)
    }
}

pub(crate) fn new_session_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("SMS_{}_{suffix}", Utc::now().timestamp_millis())
}

pub(crate) fn new_reference() -> String {
    format!(
        "TXN_{:X}_{:08X}",
        Utc::now().timestamp_millis(),
        rand::thread_rng().gen::<u32>()
    )
}

pub(crate) fn new_otp_code() -> String {
    rand::thread_rng().gen_range(1000..10000).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_carry_a_short_code_suffix() {
        let id = new_session_id();
        assert!(id.starts_with("SMS_"));
        let suffix = &id[id.len() - 4..];
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn otp_codes_are_four_digits() {
        for _ in 0..50 {
            let code = new_otp_code();
            assert_eq!(code.len(), 4);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn references_are_unique_enough() {
        let a = new_reference();
        let b = new_reference();
        assert_ne!(a, b);
        assert!(a.starts_with("TXN_"));
    }
}
