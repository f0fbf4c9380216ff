//! Deterministic stand-ins for the live providers. Outcomes are keyed off the
//! input (reserved prefixes trigger failures) so conversation flows, refunds
//! and webhooks can all be exercised without network access. The notifier
//! records everything it "sends", which also makes it the capture point for
//! tests.

use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    banks, Bank, BankAccount, BankDirectory, DeliveryReceipt, FundingAccount, IdentityVerifier,
    MoneyMovementProvider, Network, Notifier, ProviderError, ProviderReceipt, ResolvedAccount,
    VerifiedIdentity, WebhookVerifier,
};

/// Account numbers with this prefix simulate a transfer declined by the
/// receiving bank; identity numbers starting with `0` simulate a failed
/// lookup; airtime to numbers ending `0000` simulates a barred recipient.
pub const DECLINED_ACCOUNT_PREFIX: &str = "9999";

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub to: String,
    pub body: String,
}

#[derive(Default)]
pub struct SandboxNotifier {
    log: Mutex<Vec<OutboundMessage>>,
}

impl SandboxNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.log.lock().unwrap().clone()
    }

    pub fn last_to(&self, phone: &str) -> Option<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| m.to == phone)
            .map(|m| m.body.clone())
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }
}

#[async_trait]
impl Notifier for SandboxNotifier {
    async fn send(&self, phone: &str, message: &str) -> Result<DeliveryReceipt, ProviderError> {
        tracing::info!("sandbox SMS to {phone}: {message}");
        self.log.lock().unwrap().push(OutboundMessage {
            to: phone.to_string(),
            body: message.to_string(),
        });
        Ok(DeliveryReceipt {
            message_id: format!("SBX_MSG_{}", Uuid::new_v4().simple()),
        })
    }
}

pub struct SandboxMoneyMovement;

#[async_trait]
impl MoneyMovementProvider for SandboxMoneyMovement {
    async fn transfer(
        &self,
        destination: &BankAccount,
        amount: Decimal,
        reference: &str,
        _narration: &str,
    ) -> Result<ProviderReceipt, ProviderError> {
        if destination.account_number.starts_with(DECLINED_ACCOUNT_PREFIX) {
            return Err(ProviderError::Rejected(
                "transfer declined by receiving bank".to_string(),
            ));
        }
        tracing::info!(
            "sandbox transfer of {amount} to {} ({}) ref {reference}",
            destination.account_number,
            destination.bank_name
        );
        Ok(ProviderReceipt {
            provider_ref: format!("SBX_TRF_{}", Uuid::new_v4().simple()),
        })
    }

    async fn purchase_airtime(
        &self,
        phone: &str,
        amount: Decimal,
        network: Network,
    ) -> Result<ProviderReceipt, ProviderError> {
        if phone.ends_with("0000") {
            return Err(ProviderError::Rejected(
                "recipient barred from receiving airtime".to_string(),
            ));
        }
        tracing::info!("sandbox {network} airtime of {amount} to {phone}");
        Ok(ProviderReceipt {
            provider_ref: format!("SBX_AIR_{}", Uuid::new_v4().simple()),
        })
    }

    async fn issue_funding_account(
        &self,
        full_name: &str,
        reference: &str,
    ) -> Result<FundingAccount, ProviderError> {
        // stable NUBAN-shaped number derived from the owner reference
        let digits: String = reference.chars().filter(|c| c.is_ascii_digit()).collect();
        let mut number = format!("88{digits}");
        number.truncate(10);
        while number.len() < 10 {
            number.push('0');
        }
        Ok(FundingAccount {
            account_number: number,
            account_name: full_name.to_ascii_uppercase(),
            bank_name: "TextPay Sandbox Bank".to_string(),
        })
    }
}

/// Serves the static bank table and synthesizes account names.
pub struct SandboxBankFeed;

#[async_trait]
impl BankDirectory for SandboxBankFeed {
    async fn list_banks(&self) -> Result<Vec<Bank>, ProviderError> {
        Ok(banks::fallback_banks())
    }

    async fn resolve_by_code(&self, code: &str) -> Result<Option<Bank>, ProviderError> {
        Ok(banks::fallback_banks().into_iter().find(|b| b.code == code))
    }

    async fn resolve_account_name(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> Result<ResolvedAccount, ProviderError> {
        if account_number.len() != 10 || !account_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(ProviderError::Rejected(
                "account number must be 10 digits".to_string(),
            ));
        }
        if account_number.starts_with(DECLINED_ACCOUNT_PREFIX) {
            return Err(ProviderError::Rejected("account not found".to_string()));
        }
        Ok(ResolvedAccount {
            account_number: account_number.to_string(),
            account_name: format!("SANDBOX CUSTOMER {}", &account_number[6..]),
            bank_code: bank_code.to_string(),
        })
    }
}

pub struct SandboxIdentityVerifier;

const FIRST_NAMES: &[&str] = &[
    "Adaeze", "Babatunde", "Chiamaka", "Danjuma", "Efe", "Folake", "Gbenga", "Halima", "Ifeanyi",
    "Jumoke",
];
const LAST_NAMES: &[&str] = &[
    "Okafor", "Adeyemi", "Balogun", "Chukwu", "Danladi", "Eze", "Falana", "Garba", "Ibrahim",
    "Johnson",
];

#[async_trait]
impl IdentityVerifier for SandboxIdentityVerifier {
    async fn verify(&self, id_number: &str) -> Result<VerifiedIdentity, ProviderError> {
        if id_number.len() != 11 || !id_number.chars().all(|c| c.is_ascii_digit()) {
            return Err(ProviderError::Rejected(
                "identity number must be 11 digits".to_string(),
            ));
        }
        if id_number.starts_with('0') {
            return Err(ProviderError::Rejected(
                "identity number not found".to_string(),
            ));
        }

        let digits: Vec<usize> = id_number
            .chars()
            .map(|c| c.to_digit(10).unwrap_or(0) as usize)
            .collect();
        let sum: usize = digits.iter().sum();
        let first = FIRST_NAMES[sum % FIRST_NAMES.len()];
        let last = LAST_NAMES[(digits[0] + digits[10]) % LAST_NAMES.len()];

        Ok(VerifiedIdentity {
            // sandbox only: real verifiers return an opaque token
            reference: format!("SBXID{id_number}"),
            full_name: format!("{first} {last}"),
            phone_number: None,
            email: Some(format!("{}@sandbox.textpay.ng", id_number)),
            date_of_birth: None,
        })
    }
}

/// Shared-secret webhook check. Production implementations compute an HMAC
/// over the payload; the sandbox compares the header against the configured
/// secret without branching on length.
pub struct SharedSecretVerifier {
    secret: String,
}

impl SharedSecretVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl WebhookVerifier for SharedSecretVerifier {
    fn verify(&self, _payload: &[u8], signature: &str) -> bool {
        let expected = self.secret.as_bytes();
        let got = signature.as_bytes();
        let mut diff = expected.len() ^ got.len();
        for i in 0..expected.len().min(got.len()) {
            diff |= (expected[i] ^ got[i]) as usize;
        }
        diff == 0
    }
}
