//! Collaborator seams for everything that lives outside the engine: SMS
//! delivery, money movement, bank directory, identity verification and
//! webhook authentication. Production deployments put HTTP clients behind
//! these traits; the crate ships sandbox implementations that behave
//! deterministically so the service runs end-to-end without live providers.

pub mod banks;
pub mod sandbox;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider understood the request and declined it.
    #[error("{0}")]
    Rejected(String),

    /// The provider could not be reached or failed out-of-band.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Mobile network operators the airtime provider recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Network {
    Mtn,
    Glo,
    Airtel,
    #[serde(rename = "9MOBILE")]
    NineMobile,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mtn => "MTN",
            Network::Glo => "GLO",
            Network::Airtel => "AIRTEL",
            Network::NineMobile => "9MOBILE",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "MTN" => Some(Network::Mtn),
            "GLO" => Some(Network::Glo),
            "AIRTEL" => Some(Network::Airtel),
            "9MOBILE" | "ETISALAT" => Some(Network::NineMobile),
            _ => None,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedAccount {
    pub account_number: String,
    pub account_name: String,
    pub bank_code: String,
}

/// Destination details for an outward bank transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankAccount {
    pub account_number: String,
    pub account_name: String,
    pub bank_code: String,
    pub bank_name: String,
}

#[derive(Debug, Clone)]
pub struct ProviderReceipt {
    pub provider_ref: String,
}

/// Static virtual account users pay into to fund their wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingAccount {
    pub account_number: String,
    pub account_name: String,
    pub bank_name: String,
}

#[derive(Debug, Clone)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

/// Result of an identity (BVN) lookup. The raw identity number never leaves
/// the verifier; `reference` is the opaque token stored against the account
/// and used for duplicate detection.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub reference: String,
    pub full_name: String,
    pub phone_number: Option<String>,
    pub email: Option<String>,
    pub date_of_birth: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> Result<DeliveryReceipt, ProviderError>;
}

#[async_trait]
pub trait MoneyMovementProvider: Send + Sync {
    async fn transfer(
        &self,
        destination: &BankAccount,
        amount: Decimal,
        reference: &str,
        narration: &str,
    ) -> Result<ProviderReceipt, ProviderError>;

    async fn purchase_airtime(
        &self,
        phone: &str,
        amount: Decimal,
        network: Network,
    ) -> Result<ProviderReceipt, ProviderError>;

    async fn issue_funding_account(
        &self,
        full_name: &str,
        reference: &str,
    ) -> Result<FundingAccount, ProviderError>;
}

#[async_trait]
pub trait BankDirectory: Send + Sync {
    async fn list_banks(&self) -> Result<Vec<Bank>, ProviderError>;

    /// Resolve an alphabetic short code ("GTB") or numeric institution code
    /// ("058") to a bank. `Ok(None)` means the code is simply unknown.
    async fn resolve_by_code(&self, code: &str) -> Result<Option<Bank>, ProviderError>;

    async fn resolve_account_name(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> Result<ResolvedAccount, ProviderError>;
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, id_number: &str) -> Result<VerifiedIdentity, ProviderError>;
}

/// Authenticates inbound provider webhooks from the raw body and the
/// signature header. Signature mechanics live behind this seam.
pub trait WebhookVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &str) -> bool;
}
