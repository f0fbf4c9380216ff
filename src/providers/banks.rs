//! Bank directory with a TTL'd snapshot cache in front of the upstream feed.
//! Refreshes are single-flight: one caller performs the fetch while the rest
//! wait on it, and a failed refresh falls back to the stale snapshot when one
//! exists.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::{Bank, BankDirectory, ProviderError, ResolvedAccount};

/// Major Nigerian banks with their CBN institution codes. Serves as the
/// sandbox feed and as the last-resort list when the upstream is down.
pub const FALLBACK_BANKS: &[(&str, &str)] = &[
    ("Guaranty Trust Bank", "058"),
    ("United Bank for Africa", "033"),
    ("Access Bank", "044"),
    ("Zenith Bank", "057"),
    ("First City Monument Bank", "214"),
    ("First Bank of Nigeria", "011"),
    ("Union Bank", "032"),
    ("Sterling Bank", "232"),
    ("Stanbic IBTC Bank", "221"),
    ("Fidelity Bank", "070"),
    ("Polaris Bank", "076"),
    ("Wema Bank", "035"),
    ("Unity Bank", "215"),
    ("Keystone Bank", "082"),
    ("Jaiz Bank", "301"),
    ("Providus Bank", "101"),
    ("Ecobank", "050"),
];

// SMS-friendly aliases for the codes above.
const SHORT_CODES: &[(&str, &str)] = &[
    ("GTB", "058"),
    ("GTBANK", "058"),
    ("UBA", "033"),
    ("ACCESS", "044"),
    ("ZENITH", "057"),
    ("FCMB", "214"),
    ("FBN", "011"),
    ("FIRSTBANK", "011"),
    ("UNION", "032"),
    ("STERLING", "232"),
    ("STANBIC", "221"),
    ("FIDELITY", "070"),
    ("POLARIS", "076"),
    ("WEMA", "035"),
    ("UNITY", "215"),
    ("KEYSTONE", "082"),
    ("JAIZ", "301"),
    ("PROVIDUS", "101"),
    ("ECO", "050"),
    ("ECOBANK", "050"),
];

pub fn fallback_banks() -> Vec<Bank> {
    FALLBACK_BANKS
        .iter()
        .map(|(name, code)| Bank {
            name: (*name).to_string(),
            code: (*code).to_string(),
        })
        .collect()
}

struct Snapshot {
    fetched_at: Instant,
    banks: Vec<Bank>,
}

pub struct CachedBankDirectory {
    upstream: Arc<dyn BankDirectory>,
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,
    refresh: Mutex<()>,
}

impl CachedBankDirectory {
    pub fn new(upstream: Arc<dyn BankDirectory>, ttl: Duration) -> Self {
        Self {
            upstream,
            ttl,
            snapshot: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    async fn fresh_banks(&self) -> Option<Vec<Bank>> {
        let guard = self.snapshot.read().await;
        guard
            .as_ref()
            .filter(|s| s.fetched_at.elapsed() < self.ttl)
            .map(|s| s.banks.clone())
    }

    async fn banks(&self) -> Result<Vec<Bank>, ProviderError> {
        if let Some(banks) = self.fresh_banks().await {
            return Ok(banks);
        }

        let _flight = self.refresh.lock().await;
        // another caller may have refreshed while we waited on the lock
        if let Some(banks) = self.fresh_banks().await {
            return Ok(banks);
        }

        match self.upstream.list_banks().await {
            Ok(banks) => {
                let mut guard = self.snapshot.write().await;
                *guard = Some(Snapshot {
                    fetched_at: Instant::now(),
                    banks: banks.clone(),
                });
                Ok(banks)
            }
            Err(err) => {
                let guard = self.snapshot.read().await;
                if let Some(stale) = guard.as_ref() {
                    tracing::warn!("bank list refresh failed, serving stale snapshot: {err}");
                    Ok(stale.banks.clone())
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[async_trait]
impl BankDirectory for CachedBankDirectory {
    async fn list_banks(&self) -> Result<Vec<Bank>, ProviderError> {
        self.banks().await
    }

    async fn resolve_by_code(&self, code: &str) -> Result<Option<Bank>, ProviderError> {
        let token = code.trim().to_ascii_uppercase();
        if token.is_empty() {
            return Ok(None);
        }

        let banks = self.banks().await?;
        if token.chars().all(|c| c.is_ascii_digit()) {
            return Ok(banks.into_iter().find(|b| b.code == token));
        }

        if let Some((_, numeric)) = SHORT_CODES.iter().find(|(alias, _)| *alias == token) {
            return Ok(banks.into_iter().find(|b| b.code == *numeric));
        }

        Ok(banks
            .into_iter()
            .find(|b| b.name.to_ascii_uppercase().contains(&token)))
    }

    async fn resolve_account_name(
        &self,
        account_number: &str,
        bank_code: &str,
    ) -> Result<ResolvedAccount, ProviderError> {
        self.upstream
            .resolve_account_name(account_number, bank_code)
            .await
    }
}
