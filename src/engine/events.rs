//! Ledger events driven by provider webhooks: wallet funding credits, plus
//! reconciliation of bank transfers that were still `processing` when the
//! provider reported an outcome. Every handler is idempotent under
//! redelivery: funding dedupes on the derived reference, reconciliation on
//! the guarded status transition.

use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::executor::MSG_RECONCILE;
use super::fees::format_naira;
use super::{phone, Engine};
use crate::db::ledger::{NewTransaction, UserAccount, KIND_FUNDING};
use crate::db::StoreError;
use crate::error::ServiceError;

impl Engine {
    /// `charge.success`: credit the wallet the provider collected money for.
    /// The funding row is the idempotency gate: its reference derives from
    /// the provider's, so a redelivered event collides and is dropped.
    pub async fn wallet_funded(
        &self,
        provider_ref: &str,
        amount_kobo: i64,
        customer_phone: Option<&str>,
        customer_email: Option<&str>,
    ) -> Result<(), ServiceError> {
        let amount = Decimal::from(amount_kobo) / Decimal::from(100);
        if amount <= Decimal::ZERO {
            warn!("funding event {provider_ref} carried non-positive amount {amount_kobo}");
            return Ok(());
        }

        let Some(account) = self.funded_account(customer_phone, customer_email).await? else {
            warn!("funding event {provider_ref} matches no account");
            return Ok(());
        };

        let reference = format!("FND_{provider_ref}");
        let created = self
            .ledger
            .create_transaction(NewTransaction {
                reference: reference.clone(),
                sender_id: account.id,
                recipient_id: Some(account.id),
                recipient_phone: Some(account.phone_number.clone()),
                recipient_name: "Wallet top-up".to_string(),
                recipient_account: None,
                recipient_bank_code: None,
                recipient_bank_name: None,
                amount,
                fee: Decimal::ZERO,
                description: None,
                transfer_kind: KIND_FUNDING.to_string(),
                initiated_via: "webhook".to_string(),
            })
            .await;
        match created {
            Ok(_) => {}
            Err(StoreError::DuplicateReference) => {
                debug!("funding event {provider_ref} already recorded");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        let Some(balance) = self.ledger.adjust_balance(account.id, amount).await? else {
            self.ledger
                .fail_transaction(&reference, "account unavailable")
                .await?;
            warn!("funding credit {reference} could not be applied");
            return Ok(());
        };
        self.ledger
            .complete_transaction(&reference, Some(provider_ref))
            .await?;
        info!("wallet {} funded with {amount} ({reference})", account.id);

        let message = format!(
            "Your wallet has been funded with {}. New balance: {}. Ref: {reference}",
            format_naira(amount),
            format_naira(balance)
        );
        self.notify(&account.phone_number, &message).await;
        Ok(())
    }

    /// `transfer.success` reconciliation: settle a bank transfer that never
    /// completed synchronously. SMS goes out only when this call makes the
    /// transition.
    pub async fn transfer_settled(
        &self,
        reference: &str,
        provider_ref: Option<&str>,
    ) -> Result<(), ServiceError> {
        if !self.ledger.complete_transaction(reference, provider_ref).await? {
            debug!("transfer.success for {reference} ignored (not processing)");
            return Ok(());
        }
        info!("transfer {reference} settled by webhook");

        let Some(record) = self.ledger.find_transaction(reference).await? else {
            return Ok(());
        };
        let Some(sender) = self.ledger.find_account(record.sender_id).await? else {
            return Ok(());
        };
        let message = format!(
            "Your transfer of {} to {} is confirmed. Ref: {}",
            format_naira(record.amount),
            record.recipient_name,
            record.reference
        );
        self.notify(&sender.phone_number, &message).await;
        Ok(())
    }

    /// `transfer.failed` reconciliation: fail the record once and put the
    /// debited total back.
    pub async fn transfer_reversed(
        &self,
        reference: &str,
        reason: &str,
    ) -> Result<(), ServiceError> {
        if !self.ledger.fail_transaction(reference, reason).await? {
            debug!("transfer.failed for {reference} ignored (not processing)");
            return Ok(());
        }
        info!("transfer {reference} reversed by webhook: {reason}");

        let Some(record) = self.ledger.find_transaction(reference).await? else {
            return Ok(());
        };
        let Some(sender) = self.ledger.find_account(record.sender_id).await? else {
            return Ok(());
        };

        match self.ledger.adjust_balance(sender.id, record.total()).await? {
            Some(balance) => {
                let message = format!(
                    "Your transfer of {} to {} could not be completed: {reason}. {} has been restored to your wallet. Balance: {}. Ref: {}",
                    format_naira(record.amount),
                    record.recipient_name,
                    format_naira(record.total()),
                    format_naira(balance),
                    record.reference
                );
                self.notify(&sender.phone_number, &message).await;
            }
            None => {
                error!(
                    "refund of {} for {reference} did not apply; manual reconciliation required",
                    record.total()
                );
                self.notify(&sender.phone_number, MSG_RECONCILE).await;
            }
        }
        Ok(())
    }

    async fn funded_account(
        &self,
        customer_phone: Option<&str>,
        customer_email: Option<&str>,
    ) -> Result<Option<UserAccount>, ServiceError> {
        if let Some(canonical) = customer_phone.and_then(phone::normalize) {
            if let Some(account) = self.ledger.find_account_by_phone(&canonical).await? {
                return Ok(Some(account));
            }
        }
        if let Some(email) = customer_email {
            if let Some(account) = self.ledger.find_account_by_email(email).await? {
                return Ok(Some(account));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::db::ledger::{LedgerStore, STATUS_COMPLETED, STATUS_FAILED};
    use crate::engine::testkit;

    #[tokio::test]
    async fn redelivered_funding_credits_once() {
        let kit = testkit::harness();
        let account = kit
            .seed_account("+2348031234567", "1234", Decimal::ZERO)
            .await;

        kit.engine
            .wallet_funded("PSP_REF_99", 500_000, Some("08031234567"), None)
            .await
            .unwrap();
        kit.engine
            .wallet_funded("PSP_REF_99", 500_000, Some("08031234567"), None)
            .await
            .unwrap();

        let after = kit.ledger.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(after.wallet_balance, Decimal::from(5_000u32));
        let records = kit.ledger.all_transactions();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reference, "FND_PSP_REF_99");
        assert_eq!(records[0].status, STATUS_COMPLETED);
        assert_eq!(kit.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn funding_falls_back_to_email() {
        let kit = testkit::harness();
        kit.engine.route_sms("08031234567", "REG 12345678901 1234").await;
        let account = kit
            .ledger
            .find_account_by_phone("+2348031234567")
            .await
            .unwrap()
            .unwrap();

        kit.engine
            .wallet_funded(
                "PSP_REF_7",
                120_050,
                None,
                Some("12345678901@sandbox.textpay.ng"),
            )
            .await
            .unwrap();

        let after = kit.ledger.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(after.wallet_balance, Decimal::new(120_050, 2));
    }

    #[tokio::test]
    async fn funding_for_strangers_is_dropped() {
        let kit = testkit::harness();

        kit.engine
            .wallet_funded("PSP_REF_X", 100_000, Some("08031234567"), None)
            .await
            .unwrap();

        assert!(kit.ledger.all_transactions().is_empty());
        assert!(kit.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn settlement_fires_exactly_once() {
        let kit = testkit::harness();
        let account = kit
            .seed_account("+2348031234567", "1234", Decimal::ZERO)
            .await;
        kit.ledger
            .create_transaction(NewTransaction {
                reference: "TXN_AB_12".to_string(),
                sender_id: account.id,
                recipient_id: None,
                recipient_phone: None,
                recipient_name: "Chinedu Okeke".to_string(),
                recipient_account: Some("0123456789".to_string()),
                recipient_bank_code: Some("058".to_string()),
                recipient_bank_name: Some("Guaranty Trust Bank".to_string()),
                amount: Decimal::from(2_000u32),
                fee: Decimal::from(35u32),
                description: None,
                transfer_kind: "bank".to_string(),
                initiated_via: "sms".to_string(),
            })
            .await
            .unwrap();

        kit.engine
            .transfer_settled("TXN_AB_12", Some("PSP_T_1"))
            .await
            .unwrap();
        kit.engine
            .transfer_settled("TXN_AB_12", Some("PSP_T_1"))
            .await
            .unwrap();

        let record = kit.ledger.find_transaction("TXN_AB_12").await.unwrap().unwrap();
        assert_eq!(record.status, STATUS_COMPLETED);
        assert_eq!(record.provider_ref.as_deref(), Some("PSP_T_1"));
        assert_eq!(kit.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn reversal_refunds_amount_plus_fee() {
        let kit = testkit::harness();
        let account = kit
            .seed_account("+2348031234567", "1234", Decimal::from(100u32))
            .await;
        kit.ledger
            .create_transaction(NewTransaction {
                reference: "TXN_CD_34".to_string(),
                sender_id: account.id,
                recipient_id: None,
                recipient_phone: None,
                recipient_name: "Chinedu Okeke".to_string(),
                recipient_account: Some("0123456789".to_string()),
                recipient_bank_code: Some("058".to_string()),
                recipient_bank_name: Some("Guaranty Trust Bank".to_string()),
                amount: Decimal::from(2_000u32),
                fee: Decimal::from(35u32),
                description: None,
                transfer_kind: "bank".to_string(),
                initiated_via: "sms".to_string(),
            })
            .await
            .unwrap();

        kit.engine
            .transfer_reversed("TXN_CD_34", "insufficient float")
            .await
            .unwrap();
        kit.engine
            .transfer_reversed("TXN_CD_34", "insufficient float")
            .await
            .unwrap();

        let after = kit.ledger.find_account(account.id).await.unwrap().unwrap();
        assert_eq!(after.wallet_balance, Decimal::from(2_135u32));
        let record = kit.ledger.find_transaction("TXN_CD_34").await.unwrap().unwrap();
        assert_eq!(record.status, STATUS_FAILED);
        assert_eq!(record.failure_reason.as_deref(), Some("insufficient float"));
        assert_eq!(kit.notifier.sent().len(), 1);
    }
}
