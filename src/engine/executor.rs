//! Execution of an approved payment: record first, debit under guard, move
//! the money, then settle the record or compensate the wallet. The ledger row
//! exists before any balance changes, so there is always a reference to
//! reconcile against.

use rust_decimal::Decimal;
use tracing::{error, info, warn};

use super::fees::format_naira;
use super::session::{TransactionIntent, TransferKind};
use super::{new_reference, phone, Engine};
use crate::db::ledger::{NewTransaction, TransactionRecord, UserAccount};
use crate::db::sessions::Session;
use crate::error::ServiceError;
use crate::providers::{BankAccount, ProviderError};

pub const MSG_CORRUPT_PAYMENT: &str =
    "Something went wrong with this payment request. Please start again.";
pub(crate) const MSG_RECONCILE: &str =
    "We hit a problem completing your payment. Our team is on it and will make sure your money is safe.";

impl Engine {
    /// Run the payment a claimed session carries. The session row is removed
    /// on every path out of here; the transaction record is what survives.
    pub(crate) async fn execute_transaction(
        &self,
        account: &UserAccount,
        session: &Session,
        channel: &str,
    ) -> Result<(), ServiceError> {
        let outcome = match TransactionIntent::from_session(session) {
            Some(intent) => self.run_money_movement(account, &intent, channel).await,
            None => {
                warn!("session {} carried an unreadable payload", session.id);
                self.notify(&session.phone_number, MSG_CORRUPT_PAYMENT).await;
                Ok(())
            }
        };
        self.sessions.delete(&session.id).await?;
        outcome
    }

    async fn run_money_movement(
        &self,
        account: &UserAccount,
        intent: &TransactionIntent,
        channel: &str,
    ) -> Result<(), ServiceError> {
        let total = intent.total();

        // the balance seen at staging is stale by PIN time; re-check before
        // anything is written
        let current = self
            .ledger
            .find_account(account.id)
            .await?
            .map(|a| a.wallet_balance)
            .unwrap_or_default();
        if current < total {
            self.notify(
                &account.phone_number,
                &insufficient_funds(total, intent.fee, current),
            )
            .await;
            return Ok(());
        }

        let record = self
            .ledger
            .create_transaction(build_transaction(new_reference(), account, intent, channel))
            .await?;

        let Some(balance) = self.ledger.adjust_balance(account.id, -total).await? else {
            // another spend landed between the re-check and this debit
            self.ledger
                .fail_transaction(&record.reference, "insufficient funds")
                .await?;
            let available = self
                .ledger
                .find_account(account.id)
                .await?
                .map(|a| a.wallet_balance)
                .unwrap_or_default();
            self.notify(
                &account.phone_number,
                &insufficient_funds(total, intent.fee, available),
            )
            .await;
            return Ok(());
        };

        match &intent.kind {
            TransferKind::Internal {
                recipient_id,
                recipient_phone,
                recipient_name,
            } => {
                // a credit that errors out is treated like a missing
                // recipient: the debit must come back
                let credited = match self.ledger.adjust_balance(*recipient_id, intent.amount).await
                {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        error!("credit for {} hit a store error: {err}", record.reference);
                        None
                    }
                };
                match credited {
                    Some(recipient_balance) => {
                        self.ledger
                            .complete_transaction(&record.reference, None)
                            .await?;
                        info!(
                            "internal transfer {} of {} settled via {channel}",
                            record.reference, intent.amount
                        );

                        let shown = phone::local_form(recipient_phone)
                            .unwrap_or_else(|| recipient_phone.clone());
                        let message = format!(
                            "You sent {} to {recipient_name} ({shown}). Fee: {}. New balance: {}. Ref: {}",
                            format_naira(intent.amount),
                            format_naira(intent.fee),
                            format_naira(balance),
                            record.reference
                        );
                        self.notify(&account.phone_number, &message).await;

                        let mut credit = format!(
                            "You received {} from {}. New balance: {}.",
                            format_naira(intent.amount),
                            account.full_name,
                            format_naira(recipient_balance)
                        );
                        if let Some(note) = &intent.description {
                            credit.push_str(&format!(" Note: {note}."));
                        }
                        credit.push_str(&format!(" Ref: {}", record.reference));
                        self.notify(recipient_phone, &credit).await;
                        Ok(())
                    }
                    None => {
                        self.compensate(account, &record, total, "recipient account unavailable")
                            .await;
                        Ok(())
                    }
                }
            }
            TransferKind::Bank {
                account_number,
                account_name,
                bank_code,
                bank_name,
            } => {
                let destination = BankAccount {
                    account_number: account_number.clone(),
                    account_name: account_name.clone(),
                    bank_code: bank_code.clone(),
                    bank_name: bank_name.clone(),
                };
                let narration = intent
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Transfer from {}", account.full_name));
                match self
                    .money
                    .transfer(&destination, intent.amount, &record.reference, &narration)
                    .await
                {
                    Ok(receipt) => {
                        self.ledger
                            .complete_transaction(&record.reference, Some(&receipt.provider_ref))
                            .await?;
                        info!(
                            "bank transfer {} of {} accepted via {channel}",
                            record.reference, intent.amount
                        );
                        let message = format!(
                            "Your transfer of {} to {account_name} ({bank_name}) is on its way. Fee: {}. New balance: {}. Ref: {}",
                            format_naira(intent.amount),
                            format_naira(intent.fee),
                            format_naira(balance),
                            record.reference
                        );
                        self.notify(&account.phone_number, &message).await;
                        Ok(())
                    }
                    Err(err) => {
                        warn!("bank transfer {} failed: {err}", record.reference);
                        self.compensate(account, &record, total, &provider_reason(&err))
                            .await;
                        Ok(())
                    }
                }
            }
            TransferKind::Airtime { phone: target, network } => {
                match self
                    .money
                    .purchase_airtime(target, intent.amount, *network)
                    .await
                {
                    Ok(receipt) => {
                        self.ledger
                            .complete_transaction(&record.reference, Some(&receipt.provider_ref))
                            .await?;
                        info!(
                            "airtime purchase {} of {} settled via {channel}",
                            record.reference, intent.amount
                        );
                        let shown =
                            phone::local_form(target).unwrap_or_else(|| target.clone());
                        let message = format!(
                            "{} {} airtime sent to {shown}. New balance: {}. Ref: {}",
                            format_naira(intent.amount),
                            network.as_str(),
                            format_naira(balance),
                            record.reference
                        );
                        self.notify(&account.phone_number, &message).await;
                        Ok(())
                    }
                    Err(err) => {
                        warn!("airtime purchase {} failed: {err}", record.reference);
                        self.compensate(account, &record, total, &provider_reason(&err))
                            .await;
                        Ok(())
                    }
                }
            }
        }
    }

    /// Put a debited total back after a failed movement and fail the record.
    /// If the refund itself cannot be applied the record stays `processing`
    /// and the case goes to manual reconciliation.
    async fn compensate(
        &self,
        account: &UserAccount,
        record: &TransactionRecord,
        total: Decimal,
        reason: &str,
    ) {
        let refunded = match self.ledger.adjust_balance(account.id, total).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    "refund of {total} for {} hit a store error: {err}",
                    record.reference
                );
                None
            }
        };
        match refunded {
            Some(balance) => {
                if let Err(err) = self.ledger.fail_transaction(&record.reference, reason).await {
                    error!("could not mark {} failed: {err}", record.reference);
                }
                let message = format!(
                    "Your payment of {} could not be completed: {reason}. {} has been restored to your wallet. Balance: {}. Ref: {}",
                    format_naira(record.amount),
                    format_naira(total),
                    format_naira(balance),
                    record.reference
                );
                self.notify(&account.phone_number, &message).await;
            }
            None => {
                error!(
                    "refund of {total} for {} did not apply; manual reconciliation required",
                    record.reference
                );
                self.notify(&account.phone_number, MSG_RECONCILE).await;
            }
        }
    }
}

fn build_transaction(
    reference: String,
    sender: &UserAccount,
    intent: &TransactionIntent,
    channel: &str,
) -> NewTransaction {
    let mut new = NewTransaction {
        reference,
        sender_id: sender.id,
        recipient_id: None,
        recipient_phone: None,
        recipient_name: String::new(),
        recipient_account: None,
        recipient_bank_code: None,
        recipient_bank_name: None,
        amount: intent.amount,
        fee: intent.fee,
        description: intent.description.clone(),
        transfer_kind: intent.kind.label().to_string(),
        initiated_via: channel.to_string(),
    };
    match &intent.kind {
        TransferKind::Internal {
            recipient_id,
            recipient_phone,
            recipient_name,
        } => {
            new.recipient_id = Some(*recipient_id);
            new.recipient_phone = Some(recipient_phone.clone());
            new.recipient_name = recipient_name.clone();
        }
        TransferKind::Bank {
            account_number,
            account_name,
            bank_code,
            bank_name,
        } => {
            new.recipient_name = account_name.clone();
            new.recipient_account = Some(account_number.clone());
            new.recipient_bank_code = Some(bank_code.clone());
            new.recipient_bank_name = Some(bank_name.clone());
        }
        TransferKind::Airtime { phone: target, network } => {
            new.recipient_phone = Some(target.clone());
            new.recipient_name = format!("{} airtime", network.as_str());
        }
    }
    new
}

fn insufficient_funds(total: Decimal, fee: Decimal, available: Decimal) -> String {
    format!(
        "Insufficient funds. This payment needs {} (including {} fee) but your balance is {}.",
        format_naira(total),
        format_naira(fee),
        format_naira(available)
    )
}

fn provider_reason(err: &ProviderError) -> String {
    match err {
        ProviderError::Rejected(reason) => reason.clone(),
        ProviderError::Unavailable(_) => "the service is temporarily unavailable".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::*;
    use crate::db::ledger::{LedgerStore, STATUS_COMPLETED, STATUS_FAILED};
    use crate::db::sessions::{SessionStore, STEP_EXECUTING};
    use crate::engine::testkit;
    use crate::providers::Network;

    fn intent_for(kind: TransferKind, amount: u32, fee: u32) -> TransactionIntent {
        TransactionIntent {
            amount: Decimal::from(amount),
            fee: Decimal::from(fee),
            description: None,
            kind,
        }
    }

    #[tokio::test]
    async fn internal_transfer_settles_both_wallets() {
        let kit = testkit::harness();
        let sender = kit
            .seed_account("+2348031234567", "1234", Decimal::from(5_000u32))
            .await;
        let recipient = kit
            .seed_named_account("+2348051234567", "Bola Ahmed", "5678", Decimal::from(1_000u32))
            .await;
        let intent = intent_for(
            TransferKind::Internal {
                recipient_id: recipient.id,
                recipient_phone: recipient.phone_number.clone(),
                recipient_name: recipient.full_name.clone(),
            },
            500,
            0,
        );
        let session = kit.seed_session(&sender, intent, STEP_EXECUTING).await;

        kit.engine
            .execute_transaction(&sender, &session, "sms")
            .await
            .unwrap();

        let sender_after = kit.ledger.find_account(sender.id).await.unwrap().unwrap();
        let recipient_after = kit.ledger.find_account(recipient.id).await.unwrap().unwrap();
        assert_eq!(sender_after.wallet_balance, Decimal::from(4_500u32));
        assert_eq!(recipient_after.wallet_balance, Decimal::from(1_500u32));

        let records = kit.ledger.all_transactions();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, STATUS_COMPLETED);
        assert!(kit
            .sessions
            .find_active("+2348031234567")
            .await
            .unwrap()
            .is_none());

        let credit_sms = kit.notifier.last_to("+2348051234567").unwrap();
        assert!(credit_sms.contains("You received \u{20a6}500.00"), "{credit_sms}");
    }

    #[tokio::test]
    async fn declined_bank_transfer_refunds_the_debit() {
        let kit = testkit::harness();
        let sender = kit
            .seed_account("+2348031234567", "1234", Decimal::from(10_000u32))
            .await;
        let intent = intent_for(
            TransferKind::Bank {
                account_number: "9999123456".to_string(),
                account_name: "Suspicious Vendor".to_string(),
                bank_code: "058".to_string(),
                bank_name: "Guaranty Trust Bank".to_string(),
            },
            2_000,
            35,
        );
        let session = kit.seed_session(&sender, intent, STEP_EXECUTING).await;

        kit.engine
            .execute_transaction(&sender, &session, "sms")
            .await
            .unwrap();

        let after = kit.ledger.find_account(sender.id).await.unwrap().unwrap();
        assert_eq!(after.wallet_balance, Decimal::from(10_000u32));

        let records = kit.ledger.all_transactions();
        assert_eq!(records[0].status, STATUS_FAILED);
        assert!(records[0].failure_reason.is_some());

        let sms = kit.notifier.last_to("+2348031234567").unwrap();
        assert!(sms.contains("has been restored"), "{sms}");
    }

    #[tokio::test]
    async fn insufficient_balance_stops_before_any_record() {
        let kit = testkit::harness();
        let sender = kit
            .seed_account("+2348031234567", "1234", Decimal::from(100u32))
            .await;
        let intent = intent_for(
            TransferKind::Internal {
                recipient_id: Uuid::new_v4(),
                recipient_phone: "+2348051234567".to_string(),
                recipient_name: "Bola Ahmed".to_string(),
            },
            500,
            0,
        );
        let session = kit.seed_session(&sender, intent, STEP_EXECUTING).await;

        kit.engine
            .execute_transaction(&sender, &session, "sms")
            .await
            .unwrap();

        let after = kit.ledger.find_account(sender.id).await.unwrap().unwrap();
        assert_eq!(after.wallet_balance, Decimal::from(100u32));
        assert!(kit.ledger.all_transactions().is_empty());
        assert!(kit
            .notifier
            .last_to("+2348031234567")
            .unwrap()
            .contains("Insufficient funds"));
        assert!(kit
            .sessions
            .find_active("+2348031234567")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn vanished_recipient_triggers_compensation() {
        let kit = testkit::harness();
        let sender = kit
            .seed_account("+2348031234567", "1234", Decimal::from(5_000u32))
            .await;
        let intent = intent_for(
            TransferKind::Internal {
                recipient_id: Uuid::new_v4(),
                recipient_phone: "+2348051234567".to_string(),
                recipient_name: "Ghost".to_string(),
            },
            500,
            0,
        );
        let session = kit.seed_session(&sender, intent, STEP_EXECUTING).await;

        kit.engine
            .execute_transaction(&sender, &session, "sms")
            .await
            .unwrap();

        let after = kit.ledger.find_account(sender.id).await.unwrap().unwrap();
        assert_eq!(after.wallet_balance, Decimal::from(5_000u32));
        assert_eq!(kit.ledger.all_transactions()[0].status, STATUS_FAILED);
    }

    #[tokio::test]
    async fn airtime_purchase_completes_and_notifies() {
        let kit = testkit::harness();
        let sender = kit
            .seed_account("+2348031234567", "1234", Decimal::from(2_000u32))
            .await;
        let intent = intent_for(
            TransferKind::Airtime {
                phone: "+2348031234567".to_string(),
                network: Network::Mtn,
            },
            500,
            10,
        );
        let session = kit.seed_session(&sender, intent, STEP_EXECUTING).await;

        kit.engine
            .execute_transaction(&sender, &session, "ussd")
            .await
            .unwrap();

        let after = kit.ledger.find_account(sender.id).await.unwrap().unwrap();
        assert_eq!(after.wallet_balance, Decimal::from(1_490u32));
        let record = &kit.ledger.all_transactions()[0];
        assert_eq!(record.status, STATUS_COMPLETED);
        assert_eq!(record.initiated_via, "ussd");
        assert!(record.provider_ref.is_some());
    }

    #[tokio::test]
    async fn unreadable_payload_discards_the_session() {
        let kit = testkit::harness();
        let sender = kit
            .seed_account("+2348031234567", "1234", Decimal::from(5_000u32))
            .await;
        let mut session = kit
            .seed_session(
                &sender,
                intent_for(
                    TransferKind::Airtime {
                        phone: "+2348031234567".to_string(),
                        network: Network::Mtn,
                    },
                    500,
                    10,
                ),
                STEP_EXECUTING,
            )
            .await;
        session.payload = serde_json::json!({"bogus": true});
        kit.sessions.put(session.clone());

        kit.engine
            .execute_transaction(&sender, &session, "sms")
            .await
            .unwrap();

        assert!(kit.ledger.all_transactions().is_empty());
        assert!(kit
            .sessions
            .find_active("+2348031234567")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            kit.notifier.last_to("+2348031234567").unwrap(),
            MSG_CORRUPT_PAYMENT
        );
    }
}
