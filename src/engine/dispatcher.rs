//! Inbound SMS routing. A live session owns the conversation; otherwise the
//! text is parsed as a command, and user commands are gated on a usable
//! account.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, warn};

use super::command::{self, Command, PayTarget};
use super::fees::{self, format_naira};
use super::phone;
use super::session::{SessionStep, TransactionIntent, TransferKind, MSG_ALREADY_EXECUTING};
use super::{new_session_id, Engine};
use crate::db::ledger::{UserAccount, KIND_FUNDING, STATUS_COMPLETED, STATUS_FAILED};
use crate::db::sessions::{NewSession, Session, STEP_AWAITING_CONFIRMATION};
use crate::db::StoreError;
use crate::error::ServiceError;
use crate::providers::{Network, ProviderError};

pub const MSG_SYSTEM_ERROR: &str =
    "Sorry, something went wrong on our side. Please try again in a few minutes.";
pub const MSG_SESSION_CORRUPT: &str =
    "Something went wrong with your pending payment. Please start again.";
pub const MSG_WELCOME: &str = "Welcome to TextPay! Reply REG [11-digit ID number] [4-digit PIN] to open your wallet. E.g. REG 12345678901 1234";
const MSG_UNVERIFIED: &str = "Please verify your phone number first. Reply VERIFY [code] with the code we sent you, or RESEND for a new one.";
const MSG_RESTRICTED: &str = "Your account is currently restricted. Please contact support.";
const MSG_SESSION_PENDING: &str = "You already have a payment waiting for approval. Reply YES to confirm it or NO to cancel it, then try again.";

pub const HELP_TEXT: &str = "TextPay commands:\n\
PAY [amt] TO [phone] - send to a wallet\n\
PAY [amt] TO [account] [bank] - bank transfer\n\
BUY [amt] [network] - airtime\n\
BAL - balance and funding details\n\
HISTORY - recent transactions\n\
STATUS [ref] - check a payment\n\
PIN [current] [new] - change PIN\n\
RESET - reset a forgotten PIN";

impl Engine {
    /// Entry point for one inbound SMS. Internal failures are logged and
    /// turned into an apology so the sender is never left hanging.
    pub async fn route_sms(&self, from: &str, body: &str) {
        let sender = phone::normalize_or_raw(from);
        if let Err(err) = self.dispatch_sms(&sender, body).await {
            error!("inbound SMS from {sender} failed: {err}");
            self.notify(&sender, MSG_SYSTEM_ERROR).await;
        }
    }

    async fn dispatch_sms(&self, sender: &str, body: &str) -> Result<(), ServiceError> {
        let text = body.trim();
        if text.is_empty() {
            return Ok(());
        }

        if let Some(session) = self.sessions.find_active(sender).await? {
            return self.continue_session(session, text).await;
        }

        match command::parse(text) {
            Ok(parsed) => self.run_command(sender, parsed).await,
            Err(parse_err) => {
                self.notify(sender, &parse_err.to_string()).await;
                Ok(())
            }
        }
    }

    async fn continue_session(&self, session: Session, reply: &str) -> Result<(), ServiceError> {
        let Some(step) = SessionStep::parse(&session.current_step) else {
            warn!(
                "session {} carries unknown step {:?}, discarding",
                session.id, session.current_step
            );
            self.sessions.delete(&session.id).await?;
            self.notify(&session.phone_number, MSG_SESSION_CORRUPT).await;
            return Ok(());
        };

        match step {
            SessionStep::AwaitingConfirmation => self.handle_confirmation(session, reply).await,
            SessionStep::AwaitingPin => {
                let Some(account) = self.ledger.find_account(session.user_id).await? else {
                    self.sessions.delete(&session.id).await?;
                    self.notify(&session.phone_number, MSG_SESSION_CORRUPT).await;
                    return Ok(());
                };
                self.handle_pin_sms(account, session, reply).await
            }
            SessionStep::AwaitingUssdPin => self.handle_ussd_wait(session, reply).await,
            SessionStep::Executing => {
                self.notify(&session.phone_number, MSG_ALREADY_EXECUTING).await;
                Ok(())
            }
        }
    }

    async fn run_command(&self, sender: &str, parsed: Command) -> Result<(), ServiceError> {
        match parsed {
            Command::Help => {
                self.notify(sender, HELP_TEXT).await;
                Ok(())
            }
            Command::StartRegistration => self.start_registration(sender).await,
            Command::Register { id_number, pin } => self.register(sender, &id_number, &pin).await,
            Command::VerifyOtp { code } => self.verify_phone(sender, &code).await,
            Command::ResendOtp => self.resend_verification(sender).await,
            Command::ResetPinRequest => self.request_pin_reset(sender).await,
            Command::ResetPinConfirm { code, new_pin } => {
                self.confirm_pin_reset(sender, &code, &new_pin).await
            }
            Command::ChangePin { current, new } => {
                let Some(account) = self.usable_account(sender).await? else {
                    return Ok(());
                };
                self.change_pin(&account, &current, &new).await
            }
            Command::Pay {
                amount,
                target,
                description,
            } => {
                let Some(account) = self.usable_account(sender).await? else {
                    return Ok(());
                };
                self.stage_payment(&account, amount, target, description).await
            }
            Command::BuyAirtime {
                amount,
                network,
                phone: target,
            } => {
                let Some(account) = self.usable_account(sender).await? else {
                    return Ok(());
                };
                self.stage_airtime(&account, amount, network, target).await
            }
            Command::Balance => {
                let Some(account) = self.usable_account(sender).await? else {
                    return Ok(());
                };
                self.send_balance(&account).await
            }
            Command::Status { reference } => {
                let Some(account) = self.usable_account(sender).await? else {
                    return Ok(());
                };
                self.send_status(&account, &reference).await
            }
            Command::History => {
                let Some(account) = self.usable_account(sender).await? else {
                    return Ok(());
                };
                self.send_history(&account).await
            }
        }
    }

    /// Resolve the sender to an account that may transact, sending the right
    /// nudge when there is none.
    async fn usable_account(&self, sender: &str) -> Result<Option<UserAccount>, ServiceError> {
        let Some(account) = self.ledger.find_account_by_phone(sender).await? else {
            self.notify(sender, MSG_WELCOME).await;
            return Ok(None);
        };
        if !account.is_phone_verified {
            self.notify(sender, MSG_UNVERIFIED).await;
            return Ok(None);
        }
        if !account.is_active() {
            self.notify(sender, MSG_RESTRICTED).await;
            return Ok(None);
        }
        Ok(Some(account))
    }

    async fn stage_payment(
        &self,
        account: &UserAccount,
        amount: Decimal,
        target: PayTarget,
        description: Option<String>,
    ) -> Result<(), ServiceError> {
        let kind = match target {
            PayTarget::Phone(recipient_phone) => {
                if recipient_phone == account.phone_number {
                    self.notify(&account.phone_number, "You cannot send money to yourself.")
                        .await;
                    return Ok(());
                }
                let Some(recipient) = self.ledger.find_account_by_phone(&recipient_phone).await?
                else {
                    let shown =
                        phone::local_form(&recipient_phone).unwrap_or(recipient_phone);
                    let message = format!(
                        "{shown} does not have a TextPay wallet yet. Ask them to text START to this number to join."
                    );
                    self.notify(&account.phone_number, &message).await;
                    return Ok(());
                };
                if !recipient.is_usable() {
                    self.notify(
                        &account.phone_number,
                        "That wallet cannot receive payments right now.",
                    )
                    .await;
                    return Ok(());
                }
                TransferKind::Internal {
                    recipient_id: recipient.id,
                    recipient_phone: recipient.phone_number,
                    recipient_name: recipient.full_name,
                }
            }
            PayTarget::Account { number, bank_token } => {
                let bank = match self.banks.resolve_by_code(&bank_token).await {
                    Ok(Some(bank)) => bank,
                    Ok(None) => {
                        let message = format!(
                            "{bank_token} is not a bank we recognise. Use the bank's short name (e.g. GTB, UBA) or its 3-digit code."
                        );
                        self.notify(&account.phone_number, &message).await;
                        return Ok(());
                    }
                    Err(err) => {
                        warn!("bank directory lookup for {bank_token} failed: {err}");
                        self.notify(
                            &account.phone_number,
                            "Bank lookups are temporarily unavailable. Please try again shortly.",
                        )
                        .await;
                        return Ok(());
                    }
                };
                let resolved = match self.banks.resolve_account_name(&number, &bank.code).await {
                    Ok(resolved) => resolved,
                    Err(ProviderError::Rejected(_)) => {
                        let message = format!(
                            "We could not find account {number} at {}. Check the details and try again.",
                            bank.name
                        );
                        self.notify(&account.phone_number, &message).await;
                        return Ok(());
                    }
                    Err(err) => {
                        warn!("account resolution for {number}/{} failed: {err}", bank.code);
                        self.notify(
                            &account.phone_number,
                            "Bank lookups are temporarily unavailable. Please try again shortly.",
                        )
                        .await;
                        return Ok(());
                    }
                };
                TransferKind::Bank {
                    account_number: number,
                    account_name: resolved.account_name,
                    bank_code: bank.code,
                    bank_name: bank.name,
                }
            }
        };

        let fee = fees::fee_for(&kind, amount);
        self.open_session(
            account,
            TransactionIntent {
                amount,
                fee,
                description,
                kind,
            },
        )
        .await
    }

    async fn stage_airtime(
        &self,
        account: &UserAccount,
        amount: Decimal,
        network: Option<Network>,
        target: Option<String>,
    ) -> Result<(), ServiceError> {
        // no target means topping up your own line
        let target = target.unwrap_or_else(|| account.phone_number.clone());
        let network = match network.or_else(|| phone::detect_network(&target)) {
            Some(network) => network,
            None => {
                let shown = phone::local_form(&target).unwrap_or(target);
                let message = format!(
                    "We could not work out the network for {shown}. Add it to the command, e.g. BUY {amount} MTN {shown}."
                );
                self.notify(&account.phone_number, &message).await;
                return Ok(());
            }
        };

        let kind = TransferKind::Airtime {
            phone: target,
            network,
        };
        let fee = fees::fee_for(&kind, amount);
        self.open_session(
            account,
            TransactionIntent {
                amount,
                fee,
                description: None,
                kind,
            },
        )
        .await
    }

    /// Balance precheck, then stage the intent in a fresh session and send
    /// the confirmation prompt. The guard at execution time is what actually
    /// protects the wallet.
    async fn open_session(
        &self,
        account: &UserAccount,
        intent: TransactionIntent,
    ) -> Result<(), ServiceError> {
        let total = intent.total();
        if account.wallet_balance < total {
            let message = format!(
                "Insufficient funds. This payment needs {} (including {} fee) but your balance is {}. Text BAL for your funding details.",
                format_naira(total),
                format_naira(intent.fee),
                format_naira(account.wallet_balance)
            );
            self.notify(&account.phone_number, &message).await;
            return Ok(());
        }

        let new = NewSession {
            id: new_session_id(),
            phone_number: account.phone_number.clone(),
            user_id: account.id,
            current_step: STEP_AWAITING_CONFIRMATION.to_string(),
            payload: serde_json::to_value(&intent).map_err(StoreError::from)?,
            expires_at: self.session_deadline(),
        };
        match self.sessions.create(new).await {
            Ok(_) => {}
            Err(StoreError::SessionConflict) => {
                self.notify(&account.phone_number, MSG_SESSION_PENDING).await;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        let message = format!(
            "Send {} to {}? Fee: {}. Total: {}. Reply YES to confirm, NO to cancel, or USSD to approve by dialling {}.",
            format_naira(intent.amount),
            intent.kind.recipient_display(),
            format_naira(intent.fee),
            format_naira(total),
            self.config.ussd_service_code
        );
        self.notify(&account.phone_number, &message).await;
        Ok(())
    }

    async fn send_balance(&self, account: &UserAccount) -> Result<(), ServiceError> {
        let since = Utc::now() - chrono::Duration::days(30);
        let stats = self.ledger.transaction_stats(account.id, since).await?;
        let mut message = format!(
            "Balance: {}. Last 30 days: sent {}, received {} across {} payments.",
            format_naira(account.wallet_balance),
            format_naira(stats.sent),
            format_naira(stats.received),
            stats.count
        );
        if let Some(funding) = account.funding_details() {
            message.push_str(&format!(
                " Top up by bank transfer to {} {} ({}).",
                funding.bank_name, funding.account_number, funding.account_name
            ));
        }
        self.notify(&account.phone_number, &message).await;
        Ok(())
    }

    async fn send_status(
        &self,
        account: &UserAccount,
        reference: &str,
    ) -> Result<(), ServiceError> {
        let mut found = self
            .ledger
            .find_transaction_for_user(reference, account.id)
            .await?;
        if found.is_none() {
            // stored references are uppercase except for provider suffixes
            found = self
                .ledger
                .find_transaction_for_user(&reference.to_ascii_uppercase(), account.id)
                .await?;
        }
        let Some(record) = found else {
            let message = format!("No transaction {reference} on your account.");
            self.notify(&account.phone_number, &message).await;
            return Ok(());
        };

        let verdict = match record.status.as_str() {
            STATUS_COMPLETED => "completed",
            STATUS_FAILED => "failed",
            _ => "still processing",
        };
        let mut message = format!(
            "{}: {} to {} is {verdict}.",
            record.reference,
            format_naira(record.amount),
            record.recipient_name
        );
        if let Some(reason) = &record.failure_reason {
            message.push_str(&format!(" Reason: {reason}."));
        }
        self.notify(&account.phone_number, &message).await;
        Ok(())
    }

    async fn send_history(&self, account: &UserAccount) -> Result<(), ServiceError> {
        let records = self.ledger.recent_transactions(account.id, 5).await?;
        if records.is_empty() {
            self.notify(
                &account.phone_number,
                "No transactions yet. Text BAL for your funding details to top up.",
            )
            .await;
            return Ok(());
        }

        let mut lines = vec!["Your recent transactions:".to_string()];
        for record in &records {
            let incoming = record.transfer_kind == KIND_FUNDING
                || (record.recipient_id == Some(account.id) && record.sender_id != account.id);
            let sign = if incoming { "+" } else { "-" };
            let state = match record.status.as_str() {
                STATUS_COMPLETED => "",
                STATUS_FAILED => " (failed)",
                _ => " (pending)",
            };
            lines.push(format!(
                "{sign}{} {}{} {}",
                format_naira(record.amount),
                record.recipient_name,
                state,
                record.reference
            ));
        }
        self.notify(&account.phone_number, &lines.join("\n")).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::db::ledger::LedgerStore;
    use crate::db::sessions::{SessionStore, STEP_AWAITING_PIN};
    use crate::engine::testkit;

    #[tokio::test]
    async fn unknown_sender_is_pointed_at_registration() {
        let kit = testkit::harness();
        kit.engine.route_sms("+2348031234567", "BAL").await;
        assert_eq!(kit.notifier.last_to("+2348031234567").unwrap(), MSG_WELCOME);
    }

    #[tokio::test]
    async fn garbage_text_gets_the_help_hint() {
        let kit = testkit::harness();
        kit.seed_account("+2348031234567", "1234", Decimal::from(1_000u32))
            .await;
        kit.engine.route_sms("08031234567", "LEND ME 500").await;
        let sms = kit.notifier.last_to("+2348031234567").unwrap();
        assert!(sms.contains("HELP"), "{sms}");
    }

    #[tokio::test]
    async fn pay_command_walks_to_completion() {
        let kit = testkit::harness();
        kit.seed_account("+2348031234567", "1234", Decimal::from(5_000u32))
            .await;
        let recipient = kit
            .seed_named_account("+2348051234567", "Bola Ahmed", "5678", Decimal::ZERO)
            .await;

        kit.engine
            .route_sms("08031234567", "PAY 500 TO 08051234567 lunch")
            .await;
        let prompt = kit.notifier.last_to("+2348031234567").unwrap();
        assert!(prompt.contains("Send \u{20a6}500.00 to Bola Ahmed"), "{prompt}");

        kit.engine.route_sms("08031234567", "YES").await;
        kit.engine.route_sms("08031234567", "1234").await;

        let sender_after = kit
            .ledger
            .find_account_by_phone("+2348031234567")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sender_after.wallet_balance, Decimal::from(4_500u32));
        let recipient_after = kit.ledger.find_account(recipient.id).await.unwrap().unwrap();
        assert_eq!(recipient_after.wallet_balance, Decimal::from(500u32));
        assert!(kit
            .sessions
            .find_active("+2348031234567")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn second_payment_while_one_is_pending_is_refused() {
        let kit = testkit::harness();
        kit.seed_account("+2348031234567", "1234", Decimal::from(5_000u32))
            .await;
        kit.seed_named_account("+2348051234567", "Bola Ahmed", "5678", Decimal::ZERO)
            .await;

        kit.engine
            .route_sms("08031234567", "PAY 500 TO 08051234567")
            .await;
        kit.engine
            .route_sms("08031234567", "PAY 200 TO 08051234567")
            .await;

        // the second PAY lands inside the live session, where it is not a
        // recognised confirmation reply
        let sms = kit.notifier.last_to("+2348031234567").unwrap();
        assert!(sms.contains("Reply YES"), "{sms}");
        let session = kit
            .sessions
            .find_active("+2348031234567")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.current_step, STEP_AWAITING_CONFIRMATION);
    }

    #[tokio::test]
    async fn insufficient_balance_is_caught_at_staging() {
        let kit = testkit::harness();
        kit.seed_account("+2348031234567", "1234", Decimal::from(100u32))
            .await;
        kit.seed_named_account("+2348051234567", "Bola Ahmed", "5678", Decimal::ZERO)
            .await;

        kit.engine
            .route_sms("08031234567", "PAY 500 TO 08051234567")
            .await;

        let sms = kit.notifier.last_to("+2348031234567").unwrap();
        assert!(sms.contains("Insufficient funds"), "{sms}");
        assert!(kit
            .sessions
            .find_active("+2348031234567")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn corrupt_step_discards_the_session() {
        let kit = testkit::harness();
        let account = kit
            .seed_account("+2348031234567", "1234", Decimal::from(5_000u32))
            .await;
        let mut session = kit
            .seed_session(
                &account,
                TransactionIntent {
                    amount: Decimal::from(500u32),
                    fee: Decimal::ZERO,
                    description: None,
                    kind: TransferKind::Internal {
                        recipient_id: account.id,
                        recipient_phone: account.phone_number.clone(),
                        recipient_name: account.full_name.clone(),
                    },
                },
                STEP_AWAITING_PIN,
            )
            .await;
        session.current_step = "awaiting_fax".to_string();
        kit.sessions.put(session);

        kit.engine.route_sms("08031234567", "1234").await;

        assert_eq!(
            kit.notifier.last_to("+2348031234567").unwrap(),
            MSG_SESSION_CORRUPT
        );
        assert!(kit
            .sessions
            .find_active("+2348031234567")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn status_reports_the_record() {
        let kit = testkit::harness();
        kit.seed_account("+2348031234567", "1234", Decimal::from(5_000u32))
            .await;
        kit.seed_named_account("+2348051234567", "Bola Ahmed", "5678", Decimal::ZERO)
            .await;
        kit.engine
            .route_sms("08031234567", "PAY 500 TO 08051234567")
            .await;
        kit.engine.route_sms("08031234567", "YES").await;
        kit.engine.route_sms("08031234567", "1234").await;

        let reference = kit.ledger.all_transactions()[0].reference.clone();
        kit.engine
            .route_sms("08031234567", &format!("STATUS {reference}"))
            .await;

        let sms = kit.notifier.last_to("+2348031234567").unwrap();
        assert!(sms.contains("is completed"), "{sms}");
    }
}
