//! The step handlers of the per-phone conversation state machine, plus the
//! staged-payment payload stored inside a session row.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::fees::format_naira;
use super::phone;
use super::pin;
use crate::db::ledger::{UserAccount, KIND_AIRTIME, KIND_BANK, KIND_INTERNAL};
use crate::db::sessions::{
    Session, STEP_AWAITING_CONFIRMATION, STEP_AWAITING_PIN, STEP_AWAITING_USSD_PIN, STEP_EXECUTING,
};
use crate::error::ServiceError;
use crate::providers::Network;

use super::Engine;

pub const PIN_ATTEMPT_CAP: i32 = 3;

pub const MSG_CANCELLED: &str = "Payment cancelled.";
pub const MSG_PIN_PROMPT: &str =
    "Reply with your 4-digit PIN to approve this payment, or NO to cancel.";
pub const MSG_PIN_SHAPE: &str =
    "Your PIN is 4 digits. Reply with just your 4-digit PIN, or NO to cancel.";
pub const MSG_SESSION_GONE: &str =
    "This payment request has expired. Please start again.";
pub const MSG_PIN_LOCKED: &str =
    "Too many incorrect PIN attempts. This payment has been cancelled for your safety.";
pub const MSG_ALREADY_EXECUTING: &str =
    "Your payment is already being processed. You will receive a confirmation shortly.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStep {
    AwaitingConfirmation,
    AwaitingPin,
    AwaitingUssdPin,
    Executing,
}

impl SessionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStep::AwaitingConfirmation => STEP_AWAITING_CONFIRMATION,
            SessionStep::AwaitingPin => STEP_AWAITING_PIN,
            SessionStep::AwaitingUssdPin => STEP_AWAITING_USSD_PIN,
            SessionStep::Executing => STEP_EXECUTING,
        }
    }

    /// `None` marks a row whose step column no longer matches any state this
    /// build understands; callers treat that as corrupt and discard it.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            STEP_AWAITING_CONFIRMATION => Some(SessionStep::AwaitingConfirmation),
            STEP_AWAITING_PIN => Some(SessionStep::AwaitingPin),
            STEP_AWAITING_USSD_PIN => Some(SessionStep::AwaitingUssdPin),
            STEP_EXECUTING => Some(SessionStep::Executing),
            _ => None,
        }
    }
}

/// Where the staged money goes. Serialized into the session payload, so the
/// variant tags are part of the stored format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferKind {
    Internal {
        recipient_id: uuid::Uuid,
        recipient_phone: String,
        recipient_name: String,
    },
    Bank {
        account_number: String,
        account_name: String,
        bank_code: String,
        bank_name: String,
    },
    Airtime {
        phone: String,
        network: Network,
    },
}

impl TransferKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransferKind::Internal { .. } => KIND_INTERNAL,
            TransferKind::Bank { .. } => KIND_BANK,
            TransferKind::Airtime { .. } => KIND_AIRTIME,
        }
    }

    pub fn recipient_display(&self) -> String {
        match self {
            TransferKind::Internal {
                recipient_name,
                recipient_phone,
                ..
            } => {
                let shown = phone::local_form(recipient_phone)
                    .unwrap_or_else(|| recipient_phone.clone());
                format!("{recipient_name} ({shown})")
            }
            TransferKind::Bank {
                account_name,
                account_number,
                bank_name,
                ..
            } => format!("{account_name} ({bank_name} {account_number})"),
            TransferKind::Airtime { phone: target, network } => {
                let shown = phone::local_form(target).unwrap_or_else(|| target.clone());
                format!("{} airtime for {shown}", network.as_str())
            }
        }
    }
}

/// The payment a session is waiting to approve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionIntent {
    pub amount: Decimal,
    pub fee: Decimal,
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: TransferKind,
}

impl TransactionIntent {
    pub fn total(&self) -> Decimal {
        self.amount + self.fee
    }

    /// `None` when the stored payload no longer deserializes, which the
    /// callers treat the same as an unknown step: corrupt, discard.
    pub fn from_session(session: &Session) -> Option<Self> {
        serde_json::from_value(session.payload.clone()).ok()
    }
}

impl Engine {
    /// Reply handling for `awaiting_confirmation`.
    pub(crate) async fn handle_confirmation(
        &self,
        session: Session,
        reply: &str,
    ) -> Result<(), ServiceError> {
        let word = reply.trim().to_ascii_uppercase();
        match word.as_str() {
            "YES" | "Y" | "CONFIRM" | "OK" => {
                self.sessions.set_step(&session.id, STEP_AWAITING_PIN).await?;
                self.notify(&session.phone_number, MSG_PIN_PROMPT).await;
            }
            "USSD" => {
                self.sessions
                    .set_step(&session.id, STEP_AWAITING_USSD_PIN)
                    .await?;
                let message = self.ussd_instructions(&session);
                self.notify(&session.phone_number, &message).await;
            }
            "NO" | "N" | "CANCEL" | "STOP" => {
                self.cancel_session(&session).await?;
            }
            _ => {
                let message = format!(
                    "Reply YES to confirm your payment, NO to cancel, or USSD to approve by dialling {}.",
                    self.config.ussd_service_code
                );
                self.notify(&session.phone_number, &message).await;
            }
        }
        Ok(())
    }

    /// Reply handling for `awaiting_pin`: the PIN arrives over SMS.
    pub(crate) async fn handle_pin_sms(
        &self,
        account: UserAccount,
        session: Session,
        reply: &str,
    ) -> Result<(), ServiceError> {
        let entry = reply.trim();
        if matches!(
            entry.to_ascii_uppercase().as_str(),
            "NO" | "N" | "CANCEL" | "STOP"
        ) {
            return self.cancel_session(&session).await;
        }
        if !pin::is_well_formed(entry) {
            // wrong shape never burns an attempt
            self.notify(&session.phone_number, MSG_PIN_SHAPE).await;
            return Ok(());
        }

        if !pin::verify(entry, &account.pin_hash) {
            let outcome = self.register_failed_pin(&session).await?;
            let message = match outcome {
                PinFailure::SessionGone => MSG_SESSION_GONE.to_string(),
                PinFailure::Locked => MSG_PIN_LOCKED.to_string(),
                PinFailure::Retry(attempts) => {
                    format!("Incorrect PIN ({attempts}/{PIN_ATTEMPT_CAP}). Try again:")
                }
            };
            self.notify(&session.phone_number, &message).await;
            return Ok(());
        }

        // one claim wins even if the gateway delivers the PIN twice
        if !self.sessions.begin_execution(&session.id).await? {
            self.notify(&session.phone_number, MSG_ALREADY_EXECUTING).await;
            return Ok(());
        }
        self.execute_transaction(&account, &session, "sms").await
    }

    /// Reply handling for `awaiting_ussd_pin`: the PIN belongs on the USSD
    /// menu, so over SMS we only honour cancellation.
    pub(crate) async fn handle_ussd_wait(
        &self,
        session: Session,
        reply: &str,
    ) -> Result<(), ServiceError> {
        let word = reply.trim().to_ascii_uppercase();
        if matches!(word.as_str(), "NO" | "N" | "CANCEL" | "STOP") {
            return self.cancel_session(&session).await;
        }
        let message = self.ussd_instructions(&session);
        self.notify(&session.phone_number, &message).await;
        Ok(())
    }

    pub(crate) async fn cancel_session(&self, session: &Session) -> Result<(), ServiceError> {
        self.sessions.delete(&session.id).await?;
        self.notify(&session.phone_number, MSG_CANCELLED).await;
        Ok(())
    }

    /// Count a wrong PIN against the shared cap. Used by both the SMS and
    /// USSD entry paths so approvals cannot shop for extra attempts by
    /// switching channels.
    pub(crate) async fn register_failed_pin(
        &self,
        session: &Session,
    ) -> Result<PinFailure, ServiceError> {
        match self.sessions.record_failed_pin(&session.id).await? {
            None => Ok(PinFailure::SessionGone),
            Some(attempts) if attempts >= PIN_ATTEMPT_CAP => {
                self.sessions.delete(&session.id).await?;
                Ok(PinFailure::Locked)
            }
            Some(attempts) => Ok(PinFailure::Retry(attempts)),
        }
    }

    fn ussd_instructions(&self, session: &Session) -> String {
        format!(
            "Dial {}, choose 1 (Approve Payment) and enter code {} with your PIN. Reply NO to cancel.",
            self.config.ussd_service_code,
            session.short_code().to_ascii_uppercase()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PinFailure {
    /// The row vanished between the reply and the increment (expiry sweep).
    SessionGone,
    /// This attempt hit the cap; the session has been removed.
    Locked,
    Retry(i32),
}
