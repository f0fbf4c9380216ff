//! USSD approval menu. Replies are whole screens: a `CON ` prefix keeps the
//! gateway session open for more input, `END ` closes it. Inputs arrive
//! cumulatively ("1", then "1*A3F9", then "1*A3F9*1234"), so the walker
//! matches on the split path and takes the last element as the fresh entry.

use std::sync::Arc;

use tracing::{debug, error};

use super::fees::format_naira;
use super::pin;
use super::session::{PinFailure, SessionStep, TransactionIntent, PIN_ATTEMPT_CAP};
use super::{phone, Engine};
use crate::db::sessions::Session;
use crate::error::ServiceError;

const SCREEN_MENU: &str = "CON Welcome to TextPay\n1. Approve a payment\n2. Other services";
const SCREEN_CODE_PROMPT: &str =
    "CON Enter your payment code (the 4 characters in our text message):";
const SCREEN_NOT_FOUND: &str =
    "END We could not find a payment with that code. It may have expired.";
const SCREEN_AWAITING_SMS: &str =
    "END This payment is waiting for your SMS reply. Reply USSD to the confirmation text to approve it here.";
const SCREEN_ALREADY_RUNNING: &str = "END This payment is already being processed.";
const SCREEN_CORRUPT: &str =
    "END Something went wrong with this payment. Please start again by SMS.";
const SCREEN_LOCKED: &str =
    "END Too many incorrect PIN attempts. This payment has been cancelled.";
const SCREEN_ACCEPTED: &str =
    "END PIN accepted. We are processing your payment; your SMS confirmation is on the way.";
const SCREEN_COMING_SOON: &str =
    "END Other services are coming soon. Text HELP to this number for everything you can do by SMS.";
const SCREEN_INVALID: &str = "END Invalid choice.";
const SCREEN_UNAVAILABLE: &str = "END Service temporarily unavailable. Please try again.";

impl Engine {
    /// Entry point for one USSD gateway callback.
    pub async fn route_ussd(self: Arc<Self>, gateway_session: &str, msisdn: &str, text: &str) -> String {
        let sender = phone::normalize_or_raw(msisdn);
        debug!("ussd callback {gateway_session} from {sender}: {text:?}");
        match self.walk_menu(&sender, text.trim()).await {
            Ok(screen) => screen,
            Err(err) => {
                error!("ussd callback {gateway_session} from {sender} failed: {err}");
                SCREEN_UNAVAILABLE.to_string()
            }
        }
    }

    async fn walk_menu(self: Arc<Self>, sender: &str, text: &str) -> Result<String, ServiceError> {
        let path: Vec<&str> = if text.is_empty() {
            Vec::new()
        } else {
            text.split('*').collect()
        };

        match path.as_slice() {
            [] => Ok(SCREEN_MENU.to_string()),
            ["1"] => Ok(SCREEN_CODE_PROMPT.to_string()),
            ["1", code] => self.approval_summary(sender, code).await,
            ["1", code, .., entry] => self.approve_payment(sender, code, entry).await,
            ["2", ..] => Ok(SCREEN_COMING_SOON.to_string()),
            _ => Ok(SCREEN_INVALID.to_string()),
        }
    }

    /// `1*<code>`: show what the code would approve.
    async fn approval_summary(&self, sender: &str, code: &str) -> Result<String, ServiceError> {
        let session = match self.approvable_session(sender, code).await? {
            Ok(session) => session,
            Err(screen) => return Ok(screen),
        };
        let Some(intent) = TransactionIntent::from_session(&session) else {
            self.sessions.delete(&session.id).await?;
            return Ok(SCREEN_CORRUPT.to_string());
        };
        Ok(format!(
            "CON Send {} to {}?\nFee: {}. Total: {}.\nEnter your 4-digit PIN to approve:",
            format_naira(intent.amount),
            intent.kind.recipient_display(),
            format_naira(intent.fee),
            format_naira(intent.total())
        ))
    }

    /// `1*<code>*<pin>`: the PIN check shares the attempt cap with the SMS
    /// path, and on success the caller gets END immediately while the
    /// movement itself runs in the background.
    async fn approve_payment(
        self: Arc<Self>,
        sender: &str,
        code: &str,
        entry: &str,
    ) -> Result<String, ServiceError> {
        let session = match self.approvable_session(sender, code).await? {
            Ok(session) => session,
            Err(screen) => return Ok(screen),
        };
        let Some(account) = self.ledger.find_account(session.user_id).await? else {
            self.sessions.delete(&session.id).await?;
            return Ok(SCREEN_CORRUPT.to_string());
        };

        if !pin::is_well_formed(entry) {
            return Ok("CON Your PIN is 4 digits. Enter your 4-digit PIN:".to_string());
        }
        if !pin::verify(entry, &account.pin_hash) {
            let screen = match self.register_failed_pin(&session).await? {
                PinFailure::SessionGone => SCREEN_NOT_FOUND.to_string(),
                PinFailure::Locked => SCREEN_LOCKED.to_string(),
                PinFailure::Retry(attempts) => {
                    format!("CON Incorrect PIN ({attempts}/{PIN_ATTEMPT_CAP}). Try again:")
                }
            };
            return Ok(screen);
        }

        if !self.sessions.begin_execution(&session.id).await? {
            return Ok(SCREEN_ALREADY_RUNNING.to_string());
        }

        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.execute_transaction(&account, &session, "ussd").await {
                error!("execution of ussd-approved session {} failed: {err}", session.id);
            }
        });
        Ok(SCREEN_ACCEPTED.to_string())
    }

    /// Look up the code and check the session is in the USSD approval step.
    /// The error side carries the screen to show instead.
    async fn approvable_session(
        &self,
        sender: &str,
        code: &str,
    ) -> Result<Result<Session, String>, ServiceError> {
        let Some(session) = self.sessions.find_by_short_code(sender, code).await? else {
            return Ok(Err(SCREEN_NOT_FOUND.to_string()));
        };
        match SessionStep::parse(&session.current_step) {
            Some(SessionStep::AwaitingUssdPin) => Ok(Ok(session)),
            Some(SessionStep::Executing) => Ok(Err(SCREEN_ALREADY_RUNNING.to_string())),
            Some(_) => Ok(Err(SCREEN_AWAITING_SMS.to_string())),
            None => {
                self.sessions.delete(&session.id).await?;
                Ok(Err(SCREEN_CORRUPT.to_string()))
            }
        }
    }
}
