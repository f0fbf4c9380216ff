//! Registration and credential flows: identity-checked signup, phone
//! verification codes, PIN changes and resets. The ID number is sent to the
//! verifier and discarded; only the verifier's opaque reference is stored.

use tracing::{info, warn};
use uuid::Uuid;

use super::dispatcher::MSG_WELCOME;
use super::{new_otp_code, phone, pin, Engine};
use crate::db::ledger::{NewAccount, UserAccount};
use crate::db::otps::{NewOtp, PURPOSE_PHONE_VERIFICATION, PURPOSE_PIN_RESET};
use crate::error::ServiceError;
use crate::providers::ProviderError;

const MSG_ALREADY_REGISTERED: &str =
    "You already have a TextPay wallet. Text HELP to see what you can do.";
const MSG_OTP_INVALID: &str =
    "That code is not valid or has expired. Text RESEND for a new one.";
const MSG_RESET_INVALID: &str =
    "That reset code is not valid or has expired. Text RESET for a new one.";
const MSG_MOBILE_ONLY: &str = "TextPay works from Nigerian mobile numbers only.";

impl Engine {
    pub(crate) async fn start_registration(&self, sender: &str) -> Result<(), ServiceError> {
        match self.ledger.find_account_by_phone(sender).await? {
            None => self.notify(sender, MSG_WELCOME).await,
            Some(account) if account.is_phone_verified => {
                self.notify(sender, MSG_ALREADY_REGISTERED).await
            }
            Some(_) => {
                self.notify(
                    sender,
                    "Your wallet is waiting for verification. Reply VERIFY [code], or RESEND for a new code.",
                )
                .await
            }
        }
        Ok(())
    }

    pub(crate) async fn register(
        &self,
        sender: &str,
        id_number: &str,
        pin_code: &str,
    ) -> Result<(), ServiceError> {
        let Some(canonical) = phone::normalize(sender) else {
            self.notify(sender, MSG_MOBILE_ONLY).await;
            return Ok(());
        };

        if let Some(existing) = self.ledger.find_account_by_phone(&canonical).await? {
            if existing.is_phone_verified {
                self.notify(&canonical, MSG_ALREADY_REGISTERED).await;
                return Ok(());
            }
            return self.resend_verification(&canonical).await;
        }

        let identity = match self.identity.verify(id_number).await {
            Ok(identity) => identity,
            Err(ProviderError::Rejected(_)) => {
                self.notify(
                    &canonical,
                    "We could not verify that ID number. Check it and try again.",
                )
                .await;
                return Ok(());
            }
            Err(err) => {
                warn!("identity verification failed: {err}");
                self.notify(
                    &canonical,
                    "Registration is temporarily unavailable. Please try again shortly.",
                )
                .await;
                return Ok(());
            }
        };

        if self
            .ledger
            .find_account_by_identity_ref(&identity.reference)
            .await?
            .is_some()
        {
            self.notify(
                &canonical,
                "This ID number is already linked to a wallet. Text RESET if you forgot your PIN.",
            )
            .await;
            return Ok(());
        }

        let account = self
            .ledger
            .create_account(NewAccount {
                phone_number: canonical.clone(),
                full_name: identity.full_name,
                email: identity.email,
                pin_hash: pin::hash(pin_code)?,
                identity_ref: identity.reference,
            })
            .await?;
        info!("opened wallet {} for {canonical}", account.id);

        // the virtual funding account is a convenience; signup succeeds
        // without it and BAL simply omits the top-up details
        match self
            .money
            .issue_funding_account(&account.full_name, &account.id.to_string())
            .await
        {
            Ok(funding) => {
                self.ledger
                    .attach_funding_account(account.id, &funding)
                    .await?;
            }
            Err(err) => warn!("no funding account for {}: {err}", account.id),
        }

        let code = self
            .issue_otp(account.id, &canonical, PURPOSE_PHONE_VERIFICATION)
            .await?;
        let message = format!(
            "Welcome {}! Your verification code is {code}. Reply VERIFY {code} to activate your wallet.",
            account.first_name()
        );
        self.notify(&canonical, &message).await;
        Ok(())
    }

    pub(crate) async fn verify_phone(&self, sender: &str, code: &str) -> Result<(), ServiceError> {
        let Some(account) = self.ledger.find_account_by_phone(sender).await? else {
            self.notify(sender, MSG_WELCOME).await;
            return Ok(());
        };
        if account.is_phone_verified {
            self.notify(sender, "Your number is already verified. Text HELP for commands.")
                .await;
            return Ok(());
        }

        if !self
            .otps
            .consume(account.id, PURPOSE_PHONE_VERIFICATION, code)
            .await?
        {
            self.notify(sender, MSG_OTP_INVALID).await;
            return Ok(());
        }

        self.ledger.mark_phone_verified(account.id).await?;
        info!("wallet {} verified", account.id);

        let message = match account.funding_details() {
            Some(funding) => format!(
                "You're all set, {}! Top up by bank transfer to {} {} ({}) and text PAY to send money. Text HELP for all commands.",
                account.first_name(),
                funding.bank_name,
                funding.account_number,
                funding.account_name
            ),
            None => format!(
                "You're all set, {}! Text HELP to see everything you can do.",
                account.first_name()
            ),
        };
        self.notify(sender, &message).await;
        Ok(())
    }

    pub(crate) async fn resend_verification(&self, sender: &str) -> Result<(), ServiceError> {
        let Some(account) = self.ledger.find_account_by_phone(sender).await? else {
            self.notify(sender, MSG_WELCOME).await;
            return Ok(());
        };
        if account.is_phone_verified {
            self.notify(sender, "Your number is already verified. Text HELP for commands.")
                .await;
            return Ok(());
        }

        let code = self
            .issue_otp(account.id, sender, PURPOSE_PHONE_VERIFICATION)
            .await?;
        let message =
            format!("Your TextPay verification code is {code}. Reply VERIFY {code} to activate.");
        self.notify(sender, &message).await;
        Ok(())
    }

    pub(crate) async fn request_pin_reset(&self, sender: &str) -> Result<(), ServiceError> {
        let Some(account) = self.ledger.find_account_by_phone(sender).await? else {
            self.notify(sender, MSG_WELCOME).await;
            return Ok(());
        };

        let code = self.issue_otp(account.id, sender, PURPOSE_PIN_RESET).await?;
        let message = format!(
            "Your TextPay PIN reset code is {code}. Reply RESET {code} [new 4-digit PIN] to set a new PIN."
        );
        self.notify(sender, &message).await;
        Ok(())
    }

    pub(crate) async fn confirm_pin_reset(
        &self,
        sender: &str,
        code: &str,
        new_pin: &str,
    ) -> Result<(), ServiceError> {
        let Some(account) = self.ledger.find_account_by_phone(sender).await? else {
            self.notify(sender, MSG_WELCOME).await;
            return Ok(());
        };

        if !self.otps.consume(account.id, PURPOSE_PIN_RESET, code).await? {
            self.notify(sender, MSG_RESET_INVALID).await;
            return Ok(());
        }

        self.ledger
            .update_pin_hash(account.id, &pin::hash(new_pin)?)
            .await?;
        info!("PIN reset for wallet {}", account.id);
        self.notify(
            sender,
            "Your PIN has been reset. If this wasn't you, contact support immediately.",
        )
        .await;
        Ok(())
    }

    pub(crate) async fn change_pin(
        &self,
        account: &UserAccount,
        current: &str,
        new: &str,
    ) -> Result<(), ServiceError> {
        if !pin::verify(current, &account.pin_hash) {
            self.notify(&account.phone_number, "Your current PIN is incorrect.")
                .await;
            return Ok(());
        }

        self.ledger
            .update_pin_hash(account.id, &pin::hash(new)?)
            .await?;
        self.notify(&account.phone_number, "Your PIN has been changed.")
            .await;
        Ok(())
    }

    async fn issue_otp(
        &self,
        user_id: Uuid,
        phone_number: &str,
        purpose: &str,
    ) -> Result<String, ServiceError> {
        let code = new_otp_code();
        self.otps
            .create(NewOtp {
                user_id,
                phone_number: phone_number.to_string(),
                code: code.clone(),
                purpose: purpose.to_string(),
                expires_at: self.otp_deadline(),
            })
            .await?;
        Ok(code)
    }
}
