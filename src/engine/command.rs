//! Free-text command parsing. Pure: no store or provider access, so every
//! grammar rule is testable in isolation. Parse failures carry the exact
//! reply sent back to the user.

use rust_decimal::Decimal;
use thiserror::Error;

use super::fees::format_naira;
use super::{phone, pin};
use crate::providers::Network;

pub const PAY_MIN: u32 = 10;
pub const PAY_MAX: u32 = 500_000;
pub const AIRTIME_MIN: u32 = 50;
pub const AIRTIME_MAX: u32 = 100_000;

const PAY_USAGE: &str =
    "Send money with: PAY [AMOUNT] TO [PHONE or ACCOUNT BANK] [NOTE]. E.g. PAY 500 TO 08031234567";
const BUY_USAGE: &str = "Buy airtime with: BUY [AMOUNT] [NETWORK] [FOR PHONE]. E.g. BUY 500 MTN";
const REG_USAGE: &str =
    "Register with: REG [11-digit ID number] [4-digit PIN]. E.g. REG 12345678901 1234";
const STATUS_USAGE: &str = "Check a transaction with: STATUS [REFERENCE]";
const VERIFY_USAGE: &str = "Verify your number with: VERIFY [4-digit code]";
const PIN_USAGE: &str = "Change your PIN with: PIN [current] [new]";
const RESET_USAGE: &str = "Reset your PIN with: RESET [code] [new PIN]";

/// Where a payment goes, before the bank token is resolved against the
/// directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayTarget {
    /// Canonical `+234…` wallet phone number.
    Phone(String),
    /// 10-digit account number plus the bank token as typed.
    Account { number: String, bank_token: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Pay {
        amount: Decimal,
        target: PayTarget,
        description: Option<String>,
    },
    BuyAirtime {
        amount: Decimal,
        network: Option<Network>,
        phone: Option<String>,
    },
    Balance,
    Status {
        reference: String,
    },
    History,
    Help,
    StartRegistration,
    Register {
        id_number: String,
        pin: String,
    },
    VerifyOtp {
        code: String,
    },
    ResendOtp,
    ChangePin {
        current: String,
        new: String,
    },
    ResetPinRequest,
    ResetPinConfirm {
        code: String,
        new_pin: String,
    },
}

impl Command {
    /// Commands that must work before the account is verified (or before the
    /// user can log in at all).
    pub fn bypasses_verification(&self) -> bool {
        matches!(
            self,
            Command::Register { .. }
                | Command::StartRegistration
                | Command::VerifyOtp { .. }
                | Command::ResendOtp
                | Command::ResetPinRequest
                | Command::ResetPinConfirm { .. }
                | Command::Help
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Invalid command. Reply HELP for the list of commands")]
    Unknown,

    #[error("{0}")]
    Usage(String),

    #[error("Amount must be between {} and {}", format_naira(*.min), format_naira(*.max))]
    AmountOutOfRange { min: Decimal, max: Decimal },

    #[error("{0} is not a valid Nigerian mobile number")]
    InvalidPhone(String),

    #[error("PIN must be exactly 4 digits")]
    InvalidPin,
}

pub fn parse(raw: &str) -> Result<Command, ParseError> {
    let mut tokens = raw.split_whitespace();
    let keyword = tokens.next().ok_or(ParseError::Unknown)?.to_ascii_uppercase();
    let rest: Vec<&str> = tokens.collect();

    match keyword.as_str() {
        "PAY" | "SEND" => parse_pay(&rest),
        "BUY" | "AIRTIME" => parse_airtime(&rest),
        "BAL" | "BALANCE" => Ok(Command::Balance),
        "STATUS" => match rest.first() {
            Some(reference) => Ok(Command::Status {
                reference: (*reference).to_string(),
            }),
            None => Err(ParseError::Usage(STATUS_USAGE.to_string())),
        },
        "HISTORY" | "TRANSACTIONS" => Ok(Command::History),
        "HELP" | "MENU" | "COMMANDS" => Ok(Command::Help),
        "START" | "JOIN" => Ok(Command::StartRegistration),
        "REG" | "REGISTER" => parse_register(&rest),
        "VERIFY" => match rest.as_slice() {
            [code] if is_otp(code) => Ok(Command::VerifyOtp {
                code: (*code).to_string(),
            }),
            _ => Err(ParseError::Usage(VERIFY_USAGE.to_string())),
        },
        "RESEND" => Ok(Command::ResendOtp),
        "PIN" => match rest.as_slice() {
            [current, new] => {
                if !pin::is_well_formed(current) || !pin::is_well_formed(new) {
                    return Err(ParseError::InvalidPin);
                }
                Ok(Command::ChangePin {
                    current: (*current).to_string(),
                    new: (*new).to_string(),
                })
            }
            _ => Err(ParseError::Usage(PIN_USAGE.to_string())),
        },
        "RESET" => match rest.as_slice() {
            [] => Ok(Command::ResetPinRequest),
            [code, new_pin] => {
                if !is_otp(code) {
                    return Err(ParseError::Usage(RESET_USAGE.to_string()));
                }
                if !pin::is_well_formed(new_pin) {
                    return Err(ParseError::InvalidPin);
                }
                Ok(Command::ResetPinConfirm {
                    code: (*code).to_string(),
                    new_pin: (*new_pin).to_string(),
                })
            }
            _ => Err(ParseError::Usage(RESET_USAGE.to_string())),
        },
        _ => Err(ParseError::Unknown),
    }
}

fn parse_pay(rest: &[&str]) -> Result<Command, ParseError> {
    let (amount_token, after_amount) = match rest.split_first() {
        Some(parts) => parts,
        None => return Err(ParseError::Usage(PAY_USAGE.to_string())),
    };
    let amount = parse_amount(amount_token, PAY_MIN, PAY_MAX, PAY_USAGE, true)?;

    let (to_token, after_to) = match after_amount.split_first() {
        Some(parts) => parts,
        None => return Err(ParseError::Usage(PAY_USAGE.to_string())),
    };
    if !to_token.eq_ignore_ascii_case("to") {
        return Err(ParseError::Usage(PAY_USAGE.to_string()));
    }

    let (recipient, mut remaining) = match after_to.split_first() {
        Some(parts) => parts,
        None => return Err(ParseError::Usage(PAY_USAGE.to_string())),
    };
    let digits = recipient.strip_prefix('+').unwrap_or(recipient);
    if !digits.chars().all(|c| c.is_ascii_digit()) || !matches!(digits.len(), 10 | 11 | 13) {
        return Err(ParseError::Usage(PAY_USAGE.to_string()));
    }

    // a bare 10-digit recipient followed by a bank token is an account number;
    // everything else is a wallet phone
    let bank_token = if *recipient == digits && digits.len() == 10 {
        match remaining.split_first() {
            Some((token, rest)) if is_bank_token(token) => {
                remaining = rest;
                Some(token.to_ascii_uppercase())
            }
            _ => None,
        }
    } else {
        None
    };
    let target = match bank_token {
        Some(bank_token) => PayTarget::Account {
            number: digits.to_string(),
            bank_token,
        },
        None => match phone::normalize(digits).filter(|p| phone::is_valid_mobile(p)) {
            Some(normalized) => PayTarget::Phone(normalized),
            None => return Err(ParseError::InvalidPhone((*recipient).to_string())),
        },
    };

    let description = if remaining.is_empty() {
        None
    } else {
        Some(remaining.join(" "))
    };

    Ok(Command::Pay {
        amount,
        target,
        description,
    })
}

fn parse_airtime(rest: &[&str]) -> Result<Command, ParseError> {
    let (amount_token, mut remaining) = match rest.split_first() {
        Some(parts) => parts,
        None => return Err(ParseError::Usage(BUY_USAGE.to_string())),
    };
    let amount = parse_amount(amount_token, AIRTIME_MIN, AIRTIME_MAX, BUY_USAGE, false)?;

    let mut network = None;
    let mut target = None;
    while let Some((token, rest)) = remaining.split_first() {
        remaining = rest;
        if token.eq_ignore_ascii_case("for") {
            continue;
        }
        if network.is_none() {
            if let Some(parsed) = Network::parse(token) {
                network = Some(parsed);
                continue;
            }
        }
        if target.is_none() && token.chars().all(|c| c.is_ascii_digit()) {
            match phone::normalize(token).filter(|p| phone::is_valid_mobile(p)) {
                Some(normalized) => {
                    target = Some(normalized);
                    continue;
                }
                None => return Err(ParseError::InvalidPhone((*token).to_string())),
            }
        }
        return Err(ParseError::Usage(BUY_USAGE.to_string()));
    }

    Ok(Command::BuyAirtime {
        amount,
        network,
        phone: target,
    })
}

fn parse_register(rest: &[&str]) -> Result<Command, ParseError> {
    match rest {
        [id_number, pin_token] => {
            if id_number.len() != 11 || !id_number.chars().all(|c| c.is_ascii_digit()) {
                return Err(ParseError::Usage(REG_USAGE.to_string()));
            }
            if !pin::is_well_formed(pin_token) {
                return Err(ParseError::InvalidPin);
            }
            Ok(Command::Register {
                id_number: (*id_number).to_string(),
                pin: (*pin_token).to_string(),
            })
        }
        _ => Err(ParseError::Usage(REG_USAGE.to_string())),
    }
}

fn parse_amount(
    token: &str,
    min: u32,
    max: u32,
    usage: &str,
    allow_kobo: bool,
) -> Result<Decimal, ParseError> {
    let amount: Decimal = token
        .parse()
        .map_err(|_| ParseError::Usage(usage.to_string()))?;
    let max_scale = if allow_kobo { 2 } else { 0 };
    if amount.scale() > max_scale {
        return Err(ParseError::Usage(usage.to_string()));
    }
    let (min, max) = (Decimal::from(min), Decimal::from(max));
    if amount < min || amount > max {
        return Err(ParseError::AmountOutOfRange { min, max });
    }
    Ok(amount)
}

fn is_otp(token: &str) -> bool {
    token.len() == 4 && token.chars().all(|c| c.is_ascii_digit())
}

fn is_bank_token(token: &str) -> bool {
    let alphabetic = (2..=10).contains(&token.len()) && token.chars().all(|c| c.is_ascii_alphabetic());
    let numeric_code = token.len() == 3 && token.chars().all(|c| c.is_ascii_digit());
    alphabetic || numeric_code
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn pay_to_phone_parses_with_description() {
        let command = parse("pay 500 to 08031234567 thanks for Lunch").unwrap();
        assert_eq!(
            command,
            Command::Pay {
                amount: Decimal::from(500u32),
                target: PayTarget::Phone("+2348031234567".to_string()),
                description: Some("thanks for Lunch".to_string()),
            }
        );
    }

    #[test]
    fn pay_to_account_takes_a_bank_token() {
        let command = parse("PAY 2000 TO 0123456789 GTB school fees").unwrap();
        assert_eq!(
            command,
            Command::Pay {
                amount: Decimal::from(2000u32),
                target: PayTarget::Account {
                    number: "0123456789".to_string(),
                    bank_token: "GTB".to_string(),
                },
                description: Some("school fees".to_string()),
            }
        );
    }

    #[test]
    fn pay_accepts_kobo_precision() {
        let command = parse("PAY 150.75 TO 08031234567").unwrap();
        assert!(matches!(
            command,
            Command::Pay { amount, .. } if amount == Decimal::new(15075, 2)
        ));
    }

    #[rstest]
    #[case::below_minimum("PAY 5 TO 08031234567")]
    #[case::above_maximum("PAY 600000 TO 08031234567")]
    fn pay_enforces_amount_bounds(#[case] text: &str) {
        assert!(matches!(
            parse(text),
            Err(ParseError::AmountOutOfRange { .. })
        ));
    }

    #[rstest]
    #[case::missing_to("PAY 500 08031234567")]
    #[case::no_amount("PAY TO 08031234567")]
    #[case::three_decimals("PAY 10.005 TO 08031234567")]
    #[case::short_recipient("PAY 500 TO 0803123")]
    fn pay_shape_errors_return_usage(#[case] text: &str) {
        assert!(matches!(parse(text), Err(ParseError::Usage(_))));
    }

    #[test]
    fn pay_rejects_unknown_prefixes() {
        assert!(matches!(
            parse("PAY 500 TO 07991234567"),
            Err(ParseError::InvalidPhone(_))
        ));
    }

    #[test]
    fn buy_defaults_network_and_phone() {
        let command = parse("BUY 500").unwrap();
        assert_eq!(
            command,
            Command::BuyAirtime {
                amount: Decimal::from(500u32),
                network: None,
                phone: None,
            }
        );
    }

    #[test]
    fn buy_accepts_network_and_recipient() {
        let command = parse("BUY 1000 GLO FOR 08051234567").unwrap();
        assert_eq!(
            command,
            Command::BuyAirtime {
                amount: Decimal::from(1000u32),
                network: Some(Network::Glo),
                phone: Some("+2348051234567".to_string()),
            }
        );
    }

    #[test]
    fn buy_rejects_fractional_amounts() {
        assert!(matches!(parse("BUY 99.50"), Err(ParseError::Usage(_))));
    }

    #[rstest]
    #[case::balance_short("BAL", Command::Balance)]
    #[case::balance_long("balance", Command::Balance)]
    #[case::history("HISTORY", Command::History)]
    #[case::help("help", Command::Help)]
    #[case::menu("MENU", Command::Help)]
    #[case::resend("RESEND", Command::ResendOtp)]
    #[case::reset("RESET", Command::ResetPinRequest)]
    fn bare_keywords_parse(#[case] text: &str, #[case] expected: Command) {
        assert_eq!(parse(text).unwrap(), expected);
    }

    #[test]
    fn status_requires_a_reference() {
        assert!(matches!(parse("STATUS"), Err(ParseError::Usage(_))));
        assert_eq!(
            parse("status TXN_18C_AB12CD34").unwrap(),
            Command::Status {
                reference: "TXN_18C_AB12CD34".to_string()
            }
        );
    }

    #[test]
    fn register_validates_id_and_pin() {
        assert_eq!(
            parse("REG 12345678901 4321").unwrap(),
            Command::Register {
                id_number: "12345678901".to_string(),
                pin: "4321".to_string(),
            }
        );
        assert!(matches!(parse("REG 123 4321"), Err(ParseError::Usage(_))));
        assert!(matches!(
            parse("REG 12345678901 12"),
            Err(ParseError::InvalidPin)
        ));
    }

    #[test]
    fn reset_with_arguments_needs_code_then_pin() {
        assert_eq!(
            parse("RESET 1111 2222").unwrap(),
            Command::ResetPinConfirm {
                code: "1111".to_string(),
                new_pin: "2222".to_string(),
            }
        );
        assert!(matches!(
            parse("RESET 1111 22"),
            Err(ParseError::InvalidPin)
        ));
    }

    #[test]
    fn junk_is_unknown() {
        assert_eq!(parse("FROBNICATE 12"), Err(ParseError::Unknown));
        assert_eq!(parse("   "), Err(ParseError::Unknown));
    }

    #[test]
    fn amount_bound_messages_use_naira_formatting() {
        let err = parse("PAY 9 TO 08031234567").unwrap_err();
        assert_eq!(err.to_string(), "Amount must be between ₦10.00 and ₦500,000.00");
    }
}
