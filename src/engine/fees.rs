//! Transfer fee schedule and currency display. One table rules every
//! channel: tiered for wallet and bank transfers, flat for airtime.

use rust_decimal::Decimal;

use super::session::TransferKind;

pub fn internal_fee(amount: Decimal) -> Decimal {
    if amount < Decimal::from(1_000u32) {
        Decimal::ZERO
    } else if amount < Decimal::from(5_000u32) {
        Decimal::from(10u32)
    } else if amount < Decimal::from(50_000u32) {
        Decimal::from(25u32)
    } else {
        Decimal::from(50u32)
    }
}

pub fn bank_fee(amount: Decimal) -> Decimal {
    if amount < Decimal::from(5_000u32) {
        Decimal::from(35u32)
    } else if amount < Decimal::from(50_000u32) {
        Decimal::from(50u32)
    } else {
        Decimal::from(100u32)
    }
}

pub fn airtime_fee(_amount: Decimal) -> Decimal {
    Decimal::from(10u32)
}

pub fn fee_for(kind: &TransferKind, amount: Decimal) -> Decimal {
    match kind {
        TransferKind::Internal { .. } => internal_fee(amount),
        TransferKind::Bank { .. } => bank_fee(amount),
        TransferKind::Airtime { .. } => airtime_fee(amount),
    }
}

/// `1234567.5` -> `₦1,234,567.50`.
pub fn format_naira(amount: Decimal) -> String {
    let rounded = amount.round_dp(2);
    let text = format!("{rounded:.2}");
    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{sign}\u{20a6}{grouped}.{frac_part}")
}
