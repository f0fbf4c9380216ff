//! Nigerian mobile number handling: canonical `+234` form, prefix validation
//! and network inference from the 4-digit local prefix.

use crate::providers::Network;

const NETWORK_PREFIXES: &[(&str, Network)] = &[
    ("0803", Network::Mtn),
    ("0806", Network::Mtn),
    ("0813", Network::Mtn),
    ("0816", Network::Mtn),
    ("0810", Network::Mtn),
    ("0814", Network::Mtn),
    ("0903", Network::Mtn),
    ("0906", Network::Mtn),
    ("0805", Network::Glo),
    ("0815", Network::Glo),
    ("0811", Network::Glo),
    ("0905", Network::Glo),
    ("0802", Network::Airtel),
    ("0808", Network::Airtel),
    ("0812", Network::Airtel),
    ("0701", Network::Airtel),
    ("0902", Network::Airtel),
    ("0809", Network::NineMobile),
    ("0818", Network::NineMobile),
    ("0817", Network::NineMobile),
    ("0908", Network::NineMobile),
    ("0909", Network::NineMobile),
];

/// Canonical `+234…` form, or `None` when no numbering rule applies.
pub fn normalize(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 11 && digits.starts_with('0') {
        Some(format!("+234{}", &digits[1..]))
    } else if digits.len() == 13 && digits.starts_with("234") {
        Some(format!("+{digits}"))
    } else if digits.len() == 10 && !digits.starts_with('0') {
        Some(format!("+234{digits}"))
    } else {
        None
    }
}

/// Normalize when possible; gateways occasionally send shortcodes or
/// alphanumeric senders, which pass through untouched.
pub fn normalize_or_raw(raw: &str) -> String {
    normalize(raw).unwrap_or_else(|| raw.trim().to_string())
}

/// `+2348031234567` -> `08031234567`.
pub fn local_form(phone: &str) -> Option<String> {
    let canonical = normalize(phone)?;
    Some(format!("0{}", &canonical[4..]))
}

pub fn detect_network(phone: &str) -> Option<Network> {
    let local = local_form(phone)?;
    let prefix = local.get(..4)?;
    NETWORK_PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, network)| *network)
}

/// A number counts as a valid mobile recipient when it normalizes and its
/// prefix belongs to a known network.
pub fn is_valid_mobile(raw: &str) -> bool {
    detect_network(raw).is_some()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::local_eleven("08031234567", "+2348031234567")]
    #[case::with_country_code("2348031234567", "+2348031234567")]
    #[case::bare_ten("8031234567", "+2348031234567")]
    #[case::formatted("0803 123 4567", "+2348031234567")]
    #[case::already_canonical("+2348031234567", "+2348031234567")]
    fn normalizes_common_shapes(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize(raw).as_deref(), Some(expected));
    }

    #[rstest]
    #[case::too_short("080312")]
    #[case::twelve_digits("080312345678")]
    #[case::words("CBN-ALERT")]
    fn rejects_unparseable_numbers(#[case] raw: &str) {
        assert_eq!(normalize(raw), None);
    }

    #[rstest]
    #[case::mtn("08031234567", Network::Mtn)]
    #[case::glo("08051234567", Network::Glo)]
    #[case::airtel("07011234567", Network::Airtel)]
    #[case::nine_mobile("09091234567", Network::NineMobile)]
    fn infers_networks_from_prefixes(#[case] raw: &str, #[case] expected: Network) {
        assert_eq!(detect_network(raw), Some(expected));
    }

    #[test]
    fn unknown_prefix_is_not_a_valid_mobile() {
        assert!(!is_valid_mobile("07991234567"));
        assert!(is_valid_mobile("+2348031234567"));
    }
}
