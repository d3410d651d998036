//! Atomic amounts and display helpers.

/// Amount in atomic units. Signed so that fee arithmetic
/// (`inputs - outputs`) stays total.
pub type Amount = i64;

/// Atomic units per coin (10^8).
pub const COIN: Amount = 100_000_000;

/// Number of decimal places for display.
pub const DISPLAY_DECIMAL_POINT: u32 = 8;

/// Render an atomic amount as a decimal coin string, e.g. `0.01001`.
///
/// Trailing fractional zeros are dropped, but at least one fractional
/// digit is always shown (`3.0`, not `3`).
pub fn format_amount(atomic: Amount) -> String {
    // Pad to one digit more than the fractional width so the string always
    // splits into a nonempty integer part and a full fractional part.
    let places = DISPLAY_DECIMAL_POINT as usize;
    let digits = format!("{:0width$}", atomic.unsigned_abs(), width = places + 1);
    let (int_part, dec_part) = digits.split_at(digits.len() - places);

    let dec_shown = match dec_part.trim_end_matches('0') {
        "" => "0",
        trimmed => trimmed,
    };
    let sign = if atomic < 0 { "-" } else { "" };
    format!("{}{}.{}", sign, int_part, dec_shown)
}

/// Parse a decimal coin string into atomic units.
///
/// Accepts an optional leading `-` and at most [`DISPLAY_DECIMAL_POINT`]
/// fractional digits; anything else is rejected.
pub fn parse_amount(text: &str) -> Option<Amount> {
    let text = text.trim();
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let mut pieces = unsigned.splitn(2, '.');
    let int_part = pieces.next()?;
    let dec_part = pieces.next().unwrap_or("");
    if int_part.is_empty()
        || dec_part.len() > DISPLAY_DECIMAL_POINT as usize
        || !dec_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let mut atomic = int_part.parse::<Amount>().ok()?.checked_mul(COIN)?;
    if !dec_part.is_empty() {
        // Scale the fractional digits up to the full decimal width.
        let scale = Amount::pow(10, DISPLAY_DECIMAL_POINT - dec_part.len() as u32);
        let frac_atomic = dec_part.parse::<Amount>().ok()?.checked_mul(scale)?;
        atomic = atomic.checked_add(frac_atomic)?;
    }

    Some(if negative { -atomic } else { atomic })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(0), "0.0");
        assert_eq!(format_amount(42), "0.00000042");
        assert_eq!(format_amount(1_001_000), "0.01001");
        assert_eq!(format_amount(2_500_000_000), "25.0");
        assert_eq!(format_amount(3 * COIN + 70), "3.0000007");
        assert_eq!(format_amount(-10_010_000), "-0.1001");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("25"), Some(2_500_000_000));
        assert_eq!(parse_amount("0.01001"), Some(1_001_000));
        assert_eq!(parse_amount("10.01"), Some(1_001_000_000));
        assert_eq!(parse_amount("3."), Some(3 * COIN));
        assert_eq!(parse_amount("-0.1001"), Some(-10_010_000));
        assert_eq!(parse_amount(" 7 "), Some(7 * COIN));
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("."), None);
        assert_eq!(parse_amount(".5"), None);
        assert_eq!(parse_amount("coins"), None);
        assert_eq!(parse_amount("1.2.3"), None);
        // Nine fractional digits is one too many.
        assert_eq!(parse_amount("1.000000001"), None);
    }

    #[test]
    fn test_roundtrip() {
        for v in [
            0,
            1,
            1_001_000,
            10_010_000,
            100_100_000,
            1_001_000_000,
            -42,
            17 * COIN,
        ] {
            assert_eq!(parse_amount(&format_amount(v)), Some(v));
        }
    }
}
