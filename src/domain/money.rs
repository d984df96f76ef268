//! Minor-unit money arithmetic.
//!
//! Amounts are stored as `i64` cents. FX rates and fee percentages are
//! `BigDecimal` so that conversions only round once, at the end.

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use std::str::FromStr;

/// Rounds to the nearest integer, halves away from zero.
pub fn round_half_away(value: &BigDecimal) -> i64 {
    let truncated = value.with_scale(0);
    let remainder = value - &truncated;
    let half = BigDecimal::from(1) / BigDecimal::from(2);

    let rounded = if remainder.abs() >= half {
        if value < &BigDecimal::zero() {
            truncated - BigDecimal::from(1)
        } else {
            truncated + BigDecimal::from(1)
        }
    } else {
        truncated
    };

    rounded.to_i64().unwrap_or(if value < &BigDecimal::zero() {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// `amount * percent / 100`, rounded.
pub fn percent_of(amount: i64, percent: &BigDecimal) -> i64 {
    round_half_away(&(BigDecimal::from(amount) * percent / BigDecimal::from(100)))
}

/// Converts an amount in the transaction currency to the host currency.
pub fn to_host(amount: i64, fx_rate: &BigDecimal) -> i64 {
    round_half_away(&(BigDecimal::from(amount) * fx_rate))
}

/// Converts an amount in the host currency back to the transaction currency.
pub fn from_host(amount_in_host: i64, fx_rate: &BigDecimal) -> i64 {
    if fx_rate.is_zero() {
        return 0;
    }
    round_half_away(&(BigDecimal::from(amount_in_host) / fx_rate))
}

/// Parses a major-unit decimal string such as `"12.34"` into cents.
pub fn from_decimal_str(value: &str) -> Option<i64> {
    let parsed = BigDecimal::from_str(value.trim()).ok()?;
    Some(round_half_away(&(parsed * BigDecimal::from(100))))
}

/// Formats cents as a major-unit string, e.g. `1050` -> `"10.50"`.
pub fn format_cents(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

pub fn is_valid_percent(percent: &BigDecimal) -> bool {
    percent >= &BigDecimal::zero() && percent <= &BigDecimal::from(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_half_away(&dec("2.5")), 3);
        assert_eq!(round_half_away(&dec("2.49")), 2);
        assert_eq!(round_half_away(&dec("-2.5")), -3);
        assert_eq!(round_half_away(&dec("-2.4")), -2);
        assert_eq!(round_half_away(&dec("0")), 0);
    }

    #[test]
    fn computes_percentages() {
        assert_eq!(percent_of(10000, &dec("10")), 1000);
        assert_eq!(percent_of(999, &dec("5")), 50);
        assert_eq!(percent_of(1000, &dec("0")), 0);
        assert_eq!(percent_of(1250, &dec("2.9")), 36);
    }

    #[test]
    fn converts_between_currencies() {
        assert_eq!(to_host(1000, &dec("1.1")), 1100);
        assert_eq!(from_host(1100, &dec("1.1")), 1000);
        assert_eq!(from_host(1100, &dec("0")), 0);
    }

    #[test]
    fn parses_provider_decimals() {
        assert_eq!(from_decimal_str("12.34"), Some(1234));
        assert_eq!(from_decimal_str(" 0.5 "), Some(50));
        assert_eq!(from_decimal_str("abc"), None);
    }

    #[test]
    fn formats_cents() {
        assert_eq!(format_cents(1050), "10.50");
        assert_eq!(format_cents(-5), "-0.05");
        assert_eq!(format_cents(0), "0.00");
    }

    #[test]
    fn validates_percent_range() {
        assert!(is_valid_percent(&dec("0")));
        assert!(is_valid_percent(&dec("100")));
        assert!(!is_valid_percent(&dec("100.01")));
        assert!(!is_valid_percent(&dec("-1")));
    }
}
