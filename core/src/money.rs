//! Decimal money handling for donation amounts.
//!
//! Amounts are always [`rust_decimal::Decimal`], never floats: every persisted
//! or published representation must survive a round trip without rounding
//! surprises. JSON inputs may carry the amount as either a number or a string;
//! both are parsed through the same path.

use crate::error::DomainError;
use rust_decimal::Decimal;

/// The only currency the pipeline settles in.
pub const CURRENCY_USD: &str = "USD";

/// Parse a donation amount from a raw JSON value.
///
/// Accepts JSON numbers (`42.5`) and numeric strings (`"42.5"`). The value
/// must parse as a decimal and be strictly positive.
///
/// Parsing goes through the decimal string representation rather than `f64`,
/// so amounts like `0.1` keep their exact value.
///
/// # Errors
///
/// Returns [`DomainError::InvalidRequest`] if the value is missing, not
/// numeric, or not strictly positive.
///
/// # Examples
///
/// ```
/// use fundflow_core::money::parse_amount;
/// use rust_decimal::Decimal;
/// use serde_json::json;
///
/// assert_eq!(parse_amount(&json!(400)).unwrap(), Decimal::new(400, 0));
/// assert_eq!(parse_amount(&json!("19.99")).unwrap(), Decimal::new(1999, 2));
/// assert!(parse_amount(&json!(0)).is_err());
/// assert!(parse_amount(&json!("abc")).is_err());
/// ```
pub fn parse_amount(value: &serde_json::Value) -> Result<Decimal, DomainError> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
        serde_json::Value::String(s) => s.trim().parse::<Decimal>().ok(),
        _ => None,
    };

    match parsed {
        Some(amount) if amount > Decimal::ZERO => Ok(amount),
        _ => Err(DomainError::InvalidRequest("invalid amount".to_string())),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn rejects_zero_and_negative() {
        assert!(parse_amount(&json!(0)).is_err());
        assert!(parse_amount(&json!(-5)).is_err());
        assert!(parse_amount(&json!("-0.01")).is_err());
    }

    #[test]
    fn rejects_non_numeric() {
        assert!(parse_amount(&json!(null)).is_err());
        assert!(parse_amount(&json!("ten dollars")).is_err());
        assert!(parse_amount(&json!([400])).is_err());
    }

    #[test]
    fn preserves_cents_exactly() {
        let amount = parse_amount(&json!(0.1)).unwrap();
        assert_eq!(amount, Decimal::new(1, 1));
    }

    proptest! {
        #[test]
        fn accepts_all_positive_cents(cents in 1_i64..=1_000_000_000) {
            let amount = Decimal::new(cents, 2);
            let parsed = parse_amount(&json!(amount.to_string())).unwrap();
            prop_assert_eq!(parsed, amount);
        }
    }
}
