//! Money Conversion Module
//!
//! Amounts are `rust_decimal::Decimal` carried at exactly [`MINOR_UNITS`]
//! fractional digits. Every amount that enters the ledger MUST pass through
//! [`parse_amount`] (strings, e.g. configured limits) or [`normalize_amount`]
//! (typed request values).
//!
//! ## Design Principles
//! 1. Explicit Error Handling: no silent truncation or rounding
//! 2. Fixed scale: `150` and `150.0` both become `150.00`
//! 3. Type Safety: currencies are validated [`Currency`] codes, not raw strings
//!
//! ## Usage
//! ```rust
//! use bank_ledger::money::{parse_amount, format_amount};
//!
//! let amount = parse_amount("150.5").unwrap();
//! assert_eq!(format_amount(amount), "150.50");
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fractional digits carried by every ledger amount.
pub const MINOR_UNITS: u32 = 2;

/// Largest whole part representable by a `NUMERIC(20,2)` column.
const MAX_WHOLE: u64 = 999_999_999_999_999_999;

// ============================================================================
// Error Types
// ============================================================================

/// Money conversion errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid currency code: {0}")]
    InvalidCurrency(String),
}

// ============================================================================
// Parse: Client → Ledger
// ============================================================================

/// Convert a client string amount to a ledger amount
///
/// # Errors
/// * `PrecisionOverflow` - more than two fractional digits
/// * `InvalidAmount` - zero or signed input
/// * `Overflow` - larger than the storage column allows
/// * `InvalidFormat` - anything that is not plain `digits[.digits]`
pub fn parse_amount(amount_str: &str) -> Result<Decimal, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let parts: Vec<&str> = amount_str.split('.').collect();
    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => {
            // Both sides of the dot must be present: ".5" and "5." are ambiguous
            if parts[0].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (e.g., use 0.5 instead of .5)".into(),
                ));
            }
            if parts[1].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (e.g., use 5.0 instead of 5.)".into(),
                ));
            }
            (parts[0], parts[1])
        }
        _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
    };

    if !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "invalid character in whole part: {}",
            whole
        )));
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat("invalid fractional part".into()));
    }

    // Reject instead of truncating
    if frac.len() > MINOR_UNITS as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: MINOR_UNITS,
        });
    }

    let whole_num: u64 = whole.parse::<u64>().map_err(|_| MoneyError::Overflow)?;
    if whole_num > MAX_WHOLE {
        return Err(MoneyError::Overflow);
    }

    let frac_num: u64 = if frac.is_empty() {
        0
    } else {
        let frac_padded = format!("{:0<width$}", frac, width = MINOR_UNITS as usize);
        frac_padded
            .parse::<u64>()
            .map_err(|_| MoneyError::InvalidFormat("invalid fractional part".into()))?
    };

    let minor = (whole_num as i128) * 10i128.pow(MINOR_UNITS) + frac_num as i128;
    if minor == 0 {
        return Err(MoneyError::InvalidAmount);
    }

    Ok(Decimal::from_i128_with_scale(minor, MINOR_UNITS))
}

/// Validate a typed amount and pin it to [`MINOR_UNITS`]
///
/// Trailing zeros beyond the minor units are accepted (`1.500` → `1.50`),
/// significant digits beyond them are not.
pub fn normalize_amount(amount: Decimal) -> Result<Decimal, MoneyError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }

    let trimmed = amount.normalize();
    if trimmed.scale() > MINOR_UNITS {
        return Err(MoneyError::PrecisionOverflow {
            provided: trimmed.scale(),
            max: MINOR_UNITS,
        });
    }

    if trimmed.trunc() > Decimal::from(MAX_WHOLE) {
        return Err(MoneyError::Overflow);
    }

    Ok(to_minor_scale(trimmed))
}

/// Pin any exact value (balances, totals) to [`MINOR_UNITS`] without validation
pub fn to_minor_scale(value: Decimal) -> Decimal {
    let mut value = value;
    value.rescale(MINOR_UNITS);
    value
}

/// Serde adapter: a quoted amount string checked by [`parse_amount`]
pub fn deserialize_amount<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_amount(&raw)
        .map_err(|e| serde::de::Error::custom(format!("invalid amount '{}': {}", raw, e)))
}

// ============================================================================
// Format: Ledger → Client
// ============================================================================

/// Render an amount with exactly two fractional digits (`"150.00"`)
pub fn format_amount(value: Decimal) -> String {
    format!("{:.prec$}", value, prec = MINOR_UNITS as usize)
}

// ============================================================================
// Currency
// ============================================================================

/// ISO-4217 style three-letter currency code (always uppercase)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self, MoneyError> {
        let code = code.trim();
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
