//! Transaction reference numbers
//!
//! Format: `<PREFIX><YYYYMMDD><16 Crockford base32 chars>`, e.g.
//! `TRF2026101901J9Z3K7W8Q2M4X5`. The suffix is the 80-bit random part of a
//! ULID; the store enforces uniqueness and a collision surfaces as a retryable
//! conflict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::TransactionType;

/// Unique human-readable reference of one transaction row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceNumber(String);

impl ReferenceNumber {
    /// Wrap a stored or client-supplied reference (trimmed, uppercased)
    pub fn from_raw(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stateless reference number source
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceGenerator;

impl ReferenceGenerator {
    /// Length of the ULID timestamp component
    const ULID_TIME_CHARS: usize = 10;

    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, tx_type: TransactionType, now: DateTime<Utc>) -> ReferenceNumber {
        let ulid = ulid::Ulid::new().to_string();
        ReferenceNumber(format!(
            "{}{}{}",
            tx_type.reference_prefix(),
            now.format("%Y%m%d"),
            &ulid[Self::ULID_TIME_CHARS..]
        ))
    }
}
