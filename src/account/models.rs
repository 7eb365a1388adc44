//! Data models for ledger accounts and directory contacts

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::money::{Currency, to_minor_scale};

pub type UserId = Uuid;
pub type AccountId = Uuid;

/// Account status
///
/// Status codes: 1=ACTIVE, 2=FROZEN, 3=RESTRICTED, 4=CLOSED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum AccountStatus {
    Active = 1,
    Frozen = 2,
    Restricted = 3,
    Closed = 4,
}

impl AccountStatus {
    /// Get numeric ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(AccountStatus::Active),
            2 => Some(AccountStatus::Frozen),
            3 => Some(AccountStatus::Restricted),
            4 => Some(AccountStatus::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Frozen => "FROZEN",
            AccountStatus::Restricted => "RESTRICTED",
            AccountStatus::Closed => "CLOSED",
        }
    }

    /// Only ACTIVE accounts may send or receive money
    #[inline]
    pub fn can_transact(&self) -> bool {
        matches!(self, AccountStatus::Active)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub owner_id: UserId,
    pub currency: Currency,
    pub status: AccountStatus,
    pub balance: Decimal,
    /// Portion of `balance` not provisionally held
    pub available_balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Open a new ACTIVE account with an opening balance
    pub fn open(owner_id: UserId, currency: Currency, opening_balance: Decimal) -> Self {
        let now = Utc::now();
        let balance = to_minor_scale(opening_balance);
        Self {
            id: Uuid::new_v4(),
            owner_id,
            currency,
            status: AccountStatus::Active,
            balance,
            available_balance: balance,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.owner_id == user_id
    }
}

/// Directory entry resolved from a contact identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: UserId,
    pub display_name: String,
    /// The identifier the user is reachable by (email)
    pub contact: String,
    pub default_account_id: Option<AccountId>,
}

/// Canonical form of a contact identifier used for lookups
pub fn normalize_contact(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_account_status_ids() {
        for status in [
            AccountStatus::Active,
            AccountStatus::Frozen,
            AccountStatus::Restricted,
            AccountStatus::Closed,
        ] {
            assert_eq!(AccountStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(AccountStatus::from_id(0), None);
        assert_eq!(AccountStatus::from_id(99), None);
    }

    #[test]
    fn test_only_active_can_transact() {
        assert!(AccountStatus::Active.can_transact());
        assert!(!AccountStatus::Frozen.can_transact());
        assert!(!AccountStatus::Restricted.can_transact());
        assert!(!AccountStatus::Closed.can_transact());
    }

    #[test]
    fn test_open_account_scales_balance() {
        let owner = Uuid::new_v4();
        let account = Account::open(owner, Currency::new("USD").unwrap(), dec!(500));
        assert_eq!(account.balance.to_string(), "500.00");
        assert_eq!(account.available_balance, account.balance);
        assert_eq!(account.status, AccountStatus::Active);
        assert!(account.is_owned_by(owner));
        assert!(!account.is_owned_by(Uuid::new_v4()));
    }

    #[test]
    fn test_normalize_contact() {
        assert_eq!(normalize_contact("  Alice@Example.COM "), "alice@example.com");
    }
}
