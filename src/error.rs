//! Ledger Error Types
//!
//! One taxonomy for every ledger operation. Error codes are stable and meant
//! to be forwarded verbatim by whatever API layer sits on top.

use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

use crate::money::MoneyError;

/// Rolling window a cumulative limit applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitWindow {
    Daily,
    Monthly,
}

impl LimitWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitWindow::Daily => "DAILY",
            LimitWindow::Monthly => "MONTHLY",
        }
    }
}

impl fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Account {0} is locked")]
    AccountLocked(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    #[error("{window} transfer limit exceeded: limit {limit}, attempted total {attempted}")]
    LimitExceeded {
        window: LimitWindow,
        limit: Decimal,
        attempted: Decimal,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "VALIDATION_ERROR",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::Forbidden(_) => "FORBIDDEN",
            LedgerError::AccountLocked(_) => "ACCOUNT_LOCKED",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::LimitExceeded { .. } => "TRANSACTION_LIMIT_EXCEEDED",
            LedgerError::Conflict(_) => "CONFLICT",
            LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::Validation(_) => 400,
            LedgerError::Forbidden(_) => 403,
            LedgerError::NotFound(_) => 404,
            LedgerError::Conflict(_) => 409,
            LedgerError::AccountLocked(_)
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::LimitExceeded { .. } => 422,
            LedgerError::Internal(_) => 500,
        }
    }

    /// Conflicts are the only failures worth re-running the whole unit for
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict(_))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        LedgerError::Validation(msg.into())
    }
}

impl From<MoneyError> for LedgerError {
    fn from(e: MoneyError) -> Self {
        LedgerError::Validation(e.to_string())
    }
}

/// SQLSTATE codes that mean "run it again"
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e
            && let Some(code) = db_err.code()
        {
            match code.as_ref() {
                SERIALIZATION_FAILURE | DEADLOCK_DETECTED => {
                    return LedgerError::Conflict(format!("concurrent update: {}", db_err));
                }
                UNIQUE_VIOLATION => {
                    return LedgerError::Conflict(format!("duplicate write: {}", db_err));
                }
                _ => {}
            }
        }
        LedgerError::Internal(format!("database: {}", e))
    }
}
