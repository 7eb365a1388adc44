//! Transfer precondition rules
//!
//! Shared by the coordinator's fast pre-check and the stores' re-check inside
//! the atomic unit, so both layers reject with the same error kinds in the
//! same order: ownership, status, currency, funds.

use rust_decimal::Decimal;

use super::types::MAX_DESCRIPTION_LEN;
use crate::account::{Account, AccountId, UserId};
use crate::error::LedgerError;

pub fn ensure_distinct(from: AccountId, to: AccountId) -> Result<(), LedgerError> {
    if from == to {
        return Err(LedgerError::validation(
            "source and destination accounts must differ",
        ));
    }
    Ok(())
}

pub fn ensure_owned(account: &Account, user_id: UserId) -> Result<(), LedgerError> {
    if !account.is_owned_by(user_id) {
        return Err(LedgerError::Forbidden(format!(
            "account {} does not belong to user {}",
            account.id, user_id
        )));
    }
    Ok(())
}

pub fn ensure_active(account: &Account) -> Result<(), LedgerError> {
    if !account.status.can_transact() {
        return Err(LedgerError::AccountLocked(format!(
            "{} ({})",
            account.id, account.status
        )));
    }
    Ok(())
}

pub fn ensure_same_currency(from: &Account, to: &Account) -> Result<(), LedgerError> {
    if from.currency != to.currency {
        return Err(LedgerError::validation(format!(
            "currency mismatch: {} source, {} destination",
            from.currency, to.currency
        )));
    }
    Ok(())
}

pub fn ensure_funds(account: &Account, amount: Decimal) -> Result<(), LedgerError> {
    if account.available_balance < amount {
        return Err(LedgerError::InsufficientFunds {
            requested: amount,
            available: account.available_balance,
        });
    }
    Ok(())
}

/// Full account-pair check: `from` must belong to `sender`, `to` to `recipient`
pub fn check_pair(
    from: &Account,
    sender: UserId,
    to: &Account,
    recipient: UserId,
    amount: Decimal,
) -> Result<(), LedgerError> {
    ensure_owned(from, sender)?;
    ensure_owned(to, recipient)?;
    ensure_active(from)?;
    ensure_active(to)?;
    ensure_same_currency(from, to)?;
    ensure_funds(from, amount)
}

/// Trim free text; blank becomes `None`, overlong is a validation error
pub fn clean_text(field: &str, value: Option<String>) -> Result<Option<String>, LedgerError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if value.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(LedgerError::validation(format!(
            "{} longer than {} characters",
            field, MAX_DESCRIPTION_LEN
        )));
    }
    Ok(Some(value.to_string()))
}
