//! Read-side query types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::error::LedgerError;
use crate::transfer::reference::ReferenceNumber;
use crate::transfer::state::TransactionStatus;
use crate::transfer::types::{Transaction, TransactionId, TransactionType};

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// Inclusive created-at range; open ends are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| at >= from) && self.to.is_none_or(|to| at <= to)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if let (Some(from), Some(to)) = (self.from, self.to)
            && from > to
        {
            return Err(LedgerError::validation("date range start is after its end"));
        }
        Ok(())
    }
}

/// Transaction list filter; every field narrows the result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Rows where the account is either side
    pub account_id: Option<AccountId>,
    pub tx_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
    #[serde(default)]
    pub created: DateRange,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
}

impl TransactionFilter {
    pub fn validate(&self) -> Result<(), LedgerError> {
        self.created.validate()?;
        if let Some(min) = self.min_amount
            && min.is_sign_negative()
        {
            return Err(LedgerError::validation("minimum amount must not be negative"));
        }
        if let (Some(min), Some(max)) = (self.min_amount, self.max_amount)
            && min > max
        {
            return Err(LedgerError::validation(
                "minimum amount is greater than maximum amount",
            ));
        }
        Ok(())
    }

    /// In-process evaluation of everything but ownership
    pub fn matches(&self, tx: &Transaction) -> bool {
        self.account_id.is_none_or(|a| tx.touches(a))
            && self.tx_type.is_none_or(|t| tx.tx_type == t)
            && self.status.is_none_or(|s| tx.status == s)
            && self.created.contains(tx.created_at)
            && self.min_amount.is_none_or(|min| tx.amount >= min)
            && self.max_amount.is_none_or(|max| tx.amount <= max)
    }
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self { page, per_page }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.page == 0 {
            return Err(LedgerError::validation("page numbers start at 1"));
        }
        if self.per_page == 0 || self.per_page > MAX_PER_PAGE {
            return Err(LedgerError::validation(format!(
                "per_page must be between 1 and {}",
                MAX_PER_PAGE
            )));
        }
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        (self.page.saturating_sub(1) as u64) * self.per_page as u64
    }
}

/// One page of results plus totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total: u64) -> Self {
        // Unvalidated zero page size: no pages
        let total_pages = match request.per_page {
            0 => 0,
            per_page => total.div_ceil(per_page as u64) as u32,
        };
        Self {
            items,
            page: request.page,
            per_page: request.per_page,
            total,
            total_pages,
        }
    }
}

/// One point of a reconstructed balance series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalancePoint {
    pub at: DateTime<Utc>,
    pub balance: Decimal,
    /// Transaction that produced this balance; `None` for the opening point
    pub transaction_id: Option<TransactionId>,
    pub reference: Option<ReferenceNumber>,
}

/// Money in/out over a range for one account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountSummary {
    pub account_id: AccountId,
    pub money_in: Decimal,
    pub money_out: Decimal,
    pub net: Decimal,
    pub transaction_count: u64,
}
