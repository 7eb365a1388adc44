//! Limit Policy
//!
//! Pure arithmetic over the owner's outgoing totals. The per-transaction
//! ceiling is a validation failure; daily and monthly ceilings are
//! `LimitExceeded` naming the breached window. Reaching a ceiling exactly is
//! allowed.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::LimitConfig;
use crate::error::{LedgerError, LimitWindow};
use crate::money::{format_amount, normalize_amount, to_minor_scale};

/// Outgoing totals already consumed in each window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowTotals {
    pub daily: Decimal,
    pub monthly: Decimal,
}

/// Start instants of the windows containing `now` (UTC calendar day / month)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStarts {
    pub day: DateTime<Utc>,
    pub month: DateTime<Utc>,
}

impl WindowStarts {
    pub fn containing(now: DateTime<Utc>) -> Self {
        let date = now.date_naive();
        let day = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
        // Day 1 always exists
        let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date);
        let month = Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN));
        Self { day, month }
    }
}

/// Remaining allowance snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimitUsage {
    pub per_transaction_max: Decimal,
    pub daily_used: Decimal,
    pub daily_remaining: Decimal,
    pub monthly_used: Decimal,
    pub monthly_remaining: Decimal,
}

/// Configured transfer ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub per_transaction_max: Decimal,
    pub daily_max: Decimal,
    pub monthly_max: Decimal,
}

impl LimitPolicy {
    pub fn new(per_transaction_max: Decimal, daily_max: Decimal, monthly_max: Decimal) -> Self {
        Self {
            per_transaction_max: to_minor_scale(per_transaction_max),
            daily_max: to_minor_scale(daily_max),
            monthly_max: to_minor_scale(monthly_max),
        }
    }

    /// Validate a candidate amount on its own and pin it to minor units
    pub fn check_amount(&self, amount: Decimal) -> Result<Decimal, LedgerError> {
        let amount = normalize_amount(amount)?;
        if amount > self.per_transaction_max {
            return Err(LedgerError::validation(format!(
                "amount {} exceeds the per-transaction limit of {}",
                format_amount(amount),
                format_amount(self.per_transaction_max)
            )));
        }
        Ok(amount)
    }

    /// Check `amount` on top of the totals already consumed
    pub fn check_cumulative(
        &self,
        totals: WindowTotals,
        amount: Decimal,
    ) -> Result<(), LedgerError> {
        let daily = totals.daily + amount;
        if daily > self.daily_max {
            return Err(LedgerError::LimitExceeded {
                window: LimitWindow::Daily,
                limit: self.daily_max,
                attempted: to_minor_scale(daily),
            });
        }

        let monthly = totals.monthly + amount;
        if monthly > self.monthly_max {
            return Err(LedgerError::LimitExceeded {
                window: LimitWindow::Monthly,
                limit: self.monthly_max,
                attempted: to_minor_scale(monthly),
            });
        }
        Ok(())
    }

    pub fn usage(&self, totals: WindowTotals) -> LimitUsage {
        let remaining =
            |max: Decimal, used: Decimal| to_minor_scale((max - used).max(Decimal::ZERO));
        LimitUsage {
            per_transaction_max: self.per_transaction_max,
            daily_used: to_minor_scale(totals.daily),
            daily_remaining: remaining(self.daily_max, totals.daily),
            monthly_used: to_minor_scale(totals.monthly),
            monthly_remaining: remaining(self.monthly_max, totals.monthly),
        }
    }
}

impl From<&LimitConfig> for LimitPolicy {
    fn from(config: &LimitConfig) -> Self {
        LimitPolicy::new(
            config.per_transaction_max,
            config.daily_max,
            config.monthly_max,
        )
    }
}
