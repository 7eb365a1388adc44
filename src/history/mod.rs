//! History / Query Service
//!
//! Read-only views over the ledger: filtered transaction pages, reconstructed
//! balance series, single-row lookups and per-account summaries. Every view is
//! scoped to the caller; touching someone else's account or row is
//! `Forbidden`.

pub mod query;

pub use query::{
    AccountSummary, BalancePoint, DateRange, Page, PageRequest, TransactionFilter,
    DEFAULT_PER_PAGE, MAX_PER_PAGE,
};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use crate::account::{Account, AccountId, UserId};
use crate::error::LedgerError;
use crate::money::to_minor_scale;
use crate::transfer::reference::ReferenceNumber;
use crate::transfer::store::LedgerStore;
use crate::transfer::types::{PeerTransfer, PeerTransferId, Transaction, TransactionId};

pub struct HistoryService {
    store: Arc<dyn LedgerStore>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// The caller's transactions matching `filter`, newest first
    pub async fn list_transactions(
        &self,
        owner_id: UserId,
        filter: TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<Transaction>, LedgerError> {
        page.validate()?;
        filter.validate()?;
        if let Some(account_id) = filter.account_id {
            self.owned_account(owner_id, account_id).await?;
        }
        self.store.query_transactions(owner_id, &filter, page).await
    }

    /// Balance series of one account, oldest first
    ///
    /// Walks COMPLETED rows backwards from the current balance, undoing each
    /// one. `limit` caps how many transactions are walked; the first point is
    /// the balance before the oldest one included.
    pub async fn balance_history(
        &self,
        owner_id: UserId,
        account_id: AccountId,
        limit: Option<usize>,
    ) -> Result<Vec<BalancePoint>, LedgerError> {
        if limit == Some(0) {
            return Err(LedgerError::validation("history limit must be at least 1"));
        }
        let account = self.owned_account(owner_id, account_id).await?;
        // One extra row tells a cut-off series from one that fits exactly
        let mut newest_first = self
            .store
            .completed_transactions(
                owner_id,
                account_id,
                DateRange::default(),
                limit.map(|l| l.saturating_add(1)),
            )
            .await?;
        let truncated = limit.is_some_and(|l| newest_first.len() > l);
        if let Some(l) = limit {
            newest_first.truncate(l);
        }

        if newest_first.is_empty() {
            return Ok(vec![BalancePoint {
                at: account.updated_at,
                balance: account.balance,
                transaction_id: None,
                reference: None,
            }]);
        }

        let mut balance = account.balance;
        let mut points = Vec::with_capacity(newest_first.len() + 1);
        for tx in &newest_first {
            points.push(BalancePoint {
                at: tx.completed_at.unwrap_or(tx.created_at),
                balance: to_minor_scale(balance),
                transaction_id: Some(tx.id),
                reference: Some(tx.reference.clone()),
            });
            balance -= tx.effect_on(account_id);
        }

        let opening_at = match newest_first.last() {
            Some(oldest) if truncated => oldest.created_at,
            _ => account.created_at,
        };
        points.push(BalancePoint {
            at: opening_at,
            balance: to_minor_scale(balance),
            transaction_id: None,
            reference: None,
        });
        points.reverse();

        debug!(
            account_id = %account_id,
            points = points.len(),
            "Balance history reconstructed"
        );
        Ok(points)
    }

    pub async fn get_transaction(
        &self,
        owner_id: UserId,
        id: TransactionId,
    ) -> Result<Transaction, LedgerError> {
        let tx = self
            .store
            .get_transaction(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", id)))?;
        Self::ensure_visible(owner_id, tx)
    }

    pub async fn get_transaction_by_reference(
        &self,
        owner_id: UserId,
        reference: &str,
    ) -> Result<Transaction, LedgerError> {
        let reference = ReferenceNumber::from_raw(reference);
        if reference.as_str().is_empty() {
            return Err(LedgerError::validation("reference number is required"));
        }
        let tx = self
            .store
            .get_transaction_by_reference(&reference)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", reference)))?;
        Self::ensure_visible(owner_id, tx)
    }

    /// Visible to sender and recipient only
    pub async fn get_peer_transfer(
        &self,
        user_id: UserId,
        id: PeerTransferId,
    ) -> Result<PeerTransfer, LedgerError> {
        let peer = self
            .store
            .get_peer_transfer(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("peer transfer {}", id)))?;
        if !peer.involves(user_id) {
            return Err(LedgerError::Forbidden(format!(
                "peer transfer {} does not involve user {}",
                id, user_id
            )));
        }
        Ok(peer)
    }

    /// Money in/out of one account over `[from, to]`, COMPLETED rows only
    pub async fn summarize(
        &self,
        owner_id: UserId,
        account_id: AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<AccountSummary, LedgerError> {
        let range = DateRange {
            from: Some(from),
            to: Some(to),
        };
        range.validate()?;
        self.owned_account(owner_id, account_id).await?;

        let rows = self
            .store
            .completed_transactions(owner_id, account_id, range, None)
            .await?;

        let (money_in, money_out) =
            rows.iter()
                .fold((Decimal::ZERO, Decimal::ZERO), |(inflow, outflow), tx| {
                    let effect = tx.effect_on(account_id);
                    if effect.is_sign_positive() {
                        (inflow + effect, outflow)
                    } else {
                        (inflow, outflow - effect)
                    }
                });

        Ok(AccountSummary {
            account_id,
            money_in: to_minor_scale(money_in),
            money_out: to_minor_scale(money_out),
            net: to_minor_scale(money_in - money_out),
            transaction_count: rows.len() as u64,
        })
    }

    async fn owned_account(
        &self,
        owner_id: UserId,
        account_id: AccountId,
    ) -> Result<Account, LedgerError> {
        let account = self
            .store
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", account_id)))?;
        if !account.is_owned_by(owner_id) {
            return Err(LedgerError::Forbidden(format!(
                "account {} does not belong to user {}",
                account_id, owner_id
            )));
        }
        Ok(account)
    }

    fn ensure_visible(owner_id: UserId, tx: Transaction) -> Result<Transaction, LedgerError> {
        if tx.owner_id != owner_id {
            return Err(LedgerError::Forbidden(format!(
                "transaction {} does not belong to user {}",
                tx.id, owner_id
            )));
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use crate::transfer::store::MemoryLedgerStore;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_untouched_account_has_single_point() {
        let store = Arc::new(MemoryLedgerStore::new());
        let owner = Uuid::new_v4();
        let account = Account::open(owner, Currency::new("USD").unwrap(), dec!(42.5));
        store.insert_account(account.clone()).await;

        let history = HistoryService::new(store);
        let points = history
            .balance_history(owner, account.id, None)
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].balance, dec!(42.50));
        assert_eq!(points[0].transaction_id, None);
    }

    #[tokio::test]
    async fn test_foreign_account_is_forbidden() {
        let store = Arc::new(MemoryLedgerStore::new());
        let owner = Uuid::new_v4();
        let account = Account::open(owner, Currency::new("USD").unwrap(), dec!(1));
        store.insert_account(account.clone()).await;

        let history = HistoryService::new(store);
        let stranger = Uuid::new_v4();
        assert!(matches!(
            history.balance_history(stranger, account.id, None).await,
            Err(LedgerError::Forbidden(_))
        ));
        let filter = TransactionFilter {
            account_id: Some(account.id),
            ..Default::default()
        };
        assert!(matches!(
            history
                .list_transactions(stranger, filter, PageRequest::default())
                .await,
            Err(LedgerError::Forbidden(_))
        ));
        assert!(matches!(
            history.balance_history(owner, Uuid::new_v4(), None).await,
            Err(LedgerError::NotFound(_))
        ));
        assert!(matches!(
            history.balance_history(owner, account.id, Some(0)).await,
            Err(LedgerError::Validation(_))
        ));
    }
}
