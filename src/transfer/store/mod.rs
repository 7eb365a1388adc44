//! Ledger Store
//!
//! The storage seam of the ledger. Each `apply_*` call is one atomic unit:
//! it locks the accounts involved, re-runs the precondition rules against the
//! locked state, then writes the Transaction rows and balance changes. An
//! error from inside the unit leaves no trace.
//!
//! Implementations:
//! - [`MemoryLedgerStore`]: single-process, one ledger mutex
//! - [`PgLedgerStore`]: PostgreSQL, SERIALIZABLE + `FOR UPDATE`

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;

use super::idempotency::IdempotencyKey;
use super::limits::{WindowStarts, WindowTotals};
use super::reference::ReferenceNumber;
use super::types::{
    PeerTransfer, PeerTransferId, PeerTransferPlan, Transaction, TransactionId, TransactionType,
    TransferPlan,
};
use crate::account::{Account, AccountId, UserId};
use crate::error::LedgerError;
use crate::history::{DateRange, Page, PageRequest, TransactionFilter};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError>;

    /// Prior row for (owner, type, key)
    async fn find_transaction_by_key(
        &self,
        owner_id: UserId,
        tx_type: TransactionType,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, LedgerError>;

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError>;

    async fn get_transaction_by_reference(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<Transaction>, LedgerError>;

    async fn get_peer_transfer(
        &self,
        id: PeerTransferId,
    ) -> Result<Option<PeerTransfer>, LedgerError>;

    /// Outgoing amounts counted toward the owner's limits since each window start
    async fn outgoing_totals(
        &self,
        owner_id: UserId,
        starts: WindowStarts,
    ) -> Result<WindowTotals, LedgerError>;

    /// Apply one internal transfer atomically; returns the COMPLETED row
    async fn apply_transfer(&self, plan: &TransferPlan) -> Result<Transaction, LedgerError>;

    /// Apply one P2P transfer atomically; returns the COMPLETED envelope
    async fn apply_peer_transfer(
        &self,
        plan: &PeerTransferPlan,
    ) -> Result<PeerTransfer, LedgerError>;

    /// The owner's rows matching `filter`, newest first
    async fn query_transactions(
        &self,
        owner_id: UserId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<Transaction>, LedgerError>;

    /// The owner's COMPLETED rows touching `account_id`, newest first
    async fn completed_transactions(
        &self,
        owner_id: UserId,
        account_id: AccountId,
        range: DateRange,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, LedgerError>;
}
