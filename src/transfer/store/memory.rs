//! In-process ledger store
//!
//! The whole ledger sits behind one tokio mutex, which makes every atomic
//! unit trivially serializable. Writes are staged on copies and applied only
//! after every check passed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::LedgerStore;
use crate::account::{Account, AccountId, UserId};
use crate::error::LedgerError;
use crate::history::{DateRange, Page, PageRequest, TransactionFilter};
use crate::transfer::idempotency::IdempotencyKey;
use crate::transfer::limits::{WindowStarts, WindowTotals};
use crate::transfer::reference::ReferenceNumber;
use crate::transfer::rules;
use crate::transfer::state::{PeerTransferStatus, TransactionStatus};
use crate::transfer::types::{
    PeerTransfer, PeerTransferId, PeerTransferPlan, Transaction, TransactionId, TransactionMetadata,
    TransactionType, TransferPlan,
};

type KeySlot = (UserId, TransactionType, String);

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    /// Commit order
    transactions: Vec<Transaction>,
    by_id: HashMap<TransactionId, usize>,
    by_reference: HashMap<String, usize>,
    by_key: HashMap<KeySlot, usize>,
    peer_transfers: HashMap<PeerTransferId, PeerTransfer>,
}

impl LedgerState {
    fn account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", id)))
    }

    fn outgoing_totals(&self, owner_id: UserId, starts: WindowStarts) -> WindowTotals {
        let mut totals = WindowTotals::default();
        for tx in &self.transactions {
            if tx.owner_id != owner_id
                || !tx.status.counts_toward_limits()
                || tx.created_at < starts.month
            {
                continue;
            }
            let sent_from_own = self
                .accounts
                .get(&tx.from_account_id)
                .is_some_and(|a| a.is_owned_by(owner_id));
            if !sent_from_own {
                continue;
            }
            totals.monthly += tx.amount;
            if tx.created_at >= starts.day {
                totals.daily += tx.amount;
            }
        }
        totals
    }

    fn ensure_unused(
        &self,
        owner_id: UserId,
        tx_type: TransactionType,
        key: Option<&IdempotencyKey>,
        references: &[&ReferenceNumber],
    ) -> Result<(), LedgerError> {
        if let Some(key) = key
            && self
                .by_key
                .contains_key(&(owner_id, tx_type, key.as_str().to_string()))
        {
            return Err(LedgerError::Conflict(format!(
                "idempotency key {} already used",
                key
            )));
        }
        for reference in references {
            if self.by_reference.contains_key(reference.as_str()) {
                return Err(LedgerError::Conflict(format!(
                    "reference {} already exists",
                    reference
                )));
            }
        }
        Ok(())
    }

    fn push(&mut self, tx: Transaction) {
        let idx = self.transactions.len();
        self.by_id.insert(tx.id, idx);
        self.by_reference.insert(tx.reference.as_str().to_string(), idx);
        if let Some(key) = &tx.idempotency_key {
            self.by_key
                .insert((tx.owner_id, tx.tx_type, key.as_str().to_string()), idx);
        }
        self.transactions.push(tx);
    }
}

/// Debit `from` and credit `to` on staged copies
fn move_funds(from: &mut Account, to: &mut Account, amount: Decimal, now: DateTime<Utc>) {
    from.balance -= amount;
    from.available_balance -= amount;
    from.updated_at = now;
    to.balance += amount;
    to.available_balance += amount;
    to.updated_at = now;
}

/// A freshly written row, PROCESSING until the unit completes it
#[allow(clippy::too_many_arguments)]
fn processing_row(
    owner_id: UserId,
    from: &Account,
    to: &Account,
    tx_type: TransactionType,
    amount: Decimal,
    description: Option<String>,
    reference: ReferenceNumber,
    idempotency_key: Option<IdempotencyKey>,
    metadata: TransactionMetadata,
    now: DateTime<Utc>,
) -> Transaction {
    Transaction {
        id: Uuid::new_v4(),
        owner_id,
        from_account_id: from.id,
        to_account_id: to.id,
        tx_type,
        amount,
        currency: from.currency.clone(),
        status: TransactionStatus::Processing,
        description,
        reference,
        idempotency_key,
        metadata,
        created_at: now,
        updated_at: now,
        completed_at: None,
    }
}

fn complete(tx: &mut Transaction, now: DateTime<Utc>) {
    tx.status = TransactionStatus::Completed;
    tx.updated_at = now;
    tx.completed_at = Some(now);
}

/// In-memory [`LedgerStore`]
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<LedgerState>,
    injected_conflicts: AtomicUsize,
    fail_writes: AtomicBool,
    apply_count: AtomicUsize,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or overwrite an account
    pub async fn insert_account(&self, account: Account) {
        self.state.lock().await.accounts.insert(account.id, account);
    }

    /// Make the next `n` atomic units abort with `Conflict`
    pub fn inject_conflicts(&self, n: usize) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Make every atomic unit fail as if the store were unreachable
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of atomic units attempted (including aborted ones)
    pub fn apply_count(&self) -> usize {
        self.apply_count.load(Ordering::SeqCst)
    }

    pub async fn transaction_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }

    pub async fn peer_transfer_count(&self) -> usize {
        self.state.lock().await.peer_transfers.len()
    }

    fn enter_unit(&self) -> Result<(), LedgerError> {
        self.apply_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Internal("ledger store unavailable".to_string()));
        }
        let injected = self
            .injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(LedgerError::Conflict(
                "injected serialization failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn find_transaction_by_key(
        &self,
        owner_id: UserId,
        tx_type: TransactionType,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .by_key
            .get(&(owner_id, tx_type, key.as_str().to_string()))
            .map(|&idx| state.transactions[idx].clone()))
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .by_id
            .get(&id)
            .map(|&idx| state.transactions[idx].clone()))
    }

    async fn get_transaction_by_reference(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<Transaction>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .by_reference
            .get(reference.as_str())
            .map(|&idx| state.transactions[idx].clone()))
    }

    async fn get_peer_transfer(
        &self,
        id: PeerTransferId,
    ) -> Result<Option<PeerTransfer>, LedgerError> {
        Ok(self.state.lock().await.peer_transfers.get(&id).cloned())
    }

    async fn outgoing_totals(
        &self,
        owner_id: UserId,
        starts: WindowStarts,
    ) -> Result<WindowTotals, LedgerError> {
        Ok(self.state.lock().await.outgoing_totals(owner_id, starts))
    }

    async fn apply_transfer(&self, plan: &TransferPlan) -> Result<Transaction, LedgerError> {
        self.enter_unit()?;
        let mut state = self.state.lock().await;

        rules::ensure_distinct(plan.from_account_id, plan.to_account_id)?;
        let mut from = state.account(plan.from_account_id)?;
        let mut to = state.account(plan.to_account_id)?;
        rules::check_pair(&from, plan.owner_id, &to, plan.owner_id, plan.amount)?;

        let totals =
            state.outgoing_totals(plan.owner_id, WindowStarts::containing(plan.requested_at));
        plan.limits.check_cumulative(totals, plan.amount)?;

        state.ensure_unused(
            plan.owner_id,
            TransactionType::Transfer,
            plan.idempotency_key.as_ref(),
            &[&plan.reference],
        )?;

        let now = Utc::now();
        let mut tx = processing_row(
            plan.owner_id,
            &from,
            &to,
            TransactionType::Transfer,
            plan.amount,
            plan.description.clone(),
            plan.reference.clone(),
            plan.idempotency_key.clone(),
            TransactionMetadata::Internal,
            now,
        );
        move_funds(&mut from, &mut to, plan.amount, now);
        complete(&mut tx, now);

        state.accounts.insert(from.id, from);
        state.accounts.insert(to.id, to);
        state.push(tx.clone());

        debug!(
            transaction_id = %tx.id,
            reference = %tx.reference,
            "memory store: transfer applied"
        );
        Ok(tx)
    }

    async fn apply_peer_transfer(
        &self,
        plan: &PeerTransferPlan,
    ) -> Result<PeerTransfer, LedgerError> {
        self.enter_unit()?;
        let mut state = self.state.lock().await;

        rules::ensure_distinct(plan.from_account_id, plan.to_account_id)?;
        let mut from = state.account(plan.from_account_id)?;
        let mut to = state.account(plan.to_account_id)?;
        rules::check_pair(
            &from,
            plan.sender.user_id,
            &to,
            plan.recipient.user_id,
            plan.amount,
        )?;

        let totals = state.outgoing_totals(
            plan.sender.user_id,
            WindowStarts::containing(plan.requested_at),
        );
        plan.limits.check_cumulative(totals, plan.amount)?;

        state.ensure_unused(
            plan.sender.user_id,
            TransactionType::P2pTransfer,
            plan.idempotency_key.as_ref(),
            &[&plan.sender_reference, &plan.recipient_reference],
        )?;
        if plan.sender_reference == plan.recipient_reference {
            return Err(LedgerError::Conflict(format!(
                "reference {} generated twice",
                plan.sender_reference
            )));
        }

        let now = Utc::now();
        let mut sent = processing_row(
            plan.sender.user_id,
            &from,
            &to,
            TransactionType::P2pTransfer,
            plan.amount,
            plan.memo.clone(),
            plan.sender_reference.clone(),
            plan.idempotency_key.clone(),
            plan.sender_metadata(),
            now,
        );
        let mut received = processing_row(
            plan.recipient.user_id,
            &from,
            &to,
            TransactionType::P2pTransfer,
            plan.amount,
            plan.memo.clone(),
            plan.recipient_reference.clone(),
            None,
            plan.recipient_metadata(),
            now,
        );
        let mut peer = PeerTransfer {
            id: plan.peer_transfer_id,
            sender_id: plan.sender.user_id,
            recipient_id: plan.recipient.user_id,
            from_account_id: from.id,
            to_account_id: to.id,
            amount: plan.amount,
            currency: from.currency.clone(),
            memo: plan.memo.clone(),
            status: PeerTransferStatus::Pending,
            sender_transaction_id: sent.id,
            recipient_transaction_id: received.id,
            created_at: now,
            completed_at: None,
        };

        move_funds(&mut from, &mut to, plan.amount, now);
        complete(&mut sent, now);
        complete(&mut received, now);
        peer.status = PeerTransferStatus::Completed;
        peer.completed_at = Some(now);

        state.accounts.insert(from.id, from);
        state.accounts.insert(to.id, to);
        state.push(sent);
        state.push(received);
        state.peer_transfers.insert(peer.id, peer.clone());

        debug!(peer_transfer_id = %peer.id, "memory store: peer transfer applied");
        Ok(peer)
    }

    async fn query_transactions(
        &self,
        owner_id: UserId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<Transaction>, LedgerError> {
        page.validate()?;
        filter.validate()?;

        let state = self.state.lock().await;
        let matching: Vec<&Transaction> = state
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.owner_id == owner_id && filter.matches(tx))
            .collect();

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .cloned()
            .collect();
        Ok(Page::new(items, page, total))
    }

    async fn completed_transactions(
        &self,
        owner_id: UserId,
        account_id: AccountId,
        range: DateRange,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .filter(|tx| {
                tx.owner_id == owner_id
                    && tx.status == TransactionStatus::Completed
                    && tx.touches(account_id)
                    && range.contains(tx.created_at)
            })
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}
