//! Transfer Coordinator
//!
//! Orchestrates internal and P2P transfers:
//! idempotency check → fast validation → reference → store's atomic unit →
//! best-effort audit. Store conflicts re-run the whole sequence, including the
//! idempotency check, so a lost race on the same key returns the winner.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::audit::{AuditAction, AuditEntry, AuditSink, AuditStatus, record_best_effort};
use super::idempotency::{IdempotencyGuard, IdempotencyKey};
use super::limits::{LimitPolicy, LimitUsage, WindowStarts};
use super::reference::ReferenceGenerator;
use super::rules;
use super::store::LedgerStore;
use super::types::{
    InternalTransferRequest, P2pTransferRequest, Party, PeerTransfer, PeerTransferPlan,
    Transaction, TransactionType, TransferPlan,
};
use crate::account::{Account, AccountId, UserDirectory, UserId, normalize_contact};
use crate::config::TransferConfig;
use crate::error::LedgerError;

/// Result of one coordinator run
enum Outcome<T> {
    /// Freshly committed by this call
    Applied(T),
    /// Returned from a prior call with the same idempotency key
    Replayed(T),
}

/// Transfer Coordinator - entry point for every money movement
pub struct TransferCoordinator {
    store: Arc<dyn LedgerStore>,
    directory: Arc<dyn UserDirectory>,
    audit: Arc<dyn AuditSink>,
    idempotency: IdempotencyGuard,
    limits: LimitPolicy,
    references: ReferenceGenerator,
    config: TransferConfig,
}

impl TransferCoordinator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        directory: Arc<dyn UserDirectory>,
        audit: Arc<dyn AuditSink>,
        limits: LimitPolicy,
        config: TransferConfig,
    ) -> Self {
        Self {
            idempotency: IdempotencyGuard::new(store.clone()),
            store,
            directory,
            audit,
            limits,
            references: ReferenceGenerator::new(),
            config,
        }
    }

    pub fn limits(&self) -> &LimitPolicy {
        &self.limits
    }

    // ========================================================================
    // Internal transfer
    // ========================================================================

    /// Move money between two accounts of the same owner
    pub async fn internal_transfer(
        &self,
        req: InternalTransferRequest,
    ) -> Result<Transaction, LedgerError> {
        match self.run_internal(&req).await {
            Ok(Outcome::Applied(tx)) => {
                info!(
                    transaction_id = %tx.id,
                    reference = %tx.reference,
                    owner_id = %tx.owner_id,
                    amount = %tx.amount,
                    "✅ TRANSFER COMPLETED"
                );
                self.audit_success(
                    tx.owner_id,
                    AuditAction::InternalTransfer,
                    "transaction",
                    tx.id.to_string(),
                    json!({
                        "reference": tx.reference,
                        "amount": tx.amount,
                        "currency": tx.currency,
                        "from_account_id": tx.from_account_id,
                        "to_account_id": tx.to_account_id,
                    }),
                )
                .await;
                Ok(tx)
            }
            Ok(Outcome::Replayed(tx)) => Ok(tx),
            Err(e) => {
                warn!(
                    owner_id = %req.owner_id,
                    from_account_id = %req.from_account_id,
                    to_account_id = %req.to_account_id,
                    code = e.code(),
                    error = %e,
                    "Transfer rejected"
                );
                self.audit_failure(
                    req.owner_id,
                    AuditAction::InternalTransfer,
                    "transaction",
                    &e,
                    json!({
                        "amount": req.amount,
                        "from_account_id": req.from_account_id,
                        "to_account_id": req.to_account_id,
                        "idempotency_key": req.idempotency_key,
                    }),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn run_internal(
        &self,
        req: &InternalTransferRequest,
    ) -> Result<Outcome<Transaction>, LedgerError> {
        let key = IdempotencyKey::parse_optional(req.idempotency_key.as_deref())?;
        let mut attempt = 0;

        loop {
            if let Some(existing) = self
                .idempotency
                .check(req.owner_id, TransactionType::Transfer, key.as_ref())
                .await?
            {
                return Ok(Outcome::Replayed(existing));
            }

            let plan = self.plan_internal(req, key.clone()).await?;
            match self.store.apply_transfer(&plan).await {
                Ok(tx) => return Ok(Outcome::Applied(tx)),
                Err(e) => self.retry_or_fail(e, &mut attempt).await?,
            }
        }
    }

    async fn plan_internal(
        &self,
        req: &InternalTransferRequest,
        key: Option<IdempotencyKey>,
    ) -> Result<TransferPlan, LedgerError> {
        let description = rules::clean_text("description", req.description.clone())?;
        let amount = self.limits.check_amount(req.amount)?;
        rules::ensure_distinct(req.from_account_id, req.to_account_id)?;

        let from = self.load_account(req.from_account_id).await?;
        let to = self.load_account(req.to_account_id).await?;
        rules::check_pair(&from, req.owner_id, &to, req.owner_id, amount)?;

        let now = Utc::now();
        self.check_window_limits(req.owner_id, amount, now).await?;

        Ok(TransferPlan {
            owner_id: req.owner_id,
            from_account_id: from.id,
            to_account_id: to.id,
            amount,
            description,
            idempotency_key: key,
            reference: self.references.generate(TransactionType::Transfer, now),
            limits: self.limits,
            requested_at: now,
        })
    }

    // ========================================================================
    // P2P transfer
    // ========================================================================

    /// Send money to another customer identified by contact
    pub async fn p2p_transfer(&self, req: P2pTransferRequest) -> Result<PeerTransfer, LedgerError> {
        match self.run_p2p(&req).await {
            Ok(Outcome::Applied(peer)) => {
                info!(
                    peer_transfer_id = %peer.id,
                    sender_id = %peer.sender_id,
                    recipient_id = %peer.recipient_id,
                    amount = %peer.amount,
                    "✅ P2P TRANSFER COMPLETED"
                );
                self.audit_success(
                    peer.sender_id,
                    AuditAction::P2pTransfer,
                    "peer_transfer",
                    peer.id.to_string(),
                    json!({
                        "recipient_id": peer.recipient_id,
                        "amount": peer.amount,
                        "currency": peer.currency,
                        "from_account_id": peer.from_account_id,
                        "sender_transaction_id": peer.sender_transaction_id,
                        "recipient_transaction_id": peer.recipient_transaction_id,
                    }),
                )
                .await;
                Ok(peer)
            }
            Ok(Outcome::Replayed(peer)) => Ok(peer),
            Err(e) => {
                warn!(
                    sender_id = %req.sender_id,
                    from_account_id = %req.from_account_id,
                    code = e.code(),
                    error = %e,
                    "P2P transfer rejected"
                );
                self.audit_failure(
                    req.sender_id,
                    AuditAction::P2pTransfer,
                    "peer_transfer",
                    &e,
                    json!({
                        "amount": req.amount,
                        "from_account_id": req.from_account_id,
                        "recipient_contact": req.recipient_contact,
                        "idempotency_key": req.idempotency_key,
                    }),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn run_p2p(
        &self,
        req: &P2pTransferRequest,
    ) -> Result<Outcome<PeerTransfer>, LedgerError> {
        let key = IdempotencyKey::parse_optional(req.idempotency_key.as_deref())?;
        let mut attempt = 0;

        loop {
            if let Some(existing) = self
                .idempotency
                .check_peer(req.sender_id, key.as_ref())
                .await?
            {
                return Ok(Outcome::Replayed(existing));
            }

            let plan = self.plan_p2p(req, key.clone()).await?;
            match self.store.apply_peer_transfer(&plan).await {
                Ok(peer) => return Ok(Outcome::Applied(peer)),
                Err(e) => self.retry_or_fail(e, &mut attempt).await?,
            }
        }
    }

    async fn plan_p2p(
        &self,
        req: &P2pTransferRequest,
        key: Option<IdempotencyKey>,
    ) -> Result<PeerTransferPlan, LedgerError> {
        let memo = rules::clean_text("memo", req.memo.clone())?;
        let amount = self.limits.check_amount(req.amount)?;

        let contact = normalize_contact(&req.recipient_contact);
        if contact.is_empty() {
            return Err(LedgerError::validation("recipient contact is required"));
        }

        let recipient = self
            .directory
            .find_by_contact(&contact)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("recipient {}", contact)))?;
        if recipient.user_id == req.sender_id {
            return Err(LedgerError::validation("cannot send money to yourself"));
        }
        let to_account_id = recipient.default_account_id.ok_or_else(|| {
            LedgerError::NotFound(format!("default account of recipient {}", contact))
        })?;

        let sender = self
            .directory
            .find_by_id(req.sender_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("user {}", req.sender_id)))?;

        rules::ensure_distinct(req.from_account_id, to_account_id)?;
        let from = self.load_account(req.from_account_id).await?;
        let to = self.load_account(to_account_id).await?;
        rules::check_pair(&from, req.sender_id, &to, recipient.user_id, amount)?;

        let now = Utc::now();
        self.check_window_limits(req.sender_id, amount, now).await?;

        Ok(PeerTransferPlan {
            peer_transfer_id: uuid::Uuid::new_v4(),
            sender: Party {
                user_id: sender.user_id,
                display_name: sender.display_name,
                contact: sender.contact,
            },
            recipient: Party {
                user_id: recipient.user_id,
                display_name: recipient.display_name,
                contact: recipient.contact,
            },
            from_account_id: from.id,
            to_account_id: to.id,
            amount,
            memo,
            idempotency_key: key,
            sender_reference: self.references.generate(TransactionType::P2pTransfer, now),
            recipient_reference: self.references.generate(TransactionType::P2pTransfer, now),
            limits: self.limits,
            requested_at: now,
        })
    }

    // ========================================================================
    // Limits
    // ========================================================================

    /// Current consumption and remaining allowance of the owner's limits
    pub async fn limit_usage(&self, owner_id: UserId) -> Result<LimitUsage, LedgerError> {
        let totals = self
            .store
            .outgoing_totals(owner_id, WindowStarts::containing(Utc::now()))
            .await?;
        Ok(self.limits.usage(totals))
    }

    async fn check_window_limits(
        &self,
        owner_id: UserId,
        amount: rust_decimal::Decimal,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let totals = self
            .store
            .outgoing_totals(owner_id, WindowStarts::containing(now))
            .await?;
        self.limits.check_cumulative(totals, amount)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .get_account(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", id)))
    }

    /// Sleep and return `Ok` if `err` deserves another attempt
    async fn retry_or_fail(&self, err: LedgerError, attempt: &mut u32) -> Result<(), LedgerError> {
        if !err.is_retryable() {
            return Err(err);
        }
        if *attempt >= self.config.max_conflict_retries {
            warn!(
                attempts = *attempt + 1,
                store = self.store.name(),
                error = %err,
                "Conflict retries exhausted"
            );
            return Err(err);
        }

        *attempt += 1;
        let backoff = self.config.backoff(*attempt);
        debug!(
            attempt = *attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "🔁 Store conflict, retrying"
        );
        tokio::time::sleep(backoff).await;
        Ok(())
    }

    async fn audit_success(
        &self,
        actor_id: UserId,
        action: AuditAction,
        resource_type: &str,
        resource_id: String,
        metadata: serde_json::Value,
    ) {
        let entry = AuditEntry::new(
            actor_id,
            action,
            resource_type,
            Some(resource_id),
            AuditStatus::Success,
            metadata,
        );
        record_best_effort(self.audit.as_ref(), entry, self.config.audit_timeout()).await;
    }

    async fn audit_failure(
        &self,
        actor_id: UserId,
        action: AuditAction,
        resource_type: &str,
        err: &LedgerError,
        mut metadata: serde_json::Value,
    ) {
        if let Some(map) = metadata.as_object_mut() {
            map.insert("error_code".into(), json!(err.code()));
            map.insert("error".into(), json!(err.to_string()));
        }
        let entry = AuditEntry::new(
            actor_id,
            action,
            resource_type,
            None,
            AuditStatus::Failure,
            metadata,
        );
        record_best_effort(self.audit.as_ref(), entry, self.config.audit_timeout()).await;
    }
}
