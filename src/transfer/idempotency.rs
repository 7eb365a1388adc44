//! Idempotency Guard
//!
//! Caller-supplied keys give at-most-once execution: a retried request whose
//! (owner, operation type, key) already produced a Transaction gets that
//! Transaction back verbatim. No key, no protection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::store::LedgerStore;
use super::types::{PeerTransfer, Transaction, TransactionType};
use crate::account::UserId;
use crate::error::LedgerError;

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Validated idempotency key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(LedgerError::validation("idempotency key must not be empty"));
        }
        if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(LedgerError::validation(format!(
                "idempotency key longer than {} characters",
                MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
        Ok(Self(key.to_string()))
    }

    /// Parse an optional key from a request
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>, LedgerError> {
        raw.map(Self::parse).transpose()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Looks up prior results before any mutating call
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn LedgerStore>,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Prior Transaction for (owner, type, key), if any
    pub async fn check(
        &self,
        owner_id: UserId,
        tx_type: TransactionType,
        key: Option<&IdempotencyKey>,
    ) -> Result<Option<Transaction>, LedgerError> {
        let Some(key) = key else {
            return Ok(None);
        };

        let existing = self
            .store
            .find_transaction_by_key(owner_id, tx_type, key)
            .await?;

        if let Some(tx) = &existing {
            info!(
                owner_id = %owner_id,
                key = %key,
                transaction_id = %tx.id,
                reference = %tx.reference,
                "🔄 IDEMPOTENCY: duplicate request, returning original transaction"
            );
        }
        Ok(existing)
    }

    /// Prior PeerTransfer linked to the sender-side row for `key`, if any
    pub async fn check_peer(
        &self,
        sender_id: UserId,
        key: Option<&IdempotencyKey>,
    ) -> Result<Option<PeerTransfer>, LedgerError> {
        let Some(tx) = self
            .check(sender_id, TransactionType::P2pTransfer, key)
            .await?
        else {
            return Ok(None);
        };

        let peer_id = tx.metadata.peer_transfer_id().ok_or_else(|| {
            LedgerError::Internal(format!(
                "P2P transaction {} carries no peer transfer link",
                tx.id
            ))
        })?;

        let peer = self.store.get_peer_transfer(peer_id).await?.ok_or_else(|| {
            LedgerError::Internal(format!(
                "peer transfer {} linked from transaction {} is missing",
                peer_id, tx.id
            ))
        })?;
        Ok(Some(peer))
    }
}
