//! Transfer Core Types
//!
//! Transactions, P2P envelopes, request DTOs and the plans handed to the
//! store's atomic unit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::idempotency::IdempotencyKey;
use super::limits::LimitPolicy;
use super::reference::ReferenceNumber;
use super::state::{PeerTransferStatus, TransactionStatus};
use crate::account::{AccountId, UserId};
use crate::money::Currency;

pub type TransactionId = Uuid;
pub type PeerTransferId = Uuid;

/// Maximum length of descriptions and memos
pub const MAX_DESCRIPTION_LEN: usize = 255;

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransactionType {
    /// Between two accounts of the same owner
    Transfer = 1,
    /// One side of a customer-to-customer movement
    P2pTransfer = 2,
}

impl TransactionType {
    pub const ALL: [TransactionType; 2] = [TransactionType::Transfer, TransactionType::P2pTransfer];

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(TransactionType::Transfer),
            2 => Some(TransactionType::P2pTransfer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Transfer => "TRANSFER",
            TransactionType::P2pTransfer => "P2P_TRANSFER",
        }
    }

    /// Prefix of human-readable reference numbers
    pub fn reference_prefix(&self) -> &'static str {
        match self {
            TransactionType::Transfer => "TRF",
            TransactionType::P2pTransfer => "P2P",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a P2P movement a row describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerDirection {
    Sent,
    Received,
}

/// Typed per-transaction-type metadata
///
/// Stored as JSONB; the `kind` tag keeps the P2P correlation contract explicit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionMetadata {
    Internal,
    PeerTransfer {
        peer_transfer_id: PeerTransferId,
        direction: PeerDirection,
        counterpart_id: UserId,
        counterpart_name: String,
        counterpart_contact: String,
    },
}

impl TransactionMetadata {
    pub fn peer_transfer_id(&self) -> Option<PeerTransferId> {
        match self {
            TransactionMetadata::PeerTransfer {
                peer_transfer_id, ..
            } => Some(*peer_transfer_id),
            TransactionMetadata::Internal => None,
        }
    }
}

/// Ledger transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub owner_id: UserId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub tx_type: TransactionType,
    pub amount: Decimal,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub description: Option<String>,
    pub reference: ReferenceNumber,
    pub idempotency_key: Option<IdempotencyKey>,
    pub metadata: TransactionMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Signed effect of this row on `account_id`'s balance
    pub fn effect_on(&self, account_id: AccountId) -> Decimal {
        let mut effect = Decimal::ZERO;
        if self.to_account_id == account_id {
            effect += self.amount;
        }
        if self.from_account_id == account_id {
            effect -= self.amount;
        }
        effect
    }

    pub fn touches(&self, account_id: AccountId) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }
}

/// P2P envelope linking the sender-side and recipient-side rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerTransfer {
    pub id: PeerTransferId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub currency: Currency,
    pub memo: Option<String>,
    pub status: PeerTransferStatus,
    pub sender_transaction_id: TransactionId,
    pub recipient_transaction_id: TransactionId,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PeerTransfer {
    pub fn involves(&self, user_id: UserId) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Same-owner transfer request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalTransferRequest {
    pub owner_id: UserId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl InternalTransferRequest {
    pub fn new(
        owner_id: UserId,
        from_account_id: AccountId,
        to_account_id: AccountId,
        amount: Decimal,
    ) -> Self {
        Self {
            owner_id,
            from_account_id,
            to_account_id,
            amount,
            description: None,
            idempotency_key: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Customer-to-customer transfer request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pTransferRequest {
    pub sender_id: UserId,
    /// Contact identifier (email) of the recipient
    pub recipient_contact: String,
    pub from_account_id: AccountId,
    pub amount: Decimal,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl P2pTransferRequest {
    pub fn new(
        sender_id: UserId,
        recipient_contact: impl Into<String>,
        from_account_id: AccountId,
        amount: Decimal,
    ) -> Self {
        Self {
            sender_id,
            recipient_contact: recipient_contact.into(),
            from_account_id,
            amount,
            memo: None,
            idempotency_key: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

// ============================================================================
// Plans (validated input to the store's atomic unit)
// ============================================================================

/// Everything the store needs to apply one internal transfer
#[derive(Debug, Clone)]
pub struct TransferPlan {
    pub owner_id: UserId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub description: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub reference: ReferenceNumber,
    /// Re-checked inside the unit against committed totals
    pub limits: LimitPolicy,
    pub requested_at: DateTime<Utc>,
}

/// Display info about one party of a P2P movement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    pub user_id: UserId,
    pub display_name: String,
    pub contact: String,
}

/// Everything the store needs to apply one P2P transfer
#[derive(Debug, Clone)]
pub struct PeerTransferPlan {
    pub peer_transfer_id: PeerTransferId,
    pub sender: Party,
    pub recipient: Party,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
    pub memo: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub sender_reference: ReferenceNumber,
    pub recipient_reference: ReferenceNumber,
    pub limits: LimitPolicy,
    pub requested_at: DateTime<Utc>,
}

impl PeerTransferPlan {
    pub fn sender_metadata(&self) -> TransactionMetadata {
        TransactionMetadata::PeerTransfer {
            peer_transfer_id: self.peer_transfer_id,
            direction: PeerDirection::Sent,
            counterpart_id: self.recipient.user_id,
            counterpart_name: self.recipient.display_name.clone(),
            counterpart_contact: self.recipient.contact.clone(),
        }
    }

    pub fn recipient_metadata(&self) -> TransactionMetadata {
        TransactionMetadata::PeerTransfer {
            peer_transfer_id: self.peer_transfer_id,
            direction: PeerDirection::Received,
            counterpart_id: self.sender.user_id,
            counterpart_name: self.sender.display_name.clone(),
            counterpart_contact: self.sender.contact.clone(),
        }
    }
}
