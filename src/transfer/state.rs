//! Transaction lifecycle states
//!
//! State IDs are stored in PostgreSQL as SMALLINT.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction status
///
/// ```text
/// PENDING → PROCESSING → COMPLETED
///                ↓
///             FAILED
/// ```
///
/// A row is written in PROCESSING and leaves its atomic unit as COMPLETED;
/// an aborted unit leaves no row at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransactionStatus {
    Pending = 0,
    Processing = 10,
    Completed = 20,
    Failed = -10,
}

impl TransactionStatus {
    /// Rows that consume the owner's transfer limits
    #[inline]
    pub fn counts_toward_limits(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Processing | TransactionStatus::Completed
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransactionStatus::Pending),
            10 => Some(TransactionStatus::Processing),
            20 => Some(TransactionStatus::Completed),
            -10 => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// PeerTransfer envelope status: PENDING → COMPLETED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum PeerTransferStatus {
    Pending = 0,
    Completed = 20,
}

impl PeerTransferStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(PeerTransferStatus::Pending),
            20 => Some(PeerTransferStatus::Completed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerTransferStatus::Pending => "PENDING",
            PeerTransferStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for PeerTransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
