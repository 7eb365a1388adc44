//! Money movement
//!
//! Internal (same-owner) and P2P (customer-to-customer) transfers executed as
//! single atomic units against a [`store::LedgerStore`].
//!
//! # Flow
//!
//! ```text
//! request → idempotency check → validate (amount, accounts, limits)
//!         → reference → store unit [lock, re-check, PROCESSING, debit, credit, COMPLETED]
//!         → commit → best-effort audit
//! ```
//!
//! # Safety Invariants
//!
//! 1. **All-or-nothing**: a unit either commits every row and both balance
//!    changes or leaves no trace; no PROCESSING row survives an abort
//! 2. **Re-check under lock**: funds, status and limits are checked again on
//!    the locked rows, so racing debits cannot overdraw an account
//! 3. **At-most-once**: (owner, type, idempotency key) is unique in the store
//! 4. **Audit never blocks money**: audit writes are bounded and their
//!    failures only logged

pub mod audit;
pub mod coordinator;
pub mod idempotency;
pub mod limits;
pub mod reference;
pub mod rules;
pub mod state;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use audit::{AuditAction, AuditEntry, AuditSink, AuditStatus, MemoryAuditSink, PgAuditSink};
pub use coordinator::TransferCoordinator;
pub use idempotency::{IdempotencyGuard, IdempotencyKey};
pub use limits::{LimitPolicy, LimitUsage, WindowStarts, WindowTotals};
pub use reference::{ReferenceGenerator, ReferenceNumber};
pub use state::{PeerTransferStatus, TransactionStatus};
pub use store::{LedgerStore, MemoryLedgerStore, PgLedgerStore};
pub use types::{
    InternalTransferRequest, P2pTransferRequest, PeerDirection, PeerTransfer, PeerTransferId,
    Transaction, TransactionId, TransactionMetadata, TransactionType,
};
