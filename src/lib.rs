//! Bank Ledger - money movement core
//!
//! Atomic internal and P2P transfers over a shared account-balance store,
//! with transfer limits, idempotent retries, best-effort auditing and
//! read-side history queries.
//!
//! # Modules
//!
//! - [`money`] - Decimal amounts at two minor units, currency codes
//! - [`error`] - `LedgerError` taxonomy
//! - [`account`] - Accounts and the user directory
//! - [`transfer`] - Coordinator, limits, idempotency, references, audit, stores
//! - [`history`] - Transaction pages, balance series, summaries
//! - [`db`] - PostgreSQL pool and schema
//! - [`config`] / [`logging`] - Ambient setup for the binary

pub mod account;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod logging;
pub mod money;
pub mod transfer;

// Convenient re-exports at crate root
pub use account::{
    Account, AccountId, AccountStatus, Contact, MemoryDirectory, UserDirectory, UserId,
};
pub use error::{LedgerError, LimitWindow};
pub use history::{HistoryService, Page, PageRequest, TransactionFilter};
pub use money::Currency;
pub use transfer::{
    InternalTransferRequest, LedgerStore, MemoryLedgerStore, P2pTransferRequest, PeerTransfer,
    Transaction, TransferCoordinator,
};
