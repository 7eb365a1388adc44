//! Account management module
//!
//! Ledger accounts and the user directory used to resolve P2P recipients.

pub mod directory;
pub mod models;

// Re-export commonly used types
pub use directory::{MemoryDirectory, PgDirectory, UserDirectory};
pub use models::{Account, AccountId, AccountStatus, Contact, UserId, normalize_contact};
