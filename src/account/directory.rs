//! User directory: resolves contact identifiers to users and default accounts

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::models::{AccountId, Contact, UserId, normalize_contact};
use crate::db::SafeRow;
use crate::error::LedgerError;

/// Identity resolution seam
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve a contact identifier (email) to a directory entry
    async fn find_by_contact(&self, identifier: &str) -> Result<Option<Contact>, LedgerError>;

    /// Look up a directory entry by user id
    async fn find_by_id(&self, user_id: UserId) -> Result<Option<Contact>, LedgerError>;
}

/// In-process directory
#[derive(Default)]
pub struct MemoryDirectory {
    by_contact: RwLock<HashMap<String, Contact>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a user reachable by `contact`
    pub async fn register(
        &self,
        user_id: UserId,
        contact: &str,
        display_name: &str,
        default_account_id: Option<AccountId>,
    ) {
        let key = normalize_contact(contact);
        let entry = Contact {
            user_id,
            display_name: display_name.to_string(),
            contact: key.clone(),
            default_account_id,
        };
        let mut by_contact = self.by_contact.write().await;
        // A user answers to one contact at a time
        by_contact.retain(|_, c| c.user_id != user_id);
        by_contact.insert(key, entry);
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn find_by_contact(&self, identifier: &str) -> Result<Option<Contact>, LedgerError> {
        let key = normalize_contact(identifier);
        Ok(self.by_contact.read().await.get(&key).cloned())
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<Contact>, LedgerError> {
        Ok(self
            .by_contact
            .read()
            .await
            .values()
            .find(|c| c.user_id == user_id)
            .cloned())
    }
}

/// PostgreSQL-backed directory over the `users` table
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register (or replace) a user row
    pub async fn register(
        &self,
        user_id: UserId,
        contact: &str,
        display_name: &str,
        default_account_id: Option<AccountId>,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, full_name, default_account_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET email = EXCLUDED.email,
                full_name = EXCLUDED.full_name,
                default_account_id = EXCLUDED.default_account_id
            "#,
        )
        .bind(user_id)
        .bind(normalize_contact(contact))
        .bind(display_name)
        .bind(default_account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn row_to_contact(row: &sqlx::postgres::PgRow) -> Result<Contact, LedgerError> {
        Ok(Contact {
            user_id: row.field("id")?,
            display_name: row.field("full_name")?,
            contact: row.field("email")?,
            default_account_id: row.field("default_account_id")?,
        })
    }
}

#[async_trait]
impl UserDirectory for PgDirectory {
    async fn find_by_contact(&self, identifier: &str) -> Result<Option<Contact>, LedgerError> {
        let row = sqlx::query(
            r#"SELECT id, email, full_name, default_account_id
               FROM users WHERE lower(email) = $1"#,
        )
        .bind(normalize_contact(identifier))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_contact).transpose()
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<Contact>, LedgerError> {
        let row = sqlx::query(
            r#"SELECT id, email, full_name, default_account_id
               FROM users WHERE id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_contact).transpose()
    }
}
