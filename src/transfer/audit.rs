//! Audit Sink
//!
//! Append-only action log. Writes are best-effort: a failed or slow audit
//! write is logged and never reverses or blocks a committed transfer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::account::UserId;
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    InternalTransfer,
    P2pTransfer,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::InternalTransfer => "INTERNAL_TRANSFER",
            AuditAction::P2pTransfer => "P2P_TRANSFER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Success,
    Failure,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failure => "FAILURE",
        }
    }
}

/// One insert-only audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: UserId,
    pub action: AuditAction,
    pub resource_type: String,
    /// Absent for rejected requests that never produced a resource
    pub resource_id: Option<String>,
    pub status: AuditStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor_id: UserId,
        action: AuditAction,
        resource_type: &str,
        resource_id: Option<String>,
        status: AuditStatus,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            action,
            resource_type: resource_type.to_string(),
            resource_id,
            status,
            metadata,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), LedgerError>;
}

/// Write `entry`, swallowing (but logging) failures and timeouts
pub async fn record_best_effort(sink: &dyn AuditSink, entry: AuditEntry, timeout: Duration) {
    let action = entry.action;
    let resource_id = entry.resource_id.clone().unwrap_or_default();

    match tokio::time::timeout(timeout, sink.record(entry)).await {
        Ok(Ok(())) => {
            debug!(action = action.as_str(), resource_id = %resource_id, "Audit entry recorded");
        }
        Ok(Err(e)) => {
            warn!(
                action = action.as_str(),
                resource_id = %resource_id,
                error = %e,
                "Audit write failed (transfer unaffected)"
            );
        }
        Err(_) => {
            warn!(
                action = action.as_str(),
                resource_id = %resource_id,
                timeout_ms = timeout.as_millis() as u64,
                "Audit write timed out (transfer unaffected)"
            );
        }
    }
}

/// In-process audit log
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
    fail: AtomicBool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), LedgerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LedgerError::Internal("audit sink unavailable".to_string()));
        }
        self.entries.lock().await.push(entry);
        Ok(())
    }
}

/// PostgreSQL-backed audit log (`audit_logs`)
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, actor_id, action, resource_type, resource_id, status, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.actor_id)
        .bind(entry.action.as_str())
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(entry.status.as_str())
        .bind(sqlx::types::Json(&entry.metadata))
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
