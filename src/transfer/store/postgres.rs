//! PostgreSQL ledger store
//!
//! Each atomic unit runs in one SERIALIZABLE transaction. Both account rows
//! are locked with `SELECT ... FOR UPDATE` in ascending id order before
//! anything is re-checked. Dropping the sqlx transaction without `commit`
//! rolls it back, so a failed unit never strands a PROCESSING row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Transaction as DbTransaction};
use tracing::debug;
use uuid::Uuid;

use super::LedgerStore;
use crate::account::{Account, AccountId, AccountStatus, UserId};
use crate::db::SafeRow;
use crate::error::LedgerError;
use crate::history::{DateRange, Page, PageRequest, TransactionFilter};
use crate::money::Currency;
use crate::transfer::idempotency::IdempotencyKey;
use crate::transfer::limits::{WindowStarts, WindowTotals};
use crate::transfer::reference::ReferenceNumber;
use crate::transfer::rules;
use crate::transfer::state::{PeerTransferStatus, TransactionStatus};
use crate::transfer::types::{
    PeerTransfer, PeerTransferId, PeerTransferPlan, Transaction, TransactionId, TransactionMetadata,
    TransactionType, TransferPlan,
};

const ACCOUNT_COLUMNS: &str =
    "id, owner_id, currency, status, balance, available_balance, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, owner_id, from_account_id, to_account_id, tx_type, amount, \
     currency, status, description, reference, idempotency_key, metadata, created_at, updated_at, \
     completed_at";

const PEER_TRANSFER_COLUMNS: &str = "id, sender_id, recipient_id, from_account_id, to_account_id, \
     amount, currency, memo, status, sender_transaction_id, recipient_transaction_id, created_at, \
     completed_at";

/// Status ids that count toward limits
const LIMIT_STATUSES: [i16; 2] = [
    TransactionStatus::Processing as i16,
    TransactionStatus::Completed as i16,
];

/// PostgreSQL-backed [`LedgerStore`]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open an account row (account opening is outside the ledger's operations)
    pub async fn insert_account(&self, account: &Account) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO accounts
                (id, owner_id, currency, status, balance, available_balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(account.id)
        .bind(account.owner_id)
        .bind(account.currency.as_str())
        .bind(account.status.id())
        .bind(account.balance)
        .bind(account.available_balance)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn begin_serializable(&self) -> Result<DbTransaction<'static, Postgres>, LedgerError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn account_from_row(row: &PgRow) -> Result<Account, LedgerError> {
    let status: i16 = row.field("status")?;
    let currency: String = row.field("currency")?;
    Ok(Account {
        id: row.field("id")?,
        owner_id: row.field("owner_id")?,
        currency: Currency::new(&currency)?,
        status: AccountStatus::from_id(status)
            .ok_or_else(|| LedgerError::Internal(format!("unknown account status {}", status)))?,
        balance: row.field("balance")?,
        available_balance: row.field("available_balance")?,
        created_at: row.field("created_at")?,
        updated_at: row.field("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction, LedgerError> {
    let tx_type: i16 = row.field("tx_type")?;
    let status: i16 = row.field("status")?;
    let currency: String = row.field("currency")?;
    let reference: String = row.field("reference")?;
    let key: Option<String> = row.field("idempotency_key")?;
    let metadata: sqlx::types::Json<TransactionMetadata> = row.field("metadata")?;

    Ok(Transaction {
        id: row.field("id")?,
        owner_id: row.field("owner_id")?,
        from_account_id: row.field("from_account_id")?,
        to_account_id: row.field("to_account_id")?,
        tx_type: TransactionType::from_id(tx_type).ok_or_else(|| {
            LedgerError::Internal(format!("unknown transaction type {}", tx_type))
        })?,
        amount: row.field("amount")?,
        currency: Currency::new(&currency)?,
        status: TransactionStatus::from_id(status).ok_or_else(|| {
            LedgerError::Internal(format!("unknown transaction status {}", status))
        })?,
        description: row.field("description")?,
        reference: ReferenceNumber::from_raw(&reference),
        idempotency_key: IdempotencyKey::parse_optional(key.as_deref())?,
        metadata: metadata.0,
        created_at: row.field("created_at")?,
        updated_at: row.field("updated_at")?,
        completed_at: row.field("completed_at")?,
    })
}

fn peer_transfer_from_row(row: &PgRow) -> Result<PeerTransfer, LedgerError> {
    let status: i16 = row.field("status")?;
    let currency: String = row.field("currency")?;
    Ok(PeerTransfer {
        id: row.field("id")?,
        sender_id: row.field("sender_id")?,
        recipient_id: row.field("recipient_id")?,
        from_account_id: row.field("from_account_id")?,
        to_account_id: row.field("to_account_id")?,
        amount: row.field("amount")?,
        currency: Currency::new(&currency)?,
        memo: row.field("memo")?,
        status: PeerTransferStatus::from_id(status).ok_or_else(|| {
            LedgerError::Internal(format!("unknown peer transfer status {}", status))
        })?,
        sender_transaction_id: row.field("sender_transaction_id")?,
        recipient_transaction_id: row.field("recipient_transaction_id")?,
        created_at: row.field("created_at")?,
        completed_at: row.field("completed_at")?,
    })
}

// ============================================================================
// Unit-of-work steps (all run on the open transaction)
// ============================================================================

/// Lock both rows in ascending id order and return them as (from, to)
async fn lock_pair(
    tx: &mut DbTransaction<'_, Postgres>,
    from_id: AccountId,
    to_id: AccountId,
) -> Result<(Account, Account), LedgerError> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM accounts WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        ACCOUNT_COLUMNS
    ))
    .bind(vec![from_id, to_id])
    .fetch_all(&mut **tx)
    .await?;

    let mut from = None;
    let mut to = None;
    for row in &rows {
        let account = account_from_row(row)?;
        if account.id == from_id {
            from = Some(account);
        } else if account.id == to_id {
            to = Some(account);
        }
    }

    let from = from.ok_or_else(|| LedgerError::NotFound(format!("account {}", from_id)))?;
    let to = to.ok_or_else(|| LedgerError::NotFound(format!("account {}", to_id)))?;
    Ok((from, to))
}

async fn totals_in(
    conn: &mut sqlx::PgConnection,
    owner_id: UserId,
    starts: WindowStarts,
) -> Result<WindowTotals, LedgerError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE(SUM(t.amount) FILTER (WHERE t.created_at >= $2), 0) AS daily,
            COALESCE(SUM(t.amount), 0) AS monthly
        FROM transactions t
        JOIN accounts a ON a.id = t.from_account_id
        WHERE t.owner_id = $1
          AND a.owner_id = $1
          AND t.status = ANY($4)
          AND t.created_at >= $3
        "#,
    )
    .bind(owner_id)
    .bind(starts.day)
    .bind(starts.month)
    .bind(&LIMIT_STATUSES[..])
    .fetch_one(conn)
    .await?;

    Ok(WindowTotals {
        daily: row.field::<Decimal>("daily")?,
        monthly: row.field::<Decimal>("monthly")?,
    })
}

async fn insert_processing(
    tx: &mut DbTransaction<'_, Postgres>,
    row: &Transaction,
) -> Result<(), LedgerError> {
    sqlx::query(&format!(
        "INSERT INTO transactions ({}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        TRANSACTION_COLUMNS
    ))
    .bind(row.id)
    .bind(row.owner_id)
    .bind(row.from_account_id)
    .bind(row.to_account_id)
    .bind(row.tx_type.id())
    .bind(row.amount)
    .bind(row.currency.as_str())
    .bind(TransactionStatus::Processing.id())
    .bind(&row.description)
    .bind(row.reference.as_str())
    .bind(row.idempotency_key.as_ref().map(|k| k.as_str()))
    .bind(sqlx::types::Json(&row.metadata))
    .bind(row.created_at)
    .bind(row.created_at)
    .bind(Option::<DateTime<Utc>>::None)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn move_funds(
    tx: &mut DbTransaction<'_, Postgres>,
    from_id: AccountId,
    to_id: AccountId,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    // Debit Source
    sqlx::query(
        "UPDATE accounts SET balance = balance - $1, available_balance = available_balance - $1, \
         updated_at = $3 WHERE id = $2",
    )
    .bind(amount)
    .bind(from_id)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    // Credit Target
    sqlx::query(
        "UPDATE accounts SET balance = balance + $1, available_balance = available_balance + $1, \
         updated_at = $3 WHERE id = $2",
    )
    .bind(amount)
    .bind(to_id)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn mark_completed(
    tx: &mut DbTransaction<'_, Postgres>,
    ids: &[TransactionId],
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    let result = sqlx::query(
        "UPDATE transactions SET status = $1, updated_at = $2, completed_at = $2 \
         WHERE id = ANY($3) AND status = $4",
    )
    .bind(TransactionStatus::Completed.id())
    .bind(now)
    .bind(ids)
    .bind(TransactionStatus::Processing.id())
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() != ids.len() as u64 {
        return Err(LedgerError::Internal(format!(
            "expected {} PROCESSING rows, completed {}",
            ids.len(),
            result.rows_affected()
        )));
    }
    Ok(())
}

/// The row as the unit will leave it, timestamps included
#[allow(clippy::too_many_arguments)]
fn staged_row(
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

fn completed(mut row: Transaction, now: DateTime<Utc>) -> Transaction {
    row.status = TransactionStatus::Completed;
    row.updated_at = now;
    row.completed_at = Some(now);
    row
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_transaction_by_key(
        &self,
        owner_id: UserId,
        tx_type: TransactionType,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions \
             WHERE owner_id = $1 AND tx_type = $2 AND idempotency_key = $3",
            TRANSACTION_COLUMNS
        ))
        .bind(owner_id)
        .bind(tx_type.id())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn get_transaction_by_reference(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE reference = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(reference.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(transaction_from_row).transpose()
    }

    async fn get_peer_transfer(
        &self,
        id: PeerTransferId,
    ) -> Result<Option<PeerTransfer>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM peer_transfers WHERE id = $1",
            PEER_TRANSFER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(peer_transfer_from_row).transpose()
    }

    async fn outgoing_totals(
        &self,
        owner_id: UserId,
        starts: WindowStarts,
    ) -> Result<WindowTotals, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        totals_in(&mut *conn, owner_id, starts).await
    }

    async fn apply_transfer(&self, plan: &TransferPlan) -> Result<Transaction, LedgerError> {
        rules::ensure_distinct(plan.from_account_id, plan.to_account_id)?;
        let mut tx = self.begin_serializable().await?;

        let (from, to) = lock_pair(&mut tx, plan.from_account_id, plan.to_account_id).await?;
        rules::check_pair(&from, plan.owner_id, &to, plan.owner_id, plan.amount)?;

        let totals = totals_in(
            &mut *tx,
            plan.owner_id,
            WindowStarts::containing(plan.requested_at),
        )
        .await?;
        plan.limits.check_cumulative(totals, plan.amount)?;

        let now = Utc::now();
        let row = staged_row(
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

        insert_processing(&mut tx, &row).await?;
        move_funds(&mut tx, from.id, to.id, plan.amount, now).await?;
        mark_completed(&mut tx, &[row.id], now).await?;
        tx.commit().await?;

        debug!(
            transaction_id = %row.id,
            reference = %row.reference,
            "postgres store: transfer committed"
        );
        Ok(completed(row, now))
    }

    async fn apply_peer_transfer(
        &self,
        plan: &PeerTransferPlan,
    ) -> Result<PeerTransfer, LedgerError> {
        rules::ensure_distinct(plan.from_account_id, plan.to_account_id)?;
        let mut tx = self.begin_serializable().await?;

        let (from, to) = lock_pair(&mut tx, plan.from_account_id, plan.to_account_id).await?;
        rules::check_pair(
            &from,
            plan.sender.user_id,
            &to,
            plan.recipient.user_id,
            plan.amount,
        )?;

        let totals = totals_in(
            &mut *tx,
            plan.sender.user_id,
            WindowStarts::containing(plan.requested_at),
        )
        .await?;
        plan.limits.check_cumulative(totals, plan.amount)?;

        let now = Utc::now();
        let sent = staged_row(
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
        let received = staged_row(
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

        insert_processing(&mut tx, &sent).await?;
        insert_processing(&mut tx, &received).await?;
        sqlx::query(&format!(
            "INSERT INTO peer_transfers ({}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NULL)",
            PEER_TRANSFER_COLUMNS
        ))
        .bind(plan.peer_transfer_id)
        .bind(plan.sender.user_id)
        .bind(plan.recipient.user_id)
        .bind(from.id)
        .bind(to.id)
        .bind(plan.amount)
        .bind(from.currency.as_str())
        .bind(&plan.memo)
        .bind(PeerTransferStatus::Pending.id())
        .bind(sent.id)
        .bind(received.id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        move_funds(&mut tx, from.id, to.id, plan.amount, now).await?;
        mark_completed(&mut tx, &[sent.id, received.id], now).await?;

        sqlx::query("UPDATE peer_transfers SET status = $1, completed_at = $2 WHERE id = $3")
            .bind(PeerTransferStatus::Completed.id())
            .bind(now)
            .bind(plan.peer_transfer_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(
            peer_transfer_id = %plan.peer_transfer_id,
            "postgres store: peer transfer committed"
        );

        Ok(PeerTransfer {
            id: plan.peer_transfer_id,
            sender_id: plan.sender.user_id,
            recipient_id: plan.recipient.user_id,
            from_account_id: from.id,
            to_account_id: to.id,
            amount: plan.amount,
            currency: from.currency.clone(),
            memo: plan.memo.clone(),
            status: PeerTransferStatus::Completed,
            sender_transaction_id: sent.id,
            recipient_transaction_id: received.id,
            created_at: now,
            completed_at: Some(now),
        })
    }

    async fn query_transactions(
        &self,
        owner_id: UserId,
        filter: &TransactionFilter,
        page: PageRequest,
    ) -> Result<Page<Transaction>, LedgerError> {
        page.validate()?;
        filter.validate()?;

        const WHERE: &str = r#"
            WHERE owner_id = $1
              AND ($2::uuid IS NULL OR from_account_id = $2 OR to_account_id = $2)
              AND ($3::smallint IS NULL OR tx_type = $3)
              AND ($4::smallint IS NULL OR status = $4)
              AND ($5::timestamptz IS NULL OR created_at >= $5)
              AND ($6::timestamptz IS NULL OR created_at <= $6)
              AND ($7::numeric IS NULL OR amount >= $7)
              AND ($8::numeric IS NULL OR amount <= $8)
        "#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM transactions {}", WHERE))
            .bind(owner_id)
            .bind(filter.account_id)
            .bind(filter.tx_type.map(|t| t.id()))
            .bind(filter.status.map(|s| s.id()))
            .bind(filter.created.from)
            .bind(filter.created.to)
            .bind(filter.min_amount)
            .bind(filter.max_amount)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions {} ORDER BY created_at DESC, id DESC LIMIT $9 OFFSET $10",
            TRANSACTION_COLUMNS, WHERE
        ))
        .bind(owner_id)
        .bind(filter.account_id)
        .bind(filter.tx_type.map(|t| t.id()))
        .bind(filter.status.map(|s| s.id()))
        .bind(filter.created.from)
        .bind(filter.created.to)
        .bind(filter.min_amount)
        .bind(filter.max_amount)
        .bind(page.per_page as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, page, total.max(0) as u64))
    }

    async fn completed_transactions(
        &self,
        owner_id: UserId,
        account_id: AccountId,
        range: DateRange,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE owner_id = $1
              AND status = $2
              AND (from_account_id = $3 OR to_account_id = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at <= $5)
            ORDER BY completed_at DESC, created_at DESC
            LIMIT $6
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(owner_id)
        .bind(TransactionStatus::Completed.id())
        .bind(account_id)
        .bind(range.from)
        .bind(range.to)
        .bind(limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }
}
