//! Ledger DDL
//!
//! Enum columns hold the SMALLINT ids of `AccountStatus`, `TransactionType`,
//! `TransactionStatus` and `PeerTransferStatus`. Every statement is
//! `IF NOT EXISTS`, so applying the schema twice is harmless.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                  UUID PRIMARY KEY,
    email               VARCHAR(255) NOT NULL,
    full_name           VARCHAR(255) NOT NULL,
    default_account_id  UUID,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users (lower(email));

CREATE TABLE IF NOT EXISTS accounts (
    id                  UUID PRIMARY KEY,
    owner_id            UUID NOT NULL,
    currency            VARCHAR(3) NOT NULL,
    status              SMALLINT NOT NULL DEFAULT 1,
    balance             NUMERIC(20, 2) NOT NULL DEFAULT 0,
    available_balance   NUMERIC(20, 2) NOT NULL DEFAULT 0,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT chk_accounts_available CHECK (available_balance <= balance)
);

CREATE INDEX IF NOT EXISTS idx_accounts_owner ON accounts (owner_id);

CREATE TABLE IF NOT EXISTS transactions (
    id                  UUID PRIMARY KEY,
    owner_id            UUID NOT NULL,
    from_account_id     UUID NOT NULL REFERENCES accounts (id),
    to_account_id       UUID NOT NULL REFERENCES accounts (id),
    tx_type             SMALLINT NOT NULL,
    amount              NUMERIC(20, 2) NOT NULL CHECK (amount > 0),
    currency            VARCHAR(3) NOT NULL,
    status              SMALLINT NOT NULL,
    description         VARCHAR(255),
    reference           VARCHAR(32) NOT NULL UNIQUE,
    idempotency_key     VARCHAR(128),
    metadata            JSONB NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL,
    completed_at        TIMESTAMPTZ
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_idempotency
    ON transactions (owner_id, tx_type, idempotency_key)
    WHERE idempotency_key IS NOT NULL;

CREATE INDEX IF NOT EXISTS idx_transactions_owner_created
    ON transactions (owner_id, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_transactions_from_account ON transactions (from_account_id);
CREATE INDEX IF NOT EXISTS idx_transactions_to_account ON transactions (to_account_id);

CREATE TABLE IF NOT EXISTS peer_transfers (
    id                          UUID PRIMARY KEY,
    sender_id                   UUID NOT NULL,
    recipient_id                UUID NOT NULL,
    from_account_id             UUID NOT NULL REFERENCES accounts (id),
    to_account_id               UUID NOT NULL REFERENCES accounts (id),
    amount                      NUMERIC(20, 2) NOT NULL CHECK (amount > 0),
    currency                    VARCHAR(3) NOT NULL,
    memo                        VARCHAR(255),
    status                      SMALLINT NOT NULL,
    sender_transaction_id       UUID NOT NULL REFERENCES transactions (id),
    recipient_transaction_id    UUID NOT NULL REFERENCES transactions (id),
    created_at                  TIMESTAMPTZ NOT NULL,
    completed_at                TIMESTAMPTZ,
    CONSTRAINT chk_peer_transfers_parties CHECK (sender_id <> recipient_id)
);

CREATE TABLE IF NOT EXISTS audit_logs (
    id              UUID PRIMARY KEY,
    actor_id        UUID NOT NULL,
    action          VARCHAR(64) NOT NULL,
    resource_type   VARCHAR(64) NOT NULL,
    resource_id     VARCHAR(64),
    status          VARCHAR(16) NOT NULL,
    metadata        JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_audit_logs_actor ON audit_logs (actor_id, created_at DESC);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_repeatable() {
        for line in SCHEMA.lines().map(str::trim) {
            if line.starts_with("CREATE") {
                assert!(line.contains("IF NOT EXISTS"), "not repeatable: {}", line);
            }
        }
    }

    #[test]
    fn test_schema_covers_tables() {
        for table in ["users", "accounts", "transactions", "peer_transfers", "audit_logs"] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {} (", table)),
                "missing table {}",
                table
            );
        }
    }
}
