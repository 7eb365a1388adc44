mod common;

use futures::future::join_all;
use rust_decimal_macros::dec;
use uuid::Uuid;

use bank_ledger::transfer::{
    AuditAction, AuditStatus, LimitPolicy, TransactionStatus, TransactionType,
};
use bank_ledger::{AccountStatus, InternalTransferRequest, LedgerError, LimitWindow};
use common::{Harness, fast_config};

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_internal_transfer_moves_funds() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(500.00)).await;
    let b = h.open(owner, "USD", dec!(20.00)).await;

    let tx = h
        .coordinator
        .internal_transfer(
            InternalTransferRequest::new(owner, a.id, b.id, dec!(150)).with_description("savings"),
        )
        .await
        .unwrap();

    assert_eq!(h.balance(a.id).await, dec!(350.00));
    assert_eq!(h.balance(b.id).await, dec!(170.00));
    assert_eq!(h.available(a.id).await, dec!(350.00));
    assert_eq!(h.available(b.id).await, dec!(170.00));

    assert_eq!(tx.amount.to_string(), "150.00");
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.tx_type, TransactionType::Transfer);
    assert_eq!(tx.description.as_deref(), Some("savings"));
    assert_eq!(tx.currency.as_str(), "USD");
    assert!(tx.reference.as_str().starts_with("TRF"));
    assert!(tx.completed_at.is_some());
    assert_eq!(h.store.transaction_count().await, 1);

    let entries = h.audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, AuditAction::InternalTransfer);
    assert_eq!(entries[0].status, AuditStatus::Success);
    assert_eq!(entries[0].resource_id, Some(tx.id.to_string()));
}

#[tokio::test]
async fn test_total_balance_is_conserved() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(300)).await;
    let b = h.open(owner, "USD", dec!(45.55)).await;
    let before = h.balance(a.id).await + h.balance(b.id).await;

    for (from, to, amount) in [
        (a.id, b.id, dec!(10.10)),
        (b.id, a.id, dec!(0.01)),
        (a.id, b.id, dec!(99.99)),
        (b.id, a.id, dec!(150)),
    ] {
        h.coordinator
            .internal_transfer(InternalTransferRequest::new(owner, from, to, amount))
            .await
            .unwrap();
    }

    let after = h.balance(a.id).await + h.balance(b.id).await;
    assert_eq!(before, after);
    assert_eq!(h.balance(a.id).await, dec!(339.92));
}

// ============================================================================
// Rejections (no mutation)
// ============================================================================

#[tokio::test]
async fn test_same_account_is_rejected() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(100)).await;

    let err = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, a.id, dec!(10)))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Validation(_)));
    assert_eq!(h.balance(a.id).await, dec!(100.00));
    assert_eq!(h.store.transaction_count().await, 0);

    let entries = h.audit.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, AuditStatus::Failure);
    assert_eq!(entries[0].resource_id, None);
    assert_eq!(entries[0].metadata["error_code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_frozen_source_is_locked() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let frozen = h
        .open_with_status(owner, dec!(100), AccountStatus::Frozen)
        .await;
    let b = h.open(owner, "USD", dec!(0)).await;

    let err = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, frozen.id, b.id, dec!(10)))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::AccountLocked(_)));
    assert_eq!(err.code(), "ACCOUNT_LOCKED");
    assert_eq!(h.balance(frozen.id).await, dec!(100.00));
    assert_eq!(h.balance(b.id).await, dec!(0.00));
    assert_eq!(h.store.transaction_count().await, 0);
}

#[tokio::test]
async fn test_closed_destination_is_locked() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(100)).await;
    let closed = h
        .open_with_status(owner, dec!(0), AccountStatus::Closed)
        .await;

    let err = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, closed.id, dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountLocked(_)));
    assert_eq!(h.balance(a.id).await, dec!(100.00));
}

#[tokio::test]
async fn test_currency_mismatch_is_rejected() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let eur = h.open(owner, "EUR", dec!(100)).await;
    let usd = h.open(owner, "USD", dec!(100)).await;

    let err = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, eur.id, usd.id, dec!(10)))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Validation(_)));
    assert_eq!(h.balance(eur.id).await, dec!(100.00));
    assert_eq!(h.balance(usd.id).await, dec!(100.00));
    assert_eq!(h.store.transaction_count().await, 0);
}

#[tokio::test]
async fn test_foreign_account_is_forbidden() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let theirs = h.open(stranger, "USD", dec!(100)).await;
    let mine = h.open(owner, "USD", dec!(0)).await;

    let err = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, theirs.id, mine.id, dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));
    assert_eq!(err.http_status(), 403);

    // Destination owned by someone else is just as forbidden
    let err = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(stranger, theirs.id, mine.id, dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));
    assert_eq!(h.balance(theirs.id).await, dec!(100.00));
}

#[tokio::test]
async fn test_missing_account_is_not_found() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(100)).await;

    let err = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, Uuid::new_v4(), dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
}

#[tokio::test]
async fn test_non_positive_amounts_are_rejected() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(100)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    for amount in [dec!(0), dec!(-5), dec!(-0.01), dec!(0.001)] {
        let err = h
            .coordinator
            .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, amount))
            .await
            .unwrap_err();
        assert!(
            matches!(err, LedgerError::Validation(_)),
            "amount {} should be a validation error, got {:?}",
            amount,
            err
        );
    }
    assert_eq!(h.store.transaction_count().await, 0);
}

#[tokio::test]
async fn test_overlong_description_is_rejected() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(100)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    let err = h
        .coordinator
        .internal_transfer(
            InternalTransferRequest::new(owner, a.id, b.id, dec!(1))
                .with_description("x".repeat(256)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

// ============================================================================
// Boundaries
// ============================================================================

#[tokio::test]
async fn test_exact_balance_succeeds_and_one_cent_more_fails() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(200.00)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    let err = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(200.01)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::InsufficientFunds {
            requested: dec!(200.01),
            available: dec!(200.00),
        }
    );
    assert_eq!(h.balance(a.id).await, dec!(200.00));

    h.coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(200.00)))
        .await
        .unwrap();
    assert_eq!(h.balance(a.id).await, dec!(0.00));
    assert_eq!(h.balance(b.id).await, dec!(200.00));
}

#[tokio::test]
async fn test_daily_ceiling_reached_exactly_then_exceeded() {
    let h = Harness::with(
        LimitPolicy::new(dec!(500), dec!(1000), dec!(3000)),
        fast_config(),
    );
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(5000)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    for amount in [dec!(500), dec!(499.99), dec!(0.01)] {
        h.coordinator
            .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, amount))
            .await
            .unwrap();
    }

    let err = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(0.01)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LedgerError::LimitExceeded {
            window: LimitWindow::Daily,
            limit: dec!(1000.00),
            attempted: dec!(1000.01),
        }
    );
    assert_eq!(err.code(), "TRANSACTION_LIMIT_EXCEEDED");
    assert_eq!(h.balance(b.id).await, dec!(1000.00));
}

#[tokio::test]
async fn test_monthly_ceiling_names_window() {
    let h = Harness::with(
        LimitPolicy::new(dec!(500), dec!(5000), dec!(800)),
        fast_config(),
    );
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(5000)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    h.coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(500)))
        .await
        .unwrap();
    h.coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(300)))
        .await
        .unwrap();

    match h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(1)))
        .await
    {
        Err(LedgerError::LimitExceeded { window, .. }) => assert_eq!(window, LimitWindow::Monthly),
        other => panic!("expected monthly limit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_per_transaction_ceiling_is_validation() {
    let h = Harness::with(
        LimitPolicy::new(dec!(500), dec!(1000), dec!(3000)),
        fast_config(),
    );
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(5000)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    let err = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(500.01)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[tokio::test]
async fn test_limit_usage_reports_remaining() {
    let h = Harness::with(
        LimitPolicy::new(dec!(500), dec!(1000), dec!(3000)),
        fast_config(),
    );
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(5000)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    h.coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(250)))
        .await
        .unwrap();

    let usage = h.coordinator.limit_usage(owner).await.unwrap();
    assert_eq!(usage.per_transaction_max, dec!(500.00));
    assert_eq!(usage.daily_used, dec!(250.00));
    assert_eq!(usage.daily_remaining, dec!(750.00));
    assert_eq!(usage.monthly_remaining, dec!(2750.00));

    let fresh = h.coordinator.limit_usage(Uuid::new_v4()).await.unwrap();
    assert_eq!(fresh.daily_used, dec!(0.00));
    assert_eq!(fresh.daily_remaining, dec!(1000.00));
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn test_repeated_key_returns_original_transaction() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(500)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    let req =
        InternalTransferRequest::new(owner, a.id, b.id, dec!(100)).with_idempotency_key("pay-1");
    let first = h.coordinator.internal_transfer(req.clone()).await.unwrap();
    let second = h.coordinator.internal_transfer(req).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.balance(a.id).await, dec!(400.00));
    assert_eq!(h.balance(b.id).await, dec!(100.00));
    assert_eq!(h.store.transaction_count().await, 1);

    // Replays are not audited again
    assert_eq!(h.audit.entries().await.len(), 1);
}

#[tokio::test]
async fn test_replay_wins_over_changed_request() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(500)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    let first = h
        .coordinator
        .internal_transfer(
            InternalTransferRequest::new(owner, a.id, b.id, dec!(100)).with_idempotency_key("k"),
        )
        .await
        .unwrap();

    // Same key, different amount: the original is returned untouched
    let replay = h
        .coordinator
        .internal_transfer(
            InternalTransferRequest::new(owner, a.id, b.id, dec!(999)).with_idempotency_key("k"),
        )
        .await
        .unwrap();
    assert_eq!(replay.id, first.id);
    assert_eq!(replay.amount, dec!(100.00));
    assert_eq!(h.balance(a.id).await, dec!(400.00));
}

#[tokio::test]
async fn test_keys_are_scoped_per_owner() {
    let h = Harness::new();
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let a1 = h.open(alice, "USD", dec!(100)).await;
    let a2 = h.open(alice, "USD", dec!(0)).await;
    let b1 = h.open(bob, "USD", dec!(100)).await;
    let b2 = h.open(bob, "USD", dec!(0)).await;

    let ta = h
        .coordinator
        .internal_transfer(
            InternalTransferRequest::new(alice, a1.id, a2.id, dec!(10))
                .with_idempotency_key("same"),
        )
        .await
        .unwrap();
    let tb = h
        .coordinator
        .internal_transfer(
            InternalTransferRequest::new(bob, b1.id, b2.id, dec!(10))
                .with_idempotency_key("same"),
        )
        .await
        .unwrap();

    assert_ne!(ta.id, tb.id);
    assert_eq!(h.store.transaction_count().await, 2);
}

#[tokio::test]
async fn test_invalid_keys_are_rejected() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(100)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    for key in ["   ".to_string(), "k".repeat(129)] {
        let err = h
            .coordinator
            .internal_transfer(
                InternalTransferRequest::new(owner, a.id, b.id, dec!(1)).with_idempotency_key(key),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }
}

// ============================================================================
// Conflicts and failures
// ============================================================================

#[tokio::test]
async fn test_conflicts_are_retried_transparently() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(100)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    h.store.inject_conflicts(2);
    let tx = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(30)))
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(h.store.apply_count(), 3);
    assert_eq!(h.balance(a.id).await, dec!(70.00));
    assert_eq!(h.store.transaction_count().await, 1);
}

#[tokio::test]
async fn test_exhausted_retries_surface_conflict() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(100)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    h.store.inject_conflicts(100);
    let err = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(30)))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Conflict(_)));
    // First attempt plus max_conflict_retries
    assert_eq!(h.store.apply_count(), 4);
    assert_eq!(h.balance(a.id).await, dec!(100.00));
    assert_eq!(h.store.transaction_count().await, 0);
}

#[tokio::test]
async fn test_store_failure_applies_nothing() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(100)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    h.store.set_fail_writes(true);
    let err = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(30)))
        .await
        .unwrap_err();

    assert!(matches!(err, LedgerError::Internal(_)));
    // Internal errors are not retried
    assert_eq!(h.store.apply_count(), 1);
    assert_eq!(h.balance(a.id).await, dec!(100.00));
    assert_eq!(h.store.transaction_count().await, 0);
}

#[tokio::test]
async fn test_failing_audit_sink_never_fails_transfer() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(100)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    h.audit.set_fail(true);
    let tx = h
        .coordinator
        .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(30)))
        .await
        .unwrap();

    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(h.balance(b.id).await, dec!(30.00));
    assert!(h.audit.entries().await.is_empty());
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_debits_never_overdraw() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(100.00)).await;
    let b = h.open(owner, "USD", dec!(5.00)).await;

    let handles = (0..50).map(|_| {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(10)))
                .await
        })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 10);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LedgerError::InsufficientFunds { .. }))
    );

    assert_eq!(h.balance(a.id).await, dec!(0.00));
    assert_eq!(h.balance(b.id).await, dec!(105.00));
    assert_eq!(h.store.transaction_count().await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transfers_respect_daily_limit() {
    let h = Harness::with(
        LimitPolicy::new(dec!(100), dec!(100), dec!(1000)),
        fast_config(),
    );
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(10000)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    let handles = (0..20).map(|_| {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .internal_transfer(InternalTransferRequest::new(owner, a.id, b.id, dec!(10)))
                .await
        })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 10);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, LedgerError::LimitExceeded { window: LimitWindow::Daily, .. }))
    );
    assert_eq!(h.balance(b.id).await, dec!(100.00));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_retries_with_one_key_apply_once() {
    let h = Harness::new();
    let owner = Uuid::new_v4();
    let a = h.open(owner, "USD", dec!(100)).await;
    let b = h.open(owner, "USD", dec!(0)).await;

    let handles = (0..10).map(|_| {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .internal_transfer(
                    InternalTransferRequest::new(owner, a.id, b.id, dec!(25))
                        .with_idempotency_key("retry-storm"),
                )
                .await
        })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("task panicked").expect("transfer failed"))
        .collect();

    let first = &results[0];
    assert!(results.iter().all(|tx| tx.id == first.id));
    assert_eq!(h.balance(a.id).await, dec!(75.00));
    assert_eq!(h.balance(b.id).await, dec!(25.00));
    assert_eq!(h.store.transaction_count().await, 1);
}
