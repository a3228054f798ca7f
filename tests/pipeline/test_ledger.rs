// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Credit ledger over the in-memory wallet store

use std::sync::Arc;

use fabstir_image_pipeline::ledger::{CreditLedger, LedgerError};
use fabstir_image_pipeline::store::InMemoryStore;
use fabstir_image_pipeline::{GenerationError, JobId, TransactionKind, UserId};

fn ledger() -> CreditLedger {
    CreditLedger::new(Arc::new(InMemoryStore::new()))
}

#[tokio::test]
async fn test_reserve_records_spend_with_balance_after() {
    let ledger = ledger();
    let user = UserId::new();
    ledger
        .grant(user, 250, TransactionKind::Purchase, "starter pack")
        .await
        .unwrap();

    let job = JobId::new();
    let reservation = ledger.reserve(user, 100, "generation", Some(job)).await.unwrap();

    assert_eq!(reservation.transaction.delta, -100);
    assert_eq!(reservation.transaction.balance_after, 150);
    assert_eq!(reservation.transaction.kind, TransactionKind::Spend);
    assert_eq!(reservation.transaction.job_id, Some(job));
    assert_eq!(ledger.balance(user).await.unwrap(), 150);
}

#[tokio::test]
async fn test_insufficient_funds_reports_shortfall_and_writes_nothing() {
    let ledger = ledger();
    let user = UserId::new();
    ledger
        .grant(user, 50, TransactionKind::Gift, "welcome")
        .await
        .unwrap();

    let err = ledger.reserve(user, 100, "generation", None).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { shortfall: 50 }));
    assert!(matches!(
        GenerationError::from(err),
        GenerationError::InsufficientFunds { shortfall: 50 }
    ));

    assert_eq!(ledger.balance(user).await.unwrap(), 50);
    assert_eq!(ledger.transactions(user).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_refund_is_applied_once_per_job() {
    let ledger = ledger();
    let user = UserId::new();
    let job = JobId::new();
    ledger
        .grant(user, 300, TransactionKind::Purchase, "pack")
        .await
        .unwrap();
    ledger.reserve(user, 200, "generation", Some(job)).await.unwrap();

    let first = ledger.refund(user, 200, "job failed", Some(job)).await.unwrap();
    let second = ledger.refund(user, 200, "job failed", Some(job)).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(ledger.balance(user).await.unwrap(), 300);
    assert_eq!(ledger.refunded_for_job(user, job).await.unwrap(), 200);
    assert!(ledger.reconcile(user).await.unwrap());
}

#[tokio::test]
async fn test_release_undoes_reservation() {
    let ledger = ledger();
    let user = UserId::new();
    ledger
        .grant(user, 100, TransactionKind::Purchase, "pack")
        .await
        .unwrap();
    let reservation = ledger
        .reserve(user, 100, "generation", Some(JobId::new()))
        .await
        .unwrap();
    assert_eq!(ledger.balance(user).await.unwrap(), 0);

    let refund = ledger.release(&reservation, "job not created").await.unwrap();
    assert_eq!(refund.kind, TransactionKind::Refund);
    assert_eq!(refund.balance_after, 100);

    let kinds: Vec<TransactionKind> = ledger
        .transactions(user)
        .await
        .unwrap()
        .iter()
        .map(|tx| tx.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            TransactionKind::Purchase,
            TransactionKind::Spend,
            TransactionKind::Refund
        ]
    );
}

#[tokio::test]
async fn test_rejects_bad_amounts_and_grant_kinds() {
    let ledger = ledger();
    let user = UserId::new();

    assert!(matches!(
        ledger.reserve(user, 0, "free?", None).await,
        Err(LedgerError::InvalidAmount(0))
    ));
    assert!(matches!(
        ledger.refund(user, -5, "negative", None).await,
        Err(LedgerError::InvalidAmount(-5))
    ));
    assert!(matches!(
        ledger.grant(user, 100, TransactionKind::Spend, "not a top-up").await,
        Err(LedgerError::InvalidGrantKind)
    ));
    assert_eq!(ledger.balance(user).await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_reservations_never_overdraw() {
    let ledger = Arc::new(ledger());
    let user = UserId::new();
    ledger
        .grant(user, 300, TransactionKind::Purchase, "pack")
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            ledger.reserve(user, 100, "generation", None).await.is_ok()
        }));
    }
    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            granted += 1;
        }
    }

    assert_eq!(granted, 3);
    assert_eq!(ledger.balance(user).await.unwrap(), 0);
    assert!(ledger.reconcile(user).await.unwrap());
}
