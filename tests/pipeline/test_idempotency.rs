// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Duplicate submissions replay the original job instead of charging again

use std::sync::Arc;
use std::time::Duration;

use fabstir_image_pipeline::{DraftId, JobStatus, TransactionKind, UserId};

use super::common::{harness, inline_config, submit, FakeProvider, GatedProvider};

async fn spend_count(h: &super::common::Harness, user: UserId) -> usize {
    h.pipeline
        .ledger
        .transactions(user)
        .await
        .unwrap()
        .iter()
        .filter(|tx| tx.kind == TransactionKind::Spend)
        .count()
}

#[tokio::test]
async fn test_same_key_twice_creates_one_job_and_one_spend() {
    let provider = Arc::new(FakeProvider::returning(1));
    let h = harness(inline_config(), provider.clone()).await;
    let (user, draft) = (UserId::new(), DraftId::new());
    h.fund(user, 500).await;

    let mut request = submit(user, draft, "a harbor at dusk");
    request.idempotency_key = Some("order-42".to_string());

    let first = h
        .pipeline
        .orchestrator
        .submit_generation(request.clone())
        .await
        .unwrap();
    // a different prompt under the same key is still the same request
    request.prompt = fabstir_image_pipeline::PromptSource::Text("a harbor at noon".to_string());
    let second = h
        .pipeline
        .orchestrator
        .submit_generation(request)
        .await
        .unwrap();

    assert_eq!(first.job_id, second.job_id);
    assert_eq!(first.cost, second.cost);
    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(h.pipeline.store.job_count().await, 1);
    assert_eq!(spend_count(&h, user).await, 1);
    assert_eq!(provider.calls(), 1);
    assert_eq!(h.balance(user).await, 400);
    assert_eq!(h.pipeline.metrics.submissions_for("cached"), 1);
}

#[tokio::test]
async fn test_identical_request_without_key_is_fingerprinted() {
    let h = harness(inline_config(), Arc::new(FakeProvider::returning(1))).await;
    let (user, draft) = (UserId::new(), DraftId::new());
    h.fund(user, 500).await;

    let first = h
        .pipeline
        .orchestrator
        .submit_generation(submit(user, draft, "a harbor at dusk"))
        .await
        .unwrap();
    let second = h
        .pipeline
        .orchestrator
        .submit_generation(submit(user, draft, "a harbor at dusk"))
        .await
        .unwrap();
    let changed = h
        .pipeline
        .orchestrator
        .submit_generation(submit(user, draft, "a harbor at dawn"))
        .await
        .unwrap();

    assert_eq!(first.job_id, second.job_id);
    assert!(second.replayed);
    assert_ne!(first.job_id, changed.job_id);
    assert_eq!(changed.cost, 200);
    assert_eq!(spend_count(&h, user).await, 2);
}

#[tokio::test]
async fn test_client_keys_are_scoped_per_user() {
    let h = harness(inline_config(), Arc::new(FakeProvider::returning(1))).await;
    let (alice, bob) = (UserId::new(), UserId::new());
    h.fund(alice, 100).await;
    h.fund(bob, 100).await;

    let mut for_alice = submit(alice, DraftId::new(), "a red kite");
    for_alice.idempotency_key = Some("retry-1".to_string());
    let mut for_bob = submit(bob, DraftId::new(), "a red kite");
    for_bob.idempotency_key = Some("retry-1".to_string());

    let a = h
        .pipeline
        .orchestrator
        .submit_generation(for_alice)
        .await
        .unwrap();
    let b = h
        .pipeline
        .orchestrator
        .submit_generation(for_bob)
        .await
        .unwrap();

    assert_ne!(a.job_id, b.job_id);
    assert!(!b.replayed);
    assert_eq!(h.balance(alice).await, 0);
    assert_eq!(h.balance(bob).await, 0);
}

#[tokio::test]
async fn test_key_expires_after_ttl() {
    let mut config = inline_config();
    config.idempotency.ttl_ms = 50;
    let h = harness(config, Arc::new(FakeProvider::returning(1))).await;
    let (user, draft) = (UserId::new(), DraftId::new());
    h.fund(user, 500).await;

    let mut request = submit(user, draft, "a tin robot");
    request.idempotency_key = Some("k".to_string());

    let first = h
        .pipeline
        .orchestrator
        .submit_generation(request.clone())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    let second = h
        .pipeline
        .orchestrator
        .submit_generation(request)
        .await
        .unwrap();

    assert_ne!(first.job_id, second.job_id);
    assert!(!second.replayed);
    assert_eq!(second.cost, 200);
    assert_eq!(h.pipeline.idempotency.sweep(), 0);
}

#[tokio::test]
async fn test_duplicate_during_inline_render_replays_queued_job() {
    let provider = Arc::new(GatedProvider::new());
    let h = Arc::new(harness(inline_config(), provider.clone()).await);
    let (user, draft) = (UserId::new(), DraftId::new());
    h.fund(user, 500).await;

    let mut request = submit(user, draft, "a glass greenhouse");
    request.idempotency_key = Some("greenhouse".to_string());

    let first = {
        let h = Arc::clone(&h);
        let request = request.clone();
        tokio::spawn(async move { h.pipeline.orchestrator.submit_generation(request).await })
    };
    provider.entered.notified().await;

    let duplicate = h
        .pipeline
        .orchestrator
        .submit_generation(request)
        .await
        .unwrap();
    assert!(duplicate.replayed);
    assert_eq!(duplicate.status, JobStatus::Queued);

    provider.open(1);
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.job_id, duplicate.job_id);
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(spend_count(&h, user).await, 1);
}
