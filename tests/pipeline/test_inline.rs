// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Inline dispatch: the request renders the job and refunds on the first failure

use std::sync::atomic::Ordering;
use std::sync::Arc;

use fabstir_image_pipeline::store::JobRepository;
use fabstir_image_pipeline::{DraftId, JobStatus, TransactionKind, UserId};

use super::common::{
    harness, inline_config, pipeline_with_blobs, submit, FailingBlobStore, FakeProvider,
};

#[tokio::test]
async fn test_provider_failure_refunds_immediately() {
    let provider = Arc::new(FakeProvider::always_failing());
    let h = harness(inline_config(), provider.clone()).await;
    let (user, draft) = (UserId::new(), DraftId::new());
    h.fund(user, 250).await;

    let submission = h
        .pipeline
        .orchestrator
        .submit_generation(submit(user, draft, "a red bicycle"))
        .await
        .unwrap();

    assert_eq!(submission.status, JobStatus::Failed);
    assert_eq!(provider.calls(), 1);
    assert_eq!(h.balance(user).await, 250);
    assert_eq!(
        h.pipeline
            .ledger
            .refunded_for_job(user, submission.job_id)
            .await
            .unwrap(),
        submission.cost
    );
    assert!(h.pipeline.ledger.reconcile(user).await.unwrap());

    let job = h
        .pipeline
        .store
        .get_job(submission.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert!(job.finished_at.is_some());
    assert!(job.error.unwrap().contains("HTTP 500"));
    assert_eq!(h.pipeline.metrics.refunds.get(), 1);
}

#[tokio::test]
async fn test_completed_job_has_no_error_and_no_refund() {
    let h = harness(inline_config(), Arc::new(FakeProvider::returning(2))).await;
    let (user, draft) = (UserId::new(), DraftId::new());
    h.fund(user, 100).await;

    let submission = h
        .pipeline
        .orchestrator
        .submit_generation(submit(user, draft, "two koi in a pond"))
        .await
        .unwrap();

    let job = h
        .pipeline
        .store
        .get_job(submission.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error.is_none());
    assert!(!job.degraded);
    assert_eq!(
        h.pipeline
            .ledger
            .refunded_for_job(user, submission.job_id)
            .await
            .unwrap(),
        0
    );
    assert_eq!(h.pipeline.metrics.jobs_completed.get(), 1);
}

#[tokio::test]
async fn test_disabled_watermark_marks_job_degraded() {
    let mut config = inline_config();
    config.artifacts.watermark_enabled = false;
    let h = harness(config, Arc::new(FakeProvider::returning(1))).await;
    let (user, draft) = (UserId::new(), DraftId::new());
    h.fund(user, 100).await;

    let submission = h
        .pipeline
        .orchestrator
        .submit_generation(submit(user, draft, "a lantern"))
        .await
        .unwrap();
    assert_eq!(submission.status, JobStatus::Completed);

    let results = h.pipeline.orchestrator.list_results(draft).await.unwrap();
    assert!(results[0].job.degraded);
    assert!(!results[0].images[0].watermarked);
    assert_eq!(h.pipeline.metrics.degraded_watermarks.get(), 1);
}

#[tokio::test]
async fn test_storage_failure_refunds_immediately() {
    let provider = Arc::new(FakeProvider::returning(2));
    let blobs = Arc::new(FailingBlobStore::new());
    let pipeline = pipeline_with_blobs(inline_config(), provider.clone(), blobs.clone()).await;
    let (user, draft) = (UserId::new(), DraftId::new());
    pipeline
        .ledger
        .grant(user, 250, TransactionKind::Purchase, "test top-up")
        .await
        .unwrap();

    let submission = pipeline
        .orchestrator
        .submit_generation(submit(user, draft, "a red bicycle"))
        .await
        .unwrap();

    assert_eq!(submission.status, JobStatus::Failed);
    assert_eq!(provider.calls(), 1);
    assert_eq!(blobs.puts.load(Ordering::SeqCst), 1);

    let job = pipeline.store.get_job(submission.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("no space left"));
    assert_eq!(
        pipeline
            .ledger
            .refunded_for_job(user, submission.job_id)
            .await
            .unwrap(),
        submission.cost
    );
    assert_eq!(pipeline.ledger.balance(user).await.unwrap(), 250);
    assert!(pipeline.ledger.reconcile(user).await.unwrap());
    assert!(pipeline.store.images_for_job(submission.job_id).await.unwrap().is_empty());
}
