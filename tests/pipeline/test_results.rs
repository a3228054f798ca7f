// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Listing results and selecting a final image

use std::sync::Arc;

use fabstir_image_pipeline::artifacts::{BlobStore, Visibility};
use fabstir_image_pipeline::store::JobRepository;
use fabstir_image_pipeline::{DraftId, GenerationError, ImageId, UserId};

use super::common::{harness, inline_config, submit, submit_with_count, FakeProvider};

#[tokio::test]
async fn test_results_are_listed_newest_first() {
    let h = harness(inline_config(), Arc::new(FakeProvider::returning(1))).await;
    let (user, draft) = (UserId::new(), DraftId::new());
    h.fund(user, 300).await;

    let first = h
        .pipeline
        .orchestrator
        .submit_generation(submit(user, draft, "a teapot"))
        .await
        .unwrap();
    let second = h
        .pipeline
        .orchestrator
        .submit_generation(submit(user, draft, "a teapot, isometric"))
        .await
        .unwrap();

    let results = h.pipeline.orchestrator.list_results(draft).await.unwrap();
    let ids: Vec<_> = results.iter().map(|r| r.job.id).collect();
    assert_eq!(ids, vec![second.job_id, first.job_id]);
    assert!(h
        .pipeline
        .orchestrator
        .list_results(DraftId::new())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_select_promotes_original_once() {
    let h = harness(inline_config(), Arc::new(FakeProvider::returning(2))).await;
    let (user, draft) = (UserId::new(), DraftId::new());
    h.fund(user, 100).await;

    h.pipeline
        .orchestrator
        .submit_generation(submit_with_count(user, draft, "a compass rose", 2))
        .await
        .unwrap();
    let results = h.pipeline.orchestrator.list_results(draft).await.unwrap();
    let chosen = results[0].images[1].clone();

    let url = h
        .pipeline
        .orchestrator
        .select_result(draft, chosen.id)
        .await
        .unwrap();
    assert_eq!(url, chosen.public_url);

    let stored = h.pipeline.store.get_image(chosen.id).await.unwrap().unwrap();
    let permanent = stored.selected_key.clone().unwrap();
    assert!(permanent.starts_with(&format!("selected/{}/", draft)));
    let original = h
        .blobs
        .get(Visibility::Private, &stored.private_key)
        .await
        .unwrap();
    let promoted = h.blobs.get(Visibility::Private, &permanent).await.unwrap();
    assert_eq!(original, promoted);

    // selecting again does not copy a second time
    h.pipeline
        .orchestrator
        .select_result(draft, chosen.id)
        .await
        .unwrap();
    let selected: Vec<String> = h
        .blobs
        .keys(Visibility::Private)
        .await
        .into_iter()
        .filter(|key| key.starts_with("selected/"))
        .collect();
    assert_eq!(selected, vec![permanent]);
}

#[tokio::test]
async fn test_select_requires_image_of_the_draft() {
    let h = harness(inline_config(), Arc::new(FakeProvider::returning(1))).await;
    let (user, draft) = (UserId::new(), DraftId::new());
    h.fund(user, 100).await;

    h.pipeline
        .orchestrator
        .submit_generation(submit(user, draft, "a compass rose"))
        .await
        .unwrap();
    let image = h.pipeline.orchestrator.list_results(draft).await.unwrap()[0].images[0].clone();

    let wrong_draft = h
        .pipeline
        .orchestrator
        .select_result(DraftId::new(), image.id)
        .await;
    assert!(matches!(wrong_draft, Err(GenerationError::NotFound(_))));

    let unknown = h
        .pipeline
        .orchestrator
        .select_result(draft, ImageId::new())
        .await;
    assert!(matches!(unknown, Err(GenerationError::NotFound(_))));
}
