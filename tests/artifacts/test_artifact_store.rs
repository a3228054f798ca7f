// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Original/preview persistence and the degraded watermark path

use bytes::Bytes;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;

use fabstir_image_pipeline::artifacts::{
    ArtifactStore, BlobStore, InMemoryBlobStore, LogoWatermarker, Visibility, WatermarkOptions,
    Watermarker,
};
use fabstir_image_pipeline::metrics::PipelineMetrics;
use fabstir_image_pipeline::{ArtifactError, DraftId, JobId};

struct BrokenWatermarker;

impl Watermarker for BrokenWatermarker {
    fn watermark(
        &self,
        _bytes: &[u8],
        _options: &WatermarkOptions,
    ) -> Result<Vec<u8>, ArtifactError> {
        Err(ArtifactError::Task("encoder crashed".to_string()))
    }
}

fn png(width: u32, height: u32) -> Bytes {
    let img = RgbaImage::from_pixel(width, height, Rgba([10, 200, 90, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    Bytes::from(out.into_inner())
}

struct Fixture {
    blobs: Arc<InMemoryBlobStore>,
    metrics: Arc<PipelineMetrics>,
    store: ArtifactStore,
}

fn fixture(watermarker: Option<Arc<dyn Watermarker>>) -> Fixture {
    let blobs = Arc::new(InMemoryBlobStore::new("https://cdn.test/media"));
    let metrics = Arc::new(PipelineMetrics::new().unwrap());
    let store = ArtifactStore::new(
        blobs.clone(),
        watermarker,
        WatermarkOptions::default(),
        Arc::clone(&metrics),
    );
    Fixture {
        blobs,
        metrics,
        store,
    }
}

#[tokio::test]
async fn test_persist_stores_original_and_marked_preview() {
    let f = fixture(Some(Arc::new(LogoWatermarker::badge())));
    let draft = DraftId::new();
    let job = JobId::new();
    let original = png(320, 200);

    let persisted = f.store.persist(draft, job, original.clone()).await.unwrap();

    assert!(persisted.watermarked);
    assert!(persisted
        .private_key
        .starts_with(&format!("originals/{}/{}/", draft, job)));
    assert!(persisted.private_key.ends_with(".png"));
    assert!(persisted
        .public_key
        .starts_with(&format!("previews/{}/", draft)));
    assert_eq!(
        persisted.public_url,
        format!("https://cdn.test/media/{}", persisted.public_key)
    );
    // the public key shares no path segment with the private one
    assert!(!persisted.public_key.contains(&job.to_string()));

    let stored = f
        .blobs
        .get(Visibility::Private, &persisted.private_key)
        .await
        .unwrap();
    assert_eq!(stored, original);

    let preview = f
        .blobs
        .get(Visibility::Public, &persisted.public_key)
        .await
        .unwrap();
    assert_ne!(preview, original);
    let decoded = image::load_from_memory(&preview).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (320, 200));
    assert_eq!(f.metrics.degraded_watermarks.get(), 0);
}

#[tokio::test]
async fn test_watermark_failure_publishes_original() {
    let f = fixture(Some(Arc::new(BrokenWatermarker)));
    let original = png(64, 64);

    let persisted = f
        .store
        .persist(DraftId::new(), JobId::new(), original.clone())
        .await
        .unwrap();

    assert!(!persisted.watermarked);
    let preview = f
        .blobs
        .get(Visibility::Public, &persisted.public_key)
        .await
        .unwrap();
    assert_eq!(preview, original);
    assert_eq!(f.metrics.degraded_watermarks.get(), 1);
}

#[tokio::test]
async fn test_missing_watermarker_is_degraded() {
    let f = fixture(None);
    let persisted = f
        .store
        .persist(DraftId::new(), JobId::new(), png(16, 16))
        .await
        .unwrap();

    assert!(!persisted.watermarked);
    assert_eq!(f.metrics.degraded_watermarks.get(), 1);
}

#[tokio::test]
async fn test_unknown_bytes_keep_a_neutral_extension() {
    let f = fixture(Some(Arc::new(LogoWatermarker::badge())));
    let persisted = f
        .store
        .persist(
            DraftId::new(),
            JobId::new(),
            Bytes::from_static(b"definitely not an image"),
        )
        .await
        .unwrap();

    assert!(persisted.private_key.ends_with(".bin"));
    assert!(persisted.public_key.ends_with(".bin"));
    assert!(!persisted.watermarked);
}

#[tokio::test]
async fn test_promote_copies_into_selected_area() {
    let f = fixture(Some(Arc::new(LogoWatermarker::badge())));
    let draft = DraftId::new();
    let original = png(32, 32);
    let persisted = f
        .store
        .persist(draft, JobId::new(), original.clone())
        .await
        .unwrap();

    let permanent = f.store.promote(&persisted.private_key, draft).await.unwrap();

    assert!(permanent.starts_with(&format!("selected/{}/", draft)));
    assert!(permanent.ends_with(".png"));
    assert_eq!(
        f.blobs.get(Visibility::Private, &permanent).await.unwrap(),
        original
    );
    assert!(f.blobs.keys(Visibility::Public).await.len() == 1);
}
