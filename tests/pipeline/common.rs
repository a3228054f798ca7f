// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Shared fixtures for the pipeline integration tests

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::{self, Cursor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};

use fabstir_image_pipeline::artifacts::{BlobStore, InMemoryBlobStore, Visibility};
use fabstir_image_pipeline::metrics::PipelineMetrics;
use fabstir_image_pipeline::orchestrator::{PromptSource, RenderSettings, SubmitGeneration};
use fabstir_image_pipeline::provider::{GenerateImages, ImageProvider};
use fabstir_image_pipeline::queue::QueueMode;
use fabstir_image_pipeline::types::TransactionKind;
use fabstir_image_pipeline::{
    ArtifactError, DraftId, Pipeline, PipelineConfig, ProviderError, UserId,
};

pub const MEDIA_URL: &str = "https://cdn.test/media";

/// Small solid-colour PNG
pub fn png(width: u32, height: u32) -> Bytes {
    let img = RgbaImage::from_pixel(width, height, Rgba([40, 120, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    Bytes::from(out.into_inner())
}

/// Provider double: fails the first `failures` calls, then returns `images` PNGs
pub struct FakeProvider {
    images: usize,
    failures: AtomicUsize,
    calls: AtomicUsize,
    healthy: bool,
}

impl FakeProvider {
    pub fn returning(images: usize) -> Self {
        Self::failing_first(0, images)
    }

    pub fn failing_first(failures: usize, images: usize) -> Self {
        Self {
            images,
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
            healthy: true,
        }
    }

    /// Reports itself unreachable to health checks
    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX, 0)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    async fn generate(&self, _request: &GenerateImages) -> Result<Vec<Bytes>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ProviderError::Exhausted {
                attempts: 3,
                last_error: "image provider returned HTTP 500".to_string(),
            });
        }
        Ok((0..self.images).map(|_| png(64, 64)).collect())
    }
}

/// Blocks inside `generate` until the test opens the gate
pub struct GatedProvider {
    pub entered: Notify,
    gate: Semaphore,
    calls: AtomicUsize,
}

impl GatedProvider {
    pub fn new() -> Self {
        Self {
            entered: Notify::new(),
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Let `calls` blocked or future calls through
    pub fn open(&self, calls: usize) {
        self.gate.add_permits(calls);
    }
}

#[async_trait]
impl ImageProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    async fn generate(&self, _request: &GenerateImages) -> Result<Vec<Bytes>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        Ok(vec![png(32, 32)])
    }
}

/// Blob store whose writes always fail, as with a full or read-only disk
pub struct FailingBlobStore {
    pub puts: AtomicUsize,
}

impl FailingBlobStore {
    pub fn new() -> Self {
        Self {
            puts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(
        &self,
        _visibility: Visibility,
        _key: &str,
        _bytes: Bytes,
    ) -> Result<(), ArtifactError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(ArtifactError::Io(io::Error::new(
            io::ErrorKind::Other,
            "no space left on device",
        )))
    }

    async fn get(&self, _visibility: Visibility, key: &str) -> Result<Bytes, ArtifactError> {
        Err(ArtifactError::NotFound(key.to_string()))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", MEDIA_URL, key)
    }
}

/// Inline dispatch, local lock, watermark badge
pub fn inline_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.queue.mode = QueueMode::Inline;
    config.artifacts.public_base_url = MEDIA_URL.to_string();
    config
}

/// In-memory queue with millisecond backoff
pub fn queued_config() -> PipelineConfig {
    let mut config = inline_config();
    config.queue.mode = QueueMode::Memory;
    config.queue.backoff_base_ms = 5;
    config.queue.poll_interval_ms = 20;
    config
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub blobs: Arc<InMemoryBlobStore>,
}

pub async fn harness(config: PipelineConfig, provider: Arc<dyn ImageProvider>) -> Harness {
    let blobs = Arc::new(InMemoryBlobStore::new(MEDIA_URL));
    let metrics = Arc::new(PipelineMetrics::new().unwrap());
    let pipeline = Pipeline::assemble(&config, provider, blobs.clone(), metrics)
        .await
        .unwrap();
    Harness { pipeline, blobs }
}

/// Pipeline over a caller-supplied blob store
pub async fn pipeline_with_blobs(
    config: PipelineConfig,
    provider: Arc<dyn ImageProvider>,
    blobs: Arc<dyn BlobStore>,
) -> Pipeline {
    let metrics = Arc::new(PipelineMetrics::new().unwrap());
    Pipeline::assemble(&config, provider, blobs, metrics)
        .await
        .unwrap()
}

impl Harness {
    pub async fn fund(&self, user: UserId, amount: i64) {
        self.pipeline
            .ledger
            .grant(user, amount, TransactionKind::Purchase, "test top-up")
            .await
            .unwrap();
    }

    pub async fn balance(&self, user: UserId) -> i64 {
        self.pipeline.ledger.balance(user).await.unwrap()
    }
}

pub fn submit(user: UserId, draft: DraftId, prompt: &str) -> SubmitGeneration {
    SubmitGeneration {
        user_id: user,
        draft_id: draft,
        prompt: PromptSource::Text(prompt.to_string()),
        settings: RenderSettings::default(),
        idempotency_key: None,
    }
}

pub fn submit_with_count(
    user: UserId,
    draft: DraftId,
    prompt: &str,
    count: u32,
) -> SubmitGeneration {
    let mut request = submit(user, draft, prompt);
    request.settings.count = count;
    request
}
