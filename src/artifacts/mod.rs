// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Dual-visibility artifact storage
//!
//! Every rendered image is stored twice: the original in the private bucket and a
//! watermarked derivative in the public bucket. The two keys use independent
//! random UUIDs, so the public URL reveals nothing about the private key.

pub mod blob;
pub mod watermark;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::ArtifactError;
use crate::metrics::PipelineMetrics;
use crate::types::{DraftId, JobId};

pub use blob::{BlobStore, FsBlobStore, InMemoryBlobStore, Visibility};
pub use watermark::{Corner, LogoWatermarker, WatermarkOptions, Watermarker};

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedImage {
    pub private_key: String,
    pub public_key: String,
    pub public_url: String,
    /// False when the public copy is the unmarked original (degraded path)
    pub watermarked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub private_root: PathBuf,
    pub public_root: PathBuf,
    pub public_base_url: String,
    /// Logo PNG for the watermark; a generated badge is used when unset
    pub logo_path: Option<PathBuf>,
    /// Publishing without a watermark is the degraded fallback, so this should stay on
    pub watermark_enabled: bool,
    pub watermark: WatermarkOptions,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            private_root: PathBuf::from("./data/private"),
            public_root: PathBuf::from("./data/public"),
            public_base_url: "http://localhost:8080/media".to_string(),
            logo_path: None,
            watermark_enabled: true,
            watermark: WatermarkOptions::default(),
        }
    }
}

pub struct ArtifactStore {
    blobs: Arc<dyn BlobStore>,
    watermarker: Option<Arc<dyn Watermarker>>,
    options: WatermarkOptions,
    metrics: Arc<PipelineMetrics>,
}

impl ArtifactStore {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        watermarker: Option<Arc<dyn Watermarker>>,
        options: WatermarkOptions,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            blobs,
            watermarker,
            options,
            metrics,
        }
    }

    /// Store the original privately and publish a watermarked copy.
    /// A watermark failure downgrades to publishing the original, never an error.
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn persist(
        &self,
        draft_id: DraftId,
        job_id: JobId,
        bytes: Bytes,
    ) -> Result<PersistedImage, ArtifactError> {
        let extension = extension_for(&bytes);
        let private_key = format!(
            "originals/{}/{}/{}.{}",
            draft_id,
            job_id,
            Uuid::new_v4(),
            extension
        );
        self.blobs
            .put(Visibility::Private, &private_key, bytes.clone())
            .await?;

        let (public_bytes, public_extension, watermarked) = match self.watermarked(&bytes).await {
            Ok(marked) => (Bytes::from(marked), "png", true),
            Err(e) => {
                warn!(
                    "Watermarking failed for job {}, publishing original: {}",
                    job_id, e
                );
                self.metrics.degraded_watermarks.inc();
                (bytes, extension, false)
            }
        };

        let public_key = format!(
            "previews/{}/{}.{}",
            draft_id,
            Uuid::new_v4(),
            public_extension
        );
        self.blobs
            .put(Visibility::Public, &public_key, public_bytes)
            .await?;
        let public_url = self.blobs.public_url(&public_key);
        debug!("Persisted {} -> {}", private_key, public_url);

        Ok(PersistedImage {
            private_key,
            public_key,
            public_url,
            watermarked,
        })
    }

    /// Copy an original into the permanent `selected/` area and return its key
    pub async fn promote(
        &self,
        private_key: &str,
        draft_id: DraftId,
    ) -> Result<String, ArtifactError> {
        let extension = private_key.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("bin");
        let permanent_key = format!("selected/{}/{}.{}", draft_id, Uuid::new_v4(), extension);
        self.blobs
            .copy(
                (Visibility::Private, private_key),
                (Visibility::Private, &permanent_key),
            )
            .await?;
        Ok(permanent_key)
    }

    async fn watermarked(&self, bytes: &Bytes) -> Result<Vec<u8>, ArtifactError> {
        let Some(watermarker) = self.watermarker.clone() else {
            return Err(ArtifactError::Task("no watermarker configured".to_string()));
        };
        let bytes = bytes.clone();
        let options = self.options;
        tokio::task::spawn_blocking(move || watermarker.watermark(&bytes, &options))
            .await
            .map_err(|e| ArtifactError::Task(e.to_string()))?
    }
}

fn extension_for(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}
