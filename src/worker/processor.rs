// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Shared processing sequence for queued and inline jobs

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::artifacts::ArtifactStore;
use crate::errors::GenerationError;
use crate::ledger::CreditLedger;
use crate::metrics::PipelineMetrics;
use crate::provider::{GenerateImages, ImageProvider};
use crate::store::{JobClaim, JobRepository, JobTransition};
use crate::types::{GeneratedImage, GenerationJob, ImageId, JobId, JobStatus};

/// How long a claim protects a job that is being rendered
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed { images: usize, degraded: bool },
    /// The job already left `queued`; nothing was done
    Skipped { status: JobStatus },
    /// Another delivery holds the job's claim and will settle it
    InFlight,
}

pub struct GenerationProcessor {
    jobs: Arc<dyn JobRepository>,
    ledger: Arc<CreditLedger>,
    provider: Arc<dyn ImageProvider>,
    artifacts: Arc<ArtifactStore>,
    metrics: Arc<PipelineMetrics>,
    claim_lease: Duration,
}

impl GenerationProcessor {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        ledger: Arc<CreditLedger>,
        provider: Arc<dyn ImageProvider>,
        artifacts: Arc<ArtifactStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            jobs,
            ledger,
            provider,
            artifacts,
            metrics,
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    /// The lease must outlast the slowest render, or a redelivery could
    /// take the job over mid-render
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn provider_healthy(&self) -> bool {
        self.provider.health_check().await
    }

    /// Claim, render, persist and complete one job. Does not refund; the caller
    /// decides whether a failure is final.
    ///
    /// A job this store does not know is an error, not a skip: the delivery
    /// must not be acknowledged as if the work were done.
    #[tracing::instrument(skip(self), fields(job_id = %job_id))]
    pub async fn process(&self, job_id: JobId) -> Result<ProcessOutcome, GenerationError> {
        let job = match self.jobs.claim_job(job_id, self.claim_lease).await? {
            JobClaim::Claimed(job) => job,
            JobClaim::InFlight => {
                debug!("Job {} is being rendered by another delivery", job_id);
                return Ok(ProcessOutcome::InFlight);
            }
            JobClaim::Settled(status) => {
                debug!("Job {} is already {}, skipping", job_id, status);
                return Ok(ProcessOutcome::Skipped { status });
            }
            JobClaim::Missing => {
                warn!("Job {} is not in this store", job_id);
                return Err(GenerationError::NotFound(format!("job {}", job_id)));
            }
        };

        match self.render(&job).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(release) = self.jobs.release_claim(job.id).await {
                    warn!("Could not release claim on job {}: {}", job.id, release);
                }
                Err(e)
            }
        }
    }

    async fn render(&self, job: &GenerationJob) -> Result<ProcessOutcome, GenerationError> {
        let request = GenerateImages::from(&job.params);
        let started = Instant::now();
        let rendered = self.provider.generate(&request).await;
        self.metrics
            .provider_latency
            .observe(started.elapsed().as_secs_f64());
        let rendered = rendered?;

        // rows are written only after every blob is stored so a retry never
        // leaves a partial set behind
        let mut images = Vec::with_capacity(rendered.len());
        let mut degraded = false;
        for bytes in rendered {
            let persisted = self.artifacts.persist(job.draft_id, job.id, bytes).await?;
            degraded |= !persisted.watermarked;
            images.push(GeneratedImage {
                id: ImageId::new(),
                draft_id: job.draft_id,
                job_id: job.id,
                private_key: persisted.private_key,
                public_url: persisted.public_url,
                watermarked: persisted.watermarked,
                selected_key: None,
                created_at: Utc::now(),
            });
        }
        let count = images.len();

        if !self.jobs.complete_job(job.id, images, degraded).await? {
            let status = self
                .jobs
                .get_job(job.id)
                .await?
                .map(|current| current.status)
                .unwrap_or(JobStatus::Failed);
            warn!(
                "Job {} became {} while rendering; {} rendered blob(s) left unreferenced",
                job.id, status, count
            );
            return Ok(ProcessOutcome::Skipped { status });
        }

        self.metrics.jobs_completed.inc();
        info!(
            "Job {} completed with {} image(s){}",
            job.id,
            count,
            if degraded { " (degraded watermark)" } else { "" }
        );
        Ok(ProcessOutcome::Completed {
            images: count,
            degraded,
        })
    }

    pub async fn record_attempt(
        &self,
        job_id: JobId,
        attempt: u32,
        error: &str,
    ) -> Result<(), GenerationError> {
        Ok(self.jobs.record_attempt(job_id, attempt, error).await?)
    }

    /// Refund the job's cost, then mark it failed.
    ///
    /// The refund is keyed by job id in the ledger, so repeating this after a crash
    /// between the two steps cannot pay out twice. Returns false if the job had
    /// already left `queued`.
    pub async fn fail_and_refund(
        &self,
        job_id: JobId,
        message: &str,
    ) -> Result<bool, GenerationError> {
        let Some(job) = self.jobs.get_job(job_id).await? else {
            return Ok(false);
        };
        if job.status != JobStatus::Queued {
            return Ok(false);
        }

        self.ledger
            .refund(
                job.user_id,
                job.cost,
                &format!("refund: generation job {} failed", job.id),
                Some(job.id),
            )
            .await?;

        let applied = self
            .jobs
            .transition_job(job.id, JobStatus::Queued, JobTransition::failed(message))
            .await?;
        if applied {
            self.metrics.refunds.inc();
            error!("Job {} failed and was refunded {} credits: {}", job.id, job.cost, message);
        }
        Ok(applied)
    }
}
