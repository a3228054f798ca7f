// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Generation orchestrator
//!
//! Admission runs in a fixed order, and every step before the reservation is
//! free of side effects:
//! 1. Validate parameters and resolve templates
//! 2. Replay a cached submission for a duplicate request
//! 3. Acquire the draft lock (`DraftBusy` if held)
//! 4. Safety-check the prompt
//! 5. Price the job and reserve credits
//! 6. Create the job record and dispatch it (queued or inline)
//! 7. Release the draft lock

pub mod pricing;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::errors::GenerationError;
use crate::idempotency::IdempotencyGuard;
use crate::ledger::CreditLedger;
use crate::lock::{DraftLock, DraftLockGuard};
use crate::metrics::PipelineMetrics;
use crate::queue::JobPayload;
use crate::safety::{PromptSafetyFilter, SafetyVerdict};
use crate::store::JobRepository;
use crate::types::{
    DraftId, GeneratedImage, GenerationJob, GenerationParams, ImageId, JobId, JobStatus, UserId,
};
use crate::worker::{DispatchMode, GenerationProcessor, JobDispatch};

pub use pricing::CostPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum PromptSource {
    Text(String),
    /// Id in the configured template catalog
    Template(String),
}

/// Everything about a render except the prompt
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    pub model: Option<String>,
    pub count: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        let defaults = GenerationParams::new("");
        Self {
            negative_prompt: None,
            width: defaults.width,
            height: defaults.height,
            steps: defaults.steps,
            guidance: defaults.guidance,
            model: None,
            count: defaults.count,
        }
    }
}

impl RenderSettings {
    fn into_params(self, prompt: String) -> GenerationParams {
        GenerationParams {
            prompt,
            negative_prompt: self.negative_prompt.filter(|n| !n.trim().is_empty()),
            width: self.width,
            height: self.height,
            steps: self.steps,
            guidance: self.guidance,
            model: self.model,
            count: self.count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitGeneration {
    pub user_id: UserId,
    pub draft_id: DraftId,
    pub prompt: PromptSource,
    pub settings: RenderSettings,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub job_id: JobId,
    pub cost: i64,
    /// True when this answers a duplicate of an earlier request
    pub replayed: bool,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<DispatchMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobWithImages {
    #[serde(flatten)]
    pub job: GenerationJob,
    pub images: Vec<GeneratedImage>,
}

/// Collaborators for `GenerationOrchestrator::new`
pub struct OrchestratorParts {
    pub jobs: Arc<dyn JobRepository>,
    pub ledger: Arc<CreditLedger>,
    pub idempotency: Arc<IdempotencyGuard>,
    pub lock: Arc<dyn DraftLock>,
    pub safety: PromptSafetyFilter,
    pub dispatch: Arc<dyn JobDispatch>,
    pub processor: Arc<GenerationProcessor>,
    pub artifacts: Arc<ArtifactStore>,
    pub pricing: CostPolicy,
    pub templates: HashMap<String, String>,
    pub metrics: Arc<PipelineMetrics>,
}

pub struct GenerationOrchestrator {
    jobs: Arc<dyn JobRepository>,
    ledger: Arc<CreditLedger>,
    idempotency: Arc<IdempotencyGuard>,
    lock: Arc<dyn DraftLock>,
    safety: PromptSafetyFilter,
    dispatch: Arc<dyn JobDispatch>,
    processor: Arc<GenerationProcessor>,
    artifacts: Arc<ArtifactStore>,
    pricing: CostPolicy,
    templates: HashMap<String, String>,
    metrics: Arc<PipelineMetrics>,
}

impl GenerationOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        Self {
            jobs: parts.jobs,
            ledger: parts.ledger,
            idempotency: parts.idempotency,
            lock: parts.lock,
            safety: parts.safety,
            dispatch: parts.dispatch,
            processor: parts.processor,
            artifacts: parts.artifacts,
            pricing: parts.pricing,
            templates: parts.templates,
            metrics: parts.metrics,
        }
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.ledger
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch.mode()
    }

    pub fn lock_backend(&self) -> &'static str {
        self.lock.backend()
    }

    pub async fn provider_healthy(&self) -> bool {
        self.processor.provider_healthy().await
    }

    /// Admit a paid generation request and hand it to the dispatcher
    #[tracing::instrument(
        skip(self, request),
        fields(user_id = %request.user_id, draft_id = %request.draft_id)
    )]
    pub async fn submit_generation(
        &self,
        request: SubmitGeneration,
    ) -> Result<Submission, GenerationError> {
        let result = self.submit(request).await;
        let outcome = match &result {
            Ok(submission) if submission.replayed => "cached",
            Ok(_) => "accepted",
            Err(e) => e.outcome_label(),
        };
        self.metrics.record_submission(outcome);
        result
    }

    async fn submit(&self, request: SubmitGeneration) -> Result<Submission, GenerationError> {
        let SubmitGeneration {
            user_id,
            draft_id,
            prompt,
            settings,
            idempotency_key,
        } = request;

        let prompt = self.resolve_prompt(prompt)?;
        let params = settings.into_params(prompt);
        params.validate().map_err(GenerationError::Validation)?;

        let key =
            IdempotencyGuard::key_for(idempotency_key.as_deref(), user_id, draft_id, &params);
        if let Some(replay) = self.replay(&key).await? {
            return Ok(replay);
        }

        let Some(guard) = DraftLockGuard::acquire(Arc::clone(&self.lock), draft_id).await? else {
            info!("Draft {} is busy, rejecting submission", draft_id);
            return Err(GenerationError::DraftBusy);
        };
        let result = self.admit(user_id, draft_id, params, key).await;
        guard.release().await;
        result
    }

    async fn admit(
        &self,
        user_id: UserId,
        draft_id: DraftId,
        params: GenerationParams,
        key: String,
    ) -> Result<Submission, GenerationError> {
        // a duplicate may have been admitted between the first lookup and the lock
        if let Some(replay) = self.replay(&key).await? {
            return Ok(replay);
        }

        if let SafetyVerdict::Unsafe { reason, .. } = self
            .safety
            .check_prompt(&params.prompt, params.negative_prompt.as_deref())
        {
            warn!("Prompt for draft {} rejected: {}", draft_id, reason);
            return Err(GenerationError::UnsafePrompt { reason });
        }

        let regen_count = self
            .jobs
            .jobs_for_draft(draft_id)
            .await?
            .iter()
            .filter(|job| job.status != JobStatus::Failed)
            .count();
        let cost = self.pricing.cost(regen_count as u32);

        let job_id = JobId::new();
        let reservation = self
            .ledger
            .reserve(
                user_id,
                cost,
                &format!("generation for draft {}", draft_id),
                Some(job_id),
            )
            .await?;

        let job = GenerationJob::queued(
            job_id,
            draft_id,
            user_id,
            self.processor.provider_name(),
            params,
            cost,
        );
        if let Err(e) = self.jobs.insert_job(job).await {
            warn!("Job record for draft {} not created, releasing credits: {}", draft_id, e);
            self.ledger
                .release(&reservation, &format!("refund: job {} was not created", job_id))
                .await?;
            return Err(e.into());
        }
        self.idempotency.remember(key, job_id, cost);
        info!(
            "Job {} admitted for draft {} at cost {} (regen {})",
            job_id, draft_id, cost, regen_count
        );

        let payload = JobPayload {
            job_id,
            draft_id,
            user_id,
        };
        match self.dispatch.dispatch(payload).await {
            Ok(receipt) => Ok(Submission {
                job_id,
                cost,
                replayed: false,
                status: receipt.status,
                mode: Some(receipt.mode),
            }),
            Err(e) => {
                warn!("Dispatch failed for job {}, compensating: {}", job_id, e);
                self.processor
                    .fail_and_refund(job_id, &format!("dispatch failed: {}", e))
                    .await?;
                Err(e)
            }
        }
    }

    async fn replay(&self, key: &str) -> Result<Option<Submission>, GenerationError> {
        let Some(cached) = self.idempotency.lookup(key) else {
            return Ok(None);
        };
        let status = self
            .jobs
            .get_job(cached.job_id)
            .await?
            .map(|job| job.status)
            .unwrap_or(JobStatus::Queued);
        info!("Replaying job {} for duplicate request", cached.job_id);
        Ok(Some(Submission {
            job_id: cached.job_id,
            cost: cached.cost,
            replayed: true,
            status,
            mode: None,
        }))
    }

    fn resolve_prompt(&self, prompt: PromptSource) -> Result<String, GenerationError> {
        match prompt {
            PromptSource::Text(text) => Ok(text),
            PromptSource::Template(id) => self
                .templates
                .get(&id)
                .cloned()
                .ok_or_else(|| GenerationError::Validation(format!("unknown template '{}'", id))),
        }
    }

    /// Jobs for a draft, newest first, with their images
    pub async fn list_results(
        &self,
        draft_id: DraftId,
    ) -> Result<Vec<JobWithImages>, GenerationError> {
        let mut jobs = self.jobs.jobs_for_draft(draft_id).await?;
        jobs.reverse();

        let mut results = Vec::with_capacity(jobs.len());
        for job in jobs {
            let images = self.jobs.images_for_job(job.id).await?;
            results.push(JobWithImages { job, images });
        }
        Ok(results)
    }

    /// Promote an image's original to a permanent key; returns its public URL
    #[tracing::instrument(skip(self))]
    pub async fn select_result(
        &self,
        draft_id: DraftId,
        image_id: ImageId,
    ) -> Result<String, GenerationError> {
        let image = self
            .jobs
            .get_image(image_id)
            .await?
            .filter(|image| image.draft_id == draft_id)
            .ok_or_else(|| {
                GenerationError::NotFound(format!("image {} in draft {}", image_id, draft_id))
            })?;

        if !image.is_selected() {
            let permanent_key = self.artifacts.promote(&image.private_key, draft_id).await?;
            self.jobs.set_selected_key(image.id, permanent_key).await?;
            info!("Image {} selected for draft {}", image.id, draft_id);
        }
        Ok(image.public_url)
    }
}
