// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! How an admitted job reaches the processor

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::processor::{GenerationProcessor, ProcessOutcome};
use crate::errors::GenerationError;
use crate::queue::{EnqueueOptions, JobPayload, JobQueue};
use crate::types::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Queued,
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub mode: DispatchMode,
    /// Job status once dispatch returned
    pub status: JobStatus,
}

#[async_trait]
pub trait JobDispatch: Send + Sync {
    /// An `Err` means the job never reached a processor and must be compensated
    async fn dispatch(&self, payload: JobPayload) -> Result<DispatchReceipt, GenerationError>;

    fn mode(&self) -> DispatchMode;
}

/// Hands the job to the durable queue; a worker picks it up later
pub struct QueuedDispatch {
    queue: Arc<dyn JobQueue>,
    options: EnqueueOptions,
}

impl QueuedDispatch {
    pub fn new(queue: Arc<dyn JobQueue>, options: EnqueueOptions) -> Self {
        Self { queue, options }
    }
}

#[async_trait]
impl JobDispatch for QueuedDispatch {
    async fn dispatch(&self, payload: JobPayload) -> Result<DispatchReceipt, GenerationError> {
        let job_id = payload.job_id;
        let delivery_id = self.queue.enqueue(payload, self.options).await?;
        debug!(
            "Job {} enqueued on {} as {}",
            job_id,
            self.queue.backend(),
            delivery_id
        );
        Ok(DispatchReceipt {
            mode: DispatchMode::Queued,
            status: JobStatus::Queued,
        })
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Queued
    }
}

/// Runs the processor in the request. One attempt, refunded immediately on failure.
pub struct InlineDispatch {
    processor: Arc<GenerationProcessor>,
}

impl InlineDispatch {
    pub fn new(processor: Arc<GenerationProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl JobDispatch for InlineDispatch {
    async fn dispatch(&self, payload: JobPayload) -> Result<DispatchReceipt, GenerationError> {
        let job_id = payload.job_id;
        let status = match self.processor.process(job_id).await {
            Ok(ProcessOutcome::Completed { .. }) => JobStatus::Completed,
            Ok(ProcessOutcome::Skipped { status }) => status,
            Ok(ProcessOutcome::InFlight) => JobStatus::Queued,
            Err(e) => {
                warn!("Inline generation failed for job {}: {}", job_id, e);
                let message = e.to_string();
                self.processor.record_attempt(job_id, 1, &message).await?;
                self.processor.fail_and_refund(job_id, &message).await?;
                JobStatus::Failed
            }
        };
        Ok(DispatchReceipt {
            mode: DispatchMode::Inline,
            status,
        })
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Inline
    }
}
