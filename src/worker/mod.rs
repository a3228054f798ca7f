// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Queue consumer for generation jobs
//!
//! Runs a fixed number of slots. Each delivery is processed once per attempt;
//! failures are rescheduled with the queue's backoff until the final attempt,
//! which refunds the job and marks it failed. A delivery whose job record is
//! unknown to this process is treated as a failure, so it ends up in the
//! failed list rather than being acknowledged.

pub mod dispatch;
pub mod processor;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::GenerationError;
use crate::metrics::PipelineMetrics;
use crate::queue::{Delivery, JobQueue};

pub use dispatch::{DispatchMode, DispatchReceipt, InlineDispatch, JobDispatch, QueuedDispatch};
pub use processor::{GenerationProcessor, ProcessOutcome};

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub concurrency: usize,
    /// How long one `next` call waits before checking for shutdown again
    pub poll_wait: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_wait: Duration::from_secs(1),
        }
    }
}

/// What happened to a delivery after one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Completed(ProcessOutcome),
    Rescheduled { attempt: u32, delay: Duration },
    Failed { refunded: bool },
}

pub struct GenerationWorker {
    queue: Arc<dyn JobQueue>,
    processor: Arc<GenerationProcessor>,
    metrics: Arc<PipelineMetrics>,
    config: WorkerConfig,
}

impl GenerationWorker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<GenerationProcessor>,
        metrics: Arc<PipelineMetrics>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            processor,
            metrics,
            config,
        }
    }

    /// Consume until `shutdown` fires, then wait for in-flight deliveries
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let slots = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(slots));
        info!(
            "Generation worker started: backend={}, slots={}",
            self.queue.backend(),
            slots
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.queue.next(self.config.poll_wait) => next,
            };

            match next {
                Ok(Some(delivery)) => {
                    let worker = Arc::clone(&self);
                    tokio::spawn(async move {
                        let _permit = permit;
                        worker.handle(delivery).await;
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Queue receive failed: {}", e);
                    tokio::time::sleep(self.config.poll_wait).await;
                }
            }
        }

        // all permits back means every spawned delivery has finished
        if let Ok(all) = semaphore.acquire_many(slots as u32).await {
            drop(all);
        }
        info!("Generation worker stopped");
    }

    /// Process one delivery and settle it with the queue
    #[tracing::instrument(
        skip(self, delivery),
        fields(job_id = %delivery.payload.job_id, attempt = delivery.attempt)
    )]
    pub async fn handle(&self, delivery: Delivery) -> DeliveryResult {
        let job_id = delivery.payload.job_id;
        match self.processor.process(job_id).await {
            Ok(outcome) => {
                if let Err(e) = self.queue.complete(&delivery).await {
                    warn!("Failed to mark delivery {} complete: {}", delivery.id, e);
                }
                DeliveryResult::Completed(outcome)
            }
            Err(e) => self.handle_failure(delivery, e).await,
        }
    }

    async fn handle_failure(&self, delivery: Delivery, err: GenerationError) -> DeliveryResult {
        let job_id = delivery.payload.job_id;
        let message = err.to_string();
        error!(
            "Job {} attempt {}/{} failed: {}",
            job_id, delivery.attempt, delivery.options.max_attempts, message
        );
        self.metrics.job_failures.inc();

        if let Err(e) = self
            .processor
            .record_attempt(job_id, delivery.attempt, &message)
            .await
        {
            warn!("Could not record attempt for job {}: {}", job_id, e);
        }

        if !delivery.is_final_attempt() {
            let delay = delivery.retry_delay();
            let attempt = delivery.attempt + 1;
            match self.queue.retry(delivery.clone(), delay).await {
                Ok(()) => return DeliveryResult::Rescheduled { attempt, delay },
                // could not reschedule; settle now so the credits are not stranded
                Err(e) => error!("Failed to reschedule job {}: {}", job_id, e),
            }
        }

        let refunded = match self.processor.fail_and_refund(job_id, &message).await {
            Ok(refunded) => refunded,
            Err(e) => {
                error!("Refund for job {} failed, needs reconciliation: {}", job_id, e);
                false
            }
        };
        if let Err(e) = self.queue.fail(&delivery, &message).await {
            warn!("Failed to move delivery {} to failed: {}", delivery.id, e);
        }
        DeliveryResult::Failed { refunded }
    }
}
