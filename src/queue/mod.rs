// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Durable producer/consumer queue for generation jobs
//!
//! Deliveries carry their own retry bookkeeping (attempt number and options),
//! so a worker can decide between rescheduling and final failure without
//! asking the backend.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_queue;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::errors::QueueError;
use crate::types::{DraftId, JobId, UserId};

pub use memory::InMemoryJobQueue;

/// Work item; the job record itself stays in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub job_id: JobId,
    pub draft_id: DraftId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay_ms: u64 },
    /// `base * 2^(attempt - 1)`
    Exponential { base_ms: u64 },
}

impl Backoff {
    /// Delay before retrying after failed attempt `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match *self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential { base_ms } => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueOptions {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// How many completed deliveries the backend retains
    pub keep_completed: usize,
    /// How many failed deliveries the backend retains
    pub keep_failed: usize,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential { base_ms: 3000 },
            keep_completed: 100,
            keep_failed: 500,
        }
    }
}

/// One attempt at a payload, as handed to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: String,
    pub payload: JobPayload,
    /// 1-indexed attempt this delivery represents
    pub attempt: u32,
    pub options: EnqueueOptions,
}

impl Delivery {
    pub fn first(payload: JobPayload, options: EnqueueOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            attempt: 1,
            options,
        }
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.options.max_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.options.backoff.delay_for_attempt(self.attempt)
    }

    pub(crate) fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Returns the delivery id
    async fn enqueue(&self, payload: JobPayload, options: EnqueueOptions)
        -> Result<String, QueueError>;

    /// Wait up to `wait` for the next ready delivery
    async fn next(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Reschedule as the next attempt after `delay`
    async fn retry(&self, delivery: Delivery, delay: Duration) -> Result<(), QueueError>;

    /// Move to the failed set; no further attempts
    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError>;

    fn backend(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// Redis when reachable, otherwise inline processing
    Auto,
    /// Process-local queue; jobs do not survive a restart
    Memory,
    /// Always process in the request
    Inline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub mode: QueueMode,
    pub redis_url: Option<String>,
    /// Namespace for the Redis keys. Job records are process-local, so every
    /// process sharing one Redis needs its own prefix.
    pub key_prefix: String,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub keep_completed: usize,
    pub keep_failed: usize,
    pub worker_concurrency: usize,
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let options = EnqueueOptions::default();
        Self {
            mode: QueueMode::Auto,
            redis_url: None,
            key_prefix: "imagegen".to_string(),
            max_attempts: options.max_attempts,
            backoff_base_ms: 3000,
            keep_completed: options.keep_completed,
            keep_failed: options.keep_failed,
            worker_concurrency: 2,
            poll_interval_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn enqueue_options(&self) -> EnqueueOptions {
        EnqueueOptions {
            max_attempts: self.max_attempts.max(1),
            backoff: Backoff::Exponential {
                base_ms: self.backoff_base_ms,
            },
            keep_completed: self.keep_completed,
            keep_failed: self.keep_failed,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Select the queue backend. `None` means no queue is available and
/// dispatch must run inline.
pub async fn connect(config: &QueueConfig) -> Option<Arc<dyn JobQueue>> {
    match config.mode {
        QueueMode::Inline => {
            info!("Job dispatch: inline (configured)");
            None
        }
        QueueMode::Memory => {
            info!("Job queue backend: in-memory");
            Some(Arc::new(InMemoryJobQueue::new()))
        }
        QueueMode::Auto => {
            let Some(url) = config.redis_url.as_deref().filter(|u| !u.is_empty()) else {
                warn!("No queue configured, generation will run inline");
                return None;
            };
            #[cfg(feature = "redis")]
            let connected = redis_queue::RedisJobQueue::connect(
                url,
                &config.key_prefix,
                config.poll_interval(),
            )
            .await;
            #[cfg(feature = "redis")]
            match connected {
                Ok(queue) => {
                    info!("Job queue backend: redis");
                    return Some(Arc::new(queue));
                }
                Err(e) => warn!("Queue store unreachable, generation will run inline: {}", e),
            }
            #[cfg(not(feature = "redis"))]
            warn!(
                "Queue {} configured but the redis feature is disabled, generation will run inline",
                url
            );
            None
        }
    }
}
