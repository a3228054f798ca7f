// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Redis job queue
//!
//! Layout under the configured prefix (default `imagegen`):
//! - `{prefix}:jobs:ready` list of deliveries waiting for a worker
//! - `{prefix}:jobs:processing` deliveries taken by a worker and not yet settled
//! - `{prefix}:jobs:delayed` sorted set scored by the due time (unix ms)
//! - `{prefix}:jobs:completed` / `{prefix}:jobs:failed` capped history lists
//!
//! `next` moves an entry from ready to processing with `LMOVE`, and settling
//! removes it again. Entries still in processing when a queue connects were
//! orphaned by a crashed worker and go back to ready.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{Delivery, EnqueueOptions, JobPayload, JobQueue};
use crate::errors::QueueError;

const PROMOTE_BATCH: usize = 32;

struct Keys {
    ready: String,
    processing: String,
    delayed: String,
    completed: String,
    failed: String,
}

impl Keys {
    fn new(prefix: &str) -> Self {
        let key = |name: &str| format!("{}:jobs:{}", prefix, name);
        Self {
            ready: key("ready"),
            processing: key("processing"),
            delayed: key("delayed"),
            completed: key("completed"),
            failed: key("failed"),
        }
    }
}

pub struct RedisJobQueue {
    conn: MultiplexedConnection,
    keys: Keys,
    poll_interval: Duration,
}

fn backend_error(e: redis::RedisError) -> QueueError {
    QueueError::Backend(e.to_string())
}

/// Deliveries are plain structs, so encoding is deterministic and the encoded
/// form doubles as the processing-list entry
fn encode(delivery: &Delivery) -> Result<String, QueueError> {
    serde_json::to_string(delivery).map_err(|e| QueueError::Encoding(e.to_string()))
}

impl RedisJobQueue {
    pub async fn connect(
        url: &str,
        key_prefix: &str,
        poll_interval: Duration,
    ) -> Result<Self, QueueError> {
        let client =
            redis::Client::open(url).map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        let queue = Self {
            conn,
            keys: Keys::new(key_prefix),
            poll_interval,
        };
        let recovered = queue.requeue_in_flight().await?;
        if recovered > 0 {
            info!(
                "Requeued {} delivery(ies) left in processing by a previous worker",
                recovered
            );
        }
        Ok(queue)
    }

    /// Move every processing entry back to the front of the ready list
    async fn requeue_in_flight(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let mut moved = 0;
        loop {
            let entry: Option<String> = redis::cmd("LMOVE")
                .arg(&self.keys.processing)
                .arg(&self.keys.ready)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await
                .map_err(backend_error)?;
            if entry.is_none() {
                return Ok(moved);
            }
            moved += 1;
        }
    }

    /// Drop a settled delivery from the processing list
    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("LREM")
            .arg(&self.keys.processing)
            .arg(1)
            .arg(encode(delivery)?)
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;
        if removed == 0 {
            debug!("Delivery {} was not in the processing list", delivery.id);
        }
        Ok(())
    }

    /// Move due entries from the delayed set onto the ready list.
    /// ZREM decides ownership so concurrent workers never promote twice.
    async fn promote_due(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.keys.delayed)
            .arg("-inf")
            .arg(now)
            .arg("LIMIT")
            .arg(0)
            .arg(PROMOTE_BATCH)
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;

        for member in due {
            let removed: i64 = redis::cmd("ZREM")
                .arg(&self.keys.delayed)
                .arg(&member)
                .query_async(&mut conn)
                .await
                .map_err(backend_error)?;
            if removed == 1 {
                let _: i64 = redis::cmd("RPUSH")
                    .arg(&self.keys.ready)
                    .arg(&member)
                    .query_async(&mut conn)
                    .await
                    .map_err(backend_error)?;
            }
        }
        Ok(())
    }

    async fn push_history(&self, key: &str, entry: String, keep: usize) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .cmd("LPUSH")
            .arg(key)
            .arg(entry)
            .ignore()
            .cmd("LTRIM")
            .arg(key)
            .arg(0)
            .arg(keep.saturating_sub(1) as i64)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend_error)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(
        &self,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<String, QueueError> {
        let delivery = Delivery::first(payload, options);
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("RPUSH")
            .arg(&self.keys.ready)
            .arg(encode(&delivery)?)
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;
        debug!("Enqueued delivery {} for job {}", delivery.id, delivery.payload.job_id);
        Ok(delivery.id)
    }

    async fn next(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            self.promote_due().await?;

            let mut conn = self.conn.clone();
            let raw: Option<String> = redis::cmd("LMOVE")
                .arg(&self.keys.ready)
                .arg(&self.keys.processing)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(backend_error)?;

            if let Some(raw) = raw {
                match serde_json::from_str::<Delivery>(&raw) {
                    Ok(delivery) => return Ok(Some(delivery)),
                    Err(e) => {
                        warn!("Dropping undecodable queue entry: {}", e);
                        let _: i64 = redis::cmd("LREM")
                            .arg(&self.keys.processing)
                            .arg(1)
                            .arg(&raw)
                            .query_async(&mut conn)
                            .await
                            .map_err(backend_error)?;
                        continue;
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.push_history(
            &self.keys.completed,
            encode(delivery)?,
            delivery.options.keep_completed,
        )
        .await?;
        self.acknowledge(delivery).await
    }

    async fn retry(&self, delivery: Delivery, delay: Duration) -> Result<(), QueueError> {
        let next = delivery.clone().next_attempt();
        let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(&self.keys.delayed)
            .arg(due)
            .arg(encode(&next)?)
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;
        self.acknowledge(&delivery).await
    }

    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError> {
        let entry = serde_json::json!({
            "delivery": delivery,
            "error": error,
            "failedAt": Utc::now().to_rfc3339(),
        })
        .to_string();
        self.push_history(&self.keys.failed, entry, delivery.options.keep_failed)
            .await?;
        self.acknowledge(delivery).await
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
