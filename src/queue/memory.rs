// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Process-local job queue over a tokio channel

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::{Delivery, EnqueueOptions, JobPayload, JobQueue};
use crate::errors::QueueError;

/// Deliveries live only as long as the process. Retries are re-sent on the
/// channel once their delay elapses.
pub struct InMemoryJobQueue {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    completed: StdMutex<VecDeque<Delivery>>,
    failed: StdMutex<VecDeque<(Delivery, String)>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            completed: StdMutex::new(VecDeque::new()),
            failed: StdMutex::new(VecDeque::new()),
        }
    }

    pub fn completed_count(&self) -> usize {
        self.completed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn failed_deliveries(&self) -> Vec<(Delivery, String)> {
        self.failed
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn send(&self, delivery: Delivery) -> Result<(), QueueError> {
        self.tx.send(delivery).map_err(|_| QueueError::Closed)
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn push_capped<T>(list: &StdMutex<VecDeque<T>>, item: T, keep: usize) {
    let mut list = list.lock().unwrap_or_else(|p| p.into_inner());
    list.push_front(item);
    list.truncate(keep);
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        payload: JobPayload,
        options: EnqueueOptions,
    ) -> Result<String, QueueError> {
        let delivery = Delivery::first(payload, options);
        let id = delivery.id.clone();
        self.send(delivery)?;
        Ok(id)
    }

    async fn next(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(wait, rx.recv()).await {
            Ok(Some(delivery)) => Ok(Some(delivery)),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }

    async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        push_capped(
            &self.completed,
            delivery.clone(),
            delivery.options.keep_completed,
        );
        Ok(())
    }

    async fn retry(&self, delivery: Delivery, delay: Duration) -> Result<(), QueueError> {
        let tx = self.tx.clone();
        let next = delivery.next_attempt();
        debug!(
            "Rescheduling delivery {} as attempt {} in {:?}",
            next.id, next.attempt, delay
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // receiver gone means the queue was dropped; nothing left to retry into
            let _ = tx.send(next);
        });
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError> {
        push_capped(
            &self.failed,
            (delivery.clone(), error.to_string()),
            delivery.options.keep_failed,
        );
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
