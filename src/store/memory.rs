// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Process-local store used by the binary and by tests

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use super::{DebitOutcome, JobClaim, JobRepository, JobTransition, NewTransaction, WalletStore};
use crate::errors::StoreError;
use crate::types::{
    CreditTransaction, DraftId, GeneratedImage, GenerationJob, ImageId, JobId, JobStatus,
    TransactionKind, UserId,
};

#[derive(Default)]
struct LedgerState {
    balances: HashMap<UserId, i64>,
    transactions: Vec<CreditTransaction>,
    next_id: u64,
}

impl LedgerState {
    fn append(&mut self, entry: NewTransaction, delta: i64) -> CreditTransaction {
        let balance = self.balances.entry(entry.user_id).or_insert(0);
        *balance += delta;
        self.next_id += 1;
        let tx = CreditTransaction {
            id: self.next_id,
            user_id: entry.user_id,
            delta,
            kind: entry.kind,
            note: entry.note,
            job_id: entry.job_id,
            balance_after: *balance,
            created_at: Utc::now(),
        };
        self.transactions.push(tx.clone());
        tx
    }
}

#[derive(Default)]
struct JobTable {
    jobs: HashMap<JobId, GenerationJob>,
    /// Lease expiry per claimed job
    claims: HashMap<JobId, Instant>,
}

impl JobTable {
    fn get_mut(&mut self, id: JobId) -> Result<&mut GenerationJob, StoreError> {
        self.jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))
    }
}

/// In-memory jobs, images and wallets.
///
/// The whole ledger sits behind one mutex so check-and-decrement and the
/// appended entry are a single atomic step. Job claims share the job table's
/// lock for the same reason.
#[derive(Default)]
pub struct InMemoryStore {
    ledger: Mutex<LedgerState>,
    jobs: RwLock<JobTable>,
    images: RwLock<Vec<GeneratedImage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.jobs.len()
    }
}

#[async_trait]
impl JobRepository for InMemoryStore {
    async fn insert_job(&self, job: GenerationJob) -> Result<(), StoreError> {
        let mut table = self.jobs.write().await;
        if table.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {}", job.id)));
        }
        table.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<GenerationJob>, StoreError> {
        Ok(self.jobs.read().await.jobs.get(&id).cloned())
    }

    async fn jobs_for_draft(&self, draft_id: DraftId) -> Result<Vec<GenerationJob>, StoreError> {
        let table = self.jobs.read().await;
        let mut found: Vec<GenerationJob> = table
            .jobs
            .values()
            .filter(|job| job.draft_id == draft_id)
            .cloned()
            .collect();
        found.sort_by_key(|job| job.created_at);
        Ok(found)
    }

    async fn record_attempt(
        &self,
        id: JobId,
        attempt: u32,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut table = self.jobs.write().await;
        let job = table.get_mut(id)?;
        job.attempts = job.attempts.max(attempt);
        job.error = Some(error.to_string());
        Ok(())
    }

    async fn claim_job(&self, id: JobId, lease: Duration) -> Result<JobClaim, StoreError> {
        let mut table = self.jobs.write().await;
        let Some(job) = table.jobs.get(&id).cloned() else {
            return Ok(JobClaim::Missing);
        };
        if job.status != JobStatus::Queued {
            return Ok(JobClaim::Settled(job.status));
        }
        let now = Instant::now();
        if table.claims.get(&id).is_some_and(|until| *until > now) {
            return Ok(JobClaim::InFlight);
        }
        table.claims.insert(id, now + lease);
        Ok(JobClaim::Claimed(job))
    }

    async fn release_claim(&self, id: JobId) -> Result<(), StoreError> {
        self.jobs.write().await.claims.remove(&id);
        Ok(())
    }

    async fn complete_job(
        &self,
        id: JobId,
        images: Vec<GeneratedImage>,
        degraded: bool,
    ) -> Result<bool, StoreError> {
        let mut table = self.jobs.write().await;
        let job = table.get_mut(id)?;
        if job.status != JobStatus::Queued {
            return Ok(false);
        }
        // job table stays locked until the rows are in, so no reader sees a
        // completed job without its images
        self.images.write().await.extend(images);
        job.status = JobStatus::Completed;
        job.error = None;
        job.degraded = degraded;
        job.finished_at = Some(Utc::now());
        table.claims.remove(&id);
        Ok(true)
    }

    async fn transition_job(
        &self,
        id: JobId,
        expected: JobStatus,
        transition: JobTransition,
    ) -> Result<bool, StoreError> {
        let mut table = self.jobs.write().await;
        let job = table.get_mut(id)?;
        if job.status != expected {
            return Ok(false);
        }
        job.status = transition.status;
        if transition.error.is_some() || transition.status == JobStatus::Completed {
            job.error = transition.error;
        }
        job.degraded = transition.degraded;
        if transition.status.is_terminal() {
            job.finished_at = Some(Utc::now());
            table.claims.remove(&id);
        }
        Ok(true)
    }

    async fn get_image(&self, id: ImageId) -> Result<Option<GeneratedImage>, StoreError> {
        Ok(self
            .images
            .read()
            .await
            .iter()
            .find(|image| image.id == id)
            .cloned())
    }

    async fn images_for_job(&self, job_id: JobId) -> Result<Vec<GeneratedImage>, StoreError> {
        Ok(self
            .images
            .read()
            .await
            .iter()
            .filter(|image| image.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn set_selected_key(&self, id: ImageId, key: String) -> Result<(), StoreError> {
        let mut images = self.images.write().await;
        let image = images
            .iter_mut()
            .find(|image| image.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("image {}", id)))?;
        image.selected_key = Some(key);
        Ok(())
    }
}

#[async_trait]
impl WalletStore for InMemoryStore {
    async fn debit(&self, entry: NewTransaction) -> Result<DebitOutcome, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let balance = ledger.balances.get(&entry.user_id).copied().unwrap_or(0);
        if balance < entry.amount {
            return Ok(DebitOutcome::Insufficient { balance });
        }
        let delta = entry.kind.sign() * entry.amount;
        Ok(DebitOutcome::Applied(ledger.append(entry, delta)))
    }

    async fn credit(&self, entry: NewTransaction) -> Result<CreditTransaction, StoreError> {
        let mut ledger = self.ledger.lock().await;
        if entry.kind == TransactionKind::Refund {
            if let Some(job_id) = entry.job_id {
                let existing = ledger
                    .transactions
                    .iter()
                    .find(|tx| tx.kind == TransactionKind::Refund && tx.job_id == Some(job_id));
                if let Some(existing) = existing {
                    return Ok(existing.clone());
                }
            }
        }
        let delta = entry.kind.sign() * entry.amount;
        Ok(ledger.append(entry, delta))
    }

    async fn balance(&self, user_id: UserId) -> Result<i64, StoreError> {
        Ok(self
            .ledger
            .lock()
            .await
            .balances
            .get(&user_id)
            .copied()
            .unwrap_or(0))
    }

    async fn transactions(&self, user_id: UserId) -> Result<Vec<CreditTransaction>, StoreError> {
        Ok(self
            .ledger
            .lock()
            .await
            .transactions
            .iter()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect())
    }
}
