// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Persistence boundary for jobs, images, wallets and the credit ledger
//!
//! The relational store itself lives outside this crate. These traits name the
//! guarantees the pipeline relies on: atomic wallet read-modify-write, append-only
//! records and conditional job updates keyed by status.

pub mod memory;

use async_trait::async_trait;
use std::time::Duration;

use crate::errors::StoreError;
use crate::types::{
    CreditTransaction, DraftId, GeneratedImage, GenerationJob, ImageId, JobId, JobStatus,
    TransactionKind, UserId,
};

pub use memory::InMemoryStore;

/// Status change applied by `transition_job`
#[derive(Debug, Clone, PartialEq)]
pub struct JobTransition {
    pub status: JobStatus,
    pub error: Option<String>,
    pub degraded: bool,
}

impl JobTransition {
    pub fn completed(degraded: bool) -> Self {
        Self {
            status: JobStatus::Completed,
            error: None,
            degraded,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            error: Some(error.into()),
            degraded: false,
        }
    }
}

/// Result of `claim_job`
#[derive(Debug, Clone, PartialEq)]
pub enum JobClaim {
    /// The caller owns the job until it settles it or the lease runs out
    Claimed(GenerationJob),
    /// Another delivery holds a live claim
    InFlight,
    /// The job already left `queued`
    Settled(JobStatus),
    Missing,
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert_job(&self, job: GenerationJob) -> Result<(), StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<GenerationJob>, StoreError>;

    /// All jobs for a draft, oldest first
    async fn jobs_for_draft(&self, draft_id: DraftId) -> Result<Vec<GenerationJob>, StoreError>;

    /// Record a failed attempt without changing the status
    async fn record_attempt(&self, id: JobId, attempt: u32, error: &str)
        -> Result<(), StoreError>;

    /// Take exclusive ownership of a queued job for `lease`. Only one caller
    /// at a time gets `Claimed`, so duplicate deliveries never render twice.
    async fn claim_job(&self, id: JobId, lease: Duration) -> Result<JobClaim, StoreError>;

    /// Give up a claim without settling the job, e.g. before a retry
    async fn release_claim(&self, id: JobId) -> Result<(), StoreError>;

    /// Insert `images` and move the job from `queued` to `completed` in one
    /// step. Writes nothing and returns false if the job is no longer queued.
    async fn complete_job(
        &self,
        id: JobId,
        images: Vec<GeneratedImage>,
        degraded: bool,
    ) -> Result<bool, StoreError>;

    /// Apply `transition` only if the job is currently in `expected`.
    /// Returns false when the job was in any other status.
    async fn transition_job(
        &self,
        id: JobId,
        expected: JobStatus,
        transition: JobTransition,
    ) -> Result<bool, StoreError>;

    async fn get_image(&self, id: ImageId) -> Result<Option<GeneratedImage>, StoreError>;

    async fn images_for_job(&self, job_id: JobId) -> Result<Vec<GeneratedImage>, StoreError>;

    async fn set_selected_key(&self, id: ImageId, key: String) -> Result<(), StoreError>;
}

/// Ledger entry to append; `amount` is always positive and the kind gives the sign
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub amount: i64,
    pub kind: TransactionKind,
    pub note: String,
    pub job_id: Option<JobId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DebitOutcome {
    Applied(CreditTransaction),
    Insufficient { balance: i64 },
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Check `balance >= amount`, decrement and append in one atomic step
    async fn debit(&self, entry: NewTransaction) -> Result<DebitOutcome, StoreError>;

    /// Increment and append atomically. A refund for a job that already has one
    /// returns the existing entry and leaves the balance untouched.
    async fn credit(&self, entry: NewTransaction) -> Result<CreditTransaction, StoreError>;

    /// Current balance; wallets that were never touched hold 0
    async fn balance(&self, user_id: UserId) -> Result<i64, StoreError>;

    async fn transactions(&self, user_id: UserId) -> Result<Vec<CreditTransaction>, StoreError>;
}
