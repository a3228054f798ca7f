// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Domain records shared by the ledger, the job store and the orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Customer draft that images are generated for
    DraftId
);
uuid_id!(
    /// Requesting user; also the wallet identity
    UserId
);
uuid_id!(JobId);
uuid_id!(ImageId);

pub const MIN_DIMENSION: u32 = 256;
pub const MAX_DIMENSION: u32 = 2048;
pub const MAX_STEPS: u32 = 100;
pub const MAX_IMAGES_PER_JOB: u32 = 4;
pub const MAX_GUIDANCE: f32 = 30.0;
pub const MAX_PROMPT_CHARS: usize = 2000;

/// Rendering parameters that travel with a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub count: u32,
}

impl GenerationParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width: 1024,
            height: 1024,
            steps: 30,
            guidance: 7.0,
            model: None,
            count: 1,
        }
    }

    /// Validate the parameter ranges. Returns a client-facing message on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("prompt must not be empty".to_string());
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(format!(
                "prompt exceeds {} characters",
                MAX_PROMPT_CHARS
            ));
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&value) {
                return Err(format!(
                    "{} must be between {} and {}, got {}",
                    name, MIN_DIMENSION, MAX_DIMENSION, value
                ));
            }
            if value % 8 != 0 {
                return Err(format!("{} must be a multiple of 8, got {}", name, value));
            }
        }
        if self.steps == 0 || self.steps > MAX_STEPS {
            return Err(format!(
                "steps must be between 1 and {}, got {}",
                MAX_STEPS, self.steps
            ));
        }
        if !(0.0..=MAX_GUIDANCE).contains(&self.guidance) {
            return Err(format!(
                "guidance must be between 0 and {}, got {}",
                MAX_GUIDANCE, self.guidance
            ));
        }
        if self.count == 0 || self.count > MAX_IMAGES_PER_JOB {
            return Err(format!(
                "count must be between 1 and {}, got {}",
                MAX_IMAGES_PER_JOB, self.count
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Queued)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One paid request to render `params.count` images for a draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    pub id: JobId,
    pub draft_id: DraftId,
    pub user_id: UserId,
    pub provider: String,
    pub params: GenerationParams,
    pub cost: i64,
    pub status: JobStatus,
    pub error: Option<String>,
    pub attempts: u32,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    pub fn queued(
        id: JobId,
        draft_id: DraftId,
        user_id: UserId,
        provider: impl Into<String>,
        params: GenerationParams,
        cost: i64,
    ) -> Self {
        Self {
            id,
            draft_id,
            user_id,
            provider: provider.into(),
            params,
            cost,
            status: JobStatus::Queued,
            error: None,
            attempts: 0,
            degraded: false,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// A rendered image. The storage keys stay server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub id: ImageId,
    pub draft_id: DraftId,
    pub job_id: JobId,
    #[serde(skip_serializing, default)]
    pub private_key: String,
    pub public_url: String,
    pub watermarked: bool,
    #[serde(skip_serializing, default)]
    pub selected_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl GeneratedImage {
    pub fn is_selected(&self) -> bool {
        self.selected_key.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Spend,
    Refund,
    Purchase,
    Gift,
}

impl TransactionKind {
    /// Sign applied to the (positive) amount when the entry is written
    pub fn sign(self) -> i64 {
        match self {
            TransactionKind::Spend => -1,
            TransactionKind::Refund | TransactionKind::Purchase | TransactionKind::Gift => 1,
        }
    }
}

/// Append-only ledger entry. `delta` is signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditTransaction {
    pub id: u64,
    pub user_id: UserId,
    pub delta: i64,
    pub kind: TransactionKind,
    pub note: String,
    pub job_id: Option<JobId>,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}
