// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Error types for the image generation pipeline
//!
//! One enum per concern:
//! - `ProviderError` for the external rendering endpoint
//! - `StoreError`, `LockError`, `QueueError`, `ArtifactError` for infrastructure
//! - `GenerationError` for everything the orchestrator reports to callers

use thiserror::Error;

/// Errors from the image provider adapter. Messages never include response bodies.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// No API key configured; never retried
    #[error("image provider credential is not configured")]
    MissingCredential,

    #[error("image provider returned HTTP {0}")]
    Status(u16),

    #[error("image provider timed out after {0}s")]
    Timeout(u64),

    #[error("image provider request failed: {0}")]
    Transport(String),

    #[error("image provider returned no images")]
    EmptyResponse,

    /// All attempts failed; carries the last sanitized failure
    #[error("image provider failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LockError {
    #[error("lock backend unavailable: {0}")]
    Unavailable(String),

    #[error("lock backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("queue backend unavailable: {0}")]
    Unavailable(String),

    #[error("queue is closed")]
    Closed,

    #[error("failed to encode queue payload: {0}")]
    Encoding(String),

    #[error("queue backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("watermark task failed: {0}")]
    Task(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Errors surfaced by `GenerationOrchestrator` and the job processor
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("insufficient credits: {shortfall} more required")]
    InsufficientFunds { shortfall: i64 },

    #[error("prompt rejected by safety filter: {reason}")]
    UnsafePrompt { reason: String },

    #[error("a generation is already running for this draft")]
    DraftBusy,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("artifact storage failed: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("job queue failed: {0}")]
    Queue(#[from] QueueError),

    #[error("draft lock failed: {0}")]
    Lock(#[from] LockError),
}

impl GenerationError {
    /// Label used for the submissions metric
    pub fn outcome_label(&self) -> &'static str {
        match self {
            GenerationError::InsufficientFunds { .. } => "insufficient_funds",
            GenerationError::UnsafePrompt { .. } => "unsafe_prompt",
            GenerationError::DraftBusy => "busy",
            GenerationError::Validation(_) => "invalid",
            GenerationError::NotFound(_) => "not_found",
            _ => "error",
        }
    }
}
