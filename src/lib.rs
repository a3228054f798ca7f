// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod artifacts;
pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod idempotency;
pub mod ledger;
pub mod lock;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod queue;
pub mod safety;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod worker;

// Re-export the types most callers need
pub use bootstrap::Pipeline;
pub use config::PipelineConfig;
pub use errors::{
    ArtifactError, ConfigError, GenerationError, LockError, ProviderError, QueueError, StoreError,
};
pub use orchestrator::{
    GenerationOrchestrator, JobWithImages, OrchestratorParts, PromptSource, SubmitGeneration,
    Submission,
};
pub use types::{
    CreditTransaction, DraftId, GeneratedImage, GenerationJob, GenerationParams, ImageId, JobId,
    JobStatus, TransactionKind, UserId,
};
