// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Wires the pipeline together from a `PipelineConfig`
//!
//! Backend choice (shared vs local lock, queued vs inline dispatch) happens once
//! here through `lock::connect` and `queue::connect`. Inline dispatch renders
//! while the draft lock is held, so its lock TTL is raised to outlast the
//! provider's worst case.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifacts::{
    ArtifactConfig, ArtifactStore, BlobStore, FsBlobStore, LogoWatermarker, Watermarker,
};
use crate::config::{PipelineConfig, WalletConfig};
use crate::idempotency::IdempotencyGuard;
use crate::ledger::CreditLedger;
use crate::lock::{self, DraftLock, LockConfig};
use crate::metrics::PipelineMetrics;
use crate::orchestrator::{GenerationOrchestrator, OrchestratorParts};
use crate::provider::{HttpImageProvider, ImageProvider};
use crate::queue::{self, JobQueue};
use crate::safety::PromptSafetyFilter;
use crate::store::InMemoryStore;
use crate::types::{TransactionKind, UserId};
use crate::worker::processor::DEFAULT_CLAIM_LEASE;
use crate::worker::{
    GenerationProcessor, GenerationWorker, InlineDispatch, JobDispatch, QueuedDispatch,
    WorkerConfig,
};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);
/// Headroom over the provider's worst case for persisting and bookkeeping
const RENDER_MARGIN: Duration = Duration::from_secs(60);

pub struct Pipeline {
    pub orchestrator: Arc<GenerationOrchestrator>,
    /// Present when jobs go through a queue
    pub worker: Option<Arc<GenerationWorker>>,
    pub queue: Option<Arc<dyn JobQueue>>,
    pub store: Arc<InMemoryStore>,
    pub ledger: Arc<CreditLedger>,
    pub idempotency: Arc<IdempotencyGuard>,
    pub lock: Arc<dyn DraftLock>,
    pub metrics: Arc<PipelineMetrics>,
}

impl Pipeline {
    /// Build with the HTTP provider and filesystem blob store from `config`
    pub async fn build(config: &PipelineConfig) -> Result<Self> {
        let metrics = Arc::new(PipelineMetrics::new().context("registering pipeline metrics")?);
        let provider = HttpImageProvider::new(&config.provider)
            .context("building image provider client")?
            .with_metrics(Arc::clone(&metrics));
        let blobs = FsBlobStore::new(
            &config.artifacts.private_root,
            &config.artifacts.public_root,
            &config.artifacts.public_base_url,
        );
        Self::assemble(config, Arc::new(provider), Arc::new(blobs), metrics).await
    }

    /// Build around caller-supplied provider and blob store
    pub async fn assemble(
        config: &PipelineConfig,
        provider: Arc<dyn ImageProvider>,
        blobs: Arc<dyn BlobStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self> {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Arc::new(CreditLedger::new(store.clone()));
        seed_wallets(&ledger, &config.wallets).await?;
        let idempotency = Arc::new(IdempotencyGuard::new(
            config.idempotency.ttl(),
            config.idempotency.capacity,
        ));
        let queue = queue::connect(&config.queue).await;
        let render_budget = config.provider.worst_case_duration() + RENDER_MARGIN;
        let lock = match queue {
            Some(_) => lock::connect(&config.lock).await,
            None => lock::connect(&inline_lock_config(&config.lock, render_budget)).await,
        };

        let artifacts = Arc::new(ArtifactStore::new(
            blobs,
            watermarker(&config.artifacts)?,
            config.artifacts.watermark,
            Arc::clone(&metrics),
        ));
        let processor = Arc::new(GenerationProcessor::new(
            store.clone(),
            Arc::clone(&ledger),
            provider,
            Arc::clone(&artifacts),
            Arc::clone(&metrics),
        )
        .with_claim_lease(DEFAULT_CLAIM_LEASE.max(render_budget)));

        let mut worker = None;
        let dispatch: Arc<dyn JobDispatch> = match &queue {
            Some(queue) => {
                worker = Some(Arc::new(GenerationWorker::new(
                    Arc::clone(queue),
                    Arc::clone(&processor),
                    Arc::clone(&metrics),
                    WorkerConfig {
                        concurrency: config.queue.worker_concurrency,
                        poll_wait: config.queue.poll_interval(),
                    },
                )));
                Arc::new(QueuedDispatch::new(
                    Arc::clone(queue),
                    config.queue.enqueue_options(),
                ))
            }
            None => Arc::new(InlineDispatch::new(Arc::clone(&processor))),
        };

        let safety = PromptSafetyFilter::new(&config.safety);
        info!(
            "Pipeline assembled: provider={}, lock={}, dispatch={:?}, \
             safety_rules={}, templates={}",
            processor.provider_name(),
            lock.backend(),
            dispatch.mode(),
            safety.rule_count(),
            config.templates.len()
        );

        let orchestrator = GenerationOrchestrator::new(OrchestratorParts {
            jobs: store.clone(),
            ledger: Arc::clone(&ledger),
            idempotency: Arc::clone(&idempotency),
            lock: Arc::clone(&lock),
            safety,
            dispatch,
            processor,
            artifacts,
            pricing: config.pricing,
            templates: config.templates.clone(),
            metrics: Arc::clone(&metrics),
        });

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            worker,
            queue,
            store,
            ledger,
            idempotency,
            lock,
            metrics,
        })
    }

    /// Periodically evict expired idempotency entries and local lock holds
    pub fn spawn_maintenance(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let idempotency = Arc::clone(&self.idempotency);
        let lock = Arc::clone(&self.lock);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let keys = idempotency.sweep();
                        let holds = lock.sweep_expired();
                        debug!("Maintenance swept {} idempotency keys, {} lock holds", keys, holds);
                    }
                }
            }
        })
    }
}

/// Lock settings for inline dispatch, where the hold spans the render
fn inline_lock_config(config: &LockConfig, render_budget: Duration) -> LockConfig {
    let mut config = config.clone();
    if config.ttl() < render_budget {
        info!(
            "Raising draft lock TTL from {:?} to {:?} to cover inline rendering",
            config.ttl(),
            render_budget
        );
        config.ttl_ms = render_budget.as_millis() as u64;
    }
    config
}

async fn seed_wallets(ledger: &CreditLedger, wallets: &WalletConfig) -> Result<()> {
    for (user, amount) in &wallets.opening_balances {
        let user_id: UserId = user
            .parse()
            .with_context(|| format!("opening balance for invalid user id '{}'", user))?;
        ledger
            .grant(user_id, *amount, TransactionKind::Gift, "opening balance")
            .await
            .with_context(|| format!("seeding wallet {}", user_id))?;
    }
    if !wallets.opening_balances.is_empty() {
        info!("Seeded {} wallets", wallets.opening_balances.len());
    }
    Ok(())
}

fn watermarker(config: &ArtifactConfig) -> Result<Option<Arc<dyn Watermarker>>> {
    if !config.watermark_enabled {
        warn!("Watermarking disabled, previews will publish originals");
        return Ok(None);
    }
    let mark = match &config.logo_path {
        Some(path) => LogoWatermarker::from_logo_file(path)
            .with_context(|| format!("loading watermark logo {}", path.display()))?,
        None => LogoWatermarker::badge(),
    };
    Ok(Some(Arc::new(mark)))
}
