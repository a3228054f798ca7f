// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Per-draft mutual exclusion
//!
//! Two backends share the `DraftLock` trait: a Redis lock (`SET NX PX` plus a
//! compare-and-delete release) for multi-process deployments and a process-local
//! map for single-node or degraded operation. `connect` picks one at startup.

pub mod local;
#[cfg(feature = "redis")]
pub mod redis_lock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::LockError;
use crate::types::DraftId;

pub use local::LocalDraftLock;

pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// Proof of ownership handed out by `try_acquire`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
pub trait DraftLock: Send + Sync {
    /// Set-if-absent with expiry. `None` means another holder owns the draft.
    async fn try_acquire(&self, draft_id: DraftId) -> Result<Option<LockToken>, LockError>;

    /// Release only if `token` still owns the lock
    async fn release(&self, draft_id: DraftId, token: &LockToken) -> Result<(), LockError>;

    fn backend(&self) -> &'static str;

    /// How long a hold lasts before it expires on its own
    fn ttl(&self) -> Duration;

    /// Drop expired holds kept in process memory. Backends with server-side
    /// expiry have nothing to sweep.
    fn sweep_expired(&self) -> usize {
        0
    }
}

/// Held draft lock. Call `release` on the normal path; dropping the guard
/// without it (cancellation, panic) spawns the release on the runtime.
pub struct DraftLockGuard {
    lock: Arc<dyn DraftLock>,
    draft_id: DraftId,
    token: Option<LockToken>,
}

impl DraftLockGuard {
    pub async fn acquire(
        lock: Arc<dyn DraftLock>,
        draft_id: DraftId,
    ) -> Result<Option<Self>, LockError> {
        Ok(lock.try_acquire(draft_id).await?.map(|token| Self {
            lock,
            draft_id,
            token: Some(token),
        }))
    }

    pub fn draft_id(&self) -> DraftId {
        self.draft_id
    }

    pub async fn release(mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.lock.release(self.draft_id, &token).await {
                warn!("Failed to release lock for draft {}: {}", self.draft_id, e);
            }
        }
    }
}

impl Drop for DraftLockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let lock = Arc::clone(&self.lock);
        let draft_id = self.draft_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lock.release(draft_id, &token).await {
                        warn!("Deferred lock release failed for draft {}: {}", draft_id, e);
                    }
                });
            }
            Err(_) => warn!(
                "Lock for draft {} dropped outside a runtime; it will expire by TTL",
                draft_id
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Shared lock store; unset or unreachable means process-local locking
    pub redis_url: Option<String>,
    pub ttl_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl_ms: DEFAULT_LOCK_TTL.as_millis() as u64,
        }
    }
}

impl LockConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

/// Select the lock backend. Falls back to `LocalDraftLock` when Redis is not
/// configured, not compiled in, or not reachable.
pub async fn connect(config: &LockConfig) -> Arc<dyn DraftLock> {
    if let Some(url) = config.redis_url.as_deref().filter(|u| !u.is_empty()) {
        #[cfg(feature = "redis")]
        match redis_lock::RedisDraftLock::connect(url, config.ttl()).await {
            Ok(lock) => {
                info!("Draft lock backend: redis");
                return Arc::new(lock);
            }
            Err(e) => warn!("Redis lock store unreachable, using local locks: {}", e),
        }
        #[cfg(not(feature = "redis"))]
        warn!(
            "Lock store {} configured but the redis feature is disabled, using local locks",
            url
        );
    }
    info!("Draft lock backend: local");
    Arc::new(LocalDraftLock::new(config.ttl()))
}
