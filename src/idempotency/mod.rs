// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Short-lived de-duplication of generation requests
//!
//! Keys are either the client's idempotency key (scoped to the user) or a
//! SHA-256 fingerprint of the request. Entries expire a fixed time after
//! insertion; expired entries read as misses and are dropped on lookup.

use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::types::{DraftId, GenerationParams, JobId, UserId};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CAPACITY: usize = 10_000;

/// What a replayed request gets back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedSubmission {
    pub job_id: JobId,
    pub cost: i64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    submission: CachedSubmission,
    inserted_at: Instant,
}

pub struct IdempotencyGuard {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Client key when supplied, otherwise the request fingerprint
    pub fn key_for(
        client_key: Option<&str>,
        user_id: UserId,
        draft_id: DraftId,
        params: &GenerationParams,
    ) -> String {
        match client_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => format!("client:{}:{}", user_id, key),
            None => format!("fp:{}", Self::fingerprint(user_id, draft_id, params)),
        }
    }

    /// Hex SHA-256 over the user, draft, prompt and rendering parameters
    pub fn fingerprint(user_id: UserId, draft_id: DraftId, params: &GenerationParams) -> String {
        let mut hasher = Sha256::new();
        hasher.update(user_id.0.as_bytes());
        hasher.update(draft_id.0.as_bytes());
        hasher.update(params.prompt.as_bytes());
        hasher.update([0u8]);
        hasher.update(params.negative_prompt.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(params.width.to_le_bytes());
        hasher.update(params.height.to_le_bytes());
        hasher.update(params.steps.to_le_bytes());
        hasher.update(params.guidance.to_bits().to_le_bytes());
        hasher.update(params.model.as_deref().unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(params.count.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn lookup(&self, key: &str) -> Option<CachedSubmission> {
        let mut entries = self.entries();
        let entry = *entries.get(key)?;
        if entry.inserted_at.elapsed() >= self.ttl {
            entries.pop(key);
            return None;
        }
        Some(entry.submission)
    }

    pub fn remember(&self, key: String, job_id: JobId, cost: i64) {
        self.entries().put(
            key,
            Entry {
                submission: CachedSubmission { job_id, cost },
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every expired entry; returns how many were removed
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}
