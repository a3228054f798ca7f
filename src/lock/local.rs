// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Process-local draft lock with expiry

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{DraftLock, LockToken};
use crate::errors::LockError;
use crate::types::DraftId;

struct Held {
    token: LockToken,
    expires_at: Instant,
}

pub struct LocalDraftLock {
    held: Mutex<HashMap<DraftId, Held>>,
    ttl: Duration,
}

impl LocalDraftLock {
    pub fn new(ttl: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn is_locked(&self, draft_id: DraftId) -> bool {
        self.held()
            .get(&draft_id)
            .map(|h| h.expires_at > Instant::now())
            .unwrap_or(false)
    }

    fn held(&self) -> MutexGuard<'_, HashMap<DraftId, Held>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DraftLock for LocalDraftLock {
    async fn try_acquire(&self, draft_id: DraftId) -> Result<Option<LockToken>, LockError> {
        let now = Instant::now();
        let mut held = self.held();
        if let Some(existing) = held.get(&draft_id) {
            if existing.expires_at > now {
                return Ok(None);
            }
        }
        let token = LockToken::generate();
        held.insert(
            draft_id,
            Held {
                token: token.clone(),
                expires_at: now + self.ttl,
            },
        );
        Ok(Some(token))
    }

    async fn release(&self, draft_id: DraftId, token: &LockToken) -> Result<(), LockError> {
        let mut held = self.held();
        if held.get(&draft_id).map(|h| &h.token == token).unwrap_or(false) {
            held.remove(&draft_id);
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "local"
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut held = self.held();
        let before = held.len();
        held.retain(|_, h| h.expires_at > now);
        before - held.len()
    }
}
