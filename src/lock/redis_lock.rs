// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Redis-backed draft lock shared by every API process

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::time::Duration;
use tracing::debug;

use super::{DraftLock, LockToken};
use crate::errors::LockError;
use crate::types::DraftId;

const KEY_PREFIX: &str = "imagegen:draft-lock:";

/// Deletes the key only while it still holds the caller's token
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct RedisDraftLock {
    conn: MultiplexedConnection,
    ttl: Duration,
    release: Script,
}

impl RedisDraftLock {
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self, LockError> {
        let client =
            redis::Client::open(url).map_err(|e| LockError::Unavailable(e.to_string()))?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LockError::Unavailable(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Unavailable(e.to_string()))?;

        Ok(Self {
            conn,
            ttl,
            release: Script::new(RELEASE_SCRIPT),
        })
    }

    fn key(draft_id: DraftId) -> String {
        format!("{}{}", KEY_PREFIX, draft_id)
    }
}

#[async_trait]
impl DraftLock for RedisDraftLock {
    async fn try_acquire(&self, draft_id: DraftId) -> Result<Option<LockToken>, LockError> {
        let token = LockToken::generate();
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(draft_id))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(self.ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        debug!("Lock SET NX for draft {} -> {:?}", draft_id, reply);
        Ok(reply.map(|_| token))
    }

    async fn release(&self, draft_id: DraftId, token: &LockToken) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let deleted: i32 = self
            .release
            .key(Self::key(draft_id))
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        if deleted == 0 {
            debug!("Lock for draft {} was no longer ours at release", draft_id);
        }
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}
