//! Storage for cross-tab attempt claims.
//!
//! The medium only needs keyed read/write/delete visible to every tab. All
//! claim operations are plain read-then-write on top of that; two tabs that
//! read an empty slot at the same instant can both believe they won. The
//! coordinator's heartbeat is what detects and resolves that case.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::{cmd, RedisError};
use thiserror::Error;

use crate::core::redis::RedisHandle;

#[derive(Debug, Error)]
pub enum ClaimStoreError {
    #[error("claim store is unavailable")]
    Unavailable,
    #[error("claim store request failed: {0}")]
    Redis(#[from] RedisError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabClaim {
    pub owner_tab_id: String,
    /// Missing when the timestamp key was lost or never written.
    pub last_heartbeat_ms: Option<i64>,
}

impl TabClaim {
    pub fn new(owner_tab_id: impl Into<String>, now_ms: i64) -> Self {
        Self { owner_tab_id: owner_tab_id.into(), last_heartbeat_ms: Some(now_ms) }
    }

    pub fn is_owned_by(&self, tab_id: &str) -> bool {
        self.owner_tab_id == tab_id
    }

    /// A claim without a readable heartbeat can never be refreshed back to life.
    pub fn is_stale(&self, now_ms: i64, stale_timeout: Duration) -> bool {
        match self.last_heartbeat_ms {
            Some(last) => now_ms.saturating_sub(last) > stale_timeout.as_millis() as i64,
            None => true,
        }
    }
}

pub fn owner_key(attempt_id: &str) -> String {
    format!("exam_active_{attempt_id}")
}

pub fn timestamp_key(attempt_id: &str) -> String {
    format!("exam_active_{attempt_id}_timestamp")
}

#[async_trait]
pub trait ClaimStore: Send + Sync {
    async fn read(&self, attempt_id: &str) -> Result<Option<TabClaim>, ClaimStoreError>;

    async fn write(&self, attempt_id: &str, claim: &TabClaim) -> Result<(), ClaimStoreError>;

    async fn remove(&self, attempt_id: &str) -> Result<(), ClaimStoreError>;

    /// Writes `owner`'s claim unless another tab holds one.
    async fn try_claim(
        &self,
        attempt_id: &str,
        owner: &str,
        now_ms: i64,
    ) -> Result<bool, ClaimStoreError> {
        if let Some(existing) = self.read(attempt_id).await? {
            if !existing.is_owned_by(owner) {
                return Ok(false);
            }
        }

        self.write(attempt_id, &TabClaim::new(owner, now_ms)).await?;
        Ok(true)
    }

    /// Bumps the heartbeat. `false` means `owner` no longer holds the claim.
    async fn refresh(
        &self,
        attempt_id: &str,
        owner: &str,
        now_ms: i64,
    ) -> Result<bool, ClaimStoreError> {
        match self.read(attempt_id).await? {
            Some(existing) if existing.is_owned_by(owner) => {
                self.write(attempt_id, &TabClaim::new(owner, now_ms)).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Deletes the claim only when `owner` holds it.
    async fn release(&self, attempt_id: &str, owner: &str) -> Result<bool, ClaimStoreError> {
        match self.read(attempt_id).await? {
            Some(existing) if existing.is_owned_by(owner) => {
                self.remove(attempt_id).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_release(&self, attempt_id: &str) -> Result<(), ClaimStoreError> {
        self.remove(attempt_id).await
    }

    async fn is_stale(
        &self,
        attempt_id: &str,
        now_ms: i64,
        stale_timeout: Duration,
    ) -> Result<bool, ClaimStoreError> {
        Ok(self
            .read(attempt_id)
            .await?
            .is_some_and(|claim| claim.is_stale(now_ms, stale_timeout)))
    }
}

/// Process-local store keyed exactly like the shared one.
#[derive(Debug, Default)]
pub struct MemoryClaimStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw key access, mirroring what another tab could write directly.
    pub fn set_raw(&self, key: &str, value: &str) {
        self.lock().insert(key.to_string(), value.to_string());
    }

    pub fn get_raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ClaimStore for MemoryClaimStore {
    async fn read(&self, attempt_id: &str) -> Result<Option<TabClaim>, ClaimStoreError> {
        let entries = self.lock();
        let owner = entries.get(&owner_key(attempt_id)).cloned();
        let timestamp = entries.get(&timestamp_key(attempt_id)).cloned();
        Ok(decode_claim(owner, timestamp))
    }

    async fn write(&self, attempt_id: &str, claim: &TabClaim) -> Result<(), ClaimStoreError> {
        let mut entries = self.lock();
        entries.insert(owner_key(attempt_id), claim.owner_tab_id.clone());
        match claim.last_heartbeat_ms {
            Some(ts) => entries.insert(timestamp_key(attempt_id), ts.to_string()),
            None => entries.remove(&timestamp_key(attempt_id)),
        };
        Ok(())
    }

    async fn remove(&self, attempt_id: &str) -> Result<(), ClaimStoreError> {
        let mut entries = self.lock();
        entries.remove(&owner_key(attempt_id));
        entries.remove(&timestamp_key(attempt_id));
        Ok(())
    }
}

/// Shared store on Redis, visible to every tab process of the deployment.
#[derive(Clone)]
pub struct RedisClaimStore {
    redis: RedisHandle,
}

impl RedisClaimStore {
    pub(crate) fn new(redis: RedisHandle) -> Self {
        Self { redis }
    }

    async fn connection(&self) -> Result<redis::aio::ConnectionManager, ClaimStoreError> {
        self.redis.connection().await.ok_or(ClaimStoreError::Unavailable)
    }
}

#[async_trait]
impl ClaimStore for RedisClaimStore {
    async fn read(&self, attempt_id: &str) -> Result<Option<TabClaim>, ClaimStoreError> {
        let mut conn = self.connection().await?;
        let (owner, timestamp): (Option<String>, Option<String>) = cmd("MGET")
            .arg(owner_key(attempt_id))
            .arg(timestamp_key(attempt_id))
            .query_async(&mut conn)
            .await?;
        Ok(decode_claim(owner, timestamp))
    }

    async fn write(&self, attempt_id: &str, claim: &TabClaim) -> Result<(), ClaimStoreError> {
        let mut conn = self.connection().await?;
        match claim.last_heartbeat_ms {
            Some(ts) => {
                cmd("MSET")
                    .arg(owner_key(attempt_id))
                    .arg(&claim.owner_tab_id)
                    .arg(timestamp_key(attempt_id))
                    .arg(ts.to_string())
                    .query_async::<_, ()>(&mut conn)
                    .await?;
            }
            None => {
                cmd("SET")
                    .arg(owner_key(attempt_id))
                    .arg(&claim.owner_tab_id)
                    .query_async::<_, ()>(&mut conn)
                    .await?;
                cmd("DEL").arg(timestamp_key(attempt_id)).query_async::<_, ()>(&mut conn).await?;
            }
        }
        Ok(())
    }

    async fn remove(&self, attempt_id: &str) -> Result<(), ClaimStoreError> {
        let mut conn = self.connection().await?;
        cmd("DEL")
            .arg(owner_key(attempt_id))
            .arg(timestamp_key(attempt_id))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

fn decode_claim(owner: Option<String>, timestamp: Option<String>) -> Option<TabClaim> {
    let owner_tab_id = owner.filter(|value| !value.is_empty())?;
    let last_heartbeat_ms = timestamp.and_then(|raw| raw.trim().parse::<i64>().ok());
    Some(TabClaim { owner_tab_id, last_heartbeat_ms })
}
