use async_trait::async_trait;
use leasehold_core::LockResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A lease held by one lock handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub owner: String,
    pub token: Uuid,
    pub expires_at_ms: u64,
}

impl LeaseRecord {
    pub fn new(owner: impl Into<String>, token: Uuid, lease: Duration) -> Self {
        Self {
            owner: owner.into(),
            token,
            expires_at_ms: now_millis() + lease.as_millis() as u64,
        }
    }

    pub fn is_live(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }

    pub fn is_held_by(&self, token: Uuid) -> bool {
        self.token == token
    }

    /// True when `token` may take this namespace over.
    pub fn grants(&self, token: Uuid, now_ms: u64) -> bool {
        self.is_held_by(token) || !self.is_live(now_ms)
    }

    pub fn extend(&mut self, lease: Duration) {
        self.expires_at_ms = now_millis() + lease.as_millis() as u64;
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Shared storage every competing lock manager points at.
///
/// Each operation is a single atomic compare-and-set over one namespace's lease. Only one
/// unexpired lease may exist per namespace; leases are identified by the token of the handle
/// that created them.
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    /// Create or take over the lease when it is free, expired, or already ours.
    ///
    /// # Returns
    /// * `Ok(true)` if `token` now holds the lease
    /// * `Ok(false)` if another live lease exists
    async fn try_acquire(
        &self,
        namespace: &str,
        owner: &str,
        token: Uuid,
        lease: Duration,
    ) -> LockResult<bool>;

    /// Push the expiry of our live lease forward. `Ok(false)` once it is gone or expired.
    async fn refresh(&self, namespace: &str, token: Uuid, lease: Duration) -> LockResult<bool>;

    /// Delete the lease if `token` holds it. `Ok(false)` when there was nothing of ours to delete.
    async fn release(&self, namespace: &str, token: Uuid) -> LockResult<bool>;

    /// Owner of the live lease, if any
    async fn owner(&self, namespace: &str) -> LockResult<Option<String>>;
}
