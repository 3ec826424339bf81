use crate::store::{now_millis, LeaseRecord, LeaseStore};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use leasehold_core::LockResult;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use uuid::Uuid;

static SHARED_STORES: OnceLock<DashMap<String, InMemoryLeaseStore>> = OnceLock::new();

/// Lease store kept in process memory.
///
/// Clones share the same leases, so several managers created from one store contend with each
/// other. Suitable for tests and for coordinating tasks inside a single process.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseStore {
    leases: Arc<DashMap<String, LeaseRecord>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide store registered under `name`; the same name always yields the same leases.
    pub fn shared(name: &str) -> Self {
        SHARED_STORES
            .get_or_init(DashMap::new)
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(
        &self,
        namespace: &str,
        owner: &str,
        token: Uuid,
        lease: Duration,
    ) -> LockResult<bool> {
        let record = LeaseRecord::new(owner, token, lease);

        match self.leases.entry(namespace.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().grants(token, now_millis()) {
                    return Ok(false);
                }
                entry.insert(record);
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
            }
        }

        Ok(true)
    }

    async fn refresh(&self, namespace: &str, token: Uuid, lease: Duration) -> LockResult<bool> {
        let Some(mut record) = self.leases.get_mut(namespace) else {
            return Ok(false);
        };

        if !record.is_held_by(token) || !record.is_live(now_millis()) {
            return Ok(false);
        }

        record.extend(lease);
        Ok(true)
    }

    async fn release(&self, namespace: &str, token: Uuid) -> LockResult<bool> {
        Ok(self
            .leases
            .remove_if(namespace, |_, record| record.is_held_by(token))
            .is_some())
    }

    async fn owner(&self, namespace: &str) -> LockResult<Option<String>> {
        let now = now_millis();
        Ok(self
            .leases
            .get(namespace)
            .filter(|record| record.is_live(now))
            .map(|record| record.owner.clone()))
    }
}
