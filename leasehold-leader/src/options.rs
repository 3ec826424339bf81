//! Configuration for a leadership coordinator.

use leasehold_core::{LeaderError, LeaderResult};
use leasehold_lock::{LockBackend, ManagerOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lock backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockOptions {
    /// Which lease store to use
    pub backend: LockBackend,

    /// Shared store name (memory) or lease directory (file system)
    pub database_url: String,

    /// How long a lease stays valid without a refresh
    pub lease_duration: Duration,

    /// Interval between lease refreshes; half the lease duration when unset
    pub lease_refresh_frequency: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            backend: LockBackend::Memory,
            database_url: "leasehold".to_string(),
            lease_duration: Duration::from_secs(10),
            lease_refresh_frequency: None,
        }
    }
}

/// Options for a [`LeadershipCoordinator`](crate::LeadershipCoordinator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderOptions {
    /// Identity of this process, reported by `leader()` while it holds the lock
    pub name: String,

    /// Group of processes competing for the same lock
    pub namespace: String,

    #[serde(default)]
    pub lock: LockOptions,
}

impl LeaderOptions {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            lock: LockOptions::default(),
        }
    }

    /// Parse options from a JSON document
    pub fn from_json(json: &str) -> LeaderResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| LeaderError::invalid_options(format!("malformed options: {}", e)))
    }

    pub fn with_backend(mut self, backend: LockBackend, database_url: impl Into<String>) -> Self {
        self.lock.backend = backend;
        self.lock.database_url = database_url.into();
        self
    }

    pub fn with_lease_duration(mut self, duration: Duration) -> Self {
        self.lock.lease_duration = duration;
        self
    }

    pub fn with_lease_refresh_frequency(mut self, frequency: Duration) -> Self {
        self.lock.lease_refresh_frequency = Some(frequency);
        self
    }

    pub fn validate(&self) -> LeaderResult<()> {
        if self.name.is_empty() {
            return Err(LeaderError::invalid_options("invalid name"));
        }
        if self.namespace.is_empty() {
            return Err(LeaderError::invalid_options("invalid namespace"));
        }
        Ok(())
    }

    /// Lock manager options derived from these options, with defaults applied and validated
    pub fn manager_options(&self) -> LeaderResult<ManagerOptions> {
        let mut options = ManagerOptions::new(self.name.clone(), self.lock.lease_duration);
        if let Some(frequency) = self.lock.lease_refresh_frequency {
            options = options.with_refresh_frequency(frequency);
        }

        options
            .validate()
            .map_err(|source| LeaderError::InvalidLockOptions { source })?;
        Ok(options)
    }
}
