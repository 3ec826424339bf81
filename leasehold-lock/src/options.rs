use leasehold_core::{LockError, LockResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage backend a [`LeaseLockManager`](crate::LeaseLockManager) is connected to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBackend {
    /// Process-wide in-memory store; the database url names the shared store
    #[default]
    Memory,
    /// Directory of lease files; the database url is the directory path
    FileSystem,
}

impl std::fmt::Display for LockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockBackend::Memory => write!(f, "memory"),
            LockBackend::FileSystem => write!(f, "file_system"),
        }
    }
}

/// Shortest accepted lease; lease expiry is tracked in whole milliseconds
pub const MIN_LEASE_DURATION: Duration = Duration::from_millis(1);

/// Configuration for a lease lock manager
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Identity written into every lease this manager takes
    pub owner: String,

    /// How long a lease stays valid without a refresh
    pub lease_duration: Duration,

    /// Interval between refreshes of a held lease, and between acquisition attempts
    pub refresh_frequency: Duration,
}

impl ManagerOptions {
    pub fn new(owner: impl Into<String>, lease_duration: Duration) -> Self {
        Self {
            owner: owner.into(),
            lease_duration,
            refresh_frequency: lease_duration / 2,
        }
    }

    pub fn with_refresh_frequency(mut self, frequency: Duration) -> Self {
        self.refresh_frequency = frequency;
        self
    }

    pub fn validate(&self) -> LockResult<()> {
        if self.owner.is_empty() {
            return Err(LockError::invalid_options("owner must not be empty"));
        }
        if self.lease_duration < MIN_LEASE_DURATION {
            return Err(LockError::invalid_options(format!(
                "lease duration {:?} must be at least {:?}",
                self.lease_duration, MIN_LEASE_DURATION
            )));
        }
        if self.refresh_frequency.is_zero() {
            return Err(LockError::invalid_options(
                "lease refresh frequency must be greater than zero",
            ));
        }
        if self.refresh_frequency >= self.lease_duration {
            return Err(LockError::invalid_options(format!(
                "lease refresh frequency {:?} must be less than lease duration {:?}",
                self.refresh_frequency, self.lease_duration
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_defaults_to_half_the_lease() {
        let options = ManagerOptions::new("node-a", Duration::from_millis(200));
        assert_eq!(options.refresh_frequency, Duration::from_millis(100));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let lease = Duration::from_millis(200);

        assert!(ManagerOptions::new("", lease).validate().is_err());
        assert!(ManagerOptions::new("node-a", Duration::ZERO)
            .validate()
            .is_err());
        assert!(ManagerOptions::new("node-a", lease)
            .with_refresh_frequency(lease)
            .validate()
            .is_err());
        assert!(ManagerOptions::new("node-a", lease)
            .with_refresh_frequency(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_sub_millisecond_lease_rejected() {
        let result = ManagerOptions::new("node-a", Duration::from_micros(900)).validate();
        assert!(matches!(result, Err(LockError::InvalidOptions { .. })));

        assert!(ManagerOptions::new("node-a", MIN_LEASE_DURATION)
            .validate()
            .is_ok());
    }
}
