//! # Error Types
//!
//! Errors raised by lock backends and by the leadership coordinator.

use thiserror::Error;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Result type for leadership operations
pub type LeaderResult<T> = std::result::Result<T, LeaderError>;

/// Errors reported by a lock manager or one of its lock handles.
#[derive(Error, Debug)]
pub enum LockError {
    /// The handle does not currently hold the lock
    #[error("Lock already released")]
    AlreadyReleased,

    /// The handle was released or lost and cannot be acquired again
    #[error("Lock handle for namespace {namespace} already consumed")]
    HandleConsumed { namespace: String },

    /// The lock manager was stopped
    #[error("Lock manager stopped")]
    ManagerStopped,

    /// Lock options failed validation
    #[error("Invalid lock options: {reason}")]
    InvalidOptions { reason: String },

    /// Backing store failure
    #[error("Lease store error: {reason}")]
    Store { reason: String },

    /// Lease record encoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File system I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LockError {
    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    pub fn invalid_options(reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            reason: reason.into(),
        }
    }

    /// True for the condition `stop` tolerates when releasing.
    pub fn is_already_released(&self) -> bool {
        matches!(self, LockError::AlreadyReleased)
    }
}

/// Errors that can occur while running leadership election
#[derive(Error, Debug)]
pub enum LeaderError {
    /// Coordinator options failed validation
    #[error("Invalid options: {reason}")]
    InvalidOptions { reason: String },

    /// Options could not be turned into lock manager options
    #[error("Invalid lock options")]
    InvalidLockOptions {
        #[source]
        source: LockError,
    },

    /// The lock manager could not be created
    #[error("Error creating lock manager")]
    CreatingLock {
        #[source]
        source: LockError,
    },

    /// `start` was called more than once
    #[error("Coordinator already started")]
    AlreadyStarted,

    /// `start` was called outside a tokio runtime
    #[error("No tokio runtime available for the control loop")]
    NoRuntime,

    /// `stop` was called before `start`
    #[error("Coordinator not started")]
    NotStarted,

    /// `stop` was called more than once
    #[error("Coordinator already stopped")]
    AlreadyStopped,

    /// Releasing the lock or tearing down the manager failed
    #[error("Error stopping coordinator")]
    Stopping {
        #[source]
        source: LockError,
    },

    /// Owner lookup failed
    #[error("Leader lookup failed: {0}")]
    Lock(#[from] LockError),

    /// Internal system error
    #[error("Internal system error: {reason}")]
    Internal { reason: String },
}

impl LeaderError {
    pub fn invalid_options(reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }
}
