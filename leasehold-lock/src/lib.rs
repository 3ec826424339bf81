//! # Leasehold Lock
//!
//! Lease-based implementation of the [`LockManager`](leasehold_core::LockManager) traits.
//!
//! A lease is a time-bounded claim on a namespace written to a shared [`LeaseStore`]. The holder
//! refreshes it in the background; if a refresh fails past the lease deadline, or another
//! process finds the lease expired and takes it over, the handle's loss signal fires.
//!
//! ## Stores
//!
//! - [`InMemoryLeaseStore`] - leases in process memory (testing/single process)
//! - [`FileSystemLeaseStore`] - one lease file per namespace in a shared directory
//!
//! ## Example
//!
//! ```rust
//! use leasehold_core::{DistributedLock, LockManager};
//! use leasehold_lock::{InMemoryLeaseStore, LeaseLockManager, ManagerOptions};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(InMemoryLeaseStore::new());
//! let options = ManagerOptions::new("node-a", Duration::from_millis(200));
//! let manager = LeaseLockManager::new(options, store).unwrap();
//!
//! let lock = manager.lock("jobs");
//! lock.acquire().await.unwrap();
//! assert_eq!(manager.owner("jobs").await.unwrap(), Some("node-a".to_string()));
//!
//! lock.release().await.unwrap();
//! manager.stop().await.unwrap();
//! # });
//! ```

pub mod file_system;
pub mod in_memory;
pub mod manager;
pub mod options;
pub mod store;

pub use file_system::FileSystemLeaseStore;
pub use in_memory::InMemoryLeaseStore;
pub use manager::{LeaseLock, LeaseLockManager};
pub use options::{LockBackend, ManagerOptions, MIN_LEASE_DURATION};
pub use store::{LeaseRecord, LeaseStore};
