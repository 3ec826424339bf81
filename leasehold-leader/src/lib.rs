//! # Leasehold Leader
//!
//! Push-based leadership notifications for a group of processes sharing one lock.
//!
//! Every process creates a [`LeadershipCoordinator`] with its own name and the shared namespace,
//! subscribes to it and starts it. Exactly one coordinator per namespace holds the lock at a
//! time; its subscribers see [`LeadershipEvent::IsLeader`], and later
//! [`LeadershipEvent::IsNotLeader`] when the lock is lost or the coordinator is stopped.
//! A coordinator that loses the lock keeps competing for it.
//!
//! ```rust,no_run
//! use leasehold_leader::{LeaderOptions, LeadershipCoordinator, LeadershipEvent};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), leasehold_leader::LeaderError> {
//! let options = LeaderOptions::new("node-a", "billing-jobs")
//!     .with_lease_duration(Duration::from_secs(5));
//! let coordinator = LeadershipCoordinator::new(options).await?;
//!
//! let mut events = coordinator.subscribe();
//! coordinator.start()?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         LeadershipEvent::IsLeader => println!("leading"),
//!         LeadershipEvent::IsNotLeader => break,
//!     }
//! }
//!
//! coordinator.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod options;

pub use coordinator::LeadershipCoordinator;
pub use leasehold_core::{
    CoordinatorState, LeaderError, LeaderResult, LeadershipEvent, Subscription, SubscriptionId,
};
pub use leasehold_lock::LockBackend;
pub use options::{LeaderOptions, LockOptions};
