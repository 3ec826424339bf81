//! # Leasehold Core
//!
//! Building blocks shared by every Leasehold crate:
//!
//! - **Leadership types**: [`LeadershipEvent`] and the [`CoordinatorState`] lifecycle
//! - **Broadcast hub**: non-blocking fan-out of values to many subscribers
//! - **Lock traits**: [`LockManager`] and [`DistributedLock`], the exclusion primitive
//!   leadership is derived from
//! - **Error handling**: [`LockError`] and [`LeaderError`]
//!
//! ```rust
//! use leasehold_core::{BroadcastHub, LeadershipEvent};
//!
//! let hub = BroadcastHub::new();
//! let mut subscription = hub.subscribe();
//!
//! hub.publish(LeadershipEvent::IsLeader);
//! assert_eq!(subscription.try_recv(), Some(LeadershipEvent::IsLeader));
//! ```

pub mod broadcast;
pub mod error;
pub mod lock;
pub mod types;

pub use broadcast::{BroadcastHub, BroadcastStats, Subscription, SubscriptionId};
pub use error::*;
pub use lock::{stop_requested, DistributedLock, LockManager, LossNotifier, LossSignal};
pub use types::{AtomicCoordinatorState, CoordinatorState, LeadershipEvent};
