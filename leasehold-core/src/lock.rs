//! # Lock Traits
//!
//! The distributed mutual-exclusion primitive a coordinator is built on. A [`LockManager`] hands
//! out one [`DistributedLock`] per attempt at a namespace; a handle that was released or lost is
//! never reused, the manager is asked for a fresh one instead.

use crate::LockResult;
use async_trait::async_trait;
use tokio::sync::watch;

/// A single attempt at holding exclusivity over a namespace.
#[async_trait]
pub trait DistributedLock: Send + Sync + 'static {
    /// Namespace this handle competes for
    fn namespace(&self) -> &str;

    /// Wait until this handle holds the lock.
    ///
    /// Must be cancel safe: dropping the returned future leaves nothing held that a later
    /// `release` cannot clean up.
    async fn acquire(&self) -> LockResult<()>;

    /// Give up the lock.
    ///
    /// Returns [`LockError::AlreadyReleased`](crate::LockError::AlreadyReleased) when this handle
    /// holds nothing.
    async fn release(&self) -> LockResult<()>;

    /// Signal that fires when the lock is lost without a call to `release`
    fn notify(&self) -> LossSignal;
}

/// Factory for lock handles plus the owner lookup shared by every handle.
#[async_trait]
pub trait LockManager: Send + Sync + 'static {
    type Lock: DistributedLock;

    /// New, not yet acquired, handle for `namespace`
    fn lock(&self, namespace: &str) -> Self::Lock;

    /// Identity currently holding `namespace`, if any
    async fn owner(&self, namespace: &str) -> LockResult<Option<String>>;

    /// Release manager-level resources. Pending acquires fail afterwards.
    async fn stop(&self) -> LockResult<()>;
}

/// Raised by a lock implementation when it loses exclusivity
#[derive(Debug)]
pub struct LossNotifier {
    tx: watch::Sender<bool>,
}

impl LossNotifier {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Mark the lock as lost. Later calls have no further effect.
    pub fn fire(&self) {
        self.tx.send_if_modified(|lost| {
            let changed = !*lost;
            *lost = true;
            changed
        });
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> LossSignal {
        LossSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for LossNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Waitable side of a [`LossNotifier`]
#[derive(Debug, Clone)]
pub struct LossSignal {
    rx: watch::Receiver<bool>,
}

impl LossSignal {
    /// Resolves once the lock is lost. A notifier that goes away counts as a loss.
    pub async fn lost(mut self) {
        let _ = self.rx.wait_for(|lost| *lost).await;
    }

    pub fn is_lost(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Resolves once `rx` reads `true` or its sender is gone.
///
/// The borrowed value is dropped before returning, so the future can sit in a `select!` branch
/// whose body awaits inside a spawned task.
pub async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}
