//! Lease lock manager and its lock handles.

use crate::options::{LockBackend, ManagerOptions};
use crate::store::LeaseStore;
use crate::{FileSystemLeaseStore, InMemoryLeaseStore};
use async_trait::async_trait;
use leasehold_core::{
    stop_requested, DistributedLock, LockError, LockManager, LockResult, LossNotifier, LossSignal,
};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

struct ManagerInner {
    options: ManagerOptions,
    store: Arc<dyn LeaseStore>,
    shutdown_tx: watch::Sender<bool>,
    refreshers: Mutex<Vec<JoinHandle<()>>>,
}

/// Hands out [`LeaseLock`]s backed by a shared [`LeaseStore`].
///
/// A held lease is kept alive by a background refresh task. Stopping the manager fails every
/// pending acquisition, ends every refresh task and waits for them to finish.
#[derive(Clone)]
pub struct LeaseLockManager {
    inner: Arc<ManagerInner>,
}

impl LeaseLockManager {
    pub fn new(options: ManagerOptions, store: Arc<dyn LeaseStore>) -> LockResult<Self> {
        options.validate()?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(ManagerInner {
                options,
                store,
                shutdown_tx,
                refreshers: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Create a manager on top of the store `backend` and `database_url` describe
    pub async fn connect(
        backend: LockBackend,
        database_url: &str,
        options: ManagerOptions,
    ) -> LockResult<Self> {
        if database_url.is_empty() {
            return Err(LockError::invalid_options("database url must not be empty"));
        }

        let store: Arc<dyn LeaseStore> = match backend {
            LockBackend::Memory => Arc::new(InMemoryLeaseStore::shared(database_url)),
            LockBackend::FileSystem => Arc::new(FileSystemLeaseStore::new(database_url).await?),
        };

        debug!("Connected lease lock manager to {} store {}", backend, database_url);
        Self::new(options, store)
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.inner.options
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }
}

impl std::fmt::Debug for LeaseLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseLockManager")
            .field("options", &self.inner.options)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[async_trait]
impl LockManager for LeaseLockManager {
    type Lock = LeaseLock;

    fn lock(&self, namespace: &str) -> LeaseLock {
        let (stop_tx, _) = watch::channel(false);

        LeaseLock {
            namespace: namespace.to_string(),
            token: Uuid::new_v4(),
            manager: Arc::clone(&self.inner),
            state: Mutex::new(HandleState::Idle),
            loss: Arc::new(LossNotifier::new()),
            stop_tx,
        }
    }

    async fn owner(&self, namespace: &str) -> LockResult<Option<String>> {
        self.inner.store.owner(namespace).await
    }

    async fn stop(&self) -> LockResult<()> {
        if self.inner.shutdown_tx.send_replace(true) {
            return Err(LockError::ManagerStopped);
        }

        let refreshers = std::mem::take(&mut *self.inner.refreshers.lock());
        info!(
            "Stopping lease lock manager for {} ({} refresh tasks)",
            self.inner.options.owner,
            refreshers.len()
        );

        for refresher in refreshers {
            if let Err(e) = refresher.await {
                warn!("Lease refresh task ended abnormally: {}", e);
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Idle,
    Held,
    Released,
}

/// One attempt at holding a namespace through a [`LeaseLockManager`].
///
/// Dropping a held handle without releasing it stops the refresh task; the lease then expires
/// on its own.
pub struct LeaseLock {
    namespace: String,
    token: Uuid,
    manager: Arc<ManagerInner>,
    state: Mutex<HandleState>,
    loss: Arc<LossNotifier>,
    stop_tx: watch::Sender<bool>,
}

impl LeaseLock {
    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn is_held(&self) -> bool {
        *self.state.lock() == HandleState::Held && !self.loss.is_fired()
    }

    fn retry_pause(&self) -> Duration {
        let base = self.manager.options.refresh_frequency;
        let jitter_ms = (base.as_millis() as u64 / 4).max(1);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    fn spawn_refresher(&self, acquired_at: Instant) {
        let refresher = tokio::spawn(refresh_lease(
            Arc::clone(&self.manager.store),
            self.manager.options.clone(),
            self.namespace.clone(),
            self.token,
            Arc::clone(&self.loss),
            self.stop_tx.subscribe(),
            self.manager.shutdown_tx.subscribe(),
            acquired_at,
        ));

        let mut refreshers = self.manager.refreshers.lock();
        refreshers.retain(|task| !task.is_finished());
        refreshers.push(refresher);
    }
}

impl std::fmt::Debug for LeaseLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseLock")
            .field("namespace", &self.namespace)
            .field("token", &self.token)
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[async_trait]
impl DistributedLock for LeaseLock {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn acquire(&self) -> LockResult<()> {
        if *self.state.lock() != HandleState::Idle || self.loss.is_fired() {
            return Err(LockError::HandleConsumed {
                namespace: self.namespace.clone(),
            });
        }

        let store = &self.manager.store;
        let options = &self.manager.options;
        let mut shutdown = self.manager.shutdown_tx.subscribe();

        loop {
            if *shutdown.borrow() {
                return Err(LockError::ManagerStopped);
            }

            let attempted_at = Instant::now();
            if store
                .try_acquire(
                    &self.namespace,
                    &options.owner,
                    self.token,
                    options.lease_duration,
                )
                .await?
            {
                let mut state = self.state.lock();
                if *state != HandleState::Idle {
                    // Released while the attempt was in flight; release cleans the record up.
                    return Err(LockError::HandleConsumed {
                        namespace: self.namespace.clone(),
                    });
                }
                *state = HandleState::Held;
                drop(state);

                self.spawn_refresher(attempted_at);
                debug!(
                    "Lease on {} acquired by {} ({})",
                    self.namespace, options.owner, self.token
                );
                return Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_pause()) => {}
                _ = stop_requested(&mut shutdown) => return Err(LockError::ManagerStopped),
            }
        }
    }

    async fn release(&self) -> LockResult<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), HandleState::Released);
        if previous == HandleState::Released {
            return Err(LockError::AlreadyReleased);
        }

        let _ = self.stop_tx.send(true);

        // An interrupted acquire may have written a lease without reaching `Held`.
        if self
            .manager
            .store
            .release(&self.namespace, self.token)
            .await?
        {
            debug!("Lease on {} released ({})", self.namespace, self.token);
            Ok(())
        } else {
            Err(LockError::AlreadyReleased)
        }
    }

    fn notify(&self) -> LossSignal {
        self.loss.signal()
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn refresh_lease(
    store: Arc<dyn LeaseStore>,
    options: ManagerOptions,
    namespace: String,
    token: Uuid,
    loss: Arc<LossNotifier>,
    mut stop: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
    acquired_at: Instant,
) {
    let mut deadline = acquired_at + options.lease_duration;
    let mut interval =
        tokio::time::interval_at(acquired_at + options.refresh_frequency, options.refresh_frequency);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop_requested(&mut stop) => return,
            _ = stop_requested(&mut shutdown) => {
                debug!("Lock manager stopped while holding {}", namespace);
                loss.fire();
                return;
            }
            _ = interval.tick() => {
                let attempted_at = Instant::now();
                match store.refresh(&namespace, token, options.lease_duration).await {
                    Ok(true) => deadline = attempted_at + options.lease_duration,
                    Ok(false) => {
                        warn!("Lease on {} lost by {}", namespace, options.owner);
                        loss.fire();
                        return;
                    }
                    Err(e) => {
                        warn!("Failed to refresh lease on {}: {}", namespace, e);
                        if Instant::now() >= deadline {
                            loss.fire();
                            return;
                        }
                    }
                }
            }
        }
    }
}
