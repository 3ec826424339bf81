use async_trait::async_trait;
use leasehold_core::{DistributedLock, LockError, LockManager, LockResult, LossNotifier, LossSignal};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Call counters of a [`ScriptedLockManager`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedStats {
    pub locks_created: u64,
    pub acquires: u64,
    pub releases: u64,
    pub stops: u64,
}

struct HeldLock {
    lock_id: u64,
    held: Arc<AtomicBool>,
    loss: Arc<LossNotifier>,
}

struct ScriptedInner {
    owner: String,
    gate: Option<Semaphore>,
    held: Mutex<Option<HeldLock>>,
    stopped: AtomicBool,
    failing_acquires: AtomicUsize,
    fail_release: AtomicBool,
    fail_stop: AtomicBool,
    locks_created: AtomicU64,
    acquires: AtomicU64,
    releases: AtomicU64,
    stops: AtomicU64,
}

/// In-process lock manager whose behaviour is driven by the test.
///
/// Handles are granted immediately, or one per [`grant`](Self::grant) call when the manager is
/// gated. The test can make upcoming acquisitions, releases or the manager stop fail, and can
/// take the lock away from its current holder with [`force_loss`](Self::force_loss).
#[derive(Clone)]
pub struct ScriptedLockManager {
    inner: Arc<ScriptedInner>,
}

impl ScriptedLockManager {
    /// Manager that grants every acquisition right away
    pub fn new(owner: impl Into<String>) -> Self {
        Self::build(owner.into(), None)
    }

    /// Manager whose acquisitions wait for [`grant`](Self::grant)
    pub fn gated(owner: impl Into<String>) -> Self {
        Self::build(owner.into(), Some(Semaphore::new(0)))
    }

    fn build(owner: String, gate: Option<Semaphore>) -> Self {
        Self {
            inner: Arc::new(ScriptedInner {
                owner,
                gate,
                held: Mutex::new(None),
                stopped: AtomicBool::new(false),
                failing_acquires: AtomicUsize::new(0),
                fail_release: AtomicBool::new(false),
                fail_stop: AtomicBool::new(false),
                locks_created: AtomicU64::new(0),
                acquires: AtomicU64::new(0),
                releases: AtomicU64::new(0),
                stops: AtomicU64::new(0),
            }),
        }
    }

    /// Let one pending or future acquisition through a gated manager
    pub fn grant(&self) {
        if let Some(gate) = &self.inner.gate {
            gate.add_permits(1);
        }
    }

    /// Fail the next `count` acquisitions
    pub fn fail_next_acquires(&self, count: usize) {
        self.inner.failing_acquires.store(count, Ordering::SeqCst);
    }

    pub fn fail_releases(&self, fail: bool) {
        self.inner.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.inner.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Take the lock away from its holder. Returns false when nobody held it.
    pub fn force_loss(&self) -> bool {
        let Some(current) = self.inner.held.lock().take() else {
            return false;
        };

        info!("Forcing loss of lock {}", current.lock_id);
        current.held.store(false, Ordering::SeqCst);
        current.loss.fire();
        true
    }

    pub fn is_held(&self) -> bool {
        self.inner.held.lock().is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn get_stats(&self) -> ScriptedStats {
        ScriptedStats {
            locks_created: self.inner.locks_created.load(Ordering::SeqCst),
            acquires: self.inner.acquires.load(Ordering::SeqCst),
            releases: self.inner.releases.load(Ordering::SeqCst),
            stops: self.inner.stops.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl LockManager for ScriptedLockManager {
    type Lock = ScriptedLock;

    fn lock(&self, namespace: &str) -> ScriptedLock {
        let lock_id = self.inner.locks_created.fetch_add(1, Ordering::SeqCst);

        ScriptedLock {
            lock_id,
            namespace: namespace.to_string(),
            manager: Arc::clone(&self.inner),
            held: Arc::new(AtomicBool::new(false)),
            loss: Arc::new(LossNotifier::new()),
        }
    }

    async fn owner(&self, _namespace: &str) -> LockResult<Option<String>> {
        Ok(self
            .inner
            .held
            .lock()
            .as_ref()
            .map(|_| self.inner.owner.clone()))
    }

    async fn stop(&self) -> LockResult<()> {
        self.inner.stops.fetch_add(1, Ordering::SeqCst);

        if self.inner.fail_stop.load(Ordering::SeqCst) {
            return Err(LockError::store("scripted stop failure"));
        }
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return Err(LockError::ManagerStopped);
        }
        if let Some(gate) = &self.inner.gate {
            gate.close();
        }
        Ok(())
    }
}

/// Handle produced by a [`ScriptedLockManager`]
pub struct ScriptedLock {
    lock_id: u64,
    namespace: String,
    manager: Arc<ScriptedInner>,
    held: Arc<AtomicBool>,
    loss: Arc<LossNotifier>,
}

impl ScriptedLock {
    pub fn lock_id(&self) -> u64 {
        self.lock_id
    }
}

#[async_trait]
impl DistributedLock for ScriptedLock {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn acquire(&self) -> LockResult<()> {
        self.manager.acquires.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.manager.gate {
            gate.acquire()
                .await
                .map_err(|_| LockError::ManagerStopped)?
                .forget();
        }
        if self.manager.stopped.load(Ordering::SeqCst) {
            return Err(LockError::ManagerStopped);
        }

        let failing = self
            .manager
            .failing_acquires
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(LockError::store("scripted acquire failure"));
        }

        self.held.store(true, Ordering::SeqCst);
        *self.manager.held.lock() = Some(HeldLock {
            lock_id: self.lock_id,
            held: Arc::clone(&self.held),
            loss: Arc::clone(&self.loss),
        });
        debug!("Scripted lock {} on {} acquired", self.lock_id, self.namespace);
        Ok(())
    }

    async fn release(&self) -> LockResult<()> {
        self.manager.releases.fetch_add(1, Ordering::SeqCst);

        if self.manager.fail_release.load(Ordering::SeqCst) {
            return Err(LockError::store("scripted release failure"));
        }
        if !self.held.swap(false, Ordering::SeqCst) {
            return Err(LockError::AlreadyReleased);
        }

        let mut held = self.manager.held.lock();
        if held.as_ref().is_some_and(|h| h.lock_id == self.lock_id) {
            *held = None;
        }
        Ok(())
    }

    fn notify(&self) -> LossSignal {
        self.loss.signal()
    }
}
