//! Leadership coordination on top of a distributed lock.

use crate::LeaderOptions;
use leasehold_core::{
    stop_requested, AtomicCoordinatorState, BroadcastHub, CoordinatorState, DistributedLock,
    LeaderError, LeaderResult, LeadershipEvent, LockManager, LockResult, Subscription,
    SubscriptionId,
};
use leasehold_lock::LeaseLockManager;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument, Span};

/// Publishes leadership transitions for one process in one namespace.
///
/// A started coordinator runs a single background task that keeps racing for the namespace's
/// lock: it announces [`LeadershipEvent::IsLeader`] once the lock is acquired and
/// [`LeadershipEvent::IsNotLeader`] once it is lost or given up, then competes again after a
/// loss. Coordinators are started at most once and stopped at most once.
///
/// Dropping a started coordinator without calling [`stop`](Self::stop) also ends the background
/// task, which releases the lock, but leaves the lock manager running.
pub struct LeadershipCoordinator<M: LockManager = LeaseLockManager> {
    options: LeaderOptions,
    manager: Arc<M>,
    hub: Arc<BroadcastHub<LeadershipEvent>>,
    state: AtomicCoordinatorState,
    shutdown_tx: watch::Sender<bool>,
    control_loop: Mutex<Option<JoinHandle<LockResult<()>>>>,
    span: Span,
}

impl LeadershipCoordinator<LeaseLockManager> {
    /// Create a coordinator whose lock manager is built from `options.lock`
    pub async fn new(options: LeaderOptions) -> LeaderResult<Self> {
        options.validate()?;
        let manager_options = options.manager_options()?;

        let manager = LeaseLockManager::connect(
            options.lock.backend,
            &options.lock.database_url,
            manager_options,
        )
        .await
        .map_err(|source| LeaderError::CreatingLock { source })?;

        Self::with_manager(options, manager)
    }
}

impl<M: LockManager> LeadershipCoordinator<M> {
    /// Create a coordinator on top of an existing lock manager
    pub fn with_manager(options: LeaderOptions, manager: M) -> LeaderResult<Self> {
        options.validate()?;

        let (shutdown_tx, _) = watch::channel(false);
        let span = info_span!(
            "leadership",
            name = %options.name,
            namespace = %options.namespace
        );

        Ok(Self {
            options,
            manager: Arc::new(manager),
            hub: Arc::new(BroadcastHub::new()),
            state: AtomicCoordinatorState::new(),
            shutdown_tx,
            control_loop: Mutex::new(None),
            span,
        })
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn namespace(&self) -> &str {
        &self.options.namespace
    }

    pub fn state(&self) -> CoordinatorState {
        self.state.load()
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// True while the control loop task is alive
    pub fn is_running(&self) -> bool {
        self.control_loop
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Launch the control loop on the current tokio runtime.
    ///
    /// Fails with [`LeaderError::NoRuntime`] outside a runtime, leaving the coordinator startable.
    pub fn start(&self) -> LeaderResult<()> {
        let runtime = Handle::try_current().map_err(|_| LeaderError::NoRuntime)?;
        let mut control_loop = self.control_loop.lock();

        self.state
            .transition(CoordinatorState::Uninitialized, CoordinatorState::Started)
            .map_err(|_| LeaderError::AlreadyStarted)?;

        let _enter = self.span.enter();
        info!("Starting leadership coordinator");

        *control_loop = Some(runtime.spawn(
            run_control_loop(
                Arc::clone(&self.manager),
                Arc::clone(&self.hub),
                self.options.namespace.clone(),
                self.shutdown_tx.subscribe(),
            )
            .instrument(self.span.clone()),
        ));

        Ok(())
    }

    /// Stop competing for leadership.
    ///
    /// Returns once the lock is released, the lock manager is stopped and the control loop has
    /// exited. The loop is joined even when releasing fails.
    pub async fn stop(&self) -> LeaderResult<()> {
        match self
            .state
            .transition(CoordinatorState::Started, CoordinatorState::Stopped)
        {
            Ok(()) => {}
            Err(CoordinatorState::Uninitialized) => return Err(LeaderError::NotStarted),
            Err(_) => return Err(LeaderError::AlreadyStopped),
        }

        info!(parent: &self.span, "Stopping leadership coordinator");
        self.shutdown_tx.send_replace(true);

        let control_loop = self.control_loop.lock().take();
        let mut outcome = Ok(());

        if let Some(handle) = control_loop {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(source)) => outcome = Err(LeaderError::Stopping { source }),
                Err(e) => {
                    outcome = Err(LeaderError::internal(format!(
                        "control loop task failed: {}",
                        e
                    )))
                }
            }
        }

        if let Err(source) = self.manager.stop().await {
            if outcome.is_ok() {
                outcome = Err(LeaderError::Stopping { source });
            } else {
                error!(parent: &self.span, "Error stopping lock manager: {}", source);
            }
        }

        outcome
    }

    pub fn subscribe(&self) -> Subscription<LeadershipEvent> {
        self.hub.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.hub.unsubscribe(id)
    }

    pub fn hub(&self) -> &BroadcastHub<LeadershipEvent> {
        &self.hub
    }

    /// Identity currently holding this coordinator's namespace, if any
    pub async fn leader(&self) -> LeaderResult<Option<String>> {
        Ok(self.manager.owner(&self.options.namespace).await?)
    }
}

/// Release `lock`, treating an already released lock as success
async fn release_leadership<L: DistributedLock>(lock: &L) -> LockResult<()> {
    match lock.release().await {
        Err(e) if e.is_already_released() => Ok(()),
        other => other,
    }
}

/// Acquire, announce, wait for stop or loss, repeat after loss.
///
/// Returns the outcome of the final release. An acquisition failure ends the loop without an
/// error: there is nothing left to release.
async fn run_control_loop<M: LockManager>(
    manager: Arc<M>,
    hub: Arc<BroadcastHub<LeadershipEvent>>,
    namespace: String,
    mut shutdown: watch::Receiver<bool>,
) -> LockResult<()> {
    let mut lock = manager.lock(&namespace);

    loop {
        info!("Attempting to acquire leadership");

        let acquired = tokio::select! {
            result = lock.acquire() => result,
            _ = stop_requested(&mut shutdown) => {
                info!("Stop requested before leadership was acquired");
                return release_leadership(&lock).await;
            }
        };

        if let Err(e) = acquired {
            error!("Error acquiring leadership: {}", e);
            return Ok(());
        }

        info!("Acquired leadership");
        hub.publish(LeadershipEvent::IsLeader);
        let loss = lock.notify();

        tokio::select! {
            _ = stop_requested(&mut shutdown) => {
                info!("Stop requested, releasing leadership");
                let released = release_leadership(&lock).await;
                if let Err(e) = &released {
                    error!("Error releasing leadership: {}", e);
                }
                hub.publish(LeadershipEvent::IsNotLeader);
                return released;
            }
            _ = loss.lost() => {
                warn!("Leadership lost, attempting to reacquire");
                hub.publish(LeadershipEvent::IsNotLeader);
                lock = manager.lock(&namespace);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasehold_lock::{InMemoryLeaseStore, ManagerOptions};
    use std::time::Duration;
    use tokio::time::timeout;

    const LEASE: Duration = Duration::from_millis(200);

    fn coordinator(name: &str, store: &InMemoryLeaseStore) -> LeadershipCoordinator {
        let manager = LeaseLockManager::new(
            ManagerOptions::new(name, LEASE),
            Arc::new(store.clone()),
        )
        .unwrap();
        LeadershipCoordinator::with_manager(LeaderOptions::new(name, "jobs"), manager).unwrap()
    }

    #[tokio::test]
    async fn test_coordinator_creation() {
        let options = LeaderOptions::new("node-a", "coordinator-creation")
            .with_lease_duration(LEASE);
        let coordinator = LeadershipCoordinator::new(options).await.unwrap();

        assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);
        assert_eq!(coordinator.name(), "node-a");
        assert_eq!(coordinator.namespace(), "coordinator-creation");
        assert!(!coordinator.is_running());
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let result = LeadershipCoordinator::new(LeaderOptions::new("", "jobs")).await;
        assert!(matches!(result, Err(LeaderError::InvalidOptions { .. })));

        let options = LeaderOptions::new("node-a", "jobs")
            .with_lease_duration(LEASE)
            .with_lease_refresh_frequency(LEASE * 2);
        let result = LeadershipCoordinator::new(options).await;
        assert!(matches!(result, Err(LeaderError::InvalidLockOptions { .. })));

        let options = LeaderOptions::new("node-a", "jobs").with_backend(
            leasehold_lock::LockBackend::Memory,
            "",
        );
        let result = LeadershipCoordinator::new(options).await;
        assert!(matches!(result, Err(LeaderError::CreatingLock { .. })));
    }

    #[test]
    fn test_control_loop_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let store = InMemoryLeaseStore::new();
        let manager =
            LeaseLockManager::new(ManagerOptions::new("node-a", LEASE), Arc::new(store)).unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let control_loop = run_control_loop(
            Arc::new(manager),
            Arc::new(BroadcastHub::new()),
            "jobs".to_string(),
            shutdown_rx,
        );
        assert_send(&control_loop);
    }

    #[test]
    fn test_start_outside_runtime_leaves_coordinator_startable() {
        let store = InMemoryLeaseStore::new();
        let coordinator = coordinator("node-a", &store);

        assert!(matches!(coordinator.start(), Err(LeaderError::NoRuntime)));
        assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);
        assert!(!coordinator.is_running());

        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let mut events = coordinator.subscribe();
            coordinator.start().unwrap();
            assert_eq!(
                timeout(LEASE * 2, events.recv()).await.unwrap(),
                Some(LeadershipEvent::IsLeader)
            );
            coordinator.stop().await.unwrap();
        });
    }

    #[tokio::test]
    async fn test_single_coordinator_lifecycle() {
        let store = InMemoryLeaseStore::new();
        let coordinator = coordinator("node-a", &store);
        let mut events = coordinator.subscribe();

        assert!(matches!(coordinator.stop().await, Err(LeaderError::NotStarted)));

        coordinator.start().unwrap();
        assert!(matches!(coordinator.start(), Err(LeaderError::AlreadyStarted)));
        assert_eq!(coordinator.state(), CoordinatorState::Started);

        let event = timeout(LEASE * 2, events.recv()).await.unwrap();
        assert_eq!(event, Some(LeadershipEvent::IsLeader));
        assert_eq!(coordinator.leader().await.unwrap(), Some("node-a".to_string()));
        assert!(coordinator.is_running());

        coordinator.stop().await.unwrap();
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
        assert!(!coordinator.is_running());
        assert_eq!(events.try_recv(), Some(LeadershipEvent::IsNotLeader));
        assert_eq!(coordinator.leader().await.unwrap(), None);
        assert!(store.is_empty());

        assert!(matches!(
            coordinator.stop().await,
            Err(LeaderError::AlreadyStopped)
        ));
        assert!(matches!(coordinator.start(), Err(LeaderError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_stop_while_waiting_publishes_nothing() {
        let store = InMemoryLeaseStore::new();
        let leader = coordinator("node-a", &store);
        let follower = coordinator("node-b", &store);

        let mut leader_events = leader.subscribe();
        leader.start().unwrap();
        timeout(LEASE * 2, leader_events.recv()).await.unwrap();

        let mut follower_events = follower.subscribe();
        follower.start().unwrap();
        tokio::time::sleep(LEASE).await;

        timeout(Duration::from_secs(1), follower.stop())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(follower_events.try_recv(), None);
        assert_eq!(leader.leader().await.unwrap(), Some("node-a".to_string()));

        leader.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_through_coordinator() {
        let store = InMemoryLeaseStore::new();
        let coordinator = coordinator("node-a", &store);

        let mut events = coordinator.subscribe();
        coordinator.unsubscribe(events.id());
        assert_eq!(coordinator.hub().subscriber_count(), 0);

        coordinator.start().unwrap();
        assert_eq!(timeout(LEASE, events.recv()).await.unwrap(), None);

        coordinator.stop().await.unwrap();
    }
}
