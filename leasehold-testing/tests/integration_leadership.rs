//! Leadership election between coordinators contending through real lease stores.

use std::time::Duration;
use tokio::time::{sleep, timeout};

use leasehold_leader::{
    LeaderOptions, LeadershipCoordinator, LeadershipEvent, LockBackend, Subscription,
};
use leasehold_testing::init_test_logging;

const LEASE: Duration = Duration::from_millis(200);

async fn coordinator(
    name: &str,
    namespace: &str,
    backend: LockBackend,
    url: &str,
) -> LeadershipCoordinator {
    let options = LeaderOptions::new(name, namespace)
        .with_backend(backend, url)
        .with_lease_duration(LEASE);
    LeadershipCoordinator::new(options).await.unwrap()
}

/// Wait for whichever of two subscriptions reports first; returns its index.
async fn first_leader(
    first: &mut Subscription<LeadershipEvent>,
    second: &mut Subscription<LeadershipEvent>,
) -> usize {
    let (index, event) = timeout(LEASE * 2, async {
        tokio::select! {
            event = first.recv() => (0, event),
            event = second.recv() => (1, event),
        }
    })
    .await
    .expect("no leader elected");

    assert_eq!(
        event,
        Some(LeadershipEvent::IsLeader),
        "received an event before the initial election"
    );
    index
}

async fn run_handover(backend: LockBackend, url: &str, namespace: &str) {
    let coordinators = [
        coordinator("leader0", namespace, backend, url).await,
        coordinator("leader1", namespace, backend, url).await,
    ];
    let [mut sub0, mut sub1] = [coordinators[0].subscribe(), coordinators[1].subscribe()];

    coordinators[0].start().unwrap();
    coordinators[1].start().unwrap();

    let leader = first_leader(&mut sub0, &mut sub1).await;
    let follower = 1 - leader;
    let leader_name = coordinators[leader].name().to_string();

    for coordinator in &coordinators {
        assert_eq!(coordinator.leader().await.unwrap(), Some(leader_name.clone()));
    }

    // The follower stays quiet while the leader keeps refreshing
    sleep(LEASE * 2).await;
    let mut subs = [sub0, sub1];
    assert_eq!(subs[follower].try_recv(), None);

    coordinators[leader].stop().await.unwrap();
    assert_eq!(subs[leader].try_recv(), Some(LeadershipEvent::IsNotLeader));

    let event = timeout(LEASE * 2, subs[follower].recv())
        .await
        .expect("no leader elected after handover");
    assert_eq!(event, Some(LeadershipEvent::IsLeader));

    let new_leader = coordinators[follower].name().to_string();
    for coordinator in &coordinators {
        assert_eq!(coordinator.leader().await.unwrap(), Some(new_leader.clone()));
    }

    coordinators[follower].stop().await.unwrap();
    assert_eq!(coordinators[leader].leader().await.unwrap(), None);
}

#[tokio::test]
async fn test_leadership_handover_in_memory() {
    init_test_logging();
    run_handover(
        LockBackend::Memory,
        "integration-handover",
        "test_leadership_handover_in_memory",
    )
    .await;
}

#[tokio::test]
async fn test_leadership_handover_file_system() {
    init_test_logging();
    let temp_dir = tempfile::TempDir::new().unwrap();
    let url = temp_dir.path().to_str().unwrap().to_string();

    run_handover(
        LockBackend::FileSystem,
        &url,
        "test_leadership_handover_file_system",
    )
    .await;
}

async fn run_one_leader_among_many(backend: LockBackend, url: &str, namespace: &str) {
    let mut coordinators = Vec::new();
    let mut subscriptions = Vec::new();

    for i in 0..4 {
        let coordinator = coordinator(&format!("node{}", i), namespace, backend, url).await;
        subscriptions.push(coordinator.subscribe());
        coordinators.push(coordinator);
    }
    for coordinator in &coordinators {
        coordinator.start().unwrap();
    }

    sleep(LEASE * 2).await;

    let leaders: Vec<usize> = subscriptions
        .iter_mut()
        .enumerate()
        .filter_map(|(i, sub)| (sub.try_recv() == Some(LeadershipEvent::IsLeader)).then_some(i))
        .collect();
    assert_eq!(leaders.len(), 1);

    let expected = coordinators[leaders[0]].name().to_string();
    for coordinator in &coordinators {
        assert_eq!(coordinator.leader().await.unwrap(), Some(expected.clone()));
    }

    for coordinator in &coordinators {
        coordinator.stop().await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_leader_among_many_in_memory() {
    init_test_logging();
    let namespace = "test_exactly_one_leader_among_many_in_memory";
    run_one_leader_among_many(LockBackend::Memory, namespace, namespace).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_leader_among_many_file_system() {
    init_test_logging();
    let temp_dir = tempfile::TempDir::new().unwrap();
    let url = temp_dir.path().to_str().unwrap().to_string();

    run_one_leader_among_many(
        LockBackend::FileSystem,
        &url,
        "test_exactly_one_leader_among_many_file_system",
    )
    .await;
}

#[tokio::test]
async fn test_unread_subscriber_blocks_nobody() {
    init_test_logging();
    let namespace = "test_unread_subscriber_blocks_nobody";
    let first = coordinator("node0", namespace, LockBackend::Memory, namespace).await;
    let second = coordinator("node1", namespace, LockBackend::Memory, namespace).await;

    let mut idle = first.subscribe();
    let mut active = first.subscribe();

    first.start().unwrap();
    assert_eq!(
        timeout(LEASE * 2, active.recv()).await.unwrap(),
        Some(LeadershipEvent::IsLeader)
    );
    second.start().unwrap();

    timeout(Duration::from_secs(1), first.stop())
        .await
        .expect("stop blocked by an unread subscriber")
        .unwrap();
    assert_eq!(active.try_recv(), Some(LeadershipEvent::IsNotLeader));

    // Only the first value fits in the idle subscriber's buffer
    assert_eq!(idle.try_recv(), Some(LeadershipEvent::IsLeader));
    assert_eq!(idle.try_recv(), None);
    assert!(first.hub().get_stats().dropped >= 1);

    second.stop().await.unwrap();
}
