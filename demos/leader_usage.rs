//! Two coordinators competing for one namespace.
//!
//! The first coordinator to acquire the lock leads; stopping it hands leadership to the other.
//! Run with `--file-system <dir>` to share the lock through a directory instead of memory.

use anyhow::Context;
use leasehold_leader::{LeaderOptions, LeadershipCoordinator, LeadershipEvent, LockBackend};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::info;

const NAMESPACE: &str = "demo-jobs";
const LEASE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let (backend, url) = match std::env::args().nth(1).as_deref() {
        Some("--file-system") => {
            let dir = std::env::args()
                .nth(2)
                .context("--file-system needs a directory")?;
            (LockBackend::FileSystem, dir)
        }
        _ => (LockBackend::Memory, "leader-usage-demo".to_string()),
    };
    info!("Using {} lock backend at {}", backend, url);

    let first = create_coordinator("worker-1", backend, &url).await?;
    let second = create_coordinator("worker-2", backend, &url).await?;

    let listeners = [watch_events(&first), watch_events(&second)];

    first.start()?;
    sleep(Duration::from_millis(200)).await;
    second.start()?;

    sleep(LEASE).await;
    let leader = first.leader().await?.context("nobody holds the lock")?;
    info!("Current leader: {}", leader);

    let (leading, waiting) = if leader == first.name() {
        (&first, &second)
    } else {
        (&second, &first)
    };

    info!("Stopping {}", leading.name());
    leading.stop().await?;

    sleep(LEASE).await;
    info!("Leader after handover: {:?}", waiting.leader().await?);

    waiting.stop().await?;

    // Listeners end once their coordinators are dropped
    drop(first);
    drop(second);
    for listener in listeners {
        listener.await?;
    }

    info!("Demo completed");
    Ok(())
}

async fn create_coordinator(
    name: &str,
    backend: LockBackend,
    url: &str,
) -> anyhow::Result<LeadershipCoordinator> {
    let options = LeaderOptions::new(name, NAMESPACE)
        .with_backend(backend, url)
        .with_lease_duration(LEASE);

    LeadershipCoordinator::new(options)
        .await
        .with_context(|| format!("creating coordinator {}", name))
}

fn watch_events(coordinator: &LeadershipCoordinator) -> JoinHandle<()> {
    let name = coordinator.name().to_string();
    let mut events = coordinator.subscribe();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                LeadershipEvent::IsLeader => info!("{} is now the leader", name),
                LeadershipEvent::IsNotLeader => info!("{} is no longer the leader", name),
            }
        }
    })
}
