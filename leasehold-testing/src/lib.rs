pub mod scripted;

pub use scripted::{ScriptedLock, ScriptedLockManager, ScriptedStats};

/// Install a fmt subscriber for test output; later calls are no-ops.
///
/// Honours `RUST_LOG`, defaulting to warnings only.
pub fn init_test_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
