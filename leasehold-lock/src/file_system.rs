use crate::store::{now_millis, LeaseRecord, LeaseStore};
use async_trait::async_trait;
use fs2::FileExt;
use leasehold_core::{LockError, LockResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// How long to wait for another holder's guard before giving up
pub const DEFAULT_GUARD_TIMEOUT: Duration = Duration::from_secs(5);

const GUARD_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Lease store backed by a directory shared between processes.
///
/// Every namespace has one JSON lease file. Read-modify-write cycles are serialized through an
/// exclusive advisory lock on a guard file next to it, and records are replaced through a
/// temporary file and a rename. The operating system drops the advisory lock when its holder
/// exits, so a crashed process never leaves the namespace guarded.
#[derive(Debug, Clone)]
pub struct FileSystemLeaseStore {
    data_dir: PathBuf,
    guard_timeout: Duration,
}

impl FileSystemLeaseStore {
    /// Create a store rooted at `data_dir`, creating the directory if needed.
    ///
    /// # Errors
    /// * Returns error if the data directory cannot be created
    pub async fn new<P: AsRef<Path>>(data_dir: P) -> LockResult<Self> {
        let data_dir = data_dir.as_ref();

        if !data_dir.exists() {
            fs::create_dir_all(data_dir).await.map_err(|e| {
                LockError::store(format!("Failed to create lease directory: {}", e))
            })?;
        }

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            guard_timeout: DEFAULT_GUARD_TIMEOUT,
        })
    }

    pub fn with_guard_timeout(mut self, timeout: Duration) -> Self {
        self.guard_timeout = timeout;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn lease_path(&self, namespace: &str) -> PathBuf {
        self.data_dir.join(format!("{}.lease", file_stem(namespace)))
    }

    fn guard_path(&self, namespace: &str) -> PathBuf {
        self.data_dir.join(format!("{}.guard", file_stem(namespace)))
    }

    // The guard file is never removed: unlinking it would let a later opener lock a fresh inode
    // while an earlier holder still locks the old one.
    async fn guard(&self, namespace: &str) -> LockResult<GuardFile> {
        let path = self.guard_path(namespace);
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| LockError::store(format!("Failed to open lease guard: {}", e)))?
            .into_std()
            .await;

        let deadline = Instant::now() + self.guard_timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(GuardFile { file }),
                Err(e) if is_contended(&e) => {
                    if Instant::now() >= deadline {
                        warn!("Timed out waiting for lease guard {}", path.display());
                        return Err(LockError::store(format!(
                            "Timed out waiting for lease guard {}",
                            path.display()
                        )));
                    }
                    tokio::time::sleep(GUARD_RETRY_INTERVAL).await;
                }
                Err(e) => {
                    return Err(LockError::store(format!(
                        "Failed to lock lease guard: {}",
                        e
                    )))
                }
            }
        }
    }

    async fn read_record(&self, namespace: &str) -> LockResult<Option<LeaseRecord>> {
        match fs::read(self.lease_path(namespace)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LockError::store(format!(
                "Failed to read lease file: {}",
                e
            ))),
        }
    }

    async fn write_record(&self, namespace: &str, record: &LeaseRecord) -> LockResult<()> {
        let lease_path = self.lease_path(namespace);
        let temp_path = lease_path.with_extension("tmp");

        fs::write(&temp_path, serde_json::to_vec(record)?)
            .await
            .map_err(|e| LockError::store(format!("Failed to write lease temp file: {}", e)))?;

        fs::rename(&temp_path, &lease_path)
            .await
            .map_err(|e| LockError::store(format!("Failed to rename lease temp file: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl LeaseStore for FileSystemLeaseStore {
    async fn try_acquire(
        &self,
        namespace: &str,
        owner: &str,
        token: Uuid,
        lease: Duration,
    ) -> LockResult<bool> {
        let _guard = self.guard(namespace).await?;

        if let Some(current) = self.read_record(namespace).await? {
            if !current.grants(token, now_millis()) {
                return Ok(false);
            }
        }

        self.write_record(namespace, &LeaseRecord::new(owner, token, lease))
            .await?;
        debug!("Lease file written for namespace {}", namespace);
        Ok(true)
    }

    async fn refresh(&self, namespace: &str, token: Uuid, lease: Duration) -> LockResult<bool> {
        let _guard = self.guard(namespace).await?;

        let Some(mut record) = self.read_record(namespace).await? else {
            return Ok(false);
        };
        if !record.is_held_by(token) || !record.is_live(now_millis()) {
            return Ok(false);
        }

        record.extend(lease);
        self.write_record(namespace, &record).await?;
        Ok(true)
    }

    async fn release(&self, namespace: &str, token: Uuid) -> LockResult<bool> {
        let _guard = self.guard(namespace).await?;

        match self.read_record(namespace).await? {
            Some(record) if record.is_held_by(token) => {
                fs::remove_file(self.lease_path(namespace)).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn owner(&self, namespace: &str) -> LockResult<Option<String>> {
        let now = now_millis();
        Ok(self
            .read_record(namespace)
            .await?
            .filter(|record| record.is_live(now))
            .map(|record| record.owner))
    }
}

/// Exclusive guard over one namespace's lease file, unlocked on drop.
struct GuardFile {
    file: std::fs::File,
}

impl Drop for GuardFile {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Namespaces become file names: ASCII alphanumerics, `-` and `_` are kept, other bytes are
/// percent-encoded.
fn file_stem(namespace: &str) -> String {
    let mut stem = String::with_capacity(namespace.len());
    for byte in namespace.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("%{:02X}", byte));
        }
    }
    stem
}
