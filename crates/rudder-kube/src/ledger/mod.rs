//! Release ledger: per-name revision history with advisory name locks
//!
//! Persistence goes through a [`LedgerStore`]:
//! - **Memory**: in-process, for tests and dry runs
//! - **File**: one JSON record per revision under `<dir>/<name>/v<rev>.json`,
//!   optionally gzip or zstd compressed, with name locks shared between
//!   processes through `flock`
//!
//! History is append-only. The only mutation of an existing revision is a
//! validated status transition.

mod file;
mod lock;
mod memory;

pub use file::FileStore;
pub use lock::{LOCK_DIR, StoreLock};
pub use memory::{MemoryStore, OperationCounts};

use async_trait::async_trait;
use rudder_core::{Release, ReleaseStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::error::{KubeError, Result};

/// Storage backend for release records
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// A single revision, if recorded
    async fn get(&self, name: &str, revision: u32) -> Result<Option<Release>>;

    /// Every revision of a release, oldest first (empty if unknown)
    async fn history(&self, name: &str) -> Result<Vec<Release>>;

    /// Store a new revision; fails if that revision already exists
    async fn create(&self, release: &Release) -> Result<()>;

    /// Overwrite an existing revision
    async fn update(&self, release: &Release) -> Result<()>;

    /// Names of all recorded releases, sorted
    async fn names(&self) -> Result<Vec<String>>;

    /// Lock `name` against other ledgers over the same storage
    ///
    /// Held until the guard drops. Stores private to one ledger need none.
    fn lock_name(&self, _name: &str) -> Result<Option<StoreLock>> {
        Ok(None)
    }
}

/// Compression method for stored records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum CompressionMethod {
    /// No compression
    None,

    /// Gzip compression
    Gzip { level: u32 },

    /// Zstd compression (better ratio, faster)
    Zstd { level: i32 },
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::None
    }
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Compress data using the configured method
#[must_use = "compression result should be used"]
pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Gzip { level } => {
            use std::io::Write;
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::new(level));
            encoder
                .write_all(data)
                .map_err(|e| KubeError::Compression(e.to_string()))?;
            encoder
                .finish()
                .map_err(|e| KubeError::Compression(e.to_string()))
        }
        CompressionMethod::Zstd { level } => zstd::encode_all(std::io::Cursor::new(data), level)
            .map_err(|e| KubeError::Compression(e.to_string())),
    }
}

/// Decompress data, detecting the method from its magic bytes
#[must_use = "decompression result should be used"]
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.starts_with(&GZIP_MAGIC) {
        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| KubeError::Compression(e.to_string()))?;
        Ok(decompressed)
    } else if data.starts_with(&ZSTD_MAGIC) {
        zstd::decode_all(std::io::Cursor::new(data))
            .map_err(|e| KubeError::Compression(e.to_string()))
    } else {
        Ok(data.to_vec())
    }
}

/// Serialize a release to JSON bytes
pub fn serialize_release(release: &Release) -> Result<Vec<u8>> {
    serde_json::to_vec(release).map_err(|e| KubeError::Serialization(e.to_string()))
}

/// Deserialize a release from JSON bytes
pub fn deserialize_release(data: &[u8]) -> Result<Release> {
    serde_json::from_slice(data).map_err(|e| KubeError::Serialization(e.to_string()))
}

/// The release ledger
pub struct ReleaseLedger<S> {
    store: S,
    locks: Arc<Mutex<HashSet<String>>>,
}

impl<S: LedgerStore> ReleaseLedger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Take the advisory lock for `name`, failing at once if it is held
    ///
    /// Held both in this ledger and, for shared stores, in the store itself.
    pub fn lock(&self, name: &str) -> Result<NameLock<'_, S>> {
        {
            let mut held = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if !held.insert(name.to_string()) {
                return Err(KubeError::NameLocked {
                    name: name.to_string(),
                });
            }
        }

        let store_lock = match self.store.lock_name(name) {
            Ok(store_lock) => store_lock,
            Err(err) => {
                self.release_name(name);
                return Err(err);
            }
        };

        debug!(release = name, "name lock acquired");
        Ok(NameLock {
            ledger: self,
            name: name.to_string(),
            store_lock,
        })
    }

    fn release_name(&self, name: &str) {
        let mut held = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(name);
    }

    /// Whether an operation of this ledger currently holds the lock for `name`
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }

    /// Append a pending revision under a short-lived lock
    pub async fn append(&self, name: &str, release: Release) -> Result<u32> {
        self.lock(name)?.append(release).await
    }

    /// Change the status of a revision under a short-lived lock
    pub async fn mark_status(
        &self,
        name: &str,
        revision: u32,
        status: ReleaseStatus,
        reason: Option<String>,
    ) -> Result<Release> {
        self.lock(name)?
            .mark_status(revision, status, reason)
            .await
    }

    /// Every revision of `name`, oldest first
    pub async fn history(&self, name: &str) -> Result<Vec<Release>> {
        self.store.history(name).await
    }

    pub async fn get(&self, name: &str, revision: u32) -> Result<Release> {
        self.store
            .get(name, revision)
            .await?
            .ok_or_else(|| KubeError::NoSuchRevision {
                name: name.to_string(),
                revision,
            })
    }

    /// The most recent revision regardless of status
    pub async fn latest(&self, name: &str) -> Result<Option<Release>> {
        Ok(self.store.history(name).await?.pop())
    }

    /// The revision currently deployed, if any
    pub async fn latest_deployed(&self, name: &str) -> Result<Option<Release>> {
        Ok(self
            .store
            .history(name)
            .await?
            .into_iter()
            .rev()
            .find(Release::is_deployed))
    }

    pub async fn names(&self) -> Result<Vec<String>> {
        self.store.names().await
    }

    async fn append_locked(&self, name: &str, mut release: Release) -> Result<u32> {
        let history = self.store.history(name).await?;
        let revision = history.last().map(|r| r.revision).unwrap_or(0) + 1;

        let now = chrono::Utc::now();
        release.name = name.to_string();
        release.revision = revision;
        release.status = ReleaseStatus::Pending;
        release.failure_reason = None;
        release.created_at = now;
        release.updated_at = now;

        self.store.create(&release).await?;
        info!(release = name, revision, operation = %release.operation, "revision appended");
        Ok(revision)
    }

    async fn mark_status_locked(
        &self,
        name: &str,
        revision: u32,
        status: ReleaseStatus,
        reason: Option<String>,
    ) -> Result<Release> {
        let mut release = self.get(name, revision).await?;

        if !release.status.can_transition_to(status) {
            return Err(KubeError::InvalidTransition {
                name: name.to_string(),
                revision,
                from: release.status,
                to: status,
            });
        }

        if status == ReleaseStatus::Deployed {
            for mut previous in self.store.history(name).await? {
                if previous.revision != revision && previous.is_deployed() {
                    previous.set_status(ReleaseStatus::Superseded, None);
                    self.store.update(&previous).await?;
                    debug!(release = name, revision = previous.revision, "superseded");
                }
            }
        }

        release.set_status(status, reason);
        self.store.update(&release).await?;
        info!(release = name, revision, %status, "status changed");
        Ok(release)
    }
}

/// Proof that the caller holds the advisory lock for one release name
///
/// Released when dropped.
pub struct NameLock<'a, S: LedgerStore> {
    ledger: &'a ReleaseLedger<S>,
    name: String,
    store_lock: Option<StoreLock>,
}

impl<S: LedgerStore> NameLock<'_, S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `release` as the next revision, with status `pending`
    pub async fn append(&self, release: Release) -> Result<u32> {
        self.ledger.append_locked(&self.name, release).await
    }

    /// Validated status transition; marking `deployed` supersedes the previous deployed revision
    pub async fn mark_status(
        &self,
        revision: u32,
        status: ReleaseStatus,
        reason: Option<String>,
    ) -> Result<Release> {
        self.ledger
            .mark_status_locked(&self.name, revision, status, reason)
            .await
    }

    /// Record why an operation on `revision` failed, leaving its status alone
    pub async fn record_failure(&self, revision: u32, reason: impl Into<String>) -> Result<Release> {
        let mut release = self.ledger.get(&self.name, revision).await?;
        release.record_failure(reason);
        self.ledger.store.update(&release).await?;
        debug!(release = %self.name, revision, "failure recorded");
        Ok(release)
    }
}

impl<S: LedgerStore> Drop for NameLock<'_, S> {
    fn drop(&mut self) {
        self.store_lock.take();
        self.ledger.release_name(&self.name);
        debug!(release = %self.name, "name lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_core::{ChartRef, ManifestSet, Operation, Values};

    pub(crate) fn test_release(name: &str) -> Release {
        Release::pending(
            name,
            ChartRef {
                name: "web".to_string(),
                version: semver::Version::new(0, 1, 0),
            },
            Values::new(),
            ManifestSet::from_yaml("kind: ConfigMap\nmetadata:\n  name: cfg\n").unwrap(),
            Operation::Install,
        )
    }

    fn ledger() -> ReleaseLedger<MemoryStore> {
        ReleaseLedger::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_append_assigns_contiguous_revisions() {
        let ledger = ledger();

        assert_eq!(ledger.append("web", test_release("web")).await.unwrap(), 1);
        assert_eq!(ledger.append("web", test_release("web")).await.unwrap(), 2);
        assert_eq!(ledger.append("api", test_release("api")).await.unwrap(), 1);

        let history = ledger.history("web").await.unwrap();
        let revisions: Vec<u32> = history.iter().map(|r| r.revision).collect();
        assert_eq!(revisions, vec![1, 2]);
        assert!(history.iter().all(|r| r.status == ReleaseStatus::Pending));
    }

    #[tokio::test]
    async fn test_mark_deployed_supersedes_previous() {
        let ledger = ledger();
        let lock = ledger.lock("web").unwrap();

        let first = lock.append(test_release("web")).await.unwrap();
        lock.mark_status(first, ReleaseStatus::Deployed, None).await.unwrap();
        let second = lock.append(test_release("web")).await.unwrap();
        lock.mark_status(second, ReleaseStatus::Deployed, None).await.unwrap();
        drop(lock);

        let history = ledger.history("web").await.unwrap();
        assert_eq!(history[0].status, ReleaseStatus::Superseded);
        assert_eq!(history[1].status, ReleaseStatus::Deployed);
        assert_eq!(
            ledger.latest_deployed("web").await.unwrap().unwrap().revision,
            second
        );
    }

    #[tokio::test]
    async fn test_failed_revision_keeps_previous_deployed() {
        let ledger = ledger();
        let lock = ledger.lock("web").unwrap();

        let first = lock.append(test_release("web")).await.unwrap();
        lock.mark_status(first, ReleaseStatus::Deployed, None).await.unwrap();
        let second = lock.append(test_release("web")).await.unwrap();
        let failed = lock
            .mark_status(second, ReleaseStatus::Failed, Some("boom".into()))
            .await
            .unwrap();

        assert_eq!(failed.failure_reason.as_deref(), Some("boom"));
        assert_eq!(
            ledger.latest_deployed("web").await.unwrap().unwrap().revision,
            first
        );
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let ledger = ledger();
        let revision = ledger.append("web", test_release("web")).await.unwrap();
        ledger
            .mark_status("web", revision, ReleaseStatus::Failed, None)
            .await
            .unwrap();

        let err = ledger
            .mark_status("web", revision, ReleaseStatus::Deployed, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KubeError::InvalidTransition {
                from: ReleaseStatus::Failed,
                to: ReleaseStatus::Deployed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_name_lock_is_exclusive_per_name() {
        let ledger = ledger();

        let lock = ledger.lock("web").unwrap();
        assert!(matches!(
            ledger.lock("web"),
            Err(KubeError::NameLocked { name }) if name == "web"
        ));
        assert!(matches!(
            ledger.append("web", test_release("web")).await,
            Err(KubeError::NameLocked { .. })
        ));

        // other names are unaffected
        let other = ledger.lock("api").unwrap();
        drop(other);

        drop(lock);
        assert!(!ledger.is_locked("web"));
        assert!(ledger.lock("web").is_ok());
    }

    #[tokio::test]
    async fn test_unknown_release() {
        let ledger = ledger();
        assert!(ledger.history("nope").await.unwrap().is_empty());
        assert!(ledger.latest_deployed("nope").await.unwrap().is_none());
        assert!(matches!(
            ledger.get("nope", 1).await,
            Err(KubeError::NoSuchRevision { revision: 1, .. })
        ));
    }

    #[test]
    fn test_compression_round_trip() {
        let data = b"{\"name\":\"web\",\"revision\":1}".repeat(20);

        for method in [
            CompressionMethod::None,
            CompressionMethod::Gzip { level: 6 },
            CompressionMethod::Zstd { level: 3 },
        ] {
            let packed = compress(&data, method).unwrap();
            assert_eq!(decompress(&packed).unwrap(), data, "{:?}", method);
        }
    }

    #[test]
    fn test_compression_config_format() {
        let method: CompressionMethod = serde_yaml::from_str("method: zstd\nlevel: 5\n").unwrap();
        assert_eq!(method, CompressionMethod::Zstd { level: 5 });

        let method: CompressionMethod = serde_yaml::from_str("method: none\n").unwrap();
        assert_eq!(method, CompressionMethod::None);
    }
}
