//! In-memory ledger store
//!
//! Keeps releases in a map, useful for unit tests and dry runs
//! without touching disk.

use async_trait::async_trait;
use rudder_core::Release;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::LedgerStore;
use crate::error::{KubeError, Result};

type Revisions = HashMap<String, BTreeMap<u32, Release>>;

/// In-memory [`LedgerStore`]
#[derive(Clone, Default)]
pub struct MemoryStore {
    /// name -> revision -> release
    store: Arc<RwLock<Revisions>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-populated releases
    pub fn with_releases(releases: Vec<Release>) -> Self {
        let store = Self::new();
        {
            let mut map = store.write();
            for release in releases {
                map.entry(release.name.clone())
                    .or_default()
                    .insert(release.revision, release);
            }
        }
        store
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn reset_counts(&self) {
        *self.operations.write().unwrap_or_else(|e| e.into_inner()) = OperationCounts::default();
    }

    /// Total number of stored revisions across all names
    pub fn release_count(&self) -> usize {
        self.read().values().map(BTreeMap::len).sum()
    }

    fn read(&self) -> RwLockReadGuard<'_, Revisions> {
        self.store.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Revisions> {
        self.store.write().unwrap_or_else(|e| e.into_inner())
    }

    fn count(&self, f: impl FnOnce(&mut OperationCounts)) {
        f(&mut self.operations.write().unwrap_or_else(|e| e.into_inner()));
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn get(&self, name: &str, revision: u32) -> Result<Option<Release>> {
        self.count(|ops| ops.gets += 1);
        Ok(self
            .read()
            .get(name)
            .and_then(|revisions| revisions.get(&revision))
            .cloned())
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>> {
        self.count(|ops| ops.lists += 1);
        Ok(self
            .read()
            .get(name)
            .map(|revisions| revisions.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create(&self, release: &Release) -> Result<()> {
        self.count(|ops| ops.creates += 1);
        let mut map = self.write();
        let revisions = map.entry(release.name.clone()).or_default();
        if revisions.contains_key(&release.revision) {
            return Err(KubeError::Storage(format!(
                "release '{}' revision {} already recorded",
                release.name, release.revision
            )));
        }
        revisions.insert(release.revision, release.clone());
        Ok(())
    }

    async fn update(&self, release: &Release) -> Result<()> {
        self.count(|ops| ops.updates += 1);
        let mut map = self.write();
        match map
            .get_mut(&release.name)
            .and_then(|revisions| revisions.get_mut(&release.revision))
        {
            Some(existing) => {
                *existing = release.clone();
                Ok(())
            }
            None => Err(KubeError::NoSuchRevision {
                name: release.name.clone(),
                revision: release.revision,
            }),
        }
    }

    async fn names(&self) -> Result<Vec<String>> {
        self.count(|ops| ops.lists += 1);
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_core::{ChartRef, ManifestSet, Operation, ReleaseStatus, Values};

    fn release(name: &str, revision: u32) -> Release {
        let mut release = Release::pending(
            name,
            ChartRef {
                name: "web".to_string(),
                version: semver::Version::new(1, 0, 0),
            },
            Values::new(),
            ManifestSet::new(),
            Operation::Install,
        );
        release.revision = revision;
        release
    }

    #[tokio::test]
    async fn test_create_and_history() {
        let store = MemoryStore::new();
        store.create(&release("web", 2)).await.unwrap();
        store.create(&release("web", 1)).await.unwrap();

        let history = store.history("web").await.unwrap();
        let revisions: Vec<u32> = history.iter().map(|r| r.revision).collect();
        assert_eq!(revisions, vec![1, 2]);
        assert_eq!(store.release_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let store = MemoryStore::new();
        store.create(&release("web", 1)).await.unwrap();
        assert!(matches!(
            store.create(&release("web", 1)).await,
            Err(KubeError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let store = MemoryStore::with_releases(vec![release("web", 1)]);

        let mut updated = release("web", 1);
        updated.status = ReleaseStatus::Deployed;
        store.update(&updated).await.unwrap();
        assert_eq!(
            store.get("web", 1).await.unwrap().unwrap().status,
            ReleaseStatus::Deployed
        );

        assert!(store.update(&release("web", 9)).await.is_err());
    }

    #[tokio::test]
    async fn test_operation_counts() {
        let store = MemoryStore::new();
        store.create(&release("b", 1)).await.unwrap();
        store.create(&release("a", 1)).await.unwrap();
        store.get("a", 1).await.unwrap();
        assert_eq!(store.names().await.unwrap(), vec!["a", "b"]);

        assert_eq!(
            store.operation_counts(),
            OperationCounts {
                gets: 1,
                lists: 1,
                creates: 2,
                updates: 0,
            }
        );

        store.reset_counts();
        assert_eq!(store.operation_counts(), OperationCounts::default());
    }
}
