//! File-based ledger store
//!
//! One record per revision at `<dir>/<name>/v<revision>.json`, optionally
//! compressed. Reads detect the compression from the data itself, so records
//! written under a different setting stay readable.
//!
//! Records are written to a temporary file and then published, so readers
//! never see a partial record; a new revision is published without
//! replacing, so two writers can never both record it.

use async_trait::async_trait;
use rudder_core::Release;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::{
    CompressionMethod, LedgerStore, StoreLock, compress, decompress, deserialize_release,
    serialize_release,
};
use crate::error::{KubeError, Result};

/// File-based [`LedgerStore`]
pub struct FileStore {
    /// Base directory for release records
    base_dir: PathBuf,
    compression: CompressionMethod,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>, compression: CompressionMethod) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            compression,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn release_dir(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    fn release_path(&self, name: &str, revision: u32) -> PathBuf {
        self.release_dir(name).join(format!("v{}.json", revision))
    }

    /// Encoded record in a temporary file next to its final location
    fn stage(&self, release: &Release) -> Result<NamedTempFile> {
        let dir = self.release_dir(&release.name);
        std::fs::create_dir_all(&dir)?;

        let data = compress(&serialize_release(release)?, self.compression)?;
        let mut staged = NamedTempFile::new_in(&dir)?;
        staged.write_all(&data)?;
        staged.as_file().sync_all()?;
        Ok(staged)
    }

    fn read_release(&self, path: &Path) -> Result<Release> {
        let data = std::fs::read(path)?;
        deserialize_release(&decompress(&data)?)
    }
}

/// Revision encoded in a `v<n>.json` file name
fn revision_of(path: &Path) -> Option<u32> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem()?.to_str()?.strip_prefix('v')?.parse().ok()
}

#[async_trait]
impl LedgerStore for FileStore {
    async fn get(&self, name: &str, revision: u32) -> Result<Option<Release>> {
        let path = self.release_path(name, revision);
        if !path.exists() {
            return Ok(None);
        }
        self.read_release(&path).map(Some)
    }

    async fn history(&self, name: &str) -> Result<Vec<Release>> {
        let dir = self.release_dir(name);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<(u32, PathBuf)> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter_map(|p| revision_of(&p).map(|rev| (rev, p)))
            .collect();
        files.sort_by_key(|(rev, _)| *rev);

        files
            .iter()
            .map(|(_, path)| self.read_release(path))
            .collect()
    }

    async fn create(&self, release: &Release) -> Result<()> {
        let path = self.release_path(&release.name, release.revision);
        match self.stage(release)?.persist_noclobber(&path) {
            Ok(_) => Ok(()),
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                Err(KubeError::Storage(format!(
                    "release '{}' revision {} already recorded",
                    release.name, release.revision
                )))
            }
            Err(err) => Err(err.error.into()),
        }
    }

    async fn update(&self, release: &Release) -> Result<()> {
        let path = self.release_path(&release.name, release.revision);
        if !path.exists() {
            return Err(KubeError::NoSuchRevision {
                name: release.name.clone(),
                revision: release.revision,
            });
        }
        self.stage(release)?
            .persist(&path)
            .map_err(|err| KubeError::Io(err.error))?;
        Ok(())
    }

    async fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = std::fs::read_dir(&self.base_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        Ok(names)
    }

    fn lock_name(&self, name: &str) -> Result<Option<StoreLock>> {
        StoreLock::acquire(&self.base_dir, name).map(Some)
    }
}
