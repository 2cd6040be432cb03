//! Cross-process name locks for file-backed ledgers
//!
//! An exclusive, non-blocking `flock` on `<dir>/.locks/<name>.lock`. The lock
//! belongs to the open file description, so it is released when the guard
//! drops or the process exits, and two opens in one process still exclude
//! each other.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{KubeError, Result};

/// Directory under the store root holding one lock file per release name
pub const LOCK_DIR: &str = ".locks";

/// Held advisory lock on one release name
#[derive(Debug)]
pub struct StoreLock {
    _file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Take the lock for `name`, failing with `NameLocked` if anyone else holds it
    pub fn acquire(base_dir: &Path, name: &str) -> Result<Self> {
        let dir = base_dir.join(LOCK_DIR);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.lock", name));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(release = name, path = %path.display(), "store lock acquired");
                Ok(Self { _file: file, path })
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Err(KubeError::NameLocked {
                name: name.to_string(),
            }),
            Err(err) => Err(KubeError::Storage(format!(
                "failed to lock {}: {}",
                path.display(),
                err
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> io::Result<()> {
    use rustix::fs::{FlockOperation, flock};
    use std::os::unix::io::AsFd;

    flock(file.as_fd(), FlockOperation::NonBlockingLockExclusive)
        .map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

// only the in-process lock table applies on other platforms
#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_holder_is_rejected_until_drop() {
        let dir = TempDir::new().unwrap();

        let first = StoreLock::acquire(dir.path(), "web").unwrap();
        assert!(first.path().ends_with(".locks/web.lock"));
        assert!(matches!(
            StoreLock::acquire(dir.path(), "web"),
            Err(KubeError::NameLocked { name }) if name == "web"
        ));

        // other names are independent
        let other = StoreLock::acquire(dir.path(), "api").unwrap();
        drop(other);

        drop(first);
        assert!(StoreLock::acquire(dir.path(), "web").is_ok());
    }
}
