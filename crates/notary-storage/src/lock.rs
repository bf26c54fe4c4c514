//! Exclusive writer lock on a repository root

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

const LOCK_FILE: &str = ".lock";

/// Exclusive lock held by the single writer of a repository
///
/// Acquired by creating `<root>/.lock` with `create_new`; released when dropped.
#[derive(Debug)]
pub struct RepositoryLock {
    path: PathBuf,
}

impl RepositoryLock {
    /// Take the lock, failing with [`Error::Locked`] if another writer holds it
    pub fn acquire(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let path = root.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::Locked(path));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        tracing::debug!("Acquired repository lock {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepositoryLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive() {
        let temp_dir = tempfile::tempdir().unwrap();
        let lock = RepositoryLock::acquire(temp_dir.path()).unwrap();
        assert!(lock.path().exists());

        let second = RepositoryLock::acquire(temp_dir.path());
        assert!(matches!(second, Err(Error::Locked(_))));

        drop(lock);
        assert!(RepositoryLock::acquire(temp_dir.path()).is_ok());
    }
}
