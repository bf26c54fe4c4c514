//! Locked editing session over a repository directory

use crate::error::Result;
use notary_repo::{Repository, RepositoryConfig};
use notary_storage::{FileSystemStorage, MetadataStorage, RepositoryLock};
use notary_types::RoleName;
use std::path::Path;

/// A [`Repository`] on disk, held by this process alone
///
/// The repository lock is released when the session is dropped.
pub struct Session {
    repo: Repository<FileSystemStorage>,
    _lock: RepositoryLock,
}

impl Session {
    /// Lock `root` and resume its staged tree, or start an empty repository
    /// if nothing has been staged yet
    pub async fn open(root: impl AsRef<Path>, config: RepositoryConfig) -> Result<Self> {
        let root = root.as_ref();
        let lock = RepositoryLock::acquire(root)?;
        let storage = FileSystemStorage::new(root);

        let existing = storage
            .read_staged(&RoleName::root().file_name())
            .await?
            .is_some();
        let repo = if existing {
            Repository::load(storage, config).await?
        } else {
            tracing::info!("Creating repository at {}", root.display());
            Repository::create(storage, config)?
        };

        Ok(Self { repo, _lock: lock })
    }

    pub fn repository(&self) -> &Repository<FileSystemStorage> {
        &self.repo
    }

    pub fn repository_mut(&mut self) -> &mut Repository<FileSystemStorage> {
        &mut self.repo
    }
}
