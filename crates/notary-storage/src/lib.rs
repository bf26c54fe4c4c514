//! Staged and live storage for repository metadata
//!
//! Metadata is written to a staging area while a publish is being prepared and
//! becomes visible to readers only when the whole staged tree is promoted. Two
//! backends are provided:
//!
//! - [`FileSystemStorage`]: generation directories behind an atomically swapped symlink
//! - [`InMemoryStorage`]: staged map plus an `Arc` snapshot of the live tree
//!
//! # Example
//!
//! ```no_run
//! use notary_storage::{FileSystemStorage, MetadataStorage};
//!
//! # async fn example() -> Result<(), notary_storage::Error> {
//! let storage = FileSystemStorage::new("/srv/repo").with_retained_generations(5);
//!
//! storage.write_staged("root.json", b"{}").await?;
//! let generation = storage.promote().await?;
//! println!("published generation {}", generation);
//!
//! assert!(storage.read_live("root.json").await?.is_some());
//! # Ok(())
//! # }
//! ```

mod error;
mod filesystem;
mod lock;
mod memory;

pub use error::{Error, Result};
pub use filesystem::FileSystemStorage;
pub use lock::RepositoryLock;
pub use memory::InMemoryStorage;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by storage operations
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Trait for metadata storage backends
///
/// Names are flat file names such as `root.json` or `3.targets.json`.
/// Nothing written through `write_staged` is visible through `read_live` until
/// `promote` succeeds, and `promote` replaces the live tree as a whole.
pub trait MetadataStorage: Send + Sync {
    /// Write a document into the staging area, replacing any previous content
    fn write_staged(&self, name: &str, data: &[u8]) -> StorageFuture<'_, ()>;

    /// Read a staged document
    ///
    /// Returns `Ok(None)` if it doesn't exist.
    fn read_staged(&self, name: &str) -> StorageFuture<'_, Option<Vec<u8>>>;

    /// List the names of all staged documents, sorted
    fn list_staged(&self) -> StorageFuture<'_, Vec<String>>;

    /// Remove a staged document; removing a missing name is not an error
    fn remove_staged(&self, name: &str) -> StorageFuture<'_, ()>;

    /// Make the current staged tree the live tree, returning its generation number
    ///
    /// [`Error::Swap`] means the switch itself failed and the live tree may be
    /// in doubt. Any other error leaves the previous live tree in place.
    fn promote(&self) -> StorageFuture<'_, u64>;

    /// Read a document from the live tree
    fn read_live(&self, name: &str) -> StorageFuture<'_, Option<Vec<u8>>>;

    /// List the names of all live documents, sorted
    fn list_live(&self) -> StorageFuture<'_, Vec<String>>;
}

/// Reject names that are not a single plain file name
pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

// Also implement MetadataStorage for Arc<T> where T: MetadataStorage
impl<T: MetadataStorage + ?Sized> MetadataStorage for Arc<T> {
    fn write_staged(&self, name: &str, data: &[u8]) -> StorageFuture<'_, ()> {
        (**self).write_staged(name, data)
    }

    fn read_staged(&self, name: &str) -> StorageFuture<'_, Option<Vec<u8>>> {
        (**self).read_staged(name)
    }

    fn list_staged(&self) -> StorageFuture<'_, Vec<String>> {
        (**self).list_staged()
    }

    fn remove_staged(&self, name: &str) -> StorageFuture<'_, ()> {
        (**self).remove_staged(name)
    }

    fn promote(&self) -> StorageFuture<'_, u64> {
        (**self).promote()
    }

    fn read_live(&self, name: &str) -> StorageFuture<'_, Option<Vec<u8>>> {
        (**self).read_live(name)
    }

    fn list_live(&self) -> StorageFuture<'_, Vec<String>> {
        (**self).list_live()
    }
}

// Implement MetadataStorage for Box<dyn MetadataStorage>
impl MetadataStorage for Box<dyn MetadataStorage> {
    fn write_staged(&self, name: &str, data: &[u8]) -> StorageFuture<'_, ()> {
        (**self).write_staged(name, data)
    }

    fn read_staged(&self, name: &str) -> StorageFuture<'_, Option<Vec<u8>>> {
        (**self).read_staged(name)
    }

    fn list_staged(&self) -> StorageFuture<'_, Vec<String>> {
        (**self).list_staged()
    }

    fn remove_staged(&self, name: &str) -> StorageFuture<'_, ()> {
        (**self).remove_staged(name)
    }

    fn promote(&self) -> StorageFuture<'_, u64> {
        (**self).promote()
    }

    fn read_live(&self, name: &str) -> StorageFuture<'_, Option<Vec<u8>>> {
        (**self).read_live(name)
    }

    fn list_live(&self) -> StorageFuture<'_, Vec<String>> {
        (**self).list_live()
    }
}
