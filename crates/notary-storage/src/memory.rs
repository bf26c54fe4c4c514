//! In-memory storage implementation

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{check_name, MetadataStorage, StorageFuture};

type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Default)]
struct LiveTree {
    generation: u64,
    files: Arc<Tree>,
}

/// In-memory metadata storage
///
/// The live tree is an immutable `Arc` snapshot that `promote` replaces under
/// a write lock, so readers never observe a partially promoted tree.
/// Not persistent across process restarts.
///
/// # Example
///
/// ```
/// use notary_storage::{InMemoryStorage, MetadataStorage};
///
/// # async fn example() -> Result<(), notary_storage::Error> {
/// let storage = InMemoryStorage::new();
/// storage.write_staged("root.json", b"{}").await?;
/// storage.promote().await?;
/// assert!(storage.read_live("root.json").await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    staged: Arc<RwLock<Tree>>,
    live: Arc<RwLock<LiveTree>>,
}

impl InMemoryStorage {
    /// Create new empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the whole live tree
    pub async fn live_snapshot(&self) -> Arc<BTreeMap<String, Vec<u8>>> {
        self.live.read().await.files.clone()
    }

    /// Generation number of the live tree, zero before the first promote
    pub async fn generation(&self) -> u64 {
        self.live.read().await.generation
    }
}

impl MetadataStorage for InMemoryStorage {
    fn write_staged(&self, name: &str, data: &[u8]) -> StorageFuture<'_, ()> {
        let name = name.to_string();
        let data = data.to_vec();
        Box::pin(async move {
            check_name(&name)?;
            self.staged.write().await.insert(name, data);
            Ok(())
        })
    }

    fn read_staged(&self, name: &str) -> StorageFuture<'_, Option<Vec<u8>>> {
        let name = name.to_string();
        Box::pin(async move {
            check_name(&name)?;
            Ok(self.staged.read().await.get(&name).cloned())
        })
    }

    fn list_staged(&self) -> StorageFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(self.staged.read().await.keys().cloned().collect()) })
    }

    fn remove_staged(&self, name: &str) -> StorageFuture<'_, ()> {
        let name = name.to_string();
        Box::pin(async move {
            check_name(&name)?;
            self.staged.write().await.remove(&name);
            Ok(())
        })
    }

    fn promote(&self) -> StorageFuture<'_, u64> {
        Box::pin(async move {
            let files = Arc::new(self.staged.read().await.clone());
            let mut live = self.live.write().await;
            live.generation += 1;
            live.files = files;
            Ok(live.generation)
        })
    }

    fn read_live(&self, name: &str) -> StorageFuture<'_, Option<Vec<u8>>> {
        let name = name.to_string();
        Box::pin(async move {
            check_name(&name)?;
            Ok(self.live.read().await.files.get(&name).cloned())
        })
    }

    fn list_live(&self) -> StorageFuture<'_, Vec<String>> {
        Box::pin(async move { Ok(self.live.read().await.files.keys().cloned().collect()) })
    }
}
