//! File system based storage implementation

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::{check_name, Error, MetadataStorage, Result, StorageFuture};

const STAGED_DIR: &str = "metadata.staged";
const GENERATIONS_DIR: &str = "generations";
const LIVE_LINK: &str = "metadata";
#[cfg(not(unix))]
const LIVE_POINTER: &str = "metadata.current";

/// Default number of published generations kept on disk
pub const DEFAULT_RETAINED_GENERATIONS: usize = 3;

/// File system based metadata storage
///
/// Staged documents live in a working directory. Promotion copies them into a
/// fresh, never-modified generation directory and then switches the live
/// `metadata` symlink to it with a single `rename`, so readers following the
/// link see either the previous tree or the new one.
///
/// # Directory Structure
///
/// ```text
/// root/
/// ├── metadata.staged/
/// │   ├── root.json
/// │   └── ...
/// ├── generations/
/// │   ├── 1/
/// │   └── 2/
/// └── metadata -> generations/2
/// ```
///
/// On platforms without symlinks the current generation is recorded in a
/// `metadata.current` pointer file, replaced the same way.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    /// Repository root directory
    root: PathBuf,
    /// How many generations to keep after a promote
    retained: usize,
}

impl FileSystemStorage {
    /// Create storage rooted at the given directory
    ///
    /// Directories are created on first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            retained: DEFAULT_RETAINED_GENERATIONS,
        }
    }

    /// Keep the newest `n` generations after each promote (at least one)
    pub fn with_retained_generations(mut self, n: usize) -> Self {
        self.retained = n.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the staging directory
    pub fn staged_dir(&self) -> PathBuf {
        self.root.join(STAGED_DIR)
    }

    /// Path readers use to reach the live tree
    pub fn live_path(&self) -> PathBuf {
        self.root.join(LIVE_LINK)
    }

    fn generations_dir(&self) -> PathBuf {
        self.root.join(GENERATIONS_DIR)
    }

    fn generation_dir(&self, generation: u64) -> PathBuf {
        self.generations_dir().join(generation.to_string())
    }

    /// The generation the live tree currently points at
    pub async fn current_generation(&self) -> Result<Option<u64>> {
        #[cfg(unix)]
        let target = match fs::read_link(self.live_path()).await {
            Ok(target) => target
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        #[cfg(not(unix))]
        let target = match fs::read_to_string(self.root.join(LIVE_POINTER)).await {
            Ok(content) => Some(content.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        match target {
            Some(name) => name
                .parse::<u64>()
                .map(Some)
                .map_err(|_| Error::Io(format!("live tree points at unknown generation {}", name))),
            None => Ok(None),
        }
    }

    /// All generation numbers present on disk, ascending
    async fn generations(&self) -> Result<Vec<u64>> {
        let mut generations: Vec<u64> = list_dir(&self.generations_dir(), EntryKind::Dir)
            .await?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        generations.sort_unstable();
        Ok(generations)
    }

    /// Copy every staged document into a new generation directory
    async fn fill_generation(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).await?;
        for name in self.list_staged().await? {
            fs::copy(self.staged_dir().join(&name), dir.join(&name)).await?;
        }
        Ok(())
    }

    async fn swap_live(&self, generation: u64) -> Result<()> {
        #[cfg(unix)]
        {
            let tmp = self.root.join(format!("{}.tmp-{}", LIVE_LINK, generation));
            let _ = fs::remove_file(&tmp).await;
            let target = Path::new(GENERATIONS_DIR).join(generation.to_string());
            fs::symlink(&target, &tmp).await?;
            fs::rename(&tmp, self.live_path())
                .await
                .map_err(|e| Error::Swap(e.to_string()))
        }
        #[cfg(not(unix))]
        {
            let pointer = self.root.join(LIVE_POINTER);
            let tmp = self.root.join(format!("{}.tmp", LIVE_POINTER));
            fs::write(&tmp, generation.to_string()).await?;
            fs::rename(&tmp, pointer)
                .await
                .map_err(|e| Error::Swap(e.to_string()))
        }
    }

    /// Remove generations beyond the retention count, never the live one
    async fn prune(&self, live: u64) -> Result<()> {
        let generations = self.generations().await?;
        let keep_from = generations.len().saturating_sub(self.retained);
        for generation in &generations[..keep_from] {
            if *generation == live {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(self.generation_dir(*generation)).await {
                tracing::warn!("Failed to prune generation {}: {}", generation, e);
            }
        }
        Ok(())
    }

    async fn live_dir(&self) -> Result<Option<PathBuf>> {
        Ok(self
            .current_generation()
            .await?
            .map(|generation| self.generation_dir(generation)))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Dir,
}

/// Sorted entry names of one kind in `dir`; a missing directory is empty
async fn list_dir(dir: &Path, kind: EntryKind) -> Result<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        let matches = match kind {
            EntryKind::File => file_type.is_file(),
            EntryKind::Dir => file_type.is_dir(),
        };
        if matches {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl MetadataStorage for FileSystemStorage {
    fn write_staged(&self, name: &str, data: &[u8]) -> StorageFuture<'_, ()> {
        let name = name.to_string();
        let data = data.to_vec();
        Box::pin(async move {
            check_name(&name)?;
            let dir = self.staged_dir();
            fs::create_dir_all(&dir).await?;

            // Write then rename so a crash never leaves a torn staged file
            let tmp = dir.join(format!(".{}.tmp", name));
            fs::write(&tmp, &data).await?;
            fs::rename(&tmp, dir.join(&name)).await?;
            Ok(())
        })
    }

    fn read_staged(&self, name: &str) -> StorageFuture<'_, Option<Vec<u8>>> {
        let name = name.to_string();
        Box::pin(async move {
            check_name(&name)?;
            read_optional(&self.staged_dir().join(name)).await
        })
    }

    fn list_staged(&self) -> StorageFuture<'_, Vec<String>> {
        Box::pin(async move {
            let names = list_dir(&self.staged_dir(), EntryKind::File).await?;
            Ok(names.into_iter().filter(|n| !n.starts_with('.')).collect())
        })
    }

    fn remove_staged(&self, name: &str) -> StorageFuture<'_, ()> {
        let name = name.to_string();
        Box::pin(async move {
            check_name(&name)?;
            match fs::remove_file(self.staged_dir().join(name)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn promote(&self) -> StorageFuture<'_, u64> {
        Box::pin(async move {
            let latest = self.generations().await?.last().copied();
            let current = self.current_generation().await?;
            let generation = latest.max(current).unwrap_or(0) + 1;

            let dir = self.generation_dir(generation);
            if let Err(e) = self.fill_generation(&dir).await {
                let _ = fs::remove_dir_all(&dir).await;
                return Err(e);
            }
            tracing::debug!("Copied staged tree into generation {}", generation);

            self.swap_live(generation).await?;
            tracing::debug!("Live tree now at generation {}", generation);

            // The new tree is live; leftover generations are only disk space
            if let Err(e) = self.prune(generation).await {
                tracing::warn!("Failed to prune old generations: {}", e);
            }
            Ok(generation)
        })
    }

    fn read_live(&self, name: &str) -> StorageFuture<'_, Option<Vec<u8>>> {
        let name = name.to_string();
        Box::pin(async move {
            check_name(&name)?;
            match self.live_dir().await? {
                Some(dir) => read_optional(&dir.join(name)).await,
                None => Ok(None),
            }
        })
    }

    fn list_live(&self) -> StorageFuture<'_, Vec<String>> {
        Box::pin(async move {
            match self.live_dir().await? {
                Some(dir) => list_dir(&dir, EntryKind::File).await,
                None => Ok(Vec::new()),
            }
        })
    }
}
