use std::io;
use std::path::Path;

use walkdir::WalkDir;

use crate::cache_dir::{CacheDir, META_FILENAME};
use crate::chunk::MigrationChunk;
use crate::error::{CacheError, Result};
use crate::hash_tree::HashTree;
use crate::lock::EntryLock;
use crate::util::atomic_write;

/// Persistence of cache entries, keyed by chunk boundaries.
///
/// The synchronizer and the optimizer only talk to the cache through this
/// trait, so tests can substitute or wrap the default [`LocalCacheStore`].
pub trait CacheStore: Send + Sync {
    /// Whether a complete entry (query, hash tree and metadata) exists.
    fn exists(&self, chunk: &MigrationChunk) -> bool;

    /// Root digest of the stored hash tree.
    fn read_hash(&self, chunk: &MigrationChunk) -> Result<String>;

    fn read_query(&self, chunk: &MigrationChunk) -> Result<String>;

    /// Metadata of every stored entry, in directory-name order.
    fn read_entries(&self) -> Result<Vec<MigrationChunk>>;

    /// Create or overwrite the entry for `chunk`.
    fn write(&self, chunk: &MigrationChunk, query: &str, hash_tree: &HashTree) -> Result<()>;

    /// Replace the stored query and mark the entry optimised, under the entry lock.
    fn optimised_rewrite(&self, chunk: &MigrationChunk, new_query: &str) -> Result<()>;

    fn remove(&self, chunk: &MigrationChunk) -> Result<()>;
}

/// Filesystem-backed [`CacheStore`].
#[derive(Clone, Debug)]
pub struct LocalCacheStore {
    dir: CacheDir,
}

impl LocalCacheStore {
    pub fn new(dir: CacheDir) -> Self {
        Self { dir }
    }

    pub fn cache_dir(&self) -> &CacheDir {
        &self.dir
    }

    fn read_meta(&self, path: &Path) -> Result<MigrationChunk> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| CacheError::corruption(path, format!("unreadable: {err}")))?;
        serde_json::from_str(&text).map_err(|err| CacheError::corruption(path, err))
    }

    fn write_meta(&self, chunk: &MigrationChunk) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(chunk)?;
        atomic_write(&self.dir.meta_path(chunk), &bytes)
    }
}

impl CacheStore for LocalCacheStore {
    fn exists(&self, chunk: &MigrationChunk) -> bool {
        self.dir.query_path(chunk).is_file()
            && self.dir.hash_tree_path(chunk).is_file()
            && self.dir.meta_path(chunk).is_file()
    }

    fn read_hash(&self, chunk: &MigrationChunk) -> Result<String> {
        let path = self.dir.hash_tree_path(chunk);
        let text = std::fs::read_to_string(&path)
            .map_err(|err| CacheError::corruption(&path, format!("unreadable: {err}")))?;
        let tree: HashTree =
            serde_json::from_str(&text).map_err(|err| CacheError::corruption(&path, err))?;
        Ok(tree.hash)
    }

    fn read_query(&self, chunk: &MigrationChunk) -> Result<String> {
        Ok(std::fs::read_to_string(self.dir.query_path(chunk))?)
    }

    fn read_entries(&self) -> Result<Vec<MigrationChunk>> {
        let root = self.dir.root();
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let meta_path = entry.path().join(META_FILENAME);
            if !meta_path.is_file() {
                // Interrupted write; the synchronizer regenerates it.
                tracing::debug!(
                    target: "migrate.cache",
                    entry = %entry.file_name().to_string_lossy(),
                    "skipping cache entry without metadata"
                );
                continue;
            }
            entries.push(self.read_meta(&meta_path)?);
        }
        Ok(entries)
    }

    fn write(&self, chunk: &MigrationChunk, query: &str, hash_tree: &HashTree) -> Result<()> {
        std::fs::create_dir_all(self.dir.entry_dir(chunk))?;

        // Metadata goes last: an entry without it is never listed as existing.
        atomic_write(&self.dir.query_path(chunk), query.as_bytes())?;
        atomic_write(
            &self.dir.hash_tree_path(chunk),
            &serde_json::to_vec_pretty(hash_tree)?,
        )?;
        self.write_meta(chunk)?;

        tracing::trace!(target: "migrate.cache", entry = %chunk.key(), "wrote cache entry");
        Ok(())
    }

    fn optimised_rewrite(&self, chunk: &MigrationChunk, new_query: &str) -> Result<()> {
        let _lock = EntryLock::lock_exclusive(&self.dir.lock_path(chunk))?;

        let mut meta = self.read_meta(&self.dir.meta_path(chunk))?;
        atomic_write(&self.dir.query_path(chunk), new_query.as_bytes())?;
        meta.is_optimised = true;
        self.write_meta(&meta)?;

        tracing::trace!(target: "migrate.cache", entry = %chunk.key(), "rewrote optimised query");
        Ok(())
    }

    fn remove(&self, chunk: &MigrationChunk) -> Result<()> {
        match std::fs::remove_dir_all(self.dir.entry_dir(chunk)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
