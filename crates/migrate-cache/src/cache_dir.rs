use crate::chunk::MigrationChunk;
use crate::error::CacheError;
use migrate_config::MigrateConfig;
use std::path::{Path, PathBuf};

pub const QUERY_FILENAME: &str = "query.fql";
pub const HASH_TREE_FILENAME: &str = "hash-tree.json";
pub const META_FILENAME: &str = "meta.json";
pub const LOCK_FILENAME: &str = ".lock";

/// Location of the chunk cache of one (possibly nested) database.
#[derive(Clone, Debug)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<migrations>[/<child_dbs_dir>/<db>…]/<cache folder>`.
    pub fn for_database(config: &MigrateConfig, child_db: &[String]) -> Self {
        Self::new(config.cache_dir(child_db))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the cache root if it does not exist yet.
    pub fn ensure(&self) -> Result<(), CacheError> {
        if !self.root.is_dir() {
            tracing::debug!(
                target: "migrate.cache",
                root = %self.root.display(),
                "creating cache directory"
            );
            std::fs::create_dir_all(&self.root)?;
        }
        Ok(())
    }

    pub fn entry_dir(&self, chunk: &MigrationChunk) -> PathBuf {
        self.root.join(chunk.key())
    }

    pub fn query_path(&self, chunk: &MigrationChunk) -> PathBuf {
        self.entry_dir(chunk).join(QUERY_FILENAME)
    }

    pub fn hash_tree_path(&self, chunk: &MigrationChunk) -> PathBuf {
        self.entry_dir(chunk).join(HASH_TREE_FILENAME)
    }

    pub fn meta_path(&self, chunk: &MigrationChunk) -> PathBuf {
        self.entry_dir(chunk).join(META_FILENAME)
    }

    pub fn lock_path(&self, chunk: &MigrationChunk) -> PathBuf {
        self.entry_dir(chunk).join(LOCK_FILENAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_follows_child_database_nesting() {
        let mut config = MigrateConfig::default();
        config.migrations.directory = PathBuf::from("migrations");

        let dir = CacheDir::for_database(&config, &["tenant".to_owned()]);
        assert_eq!(dir.root(), Path::new("migrations/dbs/tenant/.cache"));
    }

    #[test]
    fn ensure_creates_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = CacheDir::new(tmp.path().join("a").join(".cache"));
        dir.ensure().unwrap();
        dir.ensure().unwrap();
        assert!(dir.root().is_dir());
    }
}
