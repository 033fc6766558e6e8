use crate::error::{CacheError, Result};
use migrate_config::MigrateConfig;
use std::path::PathBuf;
use walkdir::WalkDir;

/// Supplies the ordered migration history of a database.
pub trait MigrationSource: Send + Sync {
    /// Migration identifiers in ascending order.
    fn migrations(&self, child_db: &[String]) -> Result<Vec<String>>;

    /// Directory holding one sub-directory per migration.
    fn migrations_root(&self, child_db: &[String]) -> PathBuf;
}

/// On-disk folder name for a migration identifier.
///
/// Identifiers are ISO timestamps; `:` is not portable in file names.
pub fn migration_dir_name(id: &str) -> String {
    id.replace(':', "_")
}

/// Inverse of [`migration_dir_name`].
///
/// Every `_` is read back as `:`, so identifiers may only use `_` in place of
/// `:`. Folder names containing `:` are rejected when listing migrations.
pub fn migration_id_from_dir_name(name: &str) -> String {
    name.replace('_', ":")
}

/// Reads migrations from the configured migrations directory.
#[derive(Clone, Debug)]
pub struct FsMigrationSource {
    config: MigrateConfig,
}

impl FsMigrationSource {
    pub fn new(config: MigrateConfig) -> Self {
        Self { config }
    }
}

impl MigrationSource for FsMigrationSource {
    fn migrations(&self, child_db: &[String]) -> Result<Vec<String>> {
        let root = self.migrations_root(child_db);
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in WalkDir::new(&root).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.')
                || name == self.config.cache.folder
                || name == self.config.migrations.child_dbs_dir
            {
                continue;
            }
            if name.contains(':') {
                return Err(CacheError::InvalidMigrationDirName {
                    name: name.into_owned(),
                });
            }
            ids.push(migration_id_from_dir_name(&name));
        }
        ids.sort();
        Ok(ids)
    }

    fn migrations_root(&self, child_db: &[String]) -> PathBuf {
        self.config.migrations_root(child_db)
    }
}
