use std::sync::Arc;

use migrate_config::MigrateConfig;
use serde::Serialize;

use crate::cache_dir::CacheDir;
use crate::chunk::plan_chunks;
use crate::compiler::ChunkCompiler;
use crate::error::{CacheError, Result};
use crate::hash_tree::{ContentHasher, DirHasher};
use crate::optimise::{IndexConflictOptimizer, OptimiseReport};
use crate::pool::WorkerPool;
use crate::source::{FsMigrationSource, MigrationSource};
use crate::store::{CacheStore, LocalCacheStore};
use crate::sync::{CacheAction, CacheSynchronizer, ChunkReport};

/// Collaborators shared by the cache commands.
#[derive(Clone)]
pub struct CacheContext {
    config: MigrateConfig,
    source: Arc<dyn MigrationSource>,
    hasher: Arc<dyn ContentHasher>,
    compiler: Arc<dyn ChunkCompiler>,
    store: Option<Arc<dyn CacheStore>>,
}

impl CacheContext {
    /// Context reading migrations from disk and storing entries under the
    /// configured cache folder.
    pub fn new(config: MigrateConfig, compiler: Arc<dyn ChunkCompiler>) -> Self {
        Self {
            source: Arc::new(FsMigrationSource::new(config.clone())),
            hasher: Arc::new(DirHasher),
            config,
            compiler,
            store: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn MigrationSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Use `store` instead of the per-database [`LocalCacheStore`].
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    fn store_for(&self, child_db: &[String]) -> Result<Arc<dyn CacheStore>> {
        if let Some(store) = &self.store {
            return Ok(store.clone());
        }
        let dir = CacheDir::for_database(&self.config, child_db);
        dir.ensure()?;
        Ok(Arc::new(LocalCacheStore::new(dir)))
    }

    fn pool(&self) -> WorkerPool {
        WorkerPool::new(self.config.cache.threads)
    }
}

impl std::fmt::Debug for CacheContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheContext")
            .field("config", &self.config)
            .field("custom_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "chunks", rename_all = "snake_case")]
pub enum CacheOutcome {
    /// The database has no migrations.
    NothingToCache,
    Synced(Vec<ChunkReport>),
}

/// Parse a user-supplied step size.
pub fn parse_step_size(value: &str) -> Result<usize> {
    let step_size: usize = value
        .trim()
        .parse()
        .map_err(|_| CacheError::ExpectedNumberOfMigrations {
            value: value.to_owned(),
        })?;
    if step_size == 0 {
        return Err(CacheError::InvalidStepSize);
    }
    Ok(step_size)
}

/// Synchronise the cache of the database at `child_db` using chunks of `step_size`.
pub fn cache(ctx: &CacheContext, step_size: usize, child_db: &[String]) -> Result<CacheOutcome> {
    let migrations = ctx.source.migrations(child_db)?;
    let chunks = plan_chunks(&migrations, step_size)?;
    if chunks.is_empty() {
        tracing::info!(target: "migrate.cache", "nothing to cache");
        return Ok(CacheOutcome::NothingToCache);
    }

    let synchronizer = CacheSynchronizer::new(
        ctx.store_for(child_db)?,
        ctx.hasher.clone(),
        ctx.compiler.clone(),
        ctx.source.migrations_root(child_db),
        child_db.to_vec(),
        ctx.pool(),
    );
    let reports = synchronizer.synchronize(&chunks)?;

    let count = |action: CacheAction| {
        reports
            .iter()
            .filter(|report| report.action == action)
            .count()
    };
    tracing::info!(
        target: "migrate.cache",
        step_size,
        chunks = reports.len(),
        exists = count(CacheAction::Exists),
        generated = count(CacheAction::Generated),
        regenerated = count(CacheAction::Regenerated),
        "cache synchronised"
    );
    Ok(CacheOutcome::Synced(reports))
}

/// Alias reused index names in the cache of the database at `child_db`.
pub fn cache_optimise(
    ctx: &CacheContext,
    step_size: usize,
    child_db: &[String],
) -> Result<Vec<OptimiseReport>> {
    if step_size == 0 {
        return Err(CacheError::InvalidStepSize);
    }
    IndexConflictOptimizer::new(ctx.store_for(child_db)?, ctx.pool()).optimise(step_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_step_sizes() {
        assert_eq!(parse_step_size("3").unwrap(), 3);
        assert_eq!(parse_step_size(" 12 ").unwrap(), 12);
        assert!(matches!(
            parse_step_size("0"),
            Err(CacheError::InvalidStepSize)
        ));
        assert!(matches!(
            parse_step_size("all"),
            Err(CacheError::ExpectedNumberOfMigrations { .. })
        ));
        assert!(matches!(
            parse_step_size("-1"),
            Err(CacheError::ExpectedNumberOfMigrations { .. })
        ));
    }
}
