use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::chunk::MigrationChunk;
use crate::compiler::ChunkCompiler;
use crate::error::Result;
use crate::hash_tree::{ContentHasher, HashTree};
use crate::pool::WorkerPool;
use crate::source::migration_dir_name;
use crate::store::CacheStore;

/// What happened to one planned chunk during synchronisation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheAction {
    /// Entry was present and its hash matched.
    Exists,
    /// Entry was missing and has been generated.
    Generated,
    /// Stored hash disagrees with the migrations. Never left in a final report.
    InvalidChecksum,
    /// Entry was rewritten by cascading invalidation.
    Regenerated,
}

impl fmt::Display for CacheAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheAction::Exists => "exists",
            CacheAction::Generated => "generated",
            CacheAction::InvalidChecksum => "invalid_checksum",
            CacheAction::Regenerated => "regenerated",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    pub chunk: MigrationChunk,
    pub action: CacheAction,
}

/// Reconciles a chunk plan against the cache store.
pub struct CacheSynchronizer {
    store: Arc<dyn CacheStore>,
    hasher: Arc<dyn ContentHasher>,
    compiler: Arc<dyn ChunkCompiler>,
    migrations_root: PathBuf,
    child_db: Vec<String>,
    pool: WorkerPool,
}

impl CacheSynchronizer {
    pub fn new(
        store: Arc<dyn CacheStore>,
        hasher: Arc<dyn ContentHasher>,
        compiler: Arc<dyn ChunkCompiler>,
        migrations_root: impl Into<PathBuf>,
        child_db: Vec<String>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            store,
            hasher,
            compiler,
            migrations_root: migrations_root.into(),
            child_db,
            pool,
        }
    }

    /// Bring the cache in line with `chunks` and report one action per chunk,
    /// in chunk order.
    ///
    /// Any failure aborts the run; nothing is rolled back, and re-running is safe.
    pub fn synchronize(&self, chunks: &[MigrationChunk]) -> Result<Vec<ChunkReport>> {
        self.remove_stale_trailing_entries(chunks)?;

        let mut reports = self.pool.try_map(chunks, |chunk| self.reconcile(chunk))?;

        let Some(first_invalid) = reports
            .iter()
            .position(|report| report.action == CacheAction::InvalidChecksum)
        else {
            return Ok(reports);
        };

        // A later chunk's query depends on every state before it, so everything
        // from the first stale chunk onwards is rebuilt, valid hashes included.
        tracing::info!(
            target: "migrate.cache",
            entry = %chunks[first_invalid].key(),
            cascade = chunks.len() - first_invalid,
            "cache entry checksum mismatch; regenerating from here on"
        );
        let regenerated = self
            .pool
            .try_map(&chunks[first_invalid..], |chunk| self.regenerate(chunk))?;
        reports.truncate(first_invalid);
        reports.extend(regenerated);
        Ok(reports)
    }

    /// Delete stored incomplete entries whose boundaries no longer match the
    /// planned trailing chunk.
    fn remove_stale_trailing_entries(&self, chunks: &[MigrationChunk]) -> Result<()> {
        let Some(step_size) = chunks.first().map(|chunk| chunk.step_size) else {
            return Ok(());
        };
        let planned: Vec<&MigrationChunk> = chunks
            .iter()
            .filter(|chunk| !chunk.is_complete && chunk.step_size == step_size)
            .collect();

        for existing in self.store.read_entries()? {
            if existing.is_complete || existing.step_size != step_size {
                continue;
            }
            if planned.iter().any(|chunk| chunk.same_boundaries(&existing)) {
                continue;
            }
            tracing::debug!(
                target: "migrate.cache",
                entry = %existing.key(),
                "removing stale trailing cache entry"
            );
            self.store.remove(&existing)?;
        }
        Ok(())
    }

    fn reconcile(&self, chunk: &MigrationChunk) -> Result<ChunkReport> {
        let hash_tree = self.hash(chunk)?;

        let action = if !self.store.exists(chunk) {
            self.generate(chunk, &hash_tree)?;
            CacheAction::Generated
        } else if self.store.read_hash(chunk)? == hash_tree.hash {
            CacheAction::Exists
        } else {
            CacheAction::InvalidChecksum
        };

        tracing::debug!(target: "migrate.cache", entry = %chunk.key(), %action, "reconciled chunk");
        Ok(ChunkReport {
            chunk: chunk.clone(),
            action,
        })
    }

    fn regenerate(&self, chunk: &MigrationChunk) -> Result<ChunkReport> {
        let hash_tree = self.hash(chunk)?;
        self.generate(chunk, &hash_tree)?;
        tracing::debug!(target: "migrate.cache", entry = %chunk.key(), "regenerated chunk");
        Ok(ChunkReport {
            chunk: chunk.clone(),
            action: CacheAction::Regenerated,
        })
    }

    fn hash(&self, chunk: &MigrationChunk) -> Result<HashTree> {
        let include: Vec<String> = chunk
            .migrations
            .iter()
            .map(|id| migration_dir_name(id))
            .collect();
        self.hasher.hash(&self.migrations_root, &include)
    }

    fn generate(&self, chunk: &MigrationChunk, hash_tree: &HashTree) -> Result<()> {
        let query = self.compiler.compile(&self.child_db, chunk)?;
        self.store.write(chunk, &query, hash_tree)
    }
}

impl fmt::Debug for CacheSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheSynchronizer")
            .field("migrations_root", &self.migrations_root)
            .field("child_db", &self.child_db)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
