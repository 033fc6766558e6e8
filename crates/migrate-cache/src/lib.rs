//! Chunked, content-addressed cache of compiled migration queries.
//!
//! Consecutive migrations are grouped into chunks of a fixed step size. Each
//! chunk's compiled query is stored next to a hash of the migrations it was
//! compiled from, so later runs only regenerate what changed.
//!
//! ## On-disk layout
//!
//! Entries live under `<migrations>[/<child_dbs_dir>/<db>…]/<cache folder>/`,
//! one directory per chunk named `<from-or-empty>_<target>_<step size>`:
//! - `query.fql`: compiled query text
//! - `hash-tree.json`: [`HashTree`] over the chunk's migration directories
//! - `meta.json`: the [`MigrationChunk`] the entry was generated from
//! - `.lock`: created by optimised rewrites
//!
//! [`cache`] synchronises entries with the migrations on disk; when one entry
//! is stale, it and every later entry are regenerated. [`cache_optimise`]
//! then renames index names reused across entries so each chunk can be
//! replayed on its own.

mod cache_dir;
mod chunk;
mod commands;
mod compiler;
mod error;
mod hash_tree;
mod lock;
mod optimise;
mod pool;
mod source;
mod store;
mod sync;
mod util;

pub use cache_dir::{CacheDir, HASH_TREE_FILENAME, LOCK_FILENAME, META_FILENAME, QUERY_FILENAME};
pub use chunk::{plan_chunks, MigrationChunk};
pub use commands::{cache, cache_optimise, parse_step_size, CacheContext, CacheOutcome};
pub use compiler::{ChunkCompiler, DiffCompiler, QueryGenerator, QueryPipeline, SerializeQuery};
pub use error::{CacheError, Result};
pub use hash_tree::{ContentHasher, DirHasher, HashTree};
pub use lock::EntryLock;
pub use optimise::{
    alias_for, find_conflicts, rewrite_query, scan_query, IndexAlias, IndexConflict,
    IndexConflictOptimizer, IndexOccurrence, IndexOperation, OptimiseReport, ALIAS_PREFIX,
};
pub use pool::WorkerPool;
pub use source::{
    migration_dir_name, migration_id_from_dir_name, FsMigrationSource, MigrationSource,
};
pub use store::{CacheStore, LocalCacheStore};
pub use sync::{CacheAction, CacheSynchronizer, ChunkReport};
pub use util::atomic_write;
