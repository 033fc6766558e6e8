#![allow(dead_code)]

use migrate_cache::{
    migration_dir_name, CacheContext, CacheDir, CacheError, CacheStore, ChunkCompiler, HashTree,
    LocalCacheStore, MigrationChunk, Result,
};
use migrate_config::MigrateConfig;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use walkdir::WalkDir;

/// Compiles a chunk by concatenating the files of its migrations.
///
/// Deterministic, and keeps index statements visible to the optimizer.
pub struct FileCompiler {
    root: PathBuf,
    pub calls: AtomicUsize,
    fail_on: Option<String>,
}

impl FileCompiler {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            calls: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    pub fn failing_on(root: &Path, target: &str) -> Self {
        Self {
            fail_on: Some(target.to_owned()),
            ..Self::new(root)
        }
    }
}

impl ChunkCompiler for FileCompiler {
    fn compile(&self, _child_db: &[String], chunk: &MigrationChunk) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.as_deref() == Some(chunk.target.as_str()) {
            return Err(CacheError::compiler(format!("cannot diff {}", chunk.target)));
        }

        let mut query = format!(
            "// {} -> {} skip [{}]\n",
            chunk.from.as_deref().unwrap_or(""),
            chunk.target,
            chunk.skipped().join(", ")
        );
        for id in &chunk.migrations {
            for entry in WalkDir::new(self.root.join(migration_dir_name(id)))
                .min_depth(1)
                .sort_by_file_name()
            {
                let entry = entry?;
                if entry.file_type().is_file() {
                    query.push_str(&std::fs::read_to_string(entry.path())?);
                    query.push('\n');
                }
            }
        }
        Ok(query)
    }
}

/// Delegating store that counts mutations.
pub struct CountingStore {
    inner: LocalCacheStore,
    pub writes: AtomicUsize,
    pub removes: AtomicUsize,
    pub rewrites: AtomicUsize,
}

impl CountingStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            inner: LocalCacheStore::new(CacheDir::new(root)),
            writes: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            rewrites: AtomicUsize::new(0),
        }
    }

    pub fn reset(&self) {
        self.writes.store(0, Ordering::SeqCst);
        self.removes.store(0, Ordering::SeqCst);
        self.rewrites.store(0, Ordering::SeqCst);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn rewrites(&self) -> usize {
        self.rewrites.load(Ordering::SeqCst)
    }
}

impl CacheStore for CountingStore {
    fn exists(&self, chunk: &MigrationChunk) -> bool {
        self.inner.exists(chunk)
    }

    fn read_hash(&self, chunk: &MigrationChunk) -> Result<String> {
        self.inner.read_hash(chunk)
    }

    fn read_query(&self, chunk: &MigrationChunk) -> Result<String> {
        self.inner.read_query(chunk)
    }

    fn read_entries(&self) -> Result<Vec<MigrationChunk>> {
        self.inner.read_entries()
    }

    fn write(&self, chunk: &MigrationChunk, query: &str, hash_tree: &HashTree) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(chunk, query, hash_tree)
    }

    fn optimised_rewrite(&self, chunk: &MigrationChunk, new_query: &str) -> Result<()> {
        self.rewrites.fetch_add(1, Ordering::SeqCst);
        self.inner.optimised_rewrite(chunk, new_query)
    }

    fn remove(&self, chunk: &MigrationChunk) -> Result<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(chunk)
    }
}

pub struct Fixture {
    pub tmp: tempfile::TempDir,
    pub config: MigrateConfig,
    pub store: Arc<CountingStore>,
    pub compiler: Arc<FileCompiler>,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = MigrateConfig::default();
        config.migrations.directory = tmp.path().join("migrations");
        config.cache.threads = 4;
        std::fs::create_dir_all(&config.migrations.directory).unwrap();

        let store = Arc::new(CountingStore::new(config.cache_dir(&[])));
        let compiler = Arc::new(FileCompiler::new(&config.migrations.directory));
        Self {
            tmp,
            config,
            store,
            compiler,
        }
    }

    pub fn migrations_dir(&self) -> &Path {
        &self.config.migrations.directory
    }

    pub fn cache_root(&self) -> PathBuf {
        self.config.cache_dir(&[])
    }

    pub fn context(&self) -> CacheContext {
        CacheContext::new(self.config.clone(), self.compiler.clone())
            .with_store(self.store.clone())
    }

    /// Add a migration directory holding a single `file` with `body`.
    pub fn add_migration(&self, id: &str, file: &str, body: &str) {
        let dir = self.migrations_dir().join(migration_dir_name(id));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(file), body).unwrap();
    }

    pub fn add_plain_migrations(&self, ids: &[&str]) {
        for id in ids {
            let body = format!("CreateCollection({{\"name\":\"{id}\"}})");
            self.add_migration(id, "create-collection.fql", &body);
        }
    }

    pub fn entry_dir(&self, name: &str) -> PathBuf {
        self.cache_root().join(name)
    }

    pub fn query(&self, name: &str) -> String {
        std::fs::read_to_string(self.entry_dir(name).join("query.fql")).unwrap()
    }

    pub fn meta(&self, name: &str) -> serde_json::Value {
        let text = std::fs::read_to_string(self.entry_dir(name).join("meta.json")).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    /// Entry directory names, sorted.
    pub fn entry_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.cache_root())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
