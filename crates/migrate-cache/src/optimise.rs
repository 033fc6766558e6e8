//! Disambiguation of index names reused across cache entries.
//!
//! When an index is created, deleted and later created again under the same
//! name, replaying the chunks independently would race on the name. Every
//! lifecycle after the first is renamed to a private alias in the entries
//! spanning it.
//!
//! Scanning is lexical over the stored query text. It assumes names are
//! quoted and that no other entity shares an index's name.
//!
//! Aliases are derived from the whole history, so the cache must be
//! consistent before optimising. A cascade regenerates later entries under
//! their real names while earlier entries keep their aliases; pairing that
//! mixed set can alias the wrong lifecycle. After a cascade, clear the cache
//! for the step size and synchronise from scratch before optimising again.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Serialize;

use crate::chunk::MigrationChunk;
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::store::CacheStore;

pub const ALIAS_PREFIX: &str = "_cache_optimised_";

/// Alias used for the `conflict_index`-th reuse of `name`.
pub fn alias_for(name: &str, conflict_index: usize) -> String {
    format!("{ALIAS_PREFIX}{name}_{conflict_index}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexOperation {
    Create,
    Delete,
}

/// One index create/delete found in a stored query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexOccurrence {
    pub name: String,
    pub operation: IndexOperation,
    pub target: String,
    /// Byte offset of the match, ordering occurrences inside one entry.
    pub offset: usize,
}

/// A reused lifecycle of `name` that needs an alias.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexConflict {
    pub name: String,
    pub conflict_index: usize,
    pub create_target: String,
    pub delete_target: String,
}

impl IndexConflict {
    pub fn alias(&self) -> String {
        alias_for(&self.name, self.conflict_index)
    }

    fn covers(&self, target: &str) -> bool {
        self.create_target.as_str() <= target && target <= self.delete_target.as_str()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexAlias {
    pub name: String,
    pub alias: String,
}

/// Entry rewritten by the optimizer and the aliases applied to it, in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OptimiseReport {
    pub chunk: MigrationChunk,
    pub aliases: Vec<IndexAlias>,
}

fn create_index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"CreateIndex\((.+?)\)").expect("valid regex"))
}

fn delete_index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"Delete\(Index\("(.+?)"\)\)"#).expect("valid regex"))
}

fn name_field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""name"\s*:\s*"([^"]+)""#).expect("valid regex"))
}

/// Name declared in a `CreateIndex(...)` argument.
///
/// The lazy match stops at the first `)`, so arguments holding nested calls
/// (`Collection("users")`) are not valid JSON; fall back to the `name` field.
fn created_index_name(argument: &str) -> Option<String> {
    if let Ok(serde_json::Value::Object(params)) = serde_json::from_str(argument) {
        if let Some(serde_json::Value::String(name)) = params.get("name") {
            return Some(name.clone());
        }
    }
    name_field_re()
        .captures(argument)
        .map(|caps| caps[1].to_owned())
}

/// Find index creations and deletions in `query`.
pub fn scan_query(query: &str, target: &str) -> Vec<IndexOccurrence> {
    let mut found = Vec::new();

    for caps in create_index_re().captures_iter(query) {
        let whole = caps.get(0).map_or(0, |m| m.start());
        match created_index_name(&caps[1]) {
            Some(name) => found.push(IndexOccurrence {
                name,
                operation: IndexOperation::Create,
                target: target.to_owned(),
                offset: whole,
            }),
            None => tracing::debug!(
                target: "migrate.cache",
                entry_target = target,
                offset = whole,
                "skipping CreateIndex without a readable name"
            ),
        }
    }

    for caps in delete_index_re().captures_iter(query) {
        found.push(IndexOccurrence {
            name: caps[1].to_owned(),
            operation: IndexOperation::Delete,
            target: target.to_owned(),
            offset: caps.get(0).map_or(0, |m| m.start()),
        });
    }

    found.sort_by_key(|occurrence| occurrence.offset);
    found
}

/// Pair occurrences per name into lifecycles and return every lifecycle
/// after the first.
///
/// A trailing unpaired occurrence is an index that is still alive; it keeps
/// its real name.
pub fn find_conflicts(occurrences: Vec<IndexOccurrence>) -> Vec<IndexConflict> {
    let mut grouped: BTreeMap<String, Vec<IndexOccurrence>> = BTreeMap::new();
    for occurrence in occurrences {
        grouped
            .entry(occurrence.name.clone())
            .or_default()
            .push(occurrence);
    }

    let mut conflicts = Vec::new();
    for (name, mut group) in grouped {
        if group.len() < 2 {
            continue;
        }
        group.sort_by(|a, b| a.target.cmp(&b.target).then(a.offset.cmp(&b.offset)));

        for (pair_idx, pair) in group.chunks_exact(2).enumerate().skip(1) {
            let (create, delete) = (&pair[0], &pair[1]);
            if create.operation != IndexOperation::Create
                || delete.operation != IndexOperation::Delete
            {
                tracing::debug!(
                    target: "migrate.cache",
                    index = %name,
                    create_target = %create.target,
                    delete_target = %delete.target,
                    "index lifecycle is not a create/delete pair"
                );
            }
            conflicts.push(IndexConflict {
                name: name.clone(),
                conflict_index: pair_idx - 1,
                create_target: create.target.clone(),
                delete_target: delete.target.clone(),
            });
        }
    }
    conflicts
}

/// Replace every quoted occurrence of `name` with the quoted `alias`.
pub fn rewrite_query(query: &str, name: &str, alias: &str) -> String {
    query.replace(&format!("\"{name}\""), &format!("\"{alias}\""))
}

/// Second pass over a synchronised cache renaming reused index names.
pub struct IndexConflictOptimizer {
    store: Arc<dyn CacheStore>,
    pool: WorkerPool,
}

impl IndexConflictOptimizer {
    pub fn new(store: Arc<dyn CacheStore>, pool: WorkerPool) -> Self {
        Self { store, pool }
    }

    /// Alias reused index names in every entry of `step_size`.
    ///
    /// Rewrites are not transactional across entries: an error part way
    /// leaves earlier entries aliased. Running again is safe.
    pub fn optimise(&self, step_size: usize) -> Result<Vec<OptimiseReport>> {
        let entries: Vec<MigrationChunk> = self
            .store
            .read_entries()?
            .into_iter()
            .filter(|chunk| chunk.step_size == step_size)
            .collect();

        let scanned = self.pool.try_map(&entries, |chunk| {
            let query = self.store.read_query(chunk)?;
            Ok(scan_query(&query, &chunk.target))
        })?;
        let conflicts = find_conflicts(scanned.into_iter().flatten().collect());
        if conflicts.is_empty() {
            tracing::debug!(target: "migrate.cache", step_size, "no index conflicts to optimise");
            return Ok(Vec::new());
        }

        let mut planned: BTreeMap<String, (MigrationChunk, Vec<IndexAlias>)> = BTreeMap::new();
        for conflict in &conflicts {
            let alias = conflict.alias();
            for chunk in entries.iter().filter(|chunk| conflict.covers(&chunk.target)) {
                planned
                    .entry(chunk.key())
                    .or_insert_with(|| (chunk.clone(), Vec::new()))
                    .1
                    .push(IndexAlias {
                        name: conflict.name.clone(),
                        alias: alias.clone(),
                    });
            }
        }

        let planned: Vec<(MigrationChunk, Vec<IndexAlias>)> = planned.into_values().collect();
        let reports = self.pool.try_map(&planned, |(chunk, aliases)| {
            let mut query = self.store.read_query(chunk)?;
            for IndexAlias { name, alias } in aliases {
                query = rewrite_query(&query, name, alias);
            }
            self.store.optimised_rewrite(chunk, &query)?;
            Ok(OptimiseReport {
                chunk: chunk.clone(),
                aliases: aliases.clone(),
            })
        })?;

        tracing::info!(
            target: "migrate.cache",
            step_size,
            conflicts = conflicts.len(),
            rewritten = reports.len(),
            "optimised index names in cache"
        );
        Ok(reports)
    }
}

impl fmt::Debug for IndexConflictOptimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexConflictOptimizer")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
