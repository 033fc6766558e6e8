use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};

/// A contiguous run of migrations cached as one unit.
///
/// Serialized as the entry's `meta.json`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationChunk {
    /// Migration immediately preceding the first member; `None` for the first chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Last migration of the chunk.
    pub target: String,
    pub step_size: usize,
    pub migrations: Vec<String>,
    pub is_complete: bool,
    #[serde(default)]
    pub is_optimised: bool,
}

impl MigrationChunk {
    /// Cache entry directory name: `<from-or-empty>_<target>_<stepSize>`.
    pub fn key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.from.as_deref().unwrap_or_default(),
            self.target,
            self.step_size
        )
    }

    /// Migrations folded into the chunk's final state and never applied individually.
    pub fn skipped(&self) -> &[String] {
        match self.migrations.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    /// Whether `other` covers the same boundaries, ignoring optimisation state.
    pub fn same_boundaries(&self, other: &MigrationChunk) -> bool {
        self.from == other.from && self.target == other.target && self.step_size == other.step_size
    }
}

/// Partition `migrations` into chunks of `step_size`.
///
/// Only the last chunk may be incomplete. An empty input yields an empty plan.
pub fn plan_chunks(migrations: &[String], step_size: usize) -> Result<Vec<MigrationChunk>> {
    if step_size == 0 {
        return Err(CacheError::InvalidStepSize);
    }

    let chunks = migrations
        .chunks(step_size)
        .enumerate()
        .map(|(idx, slice)| {
            let start = idx * step_size;
            MigrationChunk {
                from: start.checked_sub(1).map(|prev| migrations[prev].clone()),
                target: slice[slice.len() - 1].clone(),
                step_size,
                migrations: slice.to_vec(),
                is_complete: slice.len() == step_size,
                is_optimised: false,
            }
        })
        .collect();
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("m{i}")).collect()
    }

    #[test]
    fn step_one_yields_one_chunk_per_migration() {
        let chunks = plan_chunks(&ids(5), 1).unwrap();
        let keys: Vec<_> = chunks.iter().map(MigrationChunk::key).collect();
        assert_eq!(keys, ["_m1_1", "m1_m2_1", "m2_m3_1", "m3_m4_1", "m4_m5_1"]);
        assert!(chunks.iter().all(|chunk| chunk.is_complete));
        assert!(chunks.iter().all(|chunk| chunk.skipped().is_empty()));
    }

    #[test]
    fn trailing_chunk_is_incomplete() {
        let chunks = plan_chunks(&ids(5), 3).unwrap();
        assert_eq!(chunks.len(), 2);

        assert_eq!(chunks[0].key(), "_m3_3");
        assert_eq!(chunks[0].migrations, ["m1", "m2", "m3"]);
        assert_eq!(chunks[0].skipped(), ["m1", "m2"]);
        assert!(chunks[0].is_complete);

        assert_eq!(chunks[1].key(), "m3_m5_3");
        assert_eq!(chunks[1].migrations, ["m4", "m5"]);
        assert!(!chunks[1].is_complete);
    }

    #[test]
    fn chunks_are_gap_free_and_linked() {
        let all = ids(11);
        let chunks = plan_chunks(&all, 4).unwrap();

        let flattened: Vec<_> = chunks.iter().flat_map(|c| c.migrations.clone()).collect();
        assert_eq!(flattened, all);
        assert_eq!(chunks[0].from, None);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].from.as_deref(), Some(pair[0].target.as_str()));
        }
        assert_eq!(chunks.iter().filter(|c| !c.is_complete).count(), 1);
    }

    #[test]
    fn empty_input_and_zero_step() {
        assert!(plan_chunks(&[], 3).unwrap().is_empty());
        assert!(matches!(
            plan_chunks(&ids(2), 0),
            Err(CacheError::InvalidStepSize)
        ));
    }

    #[test]
    fn meta_json_uses_camel_case_and_omits_missing_from() {
        let chunk = plan_chunks(&ids(1), 1).unwrap().remove(0);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "target": "m1",
                "stepSize": 1,
                "migrations": ["m1"],
                "isComplete": true,
                "isOptimised": false,
            })
        );

        let legacy: MigrationChunk = serde_json::from_str(
            r#"{"from":"m1","target":"m2","stepSize":1,"migrations":["m2"],"isComplete":true}"#,
        )
        .unwrap();
        assert!(!legacy.is_optimised);
    }
}
