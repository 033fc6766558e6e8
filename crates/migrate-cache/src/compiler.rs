//! Seams to the diff and query compilers.
//!
//! The cache never inspects diffs, expressions or queries; it only feeds them
//! from one stage to the next and persists the final query text.

use crate::chunk::MigrationChunk;
use crate::error::Result;

/// Computes declared-state differences between two points in the history.
pub trait DiffCompiler: Send + Sync {
    type Diff;
    type Expressions;

    /// Diff the state at `from` (empty database when `None`) against `target`.
    fn diff(&self, child_db: &[String], from: Option<&str>, target: &str) -> Result<Self::Diff>;

    fn to_expressions(&self, diff: Self::Diff) -> Result<Self::Expressions>;
}

/// A compiled query that can be written to `query.fql`.
pub trait SerializeQuery {
    /// Canonical query text; identical inputs must serialize identically.
    fn to_query_text(&self) -> String;
}

/// Turns expressions into an executable query recording the applied migrations.
pub trait QueryGenerator<E>: Send + Sync {
    type Query: SerializeQuery;

    /// `skipped` lists migrations folded into `target` that are recorded as
    /// applied without being materialized on their own.
    fn generate(
        &self,
        expressions: E,
        skipped: &[String],
        target: &str,
        collection: &str,
    ) -> Result<Self::Query>;
}

/// Compiles the query text of a single chunk.
///
/// This is the object-safe face of the diff/query pipeline used by the
/// synchronizer.
pub trait ChunkCompiler: Send + Sync {
    fn compile(&self, child_db: &[String], chunk: &MigrationChunk) -> Result<String>;
}

/// Chains a [`DiffCompiler`] and a [`QueryGenerator`] into a [`ChunkCompiler`].
#[derive(Clone, Debug)]
pub struct QueryPipeline<D, G> {
    diff: D,
    generator: G,
    collection: String,
}

impl<D, G> QueryPipeline<D, G> {
    /// `collection` is the remote collection that records applied migrations.
    pub fn new(diff: D, generator: G, collection: impl Into<String>) -> Self {
        Self {
            diff,
            generator,
            collection: collection.into(),
        }
    }
}

impl<D, G> ChunkCompiler for QueryPipeline<D, G>
where
    D: DiffCompiler,
    G: QueryGenerator<D::Expressions>,
{
    fn compile(&self, child_db: &[String], chunk: &MigrationChunk) -> Result<String> {
        let diff = self
            .diff
            .diff(child_db, chunk.from.as_deref(), &chunk.target)?;
        let expressions = self.diff.to_expressions(diff)?;
        let query = self.generator.generate(
            expressions,
            chunk.skipped(),
            &chunk.target,
            &self.collection,
        )?;
        Ok(query.to_query_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::plan_chunks;

    struct Steps;

    impl DiffCompiler for Steps {
        type Diff = (Option<String>, String);
        type Expressions = Vec<String>;

        fn diff(&self, _: &[String], from: Option<&str>, target: &str) -> Result<Self::Diff> {
            Ok((from.map(str::to_owned), target.to_owned()))
        }

        fn to_expressions(&self, (from, target): Self::Diff) -> Result<Self::Expressions> {
            Ok(vec![format!("{}->{target}", from.unwrap_or_default())])
        }
    }

    struct Text(String);

    impl SerializeQuery for Text {
        fn to_query_text(&self) -> String {
            self.0.clone()
        }
    }

    struct Join;

    impl QueryGenerator<Vec<String>> for Join {
        type Query = Text;

        fn generate(
            &self,
            expressions: Vec<String>,
            skipped: &[String],
            target: &str,
            collection: &str,
        ) -> Result<Text> {
            Ok(Text(format!(
                "{} skip[{}] {target} @{collection}",
                expressions.join(";"),
                skipped.join(",")
            )))
        }
    }

    #[test]
    fn pipeline_passes_chunk_boundaries_and_skip_list() {
        let ids: Vec<String> = ["m1", "m2", "m3", "m4"].iter().map(|s| s.to_string()).collect();
        let chunks = plan_chunks(&ids, 3).unwrap();
        let pipeline = QueryPipeline::new(Steps, Join, "migrations");

        assert_eq!(
            pipeline.compile(&[], &chunks[0]).unwrap(),
            "->m3 skip[m1,m2] m3 @migrations"
        );
        assert_eq!(
            pipeline.compile(&[], &chunks[1]).unwrap(),
            "m3->m4 skip[] m4 @migrations"
        );
    }
}
