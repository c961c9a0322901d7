//! Builds control flow graphs from T-SQL stored-procedure bodies and
//! drives them three ways: a dry-run simulation that never touches a
//! database, a sandbox run against an in-memory SQLite database seeded
//! from the procedure's own inferred schema, and a live run against a
//! real connection inside a transaction that is always rolled back.
//!
//! The public surface is intentionally small:
//!
//! - [`parse`] — source text to [`ControlFlowGraph`].
//! - [`dry_run`] — simulate a graph against a set of parameter bindings.
//! - [`sandbox_run`] — execute a graph's on-branch statements against a
//!   throwaway SQLite database.
//! - [`run_live`] — execute a graph's on-branch statements against a
//!   caller-supplied connection, rolled back unconditionally.

mod builder;
mod cfg;
mod dryrun;
mod error;
mod eval;
mod frontend;
mod live;
mod sandbox;
mod trace;

pub use cfg::{CfgEdge, CfgNode, ControlFlowGraph, NodeKind, ProcParameter, LABEL_MAX_CHARS};
pub use dryrun::dry_run;
pub use error::{CoreError, Result};
pub use eval::Bindings;
pub use frontend::{ParsedProc, Snippet, Stmt};
pub use live::{run_live, LiveConnection, StatementOutcome};
pub use sandbox::{sandbox_run, sandbox_run_with, CancellationToken, SandboxConfig};
pub use trace::{
    RunMode, RunResult, RunSummary, SqliteMetadata, TablePreview, TraceEvent, TraceEventType,
};

use tracing::instrument;

/// Parses `source` and lowers it straight into a control flow graph.
///
/// This is the thin composition the CLI and any other embedder actually
/// wants — `frontend::parse_procedure` followed by `builder::build` — kept
/// as one call so a caller never has to reach into either submodule
/// directly.
#[instrument(skip(source), fields(source_len = source.len()))]
pub fn parse(source: &str) -> Result<ControlFlowGraph> {
    let parsed = frontend::parse_procedure(source)?;
    builder::build(&parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_builds_a_valid_graph() {
        let graph = parse("SELECT 1\nUPDATE t SET x = 1").unwrap();
        graph.check_invariants().unwrap();
    }

    #[test]
    fn parse_rejects_nothing_a_procedure_body_can_throw_without_panicking() {
        assert!(parse("").is_ok());
    }

    #[test]
    fn the_three_entry_points_compose_on_the_same_graph() {
        let src = "IF @X > 0\n    SELECT 'pos'\nELSE\n    SELECT 'neg'";
        let graph = parse(src).unwrap();

        let mut bindings: Bindings = HashMap::new();
        bindings.insert("@X".to_string(), Some("1".to_string()));

        let dry = dry_run(&graph, &bindings);
        assert_eq!(dry.summary.mode, RunMode::Dryrun);

        let sandbox = sandbox_run(&graph, src, &bindings);
        assert_eq!(sandbox.summary.mode, RunMode::Sqlite);
    }
}
