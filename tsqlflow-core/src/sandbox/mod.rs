//! SQLite Sandbox: extracts a procedure's statements from its source
//! text, adapts each one for SQLite, infers and seeds a throwaway schema,
//! and executes the statements against an in-memory `rusqlite`
//! connection, correlating what ran back to CFG nodes on a best-effort
//! basis.

mod adapter;
mod orchestrator;
mod schema;
pub(crate) mod splitter;

pub use orchestrator::{sandbox_run, sandbox_run_with};
pub(crate) use splitter::{extract_body, split_statements};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Every constant the sandbox's data generation and execution limits are
/// pinned to. `Default` reproduces the fixed values assumed throughout
/// this module; tests that want different limits build their own.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub seed: u64,
    pub min_rows_per_table: usize,
    pub max_rows_per_table: usize,
    pub preview_row_cap: usize,
    pub preview_tables_cap: usize,
    pub statement_timeout_secs: u64,
    pub max_walk_depth: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            seed: 42,
            min_rows_per_table: 5,
            max_rows_per_table: 12,
            preview_row_cap: 50,
            preview_tables_cap: 3,
            statement_timeout_secs: 30,
            max_walk_depth: 100,
        }
    }
}

/// Cooperative cancellation shared between a caller and a run in
/// progress. Checked between statements, never inside one — a single
/// SQLite statement isn't preemptible without changing the `rusqlite`
/// connection's progress handler, which this crate doesn't need yet.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
