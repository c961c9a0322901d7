//! Live Rollback Executor: drives a CFG against a real connection inside
//! a transaction that is always rolled back, regardless of how the run
//! ends. No concrete SQL Server driver lives in this crate — callers
//! supply one behind [`LiveConnection`].
//!
//! Branch selection and statement correlation reuse exactly the
//! mechanisms [`crate::sandbox`] uses (the dry-run walker for branch
//! selection, a 30-character normalised-prefix match for correlation);
//! the one thing this module does *not* reuse is the sandbox's T-SQL→
//! SQLite adapter — a live connection speaks real T-SQL, so statements
//! are sent through unadapted.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::cfg::{ControlFlowGraph, NodeKind};
use crate::dryrun::dry_run;
use crate::error::CoreError;
use crate::eval::Bindings;
use crate::sandbox::{extract_body, split_statements, CancellationToken};
use crate::trace::{new_run_id, RunMode, RunResult, RunSummary, TraceBuilder, TraceEventType};

const STATEMENT_KINDS: &[NodeKind] = &[
    NodeKind::Select,
    NodeKind::Dml,
    NodeKind::Call,
    NodeKind::DynamicSql,
    NodeKind::Transaction,
    NodeKind::Statement,
];

const SYSTEM_DATABASES: &[&str] = &["MASTER", "MSDB", "MODEL", "TEMPDB"];

/// The result of sending one statement through a [`LiveConnection`].
pub enum StatementOutcome {
    RowsAffected(u64),
    ResultSet {
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
    },
}

/// An abstraction over "begin a transaction, run statements one at a
/// time, roll back". A caller supplies the concrete SQL Server wire
/// protocol behind this trait; this crate never speaks it directly.
pub trait LiveConnection {
    fn begin(&mut self) -> Result<(), CoreError>;
    fn execute(&mut self, sql: &str) -> Result<StatementOutcome, CoreError>;
    fn rollback(&mut self);
}

/// Calls [`LiveConnection::rollback`] on drop, whether the scope exits
/// by falling through, by `?`, or by an early `break`/`return`.
struct RollbackGuard<'a, C: LiveConnection> {
    conn: &'a mut C,
}

impl<'a, C: LiveConnection> Drop for RollbackGuard<'a, C> {
    fn drop(&mut self) {
        self.conn.rollback();
    }
}

fn find_word(haystack_upper: &str, word: &str) -> Option<usize> {
    let bytes = haystack_upper.as_bytes();
    let mut start = 0;
    while let Some(rel) = haystack_upper[start..].find(word) {
        let idx = start + rel;
        let before_ok = idx == 0 || !bytes[idx - 1].is_ascii_alphanumeric();
        let after = idx + word.len();
        let after_ok = after >= bytes.len() || !bytes[after].is_ascii_alphanumeric();
        if before_ok && after_ok {
            return Some(idx);
        }
        start = idx + word.len();
    }
    None
}

fn contains_qualified_reference(upper: &str, db: &str) -> bool {
    let mut start = 0;
    while let Some(rel) = find_word(&upper[start..], db) {
        let idx = start + rel;
        if upper.as_bytes().get(idx + db.len()) == Some(&b'.') {
            return true;
        }
        start = idx + db.len();
    }
    false
}

fn system_database_guard(source: &str) -> Result<(), CoreError> {
    let upper = source.to_uppercase();
    for db in SYSTEM_DATABASES {
        if contains_qualified_reference(&upper, db) {
            return Err(CoreError::BadInput(format!(
                "procedure references the system database {}",
                db.to_lowercase()
            )));
        }
    }
    Ok(())
}

fn normalized_prefix(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
        .chars()
        .take(30)
        .collect()
}

struct Candidate {
    node_id: String,
    prefix: String,
}

/// Runs `graph`'s procedure against `conn` inside a transaction that is
/// unconditionally rolled back. Fails synchronously with `BadInput` if
/// `source` references a system database; otherwise always returns a
/// `RunResult`, with per-statement engine failures reported as `error`
/// trace events that terminate the run (the transaction still rolls
/// back — nothing downstream of a failed statement runs).
pub fn run_live<C: LiveConnection>(
    graph: &ControlFlowGraph,
    source: &str,
    bindings: &Bindings,
    conn: &mut C,
    cancel: &CancellationToken,
) -> Result<RunResult, CoreError> {
    system_database_guard(source)?;

    let started = Instant::now();
    let mut tb = TraceBuilder::new();
    tb.start();

    let dry = dry_run(graph, bindings);
    let mut candidates: Vec<Candidate> = dry
        .executed_nodes
        .iter()
        .filter_map(|id| {
            let node = graph.node(id)?;
            if STATEMENT_KINDS.contains(&node.kind) {
                Some(Candidate {
                    node_id: node.id.clone(),
                    prefix: normalized_prefix(&node.sql_snippet),
                })
            } else {
                None
            }
        })
        .collect();

    let body = extract_body(source);
    let raw_statements = split_statements(&body);

    conn.begin()?;
    let guard = RollbackGuard { conn };

    let mut had_error = false;
    let mut error_message = None;
    let mut total_rows_affected = 0u64;
    let mut total_statements = 0u64;
    let mut cancelled = false;

    for raw in &raw_statements {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let prefix = normalized_prefix(raw);
        let Some(pos) = candidates.iter().position(|c| c.prefix == prefix) else {
            continue;
        };
        let node_id = candidates.remove(pos).node_id;
        total_statements += 1;

        tb.emit(
            Some(node_id.clone()),
            TraceEventType::ControlFlow,
            raw.clone(),
            None,
            None,
            None,
            None,
            Some("on-branch".into()),
            Duration::ZERO,
        );

        let stmt_started = Instant::now();
        match guard.conn.execute(raw) {
            Ok(StatementOutcome::RowsAffected(n)) => {
                total_rows_affected += n;
                tb.emit(
                    Some(node_id),
                    TraceEventType::Dml,
                    raw.clone(),
                    Some(n),
                    None,
                    None,
                    None,
                    None,
                    stmt_started.elapsed(),
                );
            }
            Ok(StatementOutcome::ResultSet { columns, rows }) => {
                let row_count = rows.len() as u64;
                tb.emit(
                    Some(node_id),
                    TraceEventType::Resultset,
                    raw.clone(),
                    Some(row_count),
                    None,
                    Some(columns),
                    Some(rows),
                    None,
                    stmt_started.elapsed(),
                );
            }
            Err(e) => {
                had_error = true;
                error_message = Some(e.to_string());
                warn!(statement = %raw, error = %e, "live statement failed, terminating run");
                tb.emit(
                    Some(node_id),
                    TraceEventType::Error,
                    raw.clone(),
                    None,
                    Some((None, e.to_string())),
                    None,
                    None,
                    None,
                    stmt_started.elapsed(),
                );
                break;
            }
        }
    }

    if cancelled {
        tb.emit(
            None,
            TraceEventType::Info,
            "run cancelled",
            None,
            None,
            None,
            None,
            None,
            Duration::ZERO,
        );
    }

    drop(guard);
    tb.complete();

    Ok(RunResult {
        run_id: new_run_id(),
        summary: RunSummary {
            total_statements,
            total_rows_affected,
            total_duration_ms: started.elapsed().as_millis() as u64,
            had_error,
            error_message,
            mode: RunMode::Live,
        },
        trace: tb.into_events(),
        executed_nodes: dry.executed_nodes,
        executed_edges: dry.executed_edges,
        sqlite_metadata: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use crate::frontend::parse_procedure;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeConnection {
        statements: RefCell<Vec<String>>,
        rolled_back: RefCell<bool>,
        fail_on: Option<&'static str>,
    }

    impl FakeConnection {
        fn new() -> Self {
            FakeConnection {
                statements: RefCell::new(Vec::new()),
                rolled_back: RefCell::new(false),
                fail_on: None,
            }
        }

        fn failing_on(substr: &'static str) -> Self {
            FakeConnection {
                statements: RefCell::new(Vec::new()),
                rolled_back: RefCell::new(false),
                fail_on: Some(substr),
            }
        }
    }

    impl LiveConnection for FakeConnection {
        fn begin(&mut self) -> Result<(), CoreError> {
            Ok(())
        }

        fn execute(&mut self, sql: &str) -> Result<StatementOutcome, CoreError> {
            self.statements.borrow_mut().push(sql.to_string());
            if let Some(needle) = self.fail_on {
                if sql.contains(needle) {
                    return Err(CoreError::EngineError {
                        number: Some(547),
                        message: "constraint violation".into(),
                    });
                }
            }
            if sql.to_uppercase().trim_start().starts_with("SELECT") {
                Ok(StatementOutcome::ResultSet {
                    columns: vec!["x".to_string()],
                    rows: vec![vec!["1".to_string()]],
                })
            } else {
                Ok(StatementOutcome::RowsAffected(1))
            }
        }

        fn rollback(&mut self) {
            *self.rolled_back.borrow_mut() = true;
        }
    }

    fn build_graph(src: &str) -> ControlFlowGraph {
        let parsed = parse_procedure(src).unwrap();
        build(&parsed).unwrap()
    }

    #[test]
    fn rolls_back_even_on_success() {
        let graph = build_graph("UPDATE Products SET Price = 1");
        let mut conn = FakeConnection::new();
        let token = CancellationToken::new();
        let result = run_live(&graph, "UPDATE Products SET Price = 1", &HashMap::new(), &mut conn, &token)
            .unwrap();
        assert!(!result.summary.had_error);
        assert!(*conn.rolled_back.borrow());
    }

    #[test]
    fn system_database_reference_is_rejected_before_opening_a_transaction() {
        let graph = build_graph("SELECT Id FROM master.dbo.Whatever");
        let mut conn = FakeConnection::new();
        let token = CancellationToken::new();
        let err = run_live(
            &graph,
            "SELECT Id FROM master.dbo.Whatever",
            &HashMap::new(),
            &mut conn,
            &token,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::BadInput(_)));
        assert!(conn.statements.borrow().is_empty());
    }

    #[test]
    fn per_statement_failure_terminates_the_run_and_still_rolls_back() {
        let graph = build_graph("INSERT INTO Products (Name) VALUES ('x')\nSELECT Id FROM Products");
        let mut conn = FakeConnection::failing_on("INSERT");
        let token = CancellationToken::new();
        let result = run_live(
            &graph,
            "INSERT INTO Products (Name) VALUES ('x')\nSELECT Id FROM Products",
            &HashMap::new(),
            &mut conn,
            &token,
        )
        .unwrap();
        assert!(result.summary.had_error);
        assert_eq!(conn.statements.borrow().len(), 1);
        assert!(*conn.rolled_back.borrow());
    }

    #[test]
    fn cancellation_stops_the_run_without_flagging_an_error() {
        let graph = build_graph("SELECT Id FROM Products");
        let mut conn = FakeConnection::new();
        let token = CancellationToken::new();
        token.cancel();
        let result = run_live(&graph, "SELECT Id FROM Products", &HashMap::new(), &mut conn, &token).unwrap();
        assert!(!result.summary.had_error);
        assert_eq!(result.summary.total_statements, 0);
        assert!(*conn.rolled_back.borrow());
    }
}
