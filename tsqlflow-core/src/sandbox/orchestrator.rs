//! SQLite Sandbox Orchestrator: ties the splitter, adapter, and schema
//! inferrer together into one run against an in-memory `rusqlite`
//! connection.
//!
//! Branch selection is not reimplemented here — it already exists in
//! [`crate::dryrun::dry_run`], which walks the CFG with the same
//! predicate evaluator the sandbox would otherwise need a second copy
//! of. This module instead correlates the statements the line-scan
//! splitter pulled out of the raw source text against the CFG nodes the
//! dry run actually walked, by a 30-character normalised-prefix match,
//! and only executes the statements that matched (the "on-branch" set).
//! A split statement that never matches a walked node came from a branch
//! arm the dry run didn't take; it is reported as a `control-flow` event
//! with a "skipped" marker and otherwise never executed.

use std::time::{Duration, Instant};

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cfg::{ControlFlowGraph, NodeKind};
use crate::dryrun::dry_run;
use crate::eval::Bindings;
use crate::trace::{
    new_run_id, RunMode, RunResult, RunSummary, SqliteMetadata, TablePreview, TraceBuilder,
    TraceEventType,
};

use super::adapter::adapt_to_sqlite;
use super::schema::infer_and_seed;
use super::splitter::{extract_body, split_statements};
use super::{CancellationToken, SandboxConfig};

const STATEMENT_KINDS: &[NodeKind] = &[
    NodeKind::Select,
    NodeKind::Dml,
    NodeKind::Call,
    NodeKind::DynamicSql,
    NodeKind::Transaction,
    NodeKind::Statement,
];

/// Collapses internal whitespace runs to single spaces and uppercases,
/// then takes the first 30 characters — the normalisation both the CFG
/// node snippet and the split statement go through before comparison.
fn normalized_prefix(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
        .chars()
        .take(30)
        .collect()
}

fn cell_to_string(v: ValueRef<'_>) -> String {
    match v {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).to_string(),
        ValueRef::Blob(_) => "<blob>".to_string(),
    }
}

struct Candidate {
    node_id: String,
    prefix: String,
}

/// Runs `graph`'s procedure against an in-memory SQLite database seeded
/// from its own inferred schema. Never errors at the API boundary: a
/// per-statement engine failure becomes an `error` trace event and the
/// run continues with the next statement.
pub fn sandbox_run(graph: &ControlFlowGraph, source: &str, bindings: &Bindings) -> RunResult {
    sandbox_run_with(
        graph,
        source,
        bindings,
        &SandboxConfig::default(),
        &CancellationToken::new(),
    )
}

pub fn sandbox_run_with(
    graph: &ControlFlowGraph,
    source: &str,
    bindings: &Bindings,
    config: &SandboxConfig,
    cancel: &CancellationToken,
) -> RunResult {
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
    let adapted_statements: Vec<String> = raw_statements.iter().map(|s| adapt_to_sqlite(s)).collect();

    let seeded = infer_and_seed(&adapted_statements, config);
    info!(seed = config.seed, tables = seeded.len(), "inferred sandbox schema");

    let conn = match Connection::open_in_memory() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "failed to open in-memory sandbox database");
            tb.emit(
                None,
                TraceEventType::Error,
                "",
                None,
                Some((None, format!("failed to open sandbox database: {e}"))),
                None,
                None,
                None,
                Duration::ZERO,
            );
            tb.complete();
            return RunResult {
                run_id: new_run_id(),
                summary: RunSummary {
                    total_statements: 0,
                    total_rows_affected: 0,
                    total_duration_ms: started.elapsed().as_millis() as u64,
                    had_error: true,
                    error_message: Some(e.to_string()),
                    mode: RunMode::Sqlite,
                },
                trace: tb.into_events(),
                executed_nodes: Vec::new(),
                executed_edges: Vec::new(),
                sqlite_metadata: None,
            };
        }
    };
    let _ = conn.busy_timeout(Duration::from_secs(config.statement_timeout_secs));

    let mut tables_created = Vec::new();
    let mut total_rows_generated = 0u64;
    for table in &seeded {
        if conn.execute_batch(&table.create_statement).is_err() {
            continue;
        }
        tables_created.push(table.name.clone());
        for insert in &table.insert_statements {
            if conn.execute(insert, []).is_ok() {
                total_rows_generated += 1;
            }
        }
    }

    let mut had_error = false;
    let mut total_rows_affected = 0u64;
    let mut total_statements = 0u64;

    for (raw, adapted) in raw_statements.iter().zip(adapted_statements.iter()) {
        if cancel.is_cancelled() {
            break;
        }

        let prefix = normalized_prefix(raw);
        let matched = candidates.iter().position(|c| c.prefix == prefix);
        let Some(idx) = matched else {
            tb.emit(
                None,
                TraceEventType::ControlFlow,
                adapted.clone(),
                None,
                None,
                None,
                None,
                Some("skipped".into()),
                Duration::ZERO,
            );
            continue;
        };
        let node_id = candidates.remove(idx).node_id;
        total_statements += 1;

        tb.emit(
            Some(node_id.clone()),
            TraceEventType::Statement,
            adapted.clone(),
            None,
            None,
            None,
            None,
            None,
            Duration::ZERO,
        );

        let stmt_started = Instant::now();
        let upper = adapted.trim_start().to_uppercase();
        if upper.starts_with("SELECT") || upper.starts_with("WITH") {
            match run_select(&conn, adapted, config.preview_row_cap) {
                Ok((columns, preview_rows, row_count)) => {
                    tb.emit(
                        Some(node_id),
                        TraceEventType::Resultset,
                        adapted.clone(),
                        Some(row_count),
                        None,
                        Some(columns),
                        Some(preview_rows),
                        None,
                        stmt_started.elapsed(),
                    );
                }
                Err(e) => {
                    had_error = true;
                    warn!(statement = %adapted, error = %e, "sandbox statement failed, continuing");
                    tb.emit(
                        Some(node_id),
                        TraceEventType::Error,
                        adapted.clone(),
                        None,
                        Some((sqlite_error_code(&e), e.to_string())),
                        None,
                        None,
                        None,
                        stmt_started.elapsed(),
                    );
                }
            }
        } else {
            match conn.execute(adapted, []) {
                Ok(affected) => {
                    total_rows_affected += affected as u64;
                    tb.emit(
                        Some(node_id),
                        TraceEventType::Dml,
                        adapted.clone(),
                        Some(affected as u64),
                        None,
                        None,
                        None,
                        None,
                        stmt_started.elapsed(),
                    );
                }
                Err(e) => {
                    had_error = true;
                    warn!(statement = %adapted, error = %e, "sandbox statement failed, continuing");
                    tb.emit(
                        Some(node_id),
                        TraceEventType::Error,
                        adapted.clone(),
                        None,
                        Some((sqlite_error_code(&e), e.to_string())),
                        None,
                        None,
                        None,
                        stmt_started.elapsed(),
                    );
                }
            }
        }
    }

    let mut data_preview = std::collections::HashMap::new();
    for table in tables_created.iter().take(config.preview_tables_cap) {
        if let Ok(preview) = read_table_preview(&conn, table, config.preview_row_cap) {
            data_preview.insert(table.clone(), preview);
        }
    }

    tb.complete();

    RunResult {
        run_id: new_run_id(),
        summary: RunSummary {
            total_statements,
            total_rows_affected,
            total_duration_ms: started.elapsed().as_millis() as u64,
            had_error,
            error_message: None,
            mode: RunMode::Sqlite,
        },
        trace: tb.into_events(),
        executed_nodes: dry.executed_nodes,
        executed_edges: dry.executed_edges,
        sqlite_metadata: Some(SqliteMetadata {
            data_preview,
            tables_created,
            total_rows_generated,
        }),
    }
}

fn sqlite_error_code(e: &rusqlite::Error) -> Option<i32> {
    match e {
        rusqlite::Error::SqliteFailure(code, _) => Some(code.extended_code),
        _ => None,
    }
}

#[allow(clippy::type_complexity)]
fn run_select(
    conn: &Connection,
    sql: &str,
    preview_cap: usize,
) -> rusqlite::Result<(Vec<String>, Vec<Vec<String>>, u64)> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let column_count = columns.len();
    let mut rows = stmt.query([])?;
    let mut preview_rows = Vec::new();
    let mut row_count = 0u64;
    while let Some(row) = rows.next()? {
        row_count += 1;
        if preview_rows.len() < preview_cap {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(cell_to_string(row.get_ref(i)?));
            }
            preview_rows.push(values);
        }
    }
    Ok((columns, preview_rows, row_count))
}

fn read_table_preview(conn: &Connection, table: &str, preview_cap: usize) -> rusqlite::Result<TablePreview> {
    let count: u64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
    let (columns, sample_rows, _) = run_select(conn, &format!("SELECT * FROM {table} LIMIT {preview_cap}"), preview_cap)?;
    Ok(TablePreview {
        columns,
        sample_rows,
        row_count: count,
    })
}
