//! Trace event model and the `RunResult` envelope the three executors
//! (dry-run walker, sandbox orchestrator, live executor) all produce.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceEventType {
    Start,
    Simulated,
    Branch,
    Resultset,
    Dml,
    Info,
    Error,
    Txn,
    Statement,
    ControlFlow,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub event_id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub event_type: TraceEventType,
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_number: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_rows: Option<Vec<Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_taken: Option<String>,
    pub duration_ms: u64,
}

/// Appends trace events with a monotonically increasing `eventId`, the
/// only ordering guarantee clients may rely on.
pub struct TraceBuilder {
    events: Vec<TraceEvent>,
    next_id: u64,
}

impl TraceBuilder {
    pub fn new() -> Self {
        TraceBuilder {
            events: Vec::new(),
            next_id: 0,
        }
    }

    fn push(&mut self, mut event: TraceEvent) {
        event.event_id = self.next_id;
        self.next_id += 1;
        self.events.push(event);
    }

    pub fn start(&mut self) {
        self.push(TraceEvent {
            event_id: 0,
            timestamp: Utc::now(),
            node_id: None,
            event_type: TraceEventType::Start,
            sql: String::new(),
            row_count: None,
            error_number: None,
            error_message: None,
            columns: None,
            preview_rows: None,
            branch_taken: None,
            duration_ms: 0,
        });
    }

    pub fn complete(&mut self) {
        self.push(TraceEvent {
            event_id: 0,
            timestamp: Utc::now(),
            node_id: None,
            event_type: TraceEventType::Complete,
            sql: String::new(),
            row_count: None,
            error_number: None,
            error_message: None,
            columns: None,
            preview_rows: None,
            branch_taken: None,
            duration_ms: 0,
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn emit(
        &mut self,
        node_id: Option<String>,
        event_type: TraceEventType,
        sql: impl Into<String>,
        row_count: Option<u64>,
        error: Option<(Option<i32>, String)>,
        columns: Option<Vec<String>>,
        preview_rows: Option<Vec<Vec<String>>>,
        branch_taken: Option<String>,
        duration: Duration,
    ) {
        let (error_number, error_message) = match error {
            Some((n, m)) => (n, Some(m)),
            None => (None, None),
        };
        self.push(TraceEvent {
            event_id: 0,
            timestamp: Utc::now(),
            node_id,
            event_type,
            sql: sql.into(),
            row_count,
            error_number,
            error_message,
            columns,
            preview_rows,
            branch_taken,
            duration_ms: duration.as_millis() as u64,
        });
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Dryrun,
    Sqlite,
    Live,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_statements: u64,
    pub total_rows_affected: u64,
    pub total_duration_ms: u64,
    pub had_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub mode: RunMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePreview {
    pub columns: Vec<String>,
    pub sample_rows: Vec<Vec<String>>,
    pub row_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqliteMetadata {
    pub data_preview: HashMap<String, TablePreview>,
    pub tables_created: Vec<String>,
    pub total_rows_generated: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: String,
    pub summary: RunSummary,
    pub trace: Vec<TraceEvent>,
    pub executed_nodes: Vec<String>,
    pub executed_edges: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlite_metadata: Option<SqliteMetadata>,
}

/// A 12-character lowercase-hex run id, generated fresh per run.
pub fn new_run_id() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
