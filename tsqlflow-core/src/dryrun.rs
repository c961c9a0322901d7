//! Dry-Run Walker: a depth-first simulation of a control flow graph that
//! never touches a database. A `Branch` whose condition resolves
//! statically follows only the matching edge, marking it executed; an
//! unpredictable `Branch` walks both arms without marking either edge as
//! executed, so downstream rendering can still tell a definite path from
//! a merely potential one. `Loop` conditions are resolved the same way
//! but the walk never iterates more than once regardless of the verdict.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use tracing::info;

use crate::cfg::{CfgEdge, CfgNode, ControlFlowGraph, NodeKind};
use crate::eval::{evaluate, Bindings};
use crate::trace::{new_run_id, RunMode, RunResult, RunSummary, TraceBuilder, TraceEventType};

const MAX_DEPTH: usize = 100;

const STATEMENT_KINDS: &[NodeKind] = &[
    NodeKind::Select,
    NodeKind::Dml,
    NodeKind::Call,
    NodeKind::DynamicSql,
    NodeKind::Transaction,
    NodeKind::Statement,
];

struct Walk<'a> {
    graph: &'a ControlFlowGraph,
    bindings: &'a Bindings,
    tb: TraceBuilder,
    executed_nodes: Vec<String>,
    executed_edges: Vec<String>,
    visited_loops: HashSet<String>,
    had_error: bool,
}

impl<'a> Walk<'a> {
    fn record_edge(&mut self, from: &str, edge: &CfgEdge) {
        self.executed_edges
            .push(format!("{from}->{}", edge.target_node_id));
    }

    fn follow(&mut self, edge: Option<&CfgEdge>, from: &str, depth: usize) {
        if let Some(edge) = edge {
            let target = edge.target_node_id.clone();
            self.record_edge(from, edge);
            self.step(&target, depth + 1);
        }
    }

    fn step(&mut self, node_id: &str, depth: usize) {
        if depth > MAX_DEPTH {
            self.tb.emit(
                Some(node_id.to_string()),
                TraceEventType::Error,
                "",
                None,
                Some((None, "maximum recursion depth exceeded".into())),
                None,
                None,
                None,
                Duration::ZERO,
            );
            self.had_error = true;
            return;
        }

        let Some(node) = self.graph.node(node_id) else {
            self.had_error = true;
            return;
        };
        self.executed_nodes.push(node.id.clone());

        match node.kind {
            NodeKind::Start => {
                self.tb.emit(
                    Some(node.id.clone()),
                    TraceEventType::Start,
                    "",
                    None,
                    None,
                    None,
                    None,
                    None,
                    Duration::ZERO,
                );
                let edge = node.edges.first().cloned();
                self.follow(edge.as_ref(), &node.id, depth);
            }
            NodeKind::End => {}
            NodeKind::Branch => self.step_branch(node, depth),
            NodeKind::Loop => self.step_loop(node, depth),
            NodeKind::TryCatch => self.step_try(node, depth),
            NodeKind::CatchBlock | NodeKind::Block => {
                let edge = node.edges.first().cloned();
                self.follow(edge.as_ref(), &node.id, depth);
            }
            kind if STATEMENT_KINDS.contains(&kind) => {
                self.tb.emit(
                    Some(node.id.clone()),
                    TraceEventType::Simulated,
                    node.sql_snippet.clone(),
                    None,
                    None,
                    None,
                    None,
                    None,
                    Duration::ZERO,
                );
                let edge = node.edges.first().cloned();
                self.follow(edge.as_ref(), &node.id, depth);
            }
            _ => {
                let edge = node.edges.first().cloned();
                self.follow(edge.as_ref(), &node.id, depth);
            }
        }
    }

    fn step_branch(&mut self, node: &CfgNode, depth: usize) {
        let result = evaluate(&node.sql_snippet, self.bindings);
        let label = branch_label(result);
        info!(node_id = %node.id, branch = %label, "branch decision");
        self.tb.emit(
            Some(node.id.clone()),
            TraceEventType::Branch,
            node.sql_snippet.clone(),
            None,
            None,
            None,
            None,
            Some(label.to_string()),
            Duration::ZERO,
        );
        match result {
            Some(true) => {
                let edge = node
                    .edges
                    .iter()
                    .find(|e| e.condition.as_deref() == Some("TRUE"))
                    .cloned();
                self.follow(edge.as_ref(), &node.id, depth);
            }
            Some(false) => {
                let edge = node
                    .edges
                    .iter()
                    .find(|e| e.condition.as_deref() == Some("FALSE"))
                    .cloned();
                self.follow(edge.as_ref(), &node.id, depth);
            }
            None => {
                // Neither arm is certain, so both are walked to surface
                // whatever either one would do; since neither is a
                // determinate choice, no edge is recorded as executed.
                let targets: Vec<String> =
                    node.edges.iter().map(|e| e.target_node_id.clone()).collect();
                for target in targets {
                    self.step(&target, depth + 1);
                }
            }
        }
    }

    fn step_loop(&mut self, node: &CfgNode, depth: usize) {
        if self.visited_loops.contains(&node.id) {
            let done_edge = node
                .edges
                .iter()
                .find(|e| e.condition.as_deref() == Some("done"))
                .cloned();
            self.tb.emit(
                Some(node.id.clone()),
                TraceEventType::Info,
                "loop body already simulated once; stopping the dry run here",
                None,
                None,
                None,
                None,
                Some("done".into()),
                Duration::ZERO,
            );
            self.follow(done_edge.as_ref(), &node.id, depth);
            return;
        }
        self.visited_loops.insert(node.id.clone());

        let result = evaluate(&node.sql_snippet, self.bindings);
        let (edge, label) = pick_edge(node, result);
        info!(node_id = %node.id, branch = %label, "loop decision");
        self.tb.emit(
            Some(node.id.clone()),
            TraceEventType::ControlFlow,
            node.sql_snippet.clone(),
            None,
            None,
            None,
            None,
            Some(label),
            Duration::ZERO,
        );
        let edge = edge.cloned();
        self.follow(edge.as_ref(), &node.id, depth);
    }

    fn step_try(&mut self, node: &CfgNode, depth: usize) {
        // The walker can't know statically whether a statement will fail,
        // so it always simulates the optimistic path; the error edge is
        // noted in the trace but never traversed or marked executed.
        self.tb.emit(
            Some(node.id.clone()),
            TraceEventType::ControlFlow,
            "TRY",
            None,
            None,
            None,
            None,
            Some("success".into()),
            Duration::ZERO,
        );
        let try_edge = node
            .edges
            .iter()
            .find(|e| e.condition.as_deref() != Some("error"))
            .cloned();
        self.follow(try_edge.as_ref(), &node.id, depth);
    }
}

/// The trace verdict a `Branch` decision carries: `"TRUE (predicted)"` /
/// `"FALSE (predicted)"` when the evaluator resolved the condition,
/// `"UNPREDICTABLE"` when it didn't.
fn branch_label(result: Option<bool>) -> &'static str {
    match result {
        Some(true) => "TRUE (predicted)",
        Some(false) => "FALSE (predicted)",
        None => "UNPREDICTABLE",
    }
}

/// Picks a `Loop` node's `"TRUE"` (enter the body) or `"done"` (skip it)
/// edge from the evaluator's verdict, and the label the trace event
/// should carry. An unresolved condition defaults to the `TRUE` edge.
fn pick_edge(node: &CfgNode, result: Option<bool>) -> (Option<&CfgEdge>, String) {
    match result {
        Some(true) => (
            node.edges
                .iter()
                .find(|e| e.condition.as_deref() == Some("TRUE")),
            "TRUE".to_string(),
        ),
        Some(false) => {
            let label = if node.kind == NodeKind::Loop {
                "done"
            } else {
                "FALSE"
            };
            (
                node.edges.iter().find(|e| e.condition.as_deref() == Some(label)),
                label.to_string(),
            )
        }
        None => (
            node.edges
                .iter()
                .find(|e| e.condition.as_deref() == Some("TRUE")),
            "unknown".to_string(),
        ),
    }
}

/// Simulates `graph` from its start node without touching a database.
pub fn dry_run(graph: &ControlFlowGraph, bindings: &Bindings) -> RunResult {
    let started = Instant::now();
    let mut walk = Walk {
        graph,
        bindings,
        tb: TraceBuilder::new(),
        executed_nodes: Vec::new(),
        executed_edges: Vec::new(),
        visited_loops: HashSet::new(),
        had_error: false,
    };
    walk.tb.start();
    walk.step(&graph.start_node_id, 0);
    walk.tb.complete();

    let total_statements = walk
        .executed_nodes
        .iter()
        .filter(|id| {
            graph
                .node(id)
                .map(|n| STATEMENT_KINDS.contains(&n.kind))
                .unwrap_or(false)
        })
        .count() as u64;

    RunResult {
        run_id: new_run_id(),
        summary: RunSummary {
            total_statements,
            total_rows_affected: 0,
            total_duration_ms: started.elapsed().as_millis() as u64,
            had_error: walk.had_error,
            error_message: None,
            mode: RunMode::Dryrun,
        },
        trace: walk.tb.into_events(),
        executed_nodes: walk.executed_nodes,
        executed_edges: walk.executed_edges,
        sqlite_metadata: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build;
    use crate::frontend::parse_procedure;
    use std::collections::HashMap;

    fn run(src: &str, bindings: Bindings) -> RunResult {
        let parsed = parse_procedure(src).unwrap();
        let graph = build(&parsed).unwrap();
        dry_run(&graph, &bindings)
    }

    #[test]
    fn resolved_branch_follows_true_edge_only() {
        let mut b = HashMap::new();
        b.insert("@X".to_string(), Some("5".to_string()));
        let result = run("IF @X > 0\n    SELECT 'pos'\nELSE\n    SELECT 'neg'", b);
        let has_pos = result
            .trace
            .iter()
            .any(|e| e.sql.contains("pos"));
        let has_neg = result.trace.iter().any(|e| e.sql.contains("neg"));
        assert!(has_pos);
        assert!(!has_neg);
        assert!(!result.summary.had_error);

        let branch_event = result
            .trace
            .iter()
            .find(|e| e.event_type == TraceEventType::Branch)
            .unwrap();
        assert_eq!(branch_event.branch_taken.as_deref(), Some("TRUE (predicted)"));
    }

    #[test]
    fn unresolved_branch_walks_both_arms_and_marks_neither_edge_executed() {
        let result = run(
            "IF EXISTS (SELECT 1 FROM t)\n    SELECT 'found'\nELSE\n    SELECT 'missing'",
            HashMap::new(),
        );
        let branch_event = result
            .trace
            .iter()
            .find(|e| e.event_type == TraceEventType::Branch)
            .unwrap();
        assert_eq!(branch_event.branch_taken.as_deref(), Some("UNPREDICTABLE"));
        let branch_node_id = branch_event.node_id.clone().unwrap();

        assert!(result.trace.iter().any(|e| e.sql.contains("found")));
        assert!(result.trace.iter().any(|e| e.sql.contains("missing")));

        let simulated_node_ids: Vec<String> = result
            .trace
            .iter()
            .filter(|e| e.event_type == TraceEventType::Simulated)
            .filter_map(|e| e.node_id.clone())
            .collect();
        assert_eq!(simulated_node_ids.len(), 2);
        for id in &simulated_node_ids {
            assert!(result.executed_nodes.contains(id));
        }

        assert!(!result
            .executed_edges
            .iter()
            .any(|e| e.starts_with(&format!("{branch_node_id}->"))));
    }

    #[test]
    fn loop_is_cut_off_after_one_iteration() {
        let mut b = HashMap::new();
        b.insert("@I".to_string(), Some("0".to_string()));
        let result = run("WHILE @I < 10\nBEGIN\n    SET @I = @I + 1\nEND", b);
        let info_events = result
            .trace
            .iter()
            .filter(|e| e.event_type == TraceEventType::Info)
            .count();
        assert_eq!(info_events, 1);
    }

    #[test]
    fn try_catch_follows_the_success_path() {
        let result = run(
            "BEGIN TRY\n    SELECT 1\nEND TRY\nBEGIN CATCH\n    SELECT 2\nEND CATCH",
            HashMap::new(),
        );
        assert!(result.trace.iter().any(|e| e.sql.contains('1')));
        assert!(!result.trace.iter().any(|e| e.sql.trim() == "SELECT 2"));
    }

    #[test]
    fn trace_starts_and_completes() {
        let result = run("SELECT 1", HashMap::new());
        assert_eq!(result.trace.first().unwrap().event_type, TraceEventType::Start);
        assert_eq!(result.trace.last().unwrap().event_type, TraceEventType::Complete);
        assert_eq!(result.summary.mode, RunMode::Dryrun);
    }
}
