//! Control flow graph data model: node/edge value types, the node-kind
//! enumeration, and the graph container that the builder produces and the
//! walker/sandbox/live executor consume.
//!
//! Nodes live in an arena (`ControlFlowGraph::nodes`) and refer to each
//! other by opaque string id rather than by pointer or index, so cycles
//! (loop-back edges) are trivially representable and the whole graph stays
//! cheaply cloneable.

use serde::{Deserialize, Serialize};

/// The closed set of node kinds a CFG can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Start,
    End,
    Statement,
    Branch,
    Loop,
    Dml,
    Select,
    Call,
    TryCatch,
    CatchBlock,
    Transaction,
    DynamicSql,
    Block,
}

/// A directed edge to `target_node_id`, optionally tagged with the
/// condition under which it is taken (`"TRUE"`, `"FALSE"`, `"loop back"`,
/// `"done"`, `"error"`, `"success"`, `"handled"`, or `None` for an
/// unconditional/merge edge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CfgEdge {
    pub target_node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl CfgEdge {
    pub fn new(target_node_id: impl Into<String>) -> Self {
        CfgEdge {
            target_node_id: target_node_id.into(),
            condition: None,
        }
    }

    pub fn with_condition(target_node_id: impl Into<String>, condition: impl Into<String>) -> Self {
        CfgEdge {
            target_node_id: target_node_id.into(),
            condition: Some(condition.into()),
        }
    }
}

/// Upstream truncates labels for display; the builder enforces this at
/// construction time so every consumer sees the same label regardless of
/// rendering layer.
pub const LABEL_MAX_CHARS: usize = 50;

/// One node in the graph. Immutable after construction — the builder is
/// the only writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CfgNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    /// Verbatim, whitespace-trimmed substring of the source procedure text.
    pub sql_snippet: String,
    pub start_line: u32,
    pub end_line: u32,
    pub edges: Vec<CfgEdge>,
}

impl CfgNode {
    pub fn new(
        id: impl Into<String>,
        kind: NodeKind,
        label: impl Into<String>,
        sql_snippet: impl Into<String>,
        start_line: u32,
        end_line: u32,
    ) -> Self {
        let label = label.into();
        let label = if label.chars().count() > LABEL_MAX_CHARS {
            label.chars().take(LABEL_MAX_CHARS).collect()
        } else {
            label
        };
        CfgNode {
            id: id.into(),
            kind,
            label,
            sql_snippet: sql_snippet.into(),
            start_line,
            end_line,
            edges: Vec::new(),
        }
    }

    pub fn add_edge(&mut self, edge: CfgEdge) {
        self.edges.push(edge);
    }
}

/// A declared stored-procedure parameter (`@name TYPE [= default] [OUTPUT]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcParameter {
    /// Always carries the leading `@`.
    pub name: String,
    pub sql_type: String,
    pub is_output: bool,
    pub has_default: bool,
    pub default_value: Option<String>,
}

/// A built control flow graph plus the procedure's declared parameters.
///
/// Read-only after construction. Node ids are unique only within one
/// instance — a re-parse of the same source text is not guaranteed to
/// produce the same ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlFlowGraph {
    pub start_node_id: String,
    pub end_node_id: String,
    pub nodes: Vec<CfgNode>,
    pub params: Vec<ProcParameter>,
}

impl ControlFlowGraph {
    pub fn node(&self, id: &str) -> Option<&CfgNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn start(&self) -> &CfgNode {
        self.node(&self.start_node_id)
            .expect("start node must exist")
    }

    /// Validate invariants 1-4 of the data model (structural invariants
    /// that hold regardless of which construct produced the graph; the
    /// shape-specific invariants 5-7 are asserted by the builder's own
    /// tests against the constructs that produce them).
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let ids: std::collections::HashSet<&str> =
            self.nodes.iter().map(|n| n.id.as_str()).collect();

        for node in &self.nodes {
            for edge in &node.edges {
                if !ids.contains(edge.target_node_id.as_str()) {
                    return Err(format!(
                        "edge from {} targets unknown node {}",
                        node.id, edge.target_node_id
                    ));
                }
            }
        }

        let start_count = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Start)
            .count();
        let end_count = self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::End)
            .count();
        if start_count != 1 {
            return Err(format!("expected exactly one Start node, found {start_count}"));
        }
        if end_count != 1 {
            return Err(format!("expected exactly one End node, found {end_count}"));
        }

        let start = self.start();
        if start.edges.is_empty() {
            return Err("Start node has no outgoing edges".into());
        }

        for node in &self.nodes {
            if node.kind == NodeKind::End {
                if !node.edges.is_empty() {
                    return Err("End node must have no outgoing edges".into());
                }
            } else if node.edges.is_empty() {
                return Err(format!("non-End node {} has no outgoing edges", node.id));
            }
        }

        Ok(())
    }
}
