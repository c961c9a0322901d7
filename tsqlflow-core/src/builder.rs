//! CFG Builder: lowers a [`crate::frontend::ParsedProc`] into a
//! [`ControlFlowGraph`].
//!
//! The lowering is a single recursive descent over `Stmt` threaded with a
//! continuation (`Exit`) rather than a mutable "current tail" — each
//! constructor returns the id of the node a predecessor should jump to,
//! and is told where control goes once it finishes. This avoids having to
//! patch edges in after the fact, which matters once branches and loops
//! both need their own merge points.

use tracing::debug;

use crate::cfg::{CfgEdge, CfgNode, ControlFlowGraph, NodeKind};
use crate::error::CoreError;
use crate::frontend::{ParsedProc, Snippet, Stmt};

/// Where a node's natural (non-decision) outgoing edge should go, and
/// under what label. Threaded down through the recursion; a construct
/// only relabels it when the construct's own completion point genuinely
/// differs from its predecessor's (a loop body rejoining the loop
/// header) rather than merely being "inside" something else.
#[derive(Clone)]
struct Exit {
    target: String,
    condition: Option<String>,
}

impl Exit {
    fn plain(target: impl Into<String>) -> Self {
        Exit {
            target: target.into(),
            condition: None,
        }
    }

    fn labeled(target: impl Into<String>, condition: impl Into<String>) -> Self {
        Exit {
            target: target.into(),
            condition: Some(condition.into()),
        }
    }

    fn edge(&self) -> CfgEdge {
        match &self.condition {
            Some(c) => CfgEdge::with_condition(self.target.clone(), c.clone()),
            None => CfgEdge::new(self.target.clone()),
        }
    }
}

struct Builder {
    nodes: Vec<CfgNode>,
    next_id: u64,
}

impl Builder {
    fn new() -> Self {
        Builder {
            nodes: Vec::new(),
            next_id: 0,
        }
    }

    fn fresh_id(&mut self) -> String {
        let id = format!("N{}", self.next_id);
        self.next_id += 1;
        id
    }

    fn push(&mut self, node: CfgNode) {
        self.nodes.push(node);
    }

    fn lower_stmt(&mut self, stmt: &Stmt, exit: &Exit) -> Result<String, CoreError> {
        match stmt {
            Stmt::Simple { keyword, snippet } => self.lower_simple(keyword, snippet, exit),
            Stmt::Block(stmts) => self.lower_seq(stmts, exit),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => self.lower_if(cond, then_branch, else_branch.as_deref(), exit),
            Stmt::While { cond, body } => self.lower_while(cond, body, exit),
            Stmt::TryCatch {
                try_body,
                catch_body,
            } => self.lower_try_catch(try_body, catch_body, exit),
        }
    }

    fn lower_simple(
        &mut self,
        keyword: &str,
        snippet: &Snippet,
        exit: &Exit,
    ) -> Result<String, CoreError> {
        let id = self.fresh_id();
        let kind = classify_keyword(keyword, &snippet.text);
        debug!(node_id = %id, ?kind, "lowering statement");
        let mut node = CfgNode::new(
            &id,
            kind,
            &snippet.text,
            &snippet.text,
            snippet.start_line,
            snippet.end_line,
        );
        node.add_edge(exit.edge());
        self.push(node);
        Ok(id)
    }

    fn lower_seq(&mut self, stmts: &[Stmt], exit: &Exit) -> Result<String, CoreError> {
        if stmts.is_empty() {
            let id = self.fresh_id();
            let mut node = CfgNode::new(&id, NodeKind::Block, "(empty block)", "", 0, 0);
            node.add_edge(exit.edge());
            self.push(node);
            return Ok(id);
        }

        let mut next_entry: Option<String> = None;
        for (i, stmt) in stmts.iter().enumerate().rev() {
            let this_exit = if i == stmts.len() - 1 {
                exit.clone()
            } else {
                Exit::plain(next_entry.clone().expect("later entry already computed"))
            };
            let id = self.lower_stmt(stmt, &this_exit)?;
            next_entry = Some(id);
        }
        Ok(next_entry.expect("non-empty sequence always produces an entry id"))
    }

    fn lower_if(
        &mut self,
        cond: &Snippet,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
        exit: &Exit,
    ) -> Result<String, CoreError> {
        let then_entry = self.lower_stmt(then_branch, exit)?;
        let else_target = match else_branch {
            Some(b) => self.lower_stmt(b, exit)?,
            None => exit.target.clone(),
        };

        let id = self.fresh_id();
        let mut node = CfgNode::new(
            &id,
            NodeKind::Branch,
            &cond.text,
            &cond.text,
            cond.start_line,
            cond.end_line,
        );
        node.add_edge(CfgEdge::with_condition(then_entry, "TRUE"));
        node.add_edge(CfgEdge::with_condition(else_target, "FALSE"));
        self.push(node);
        Ok(id)
    }

    fn lower_while(&mut self, cond: &Snippet, body: &Stmt, exit: &Exit) -> Result<String, CoreError> {
        let loop_id = self.fresh_id();
        let body_exit = Exit::labeled(loop_id.clone(), "loop back");
        let body_entry = self.lower_stmt(body, &body_exit)?;

        let mut node = CfgNode::new(
            &loop_id,
            NodeKind::Loop,
            &cond.text,
            &cond.text,
            cond.start_line,
            cond.end_line,
        );
        node.add_edge(CfgEdge::with_condition(body_entry, "TRUE"));
        node.add_edge(CfgEdge::with_condition(exit.target.clone(), "done"));
        self.push(node);
        Ok(loop_id)
    }

    fn lower_try_catch(
        &mut self,
        try_body: &Stmt,
        catch_body: &Stmt,
        exit: &Exit,
    ) -> Result<String, CoreError> {
        // Both arms rejoin at a merge node that forwards to the ambient
        // exit unchanged, so "success"/"handled" land on the try/catch
        // tails themselves rather than overwriting whatever label the
        // ambient exit already carried (a loop's "loop back", say).
        let merge_id = self.fresh_id();
        let mut merge_node = CfgNode::new(&merge_id, NodeKind::Block, "(try/catch merge)", "", 0, 0);
        merge_node.add_edge(exit.edge());
        self.push(merge_node);

        let try_entry = self.lower_stmt(try_body, &Exit::labeled(merge_id.clone(), "success"))?;
        let catch_body_entry =
            self.lower_stmt(catch_body, &Exit::labeled(merge_id.clone(), "handled"))?;

        let catch_marker_id = self.fresh_id();
        let mut catch_marker = CfgNode::new(&catch_marker_id, NodeKind::CatchBlock, "CATCH", "", 0, 0);
        catch_marker.add_edge(CfgEdge::new(catch_body_entry));
        self.push(catch_marker);

        let id = self.fresh_id();
        let mut node = CfgNode::new(&id, NodeKind::TryCatch, "TRY", "", 0, 0);
        node.add_edge(CfgEdge::new(try_entry));
        node.add_edge(CfgEdge::with_condition(catch_marker_id, "error"));
        self.push(node);
        Ok(id)
    }
}

/// Maps a simple statement's leading keyword (and, for `EXEC`, its
/// operand shape) onto the closed `NodeKind` set.
fn classify_keyword(keyword: &str, snippet: &str) -> NodeKind {
    let kw = keyword.to_uppercase();
    let upper_snippet = snippet.to_uppercase();

    if upper_snippet.contains("SP_EXECUTESQL") {
        return NodeKind::DynamicSql;
    }

    match kw.as_str() {
        "EXEC" | "EXECUTE" => {
            if exec_operand_is_variable(&upper_snippet) {
                NodeKind::DynamicSql
            } else {
                NodeKind::Call
            }
        }
        "SELECT" | "WITH" => NodeKind::Select,
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" => NodeKind::Dml,
        "BEGIN" | "COMMIT" | "ROLLBACK" | "SAVE" => NodeKind::Transaction,
        _ => NodeKind::Statement,
    }
}

/// `EXEC @sql` / `EXEC (@sql)` runs a string held in a variable; any other
/// operand shape is a call to a named procedure.
fn exec_operand_is_variable(upper_snippet: &str) -> bool {
    let rest = upper_snippet.trim_start_matches("EXECUTE");
    let rest = rest.trim_start_matches("EXEC");
    let rest = rest.trim_start();
    let rest = rest.strip_prefix('(').unwrap_or(rest).trim_start();
    rest.starts_with('@')
}

/// Lowers a parsed procedure into a control flow graph with exactly one
/// `Start` and one `End` node.
pub fn build(parsed: &ParsedProc) -> Result<ControlFlowGraph, CoreError> {
    let mut b = Builder::new();

    let end_id = b.fresh_id();
    b.push(CfgNode::new(&end_id, NodeKind::End, "end", "", 0, 0));

    let exit = Exit::plain(end_id.clone());
    let body_entry = b.lower_stmt(&parsed.body, &exit)?;

    let start_id = b.fresh_id();
    let mut start_node = CfgNode::new(&start_id, NodeKind::Start, "start", "", 0, 0);
    start_node.add_edge(CfgEdge::new(body_entry));
    b.push(start_node);

    let graph = ControlFlowGraph {
        start_node_id: start_id,
        end_node_id: end_id,
        nodes: b.nodes,
        params: parsed.params.clone(),
    };
    graph
        .check_invariants()
        .map_err(|e| CoreError::Internal(format!("builder produced an invalid graph: {e}")))?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::NodeKind;
    use crate::frontend::parse_procedure;

    fn build_src(src: &str) -> ControlFlowGraph {
        let parsed = parse_procedure(src).unwrap();
        build(&parsed).unwrap()
    }

    #[test]
    fn linear_statements_chain_in_order() {
        let g = build_src("SELECT 1\nUPDATE t SET x = 1\nEXEC dbo.P");
        g.check_invariants().unwrap();
        let kinds: Vec<NodeKind> = g.nodes.iter().map(|n| n.kind).collect();
        assert!(kinds.contains(&NodeKind::Select));
        assert!(kinds.contains(&NodeKind::Dml));
        assert!(kinds.contains(&NodeKind::Call));
    }

    #[test]
    fn if_else_produces_branch_with_true_false_edges() {
        let g = build_src("IF @X > 0\n    SELECT 'pos'\nELSE\n    SELECT 'neg'");
        let branch = g
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Branch)
            .unwrap();
        let conditions: Vec<&str> = branch
            .edges
            .iter()
            .filter_map(|e| e.condition.as_deref())
            .collect();
        assert!(conditions.contains(&"TRUE"));
        assert!(conditions.contains(&"FALSE"));
    }

    #[test]
    fn if_without_else_falls_through_to_shared_merge() {
        let g = build_src("IF @X > 0\n    SELECT 'pos'\nSELECT 'after'");
        let branch = g
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Branch)
            .unwrap();
        let false_edge = branch
            .edges
            .iter()
            .find(|e| e.condition.as_deref() == Some("FALSE"))
            .unwrap();
        let after = g.node(&false_edge.target_node_id).unwrap();
        assert!(after.sql_snippet.contains("after"));
    }

    #[test]
    fn while_loop_body_has_back_edge_to_header() {
        let g = build_src("WHILE @I < 10\nBEGIN\n    SET @I = @I + 1\nEND");
        let loop_node = g.nodes.iter().find(|n| n.kind == NodeKind::Loop).unwrap();
        let true_edge = loop_node
            .edges
            .iter()
            .find(|e| e.condition.as_deref() == Some("TRUE"))
            .unwrap();
        let body = g.node(&true_edge.target_node_id).unwrap();
        let back_edge = body
            .edges
            .iter()
            .find(|e| e.condition.as_deref() == Some("loop back"))
            .unwrap();
        assert_eq!(back_edge.target_node_id, loop_node.id);
    }

    #[test]
    fn try_catch_routes_success_and_handled_onto_the_rejoining_edges() {
        let g = build_src("BEGIN TRY\n    SELECT 1\nEND TRY\nBEGIN CATCH\n    SELECT 2\nEND CATCH");
        let tc = g
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::TryCatch)
            .unwrap();
        let tc_conditions: Vec<&str> = tc
            .edges
            .iter()
            .filter_map(|e| e.condition.as_deref())
            .collect();
        assert!(tc_conditions.contains(&"error"));
        assert!(!tc_conditions.contains(&"success"));

        let all_conditions: Vec<&str> = g
            .nodes
            .iter()
            .flat_map(|n| n.edges.iter())
            .filter_map(|e| e.condition.as_deref())
            .collect();
        assert!(all_conditions.contains(&"success"));
        assert!(all_conditions.contains(&"handled"));
        assert!(g.nodes.iter().any(|n| n.kind == NodeKind::CatchBlock));
    }

    #[test]
    fn dynamic_sql_detected_for_variable_exec_and_sp_executesql() {
        let g = build_src("EXEC @Sql\nEXEC sp_executesql @Sql2");
        let dyn_count = g
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::DynamicSql)
            .count();
        assert_eq!(dyn_count, 2);
    }

    #[test]
    fn plain_exec_is_a_call() {
        let g = build_src("EXEC dbo.DoThing @Id");
        assert!(g.nodes.iter().any(|n| n.kind == NodeKind::Call));
    }

    #[test]
    fn empty_body_still_yields_a_valid_graph() {
        let g = build_src("");
        g.check_invariants().unwrap();
    }
}
