//! Structural invariants that must hold for any control flow graph,
//! checked against a small corpus of procedures that nest control
//! constructs inside one another — the shapes most likely to break an
//! invariant that holds for any single construct in isolation.

use std::collections::HashMap;

use tsqlflow_core::{dry_run, parse, NodeKind};

const NESTED_IF_INSIDE_WHILE: &str = "CREATE PROCEDURE dbo.Nested1\n@I INT\nAS\nBEGIN\n    WHILE @I < 10\n    BEGIN\n        IF @I = 5\n            SELECT 'mid'\n        ELSE\n            SELECT 'not mid'\n        SET @I = @I + 1\n    END\nEND";

const TRY_CATCH_INSIDE_IF: &str = "CREATE PROCEDURE dbo.Nested2\n@X INT\nAS\nBEGIN\n    IF @X > 0\n    BEGIN\n        BEGIN TRY\n            INSERT INTO Products (Name) VALUES ('x')\n        END TRY\n        BEGIN CATCH\n            INSERT INTO ErrorLog (Message) VALUES ('y')\n        END CATCH\n    END\nEND";

const EMPTY_THEN_ARM: &str = "CREATE PROCEDURE dbo.Nested3\n@X INT\nAS\nBEGIN\n    IF @X > 0\n    BEGIN\n    END\n    ELSE\n        SELECT 'neg'\nEND";

const CORPUS: &[&str] = &[NESTED_IF_INSIDE_WHILE, TRY_CATCH_INSIDE_IF, EMPTY_THEN_ARM];

#[test]
fn every_corpus_procedure_has_exactly_one_start_and_one_end() {
    for src in CORPUS {
        let graph = parse(src).unwrap();
        let start_count = graph.nodes.iter().filter(|n| n.kind == NodeKind::Start).count();
        let end_count = graph.nodes.iter().filter(|n| n.kind == NodeKind::End).count();
        assert_eq!(start_count, 1, "source: {src}");
        assert_eq!(end_count, 1, "source: {src}");
    }
}

#[test]
fn every_corpus_procedure_has_no_dangling_edges() {
    for src in CORPUS {
        let graph = parse(src).unwrap();
        graph.check_invariants().unwrap_or_else(|e| panic!("{src}: {e}"));
    }
}

#[test]
fn every_non_end_node_has_at_least_one_outgoing_edge() {
    for src in CORPUS {
        let graph = parse(src).unwrap();
        for node in &graph.nodes {
            if node.kind != NodeKind::End {
                assert!(!node.edges.is_empty(), "{src}: node {} has no edges", node.id);
            }
        }
    }
}

#[test]
fn every_corpus_procedure_dry_runs_without_an_internal_error() {
    for src in CORPUS {
        let graph = parse(src).unwrap();
        let result = dry_run(&graph, &HashMap::new());
        assert!(!result.summary.had_error, "source: {src}");
    }
}

#[test]
fn nested_while_body_still_loops_back_to_its_own_header_and_not_an_outer_one() {
    let graph = parse(NESTED_IF_INSIDE_WHILE).unwrap();
    let loop_node = graph.nodes.iter().find(|n| n.kind == NodeKind::Loop).unwrap();
    let back_edge_target = graph
        .nodes
        .iter()
        .flat_map(|n| n.edges.iter())
        .find(|e| e.condition.as_deref() == Some("loop back"))
        .map(|e| e.target_node_id.clone())
        .unwrap();
    assert_eq!(back_edge_target, loop_node.id);
}

#[test]
fn try_catch_nested_inside_if_still_produces_both_outcome_edges() {
    let graph = parse(TRY_CATCH_INSIDE_IF).unwrap();
    let tc = graph
        .nodes
        .iter()
        .find(|n| n.kind == NodeKind::TryCatch)
        .unwrap();
    let tc_conditions: Vec<&str> = tc.edges.iter().filter_map(|e| e.condition.as_deref()).collect();
    assert!(tc_conditions.contains(&"error"));

    let all_conditions: Vec<&str> = graph
        .nodes
        .iter()
        .flat_map(|n| n.edges.iter())
        .filter_map(|e| e.condition.as_deref())
        .collect();
    assert!(all_conditions.contains(&"success"));
    assert!(all_conditions.contains(&"handled"));
}

#[test]
fn empty_then_arm_still_produces_a_valid_merge_point() {
    let graph = parse(EMPTY_THEN_ARM).unwrap();
    graph.check_invariants().unwrap();
    let branch = graph.nodes.iter().find(|n| n.kind == NodeKind::Branch).unwrap();
    assert_eq!(branch.edges.len(), 2);
}
