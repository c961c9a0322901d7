//! End-to-end scenarios: one procedure body per control construct, run
//! through whichever of the three public entry points exercises it, with
//! assertions against the trace and summary a caller would actually look
//! at rather than against internal node ids.

use std::collections::HashMap;

use tsqlflow_core::{dry_run, parse, sandbox_run, Bindings, RunMode, TraceEventType};

fn bindings(pairs: &[(&str, Option<&str>)]) -> Bindings {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
        .collect()
}

#[test]
fn linear_select_runs_every_statement_in_source_order() {
    let src = "CREATE PROCEDURE dbo.ListProducts\nAS\nBEGIN\n    SELECT Id FROM Products\n    SELECT Id FROM Orders\nEND";
    let graph = parse(src).unwrap();
    graph.check_invariants().unwrap();

    let result = dry_run(&graph, &HashMap::new());
    assert_eq!(result.summary.mode, RunMode::Dryrun);
    assert!(!result.summary.had_error);
    assert_eq!(result.summary.total_statements, 2);

    let simulated: Vec<&str> = result
        .trace
        .iter()
        .filter(|e| e.event_type == TraceEventType::Simulated)
        .map(|e| e.sql.as_str())
        .collect();
    assert_eq!(simulated.len(), 2);
    assert!(simulated[0].contains("Products"));
    assert!(simulated[1].contains("Orders"));
}

#[test]
fn if_else_true_arm_is_the_only_arm_simulated() {
    let src = "CREATE PROCEDURE dbo.Classify\n@Status NVARCHAR(20)\nAS\nBEGIN\n    IF @Status = 'active'\n        SELECT 'A'\n    ELSE\n        SELECT 'B'\nEND";
    let graph = parse(src).unwrap();
    let b = bindings(&[("@Status", Some("active"))]);

    let result = dry_run(&graph, &b);
    assert!(!result.summary.had_error);
    assert!(result.trace.iter().any(|e| e.sql.contains('A')));
    assert!(!result.trace.iter().any(|e| e.sql.contains('B')));

    let branch_event = result
        .trace
        .iter()
        .find(|e| e.event_type == TraceEventType::Branch)
        .unwrap();
    assert_eq!(branch_event.branch_taken.as_deref(), Some("TRUE (predicted)"));
}

#[test]
fn if_else_unpredictable_condition_walks_both_arms_and_is_labelled_unpredictable() {
    let src = "CREATE PROCEDURE dbo.Classify\nAS\nBEGIN\n    IF EXISTS (SELECT 1 FROM Flags)\n        SELECT 'found'\n    ELSE\n        SELECT 'missing'\nEND";
    let graph = parse(src).unwrap();

    let result = dry_run(&graph, &HashMap::new());
    let branch_event = result
        .trace
        .iter()
        .find(|e| e.event_type == TraceEventType::Branch)
        .unwrap();
    assert_eq!(branch_event.branch_taken.as_deref(), Some("UNPREDICTABLE"));
    let branch_node_id = branch_event.node_id.clone().unwrap();

    assert!(result.trace.iter().any(|e| e.sql.contains("found")));
    assert!(result.trace.iter().any(|e| e.sql.contains("missing")));
    assert!(!result
        .executed_edges
        .iter()
        .any(|e| e.starts_with(&format!("{branch_node_id}->"))));
}

#[test]
fn while_loop_is_simulated_exactly_once_then_cut_off() {
    let src = "CREATE PROCEDURE dbo.Drain\n@I INT\nAS\nBEGIN\n    WHILE @I < 10\n    BEGIN\n        SET @I = @I + 1\n    END\nEND";
    let graph = parse(src).unwrap();
    let b = bindings(&[("@I", Some("0"))]);

    let result = dry_run(&graph, &b);
    assert!(!result.summary.had_error);
    let cutoff_events = result
        .trace
        .iter()
        .filter(|e| e.event_type == TraceEventType::Info)
        .count();
    assert_eq!(cutoff_events, 1);
}

#[test]
fn try_catch_follows_the_optimistic_success_path() {
    let src = "CREATE PROCEDURE dbo.Safe\nAS\nBEGIN\n    BEGIN TRY\n        INSERT INTO Products (Name) VALUES ('x')\n    END TRY\n    BEGIN CATCH\n        INSERT INTO ErrorLog (Message) VALUES ('failed')\n    END CATCH\nEND";
    let graph = parse(src).unwrap();

    let result = dry_run(&graph, &HashMap::new());
    assert!(result.trace.iter().any(|e| e.sql.contains("Products")));
    assert!(!result.trace.iter().any(|e| e.sql.contains("ErrorLog")));
}

#[test]
fn multiple_parameters_bind_independently() {
    let src = "CREATE PROCEDURE dbo.Filter\n@MinPrice DECIMAL(10,2),\n@Category NVARCHAR(50)\nAS\nBEGIN\n    IF @MinPrice > 0\n        SELECT 'priced'\n    IF @Category = 'books'\n        SELECT 'books'\nEND";
    let graph = parse(src).unwrap();
    assert_eq!(graph.params.len(), 2);
    assert_eq!(graph.params[0].name, "@MinPrice");
    assert_eq!(graph.params[1].name, "@Category");

    let b = bindings(&[("@MinPrice", Some("9.99")), ("@Category", Some("books"))]);
    let result = dry_run(&graph, &b);
    assert!(result.trace.iter().any(|e| e.sql.contains("priced")));
    assert!(result.trace.iter().any(|e| e.sql.contains("books")));
}

#[test]
fn sandbox_infers_and_seeds_a_schema_from_the_statements_it_runs() {
    let src = "CREATE PROCEDURE dbo.GetProducts\nAS\nBEGIN\n    SELECT Id, Name, Price FROM Products\nEND";
    let graph = parse(src).unwrap();

    let result = sandbox_run(&graph, src, &HashMap::new());
    assert_eq!(result.summary.mode, RunMode::Sqlite);
    assert!(!result.summary.had_error);

    let meta = result.sqlite_metadata.unwrap();
    assert!(meta.tables_created.contains(&"Products".to_string()));
    assert!(meta.total_rows_generated > 0);

    let resultset = result
        .trace
        .iter()
        .find(|e| e.event_type == TraceEventType::Resultset)
        .unwrap();
    let columns = resultset.columns.as_ref().unwrap();
    assert!(columns.iter().any(|c| c == "Id"));
}

#[test]
fn trace_event_ids_are_strictly_increasing_across_an_entire_run() {
    let src = "CREATE PROCEDURE dbo.Multi\n@X INT\nAS\nBEGIN\n    IF @X > 0\n        SELECT 'pos'\n    ELSE\n        SELECT 'neg'\n    WHILE @X < 3\n    BEGIN\n        SET @X = @X + 1\n    END\nEND";
    let graph = parse(src).unwrap();
    let b = bindings(&[("@X", Some("1"))]);

    let result = dry_run(&graph, &b);
    let ids: Vec<u64> = result.trace.iter().map(|e| e.event_id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn every_scenario_graph_satisfies_the_structural_invariants() {
    let sources = [
        "SELECT 1",
        "IF @X > 0\n    SELECT 1\nELSE\n    SELECT 2",
        "WHILE @I < 5\nBEGIN\n    SET @I = @I + 1\nEND",
        "BEGIN TRY\n    SELECT 1\nEND TRY\nBEGIN CATCH\n    SELECT 2\nEND CATCH",
    ];
    for src in sources {
        let graph = parse(src).unwrap();
        graph.check_invariants().unwrap();
    }
}
