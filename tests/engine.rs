/// Integration tests for the workflow execution engine
///
/// These run real graphs through the scheduler with an in-memory SQLite
/// history, using only node types that need no network access (input,
/// data-transform, export, ai-filter, output).

use crawlflow::runtime::engine::{
    EngineError, ExecuteOptions, ExecutionEngine, ExecutionOutcome,
};
use crawlflow::runtime::events::ProgressSink;
use crawlflow::runtime::executor::OperationRegistry;
use crawlflow::runtime::history::ExecutionStore;
use crawlflow::runtime::spider::{SpiderClient, SpiderConfig};
use crawlflow::workflow::graph::GraphError;
use crawlflow::workflow::types::{
    ExecutionStatus, NodeType, ProgressEvent, WorkflowEdge, WorkflowNode,
};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

async fn engine_with_store() -> (ExecutionEngine, ExecutionStore, SqlitePool) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let history = ExecutionStore::new(pool.clone());
    history.init_schema().await.unwrap();

    let spider = Arc::new(SpiderClient::new(SpiderConfig {
        api_key: None,
        base_url: None,
        model: "claude-sonnet-4-5".to_string(),
    }));
    let engine = ExecutionEngine::new(OperationRegistry::new(spider), history.clone());
    (engine, history, pool)
}

fn node(id: &str, node_type: NodeType, data: Value) -> WorkflowNode {
    let mut data = data;
    if data.get("label").is_none() {
        data["label"] = json!(id);
    }
    WorkflowNode {
        id: id.to_string(),
        node_type,
        position: None,
        data,
    }
}

fn edge(id: &str, source: &str, target: &str) -> WorkflowEdge {
    WorkflowEdge {
        id: id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        source_handle: None,
        target_handle: None,
    }
}

fn options(execution_id: &str) -> ExecuteOptions {
    ExecuteOptions {
        execution_id: execution_id.to_string(),
        workflow_id: "wf_test".to_string(),
        workflow_name: "Test Workflow".to_string(),
        cancel: CancellationToken::new(),
        teardown: None,
    }
}

async fn run_graph(
    engine: &ExecutionEngine,
    nodes: &[WorkflowNode],
    edges: &[WorkflowEdge],
    opts: ExecuteOptions,
) -> (Result<ExecutionOutcome, EngineError>, Vec<ProgressEvent>) {
    let (sink, mut rx) = ProgressSink::channel(256);
    let result = engine.execute(nodes, edges, sink, opts).await;
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (result, events)
}

fn starts_of(events: &[ProgressEvent], node: &str) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::NodeStart { node_id, .. } if node_id == node))
        .count()
}

fn lifecycle_types(events: &[ProgressEvent]) -> Vec<&'static str> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::NodeStart { .. } => Some("node_start"),
            ProgressEvent::NodeComplete { .. } => Some("node_complete"),
            ProgressEvent::NodeError { .. } => Some("node_error"),
            ProgressEvent::Complete { .. } => Some("complete"),
            ProgressEvent::Error { .. } => Some("error"),
            ProgressEvent::Log { .. } => None,
        })
        .collect()
}

#[tokio::test]
async fn empty_graph_fails_validation_without_a_record() {
    let (engine, history, _pool) = engine_with_store().await;
    let (result, events) = run_graph(&engine, &[], &[], options("exec_empty")).await;

    assert!(matches!(
        result,
        Err(EngineError::Graph(GraphError::EmptyGraph))
    ));
    assert_eq!(lifecycle_types(&events), vec!["error"]);
    assert!(history.get_all(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn cycle_only_graph_has_no_start_node() {
    let (engine, _history, _pool) = engine_with_store().await;
    let nodes = vec![
        node("x", NodeType::DataTransform, json!({})),
        node("y", NodeType::DataTransform, json!({})),
    ];
    let edges = vec![edge("e1", "x", "y"), edge("e2", "y", "x")];
    let (result, events) = run_graph(&engine, &nodes, &edges, options("exec_cycle")).await;

    assert!(matches!(
        result,
        Err(EngineError::Graph(GraphError::NoStartNode))
    ));
    assert_eq!(lifecycle_types(&events), vec!["error"]);
}

#[tokio::test]
async fn fan_in_node_waits_for_all_predecessors() {
    // Start nodes run in declaration order, so flipping the declaration
    // order makes each predecessor the last one to finish in turn. C must
    // start exactly once, after both, in either case.
    for start_order in [["a", "b"], ["b", "a"]] {
        let (engine, _history, _pool) = engine_with_store().await;
        let mut nodes: Vec<WorkflowNode> = start_order
            .iter()
            .map(|&id| node(id, NodeType::Input, json!({"inputType": "multiple", "urls": []})))
            .collect();
        nodes.push(node("c", NodeType::DataTransform, json!({})));
        let edges = vec![edge("e1", "a", "c"), edge("e2", "b", "c")];

        let (result, events) = run_graph(&engine, &nodes, &edges, options("exec_fanin")).await;
        let outcome = result.unwrap();
        assert_eq!(outcome.nodes_executed, 3);
        assert_eq!(starts_of(&events, "c"), 1);

        let c_start = events
            .iter()
            .position(|e| matches!(e, ProgressEvent::NodeStart { node_id, .. } if node_id == "c"))
            .unwrap();
        let mut completions = Vec::new();
        for upstream in start_order {
            let done = events
                .iter()
                .position(|e| {
                    matches!(e, ProgressEvent::NodeComplete { node_id, .. } if node_id == upstream)
                })
                .unwrap();
            assert!(done < c_start, "c started before {} completed", upstream);
            completions.push(done);
        }
        // the declared-last predecessor really did finish last
        assert!(completions[0] < completions[1]);
    }
}

#[tokio::test]
async fn first_node_failure_stops_the_run() {
    let (engine, history, _pool) = engine_with_store().await;
    let nodes = vec![
        node("a", NodeType::Input, json!({"inputType": "multiple", "urls": []})),
        node(
            "b",
            NodeType::DataTransform,
            json!({"transformScript": "this is not lua ("}),
        ),
        node("c", NodeType::Output, json!({})),
    ];
    let edges = vec![edge("e1", "a", "b"), edge("e2", "b", "c")];
    let (result, events) = run_graph(&engine, &nodes, &edges, options("exec_fail")).await;

    match result {
        Err(EngineError::Operation { node, .. }) => assert_eq!(node, "b"),
        other => panic!("expected operation failure, got {:?}", other.map(|o| o.nodes_executed)),
    }

    let types = lifecycle_types(&events);
    assert_eq!(types.iter().filter(|t| **t == "node_error").count(), 1);
    assert!(!types.contains(&"complete"));
    assert_eq!(starts_of(&events, "c"), 0);

    let record = history.get_by_id("exec_fail").await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
    // only the input node finished successfully
    assert_eq!(record.nodes_executed, 1);
    assert!(record.error.is_some());
    assert!(record.completed_at.is_some());
}

#[tokio::test]
async fn diamond_executes_the_join_exactly_once() {
    let (engine, _history, _pool) = engine_with_store().await;
    let nodes = vec![
        node("a", NodeType::Input, json!({"inputType": "single", "url": "https://seed"})),
        node("b", NodeType::DataTransform, json!({})),
        node("c", NodeType::DataTransform, json!({})),
        node("d", NodeType::Output, json!({})),
    ];
    let edges = vec![
        edge("e1", "a", "b"),
        edge("e2", "a", "c"),
        edge("e3", "b", "d"),
        edge("e4", "c", "d"),
    ];
    let (result, events) = run_graph(&engine, &nodes, &edges, options("exec_diamond")).await;

    let outcome = result.unwrap();
    assert_eq!(outcome.nodes_executed, 4);
    assert_eq!(starts_of(&events, "d"), 1);

    // the join saw both branches: one record from b plus one from c
    assert_eq!(outcome.results.len(), 1);
    let data = outcome.results[0].as_value()["data"].as_array().unwrap();
    assert_eq!(data.len(), 2);
}

#[tokio::test]
async fn unreachable_cycle_is_never_executed() {
    let (engine, _history, _pool) = engine_with_store().await;
    let nodes = vec![
        node("a", NodeType::Input, json!({"inputType": "multiple", "urls": []})),
        node("out", NodeType::Output, json!({})),
        node("x", NodeType::DataTransform, json!({})),
        node("y", NodeType::DataTransform, json!({})),
    ];
    let edges = vec![
        edge("e1", "a", "out"),
        edge("e2", "x", "y"),
        edge("e3", "y", "x"),
    ];
    let (result, events) = run_graph(&engine, &nodes, &edges, options("exec_dead")).await;

    let outcome = result.unwrap();
    assert_eq!(outcome.nodes_executed, 2);
    assert_eq!(starts_of(&events, "x"), 0);
    assert_eq!(starts_of(&events, "y"), 0);
}

#[tokio::test]
async fn events_follow_the_lifecycle_order() {
    let (engine, _history, _pool) = engine_with_store().await;
    let nodes = vec![
        node("a", NodeType::Input, json!({"inputType": "single", "url": "https://seed"})),
        node("out", NodeType::Output, json!({})),
    ];
    let edges = vec![edge("e1", "a", "out")];
    let (result, events) = run_graph(&engine, &nodes, &edges, options("exec_order")).await;

    result.unwrap();
    assert_eq!(
        lifecycle_types(&events),
        vec![
            "node_start",
            "node_complete",
            "node_start",
            "node_complete",
            "complete"
        ]
    );
    assert!(matches!(events.last(), Some(ProgressEvent::Complete { .. })));
}

#[tokio::test]
async fn zero_output_nodes_yields_empty_results() {
    let (engine, history, _pool) = engine_with_store().await;
    let nodes = vec![
        node("a", NodeType::Input, json!({"inputType": "multiple", "urls": []})),
        node("b", NodeType::DataTransform, json!({})),
    ];
    let edges = vec![edge("e1", "a", "b")];
    let (result, events) = run_graph(&engine, &nodes, &edges, options("exec_noout")).await;

    let outcome = result.unwrap();
    assert!(outcome.results.is_empty());
    match events.last() {
        Some(ProgressEvent::Complete { results, nodes_executed, .. }) => {
            assert!(results.is_empty());
            assert_eq!(*nodes_executed, 2);
        }
        other => panic!("expected complete frame, got {:?}", other),
    }

    let record = history.get_by_id("exec_noout").await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
    assert_eq!(record.results.as_deref().map(|r| r.len()), Some(0));
}

#[tokio::test]
async fn persistence_failure_does_not_abort_the_run() {
    let (engine, _history, pool) = engine_with_store().await;
    // With history gone every record write fails; the run must still
    // complete and emit its frames.
    sqlx::query("DROP TABLE execution_history")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("DROP TABLE execution_logs")
        .execute(&pool)
        .await
        .unwrap();

    let nodes = vec![
        node("a", NodeType::Input, json!({"inputType": "multiple", "urls": []})),
        node("out", NodeType::Output, json!({})),
    ];
    let edges = vec![edge("e1", "a", "out")];
    let (result, events) = run_graph(&engine, &nodes, &edges, options("exec_nodb")).await;

    let outcome = result.unwrap();
    assert_eq!(outcome.nodes_executed, 2);
    assert!(matches!(events.last(), Some(ProgressEvent::Complete { .. })));
}

#[tokio::test]
async fn pre_cancelled_run_is_recorded_as_cancelled() {
    let (engine, history, _pool) = engine_with_store().await;
    let nodes = vec![node(
        "a",
        NodeType::Input,
        json!({"inputType": "multiple", "urls": []}),
    )];

    let mut opts = options("exec_cancel");
    opts.cancel.cancel();
    let (result, events) = run_graph(&engine, &nodes, &[], opts).await;

    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert_eq!(starts_of(&events, "a"), 0);
    assert!(matches!(events.last(), Some(ProgressEvent::Error { .. })));

    let record = history.get_by_id("exec_cancel").await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn dropped_receiver_aborts_with_failed_record() {
    let (engine, history, _pool) = engine_with_store().await;
    let nodes = vec![node(
        "a",
        NodeType::Input,
        json!({"inputType": "multiple", "urls": []}),
    )];

    let (sink, rx) = ProgressSink::channel(4);
    drop(rx);
    let result = engine.execute(&nodes, &[], sink, options("exec_gone")).await;

    assert!(matches!(result, Err(EngineError::Transport)));
    let record = history.get_by_id("exec_gone").await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn teardown_fires_exactly_once_on_success_and_on_validation_failure() {
    let (engine, _history, _pool) = engine_with_store().await;

    let success_count = Arc::new(AtomicUsize::new(0));
    let counter = success_count.clone();
    let mut opts = options("exec_teardown_ok");
    opts.teardown = Some(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let nodes = vec![node(
        "a",
        NodeType::Input,
        json!({"inputType": "multiple", "urls": []}),
    )];
    let (result, _events) = run_graph(&engine, &nodes, &[], opts).await;
    result.unwrap();
    assert_eq!(success_count.load(Ordering::SeqCst), 1);

    let failure_count = Arc::new(AtomicUsize::new(0));
    let counter = failure_count.clone();
    let mut opts = options("exec_teardown_err");
    opts.teardown = Some(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    let (result, _events) = run_graph(&engine, &[], &[], opts).await;
    assert!(result.is_err());
    assert_eq!(failure_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn buffered_execution_returns_the_final_outcome() {
    let (engine, history, _pool) = engine_with_store().await;
    let nodes = vec![
        node("a", NodeType::Input, json!({"inputType": "single", "url": "https://seed"})),
        node("out", NodeType::Output, json!({})),
    ];
    let edges = vec![edge("e1", "a", "out")];

    let outcome = engine
        .execute_buffered(&nodes, &edges, options("exec_buffered"))
        .await
        .unwrap();

    assert_eq!(outcome.nodes_executed, 2);
    assert_eq!(outcome.results.len(), 1);

    let record = history.get_by_id("exec_buffered").await.unwrap().unwrap();
    assert_eq!(record.status, ExecutionStatus::Completed);
}
