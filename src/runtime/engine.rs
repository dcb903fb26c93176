/// Workflow execution engine
///
/// Drives a validated graph breadth-first: a FIFO ready queue seeded with
/// the start nodes, where a node becomes ready only once every predecessor
/// has completed. Execution is sequential and fail-fast; progress frames go
/// out through the sink before their matching history writes, and history
/// writes are always best-effort.

use crate::runtime::events::{NodeLogger, ProgressSink, TransportClosed};
use crate::runtime::executor::OperationRegistry;
use crate::runtime::history::{ExecutionStore, ExecutionUpdate};
use crate::workflow::graph::{GraphError, ValidatedGraph};
use crate::workflow::types::{
    ExecutionRecord, ExecutionStatus, LogType, NodeOutput, NodeType, ProgressEvent, WorkflowEdge,
    WorkflowNode,
};
use chrono::Utc;
use petgraph::graph::NodeIndex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Why an execution did not reach completion
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("node '{node}' failed: {message}")]
    Operation { node: String, message: String },

    #[error("progress stream receiver dropped")]
    Transport,

    #[error("execution cancelled")]
    Cancelled,
}

/// Per-run options injected by the caller
pub struct ExecuteOptions {
    /// Execution id minted by the caller (see [`mint_execution_id`])
    pub execution_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    /// Cooperative cancellation, checked between nodes
    pub cancel: CancellationToken,
    /// Invoked exactly once on every exit path
    pub teardown: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ExecuteOptions {
    /// Options for an ad-hoc run of an unsaved graph
    pub fn ad_hoc(execution_id: String) -> Self {
        Self {
            execution_id,
            workflow_id: "temp".to_string(),
            workflow_name: "Unsaved Workflow".to_string(),
            cancel: CancellationToken::new(),
            teardown: None,
        }
    }
}

/// Terminal summary of a successful run
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub execution_id: String,
    /// Outputs of output-type nodes in completion order
    pub results: Vec<NodeOutput>,
    pub nodes_executed: usize,
}

/// Mint a fresh execution id
pub fn mint_execution_id() -> String {
    format!("exec_{}", Uuid::new_v4())
}

/// Cancellation tokens of in-flight executions, keyed by execution id
#[derive(Debug, Clone, Default)]
pub struct RunningExecutions {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl RunningExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and get its cancellation token
    pub fn register(&self, execution_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.inner
            .lock()
            .expect("running executions lock poisoned")
            .insert(execution_id.to_string(), token.clone());
        token
    }

    /// Cancel a run; false when the id is unknown or already finished
    pub fn cancel(&self, execution_id: &str) -> bool {
        let guard = self
            .inner
            .lock()
            .expect("running executions lock poisoned");
        match guard.get(execution_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, execution_id: &str) {
        self.inner
            .lock()
            .expect("running executions lock poisoned")
            .remove(execution_id);
    }
}

/// Executes workflow graphs and records their history
#[derive(Clone)]
pub struct ExecutionEngine {
    registry: OperationRegistry,
    history: ExecutionStore,
}

impl ExecutionEngine {
    pub fn new(registry: OperationRegistry, history: ExecutionStore) -> Self {
        Self { registry, history }
    }

    /// Execute a node/edge graph, streaming progress into `sink`
    ///
    /// The teardown hook in the options fires exactly once, whatever the
    /// exit path.
    pub async fn execute(
        &self,
        nodes: &[WorkflowNode],
        edges: &[WorkflowEdge],
        sink: ProgressSink,
        mut options: ExecuteOptions,
    ) -> Result<ExecutionOutcome, EngineError> {
        let teardown = options.teardown.take();
        let result = self.run(nodes, edges, sink, &options).await;
        if let Some(teardown) = teardown {
            teardown();
        }
        result
    }

    async fn run(
        &self,
        nodes: &[WorkflowNode],
        edges: &[WorkflowEdge],
        sink: ProgressSink,
        options: &ExecuteOptions,
    ) -> Result<ExecutionOutcome, EngineError> {
        let execution_id = options.execution_id.as_str();
        tracing::info!(
            "🚀 Starting execution {} of workflow '{}' ({} nodes, {} edges)",
            execution_id,
            options.workflow_id,
            nodes.len(),
            edges.len()
        );

        // Validation failures produce no record, just the fatal frame
        let graph = match ValidatedGraph::build(nodes, edges) {
            Ok(graph) => graph,
            Err(e) => {
                tracing::warn!("❌ Graph validation failed for {}: {}", execution_id, e);
                let _ = sink
                    .emit(ProgressEvent::Error {
                        error: e.to_string(),
                    })
                    .await;
                return Err(e.into());
            }
        };

        let started_at = Utc::now();
        let record = ExecutionRecord {
            id: execution_id.to_string(),
            workflow_id: options.workflow_id.clone(),
            workflow_name: options.workflow_name.clone(),
            status: ExecutionStatus::Running,
            started_at,
            completed_at: None,
            nodes_executed: 0,
            results: None,
            error: None,
        };
        if let Err(e) = self.history.create(&record).await {
            tracing::warn!("⚠️ Failed to create execution record {}: {}", execution_id, e);
        }

        let mut queue: VecDeque<NodeIndex> = graph.start_nodes().iter().copied().collect();
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut outputs: HashMap<NodeIndex, NodeOutput> = HashMap::new();
        let mut results: Vec<NodeOutput> = Vec::new();
        let mut nodes_executed = 0usize;

        while let Some(index) = queue.pop_front() {
            if visited.contains(&index) {
                continue;
            }

            if options.cancel.is_cancelled() {
                tracing::info!("🛑 Execution {} cancelled", execution_id);
                self.finish_record(
                    execution_id,
                    ExecutionStatus::Cancelled,
                    nodes_executed,
                    None,
                    Some("Execution cancelled".to_string()),
                )
                .await;
                let _ = sink
                    .emit(ProgressEvent::Error {
                        error: "Execution cancelled".to_string(),
                    })
                    .await;
                return Err(EngineError::Cancelled);
            }

            let node = graph.node(index).clone();

            if sink
                .emit(ProgressEvent::NodeStart {
                    node_id: node.id.clone(),
                    node_name: node.label.clone(),
                    timestamp: Utc::now(),
                })
                .await
                .is_err()
            {
                return self.abort_transport(execution_id, nodes_executed).await;
            }
            self.append_log(execution_id, &node.id, &node.label, LogType::NodeStart, None)
                .await;

            let inputs: Vec<NodeOutput> = graph
                .predecessors(index)
                .into_iter()
                .filter_map(|p| outputs.get(&p).cloned())
                .collect();

            let logger = NodeLogger::new(
                sink.clone(),
                self.history.clone(),
                execution_id.to_string(),
                node.id.clone(),
                node.label.clone(),
            );

            // The operation runs in its own task so a panic is trapped and
            // handled like any other node failure.
            let registry = self.registry.clone();
            let task_node = node.clone();
            let task_inputs = inputs.clone();
            let task_logger = logger.clone();
            let joined = tokio::spawn(async move {
                registry.run(&task_node, &task_inputs, &task_logger).await
            })
            .await;

            let op_result = match joined {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    Err(anyhow::anyhow!("operation panicked"))
                }
                Err(e) => Err(anyhow::anyhow!("operation task failed: {}", e)),
            };

            match op_result {
                Ok(output) => {
                    visited.insert(index);
                    nodes_executed += 1;
                    if node.node_type == NodeType::Output {
                        results.push(output.clone());
                    }

                    if sink
                        .emit(ProgressEvent::NodeComplete {
                            node_id: node.id.clone(),
                            node_name: node.label.clone(),
                            result: output.clone(),
                            timestamp: Utc::now(),
                        })
                        .await
                        .is_err()
                    {
                        return self.abort_transport(execution_id, nodes_executed).await;
                    }
                    self.append_log(
                        execution_id,
                        &node.id,
                        &node.label,
                        LogType::NodeComplete,
                        None,
                    )
                    .await;

                    outputs.insert(index, output);

                    for successor in graph.successors(index) {
                        let ready = !visited.contains(&successor)
                            && graph
                                .predecessors(successor)
                                .iter()
                                .all(|p| visited.contains(p));
                        if ready {
                            queue.push_back(successor);
                        }
                    }
                }
                Err(e) => {
                    if e.downcast_ref::<TransportClosed>().is_some() {
                        return self.abort_transport(execution_id, nodes_executed).await;
                    }

                    let message = e.to_string();
                    tracing::warn!(
                        "❌ Node '{}' failed in execution {}: {}",
                        node.id,
                        execution_id,
                        message
                    );

                    let _ = sink
                        .emit(ProgressEvent::NodeError {
                            node_id: node.id.clone(),
                            node_name: node.label.clone(),
                            error: message.clone(),
                            timestamp: Utc::now(),
                        })
                        .await;
                    self.append_log(
                        execution_id,
                        &node.id,
                        &node.label,
                        LogType::NodeError,
                        Some(&message),
                    )
                    .await;
                    self.finish_record(
                        execution_id,
                        ExecutionStatus::Failed,
                        nodes_executed,
                        None,
                        Some(message.clone()),
                    )
                    .await;

                    return Err(EngineError::Operation {
                        node: node.id,
                        message,
                    });
                }
            }
        }

        self.finish_record(
            execution_id,
            ExecutionStatus::Completed,
            nodes_executed,
            Some(results.clone()),
            None,
        )
        .await;

        if sink
            .emit(ProgressEvent::Complete {
                results: results.clone(),
                nodes_executed,
                timestamp: Utc::now(),
            })
            .await
            .is_err()
        {
            return Err(EngineError::Transport);
        }

        tracing::info!(
            "🎉 Execution {} completed: {} node(s) executed, {} result(s)",
            execution_id,
            nodes_executed,
            results.len()
        );

        Ok(ExecutionOutcome {
            execution_id: execution_id.to_string(),
            results,
            nodes_executed,
        })
    }

    /// Buffered execution: drain the progress stream internally
    ///
    /// The streaming path is the single execution path; this adapter just
    /// consumes the frames nobody asked to see.
    pub async fn execute_buffered(
        &self,
        nodes: &[WorkflowNode],
        edges: &[WorkflowEdge],
        options: ExecuteOptions,
    ) -> Result<ExecutionOutcome, EngineError> {
        let (sink, mut rx) = ProgressSink::channel(256);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let result = self.execute(nodes, edges, sink, options).await;
        let _ = drain.await;
        result
    }

    async fn abort_transport(
        &self,
        execution_id: &str,
        nodes_executed: usize,
    ) -> Result<ExecutionOutcome, EngineError> {
        tracing::warn!(
            "⚠️ Progress stream closed; aborting execution {}",
            execution_id
        );
        self.finish_record(
            execution_id,
            ExecutionStatus::Failed,
            nodes_executed,
            None,
            Some("Progress stream closed".to_string()),
        )
        .await;
        Err(EngineError::Transport)
    }

    async fn finish_record(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        nodes_executed: usize,
        results: Option<Vec<NodeOutput>>,
        error: Option<String>,
    ) {
        let update = ExecutionUpdate {
            status: Some(status),
            completed_at: Some(Utc::now()),
            nodes_executed: Some(nodes_executed as i64),
            results,
            error,
        };
        if let Err(e) = self.history.update(execution_id, update).await {
            tracing::warn!(
                "⚠️ Failed to update execution record {}: {}",
                execution_id,
                e
            );
        }
    }

    async fn append_log(
        &self,
        execution_id: &str,
        node_id: &str,
        node_name: &str,
        log_type: LogType,
        message: Option<&str>,
    ) {
        if let Err(e) = self
            .history
            .append_log(execution_id, node_id, node_name, log_type, message, None)
            .await
        {
            tracing::warn!("⚠️ Failed to persist execution log: {}", e);
        }
    }
}
