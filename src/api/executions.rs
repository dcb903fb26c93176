/// Execution REST API endpoints
///
/// Ad-hoc graph execution (buffered and SSE), cancellation, the execution
/// history surface, and a direct single-url crawl that bypasses the graph
/// machinery. Streaming responses carry the minted execution id in the
/// `x-execution-id` header so clients can cancel.

use crate::{
    api::{workflows::AppState, ApiError},
    runtime::engine::{mint_execution_id, EngineError, ExecuteOptions},
    runtime::events::ProgressSink,
    runtime::spider::CrawlRequest,
    workflow::types::{ExtractionType, WorkflowEdge, WorkflowNode},
};
use axum::{
    extract::{Path, Query, State},
    http::HeaderValue,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;

/// Request body for ad-hoc execution: the raw graph from the editor
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub workflow_id: Option<String>,
}

/// Request body for a direct single-url crawl
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlApiRequest {
    pub url: String,
    #[serde(default)]
    pub extraction_type: ExtractionType,
    #[serde(default)]
    pub structured_fields: Vec<String>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

/// Create execution and history routes
pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/executions", post(execute_buffered).get(list_executions))
        .route("/api/executions/stream", post(execute_stream))
        .route("/api/executions/{id}", get(get_execution).delete(delete_execution))
        .route("/api/executions/{id}/logs", get(get_execution_logs))
        .route("/api/executions/{id}/cancel", post(cancel_execution))
        .route("/api/crawl", post(crawl_url))
}

/// Crawl one url directly, without building a workflow
///
/// POST /api/crawl
/// Body: { "url": "...", "extractionType": "content" }
async fn crawl_url(
    State(state): State<AppState>,
    Json(payload): Json<CrawlApiRequest>,
) -> Result<Json<Value>, ApiError> {
    if payload.url.is_empty() {
        return Err(ApiError::bad_request("A url is required"));
    }

    let mut request = CrawlRequest::new(&payload.url, payload.extraction_type);
    request.structured_fields = payload.structured_fields;
    request.custom_prompt = payload.custom_prompt;

    match state.spider.crawl(&request).await {
        Ok(record) => Ok(Json(record)),
        Err(e) => Err(ApiError::internal("Failed to crawl").with_details(e.to_string())),
    }
}

/// Execute an ad-hoc graph and return only the final outcome
///
/// POST /api/executions
/// Body: { "nodes": [...], "edges": [...] }
async fn execute_buffered(
    State(state): State<AppState>,
    Json(payload): Json<ExecuteRequest>,
) -> Result<Json<Value>, ApiError> {
    let execution_id = mint_execution_id();
    let cancel = state.running.register(&execution_id);

    let running = state.running.clone();
    let teardown_id = execution_id.clone();
    let mut options = ExecuteOptions::ad_hoc(execution_id.clone());
    options.cancel = cancel;
    options.teardown = Some(Box::new(move || running.remove(&teardown_id)));

    match state
        .engine
        .execute_buffered(&payload.nodes, &payload.edges, options)
        .await
    {
        Ok(outcome) => Ok(Json(json!({
            "success": true,
            "executionId": outcome.execution_id,
            "results": outcome.results,
            "nodesExecuted": outcome.nodes_executed,
        }))),
        Err(EngineError::Graph(e)) => {
            Err(ApiError::bad_request("Invalid workflow graph").with_details(e.to_string()))
        }
        Err(EngineError::Operation { node, message }) => Err(ApiError::internal(format!(
            "Node '{}' failed",
            node
        ))
        .with_details(message)),
        Err(e) => Err(ApiError::internal("Execution failed").with_details(e.to_string())),
    }
}

/// Execute an ad-hoc graph with SSE progress
///
/// POST /api/executions/stream
async fn execute_stream(
    State(state): State<AppState>,
    Json(payload): Json<ExecuteRequest>,
) -> Response {
    spawn_streaming_execution(
        &state,
        payload.nodes,
        payload.edges,
        "temp".to_string(),
        "Unsaved Workflow".to_string(),
    )
}

/// Cancel an in-flight execution
///
/// POST /api/executions/{id}/cancel
async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.running.cancel(&id) {
        tracing::info!("🛑 Cancellation requested for execution {}", id);
        Ok(Json(json!({"success": true})))
    } else {
        Err(ApiError::not_found(format!(
            "Execution '{}' is not running",
            id
        )))
    }
}

/// List recent executions, optionally scoped to one workflow
///
/// GET /api/executions?limit=&workflowId=
async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(50);

    let records = match query.workflow_id {
        Some(workflow_id) => state.history.get_by_workflow(&workflow_id, limit).await,
        None => state.history.get_all(limit).await,
    };

    match records {
        Ok(executions) => Ok(Json(json!({"executions": executions}))),
        Err(e) => {
            tracing::error!("Failed to list executions: {}", e);
            Err(ApiError::internal("Failed to list executions"))
        }
    }
}

/// GET /api/executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.history.get_by_id(&id).await {
        Ok(Some(record)) => Ok(Json(json!(record))),
        Ok(None) => Err(ApiError::not_found(format!("Execution '{}' not found", id))),
        Err(e) => {
            tracing::error!("Failed to load execution {}: {}", id, e);
            Err(ApiError::internal("Failed to load execution"))
        }
    }
}

/// GET /api/executions/{id}/logs
async fn get_execution_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.history.logs_for(&id).await {
        Ok(logs) => Ok(Json(json!({"logs": logs}))),
        Err(e) => {
            tracing::error!("Failed to load execution logs for {}: {}", id, e);
            Err(ApiError::internal("Failed to load execution logs"))
        }
    }
}

/// DELETE /api/executions/{id}
async fn delete_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.history.delete(&id).await {
        Ok(true) => Ok(Json(json!({"message": "Execution deleted successfully"}))),
        Ok(false) => Err(ApiError::not_found(format!("Execution '{}' not found", id))),
        Err(e) => {
            tracing::error!("Failed to delete execution {}: {}", id, e);
            Err(ApiError::internal("Failed to delete execution"))
        }
    }
}

/// Spawn an execution and return its progress stream as SSE
///
/// The engine runs in a background task; dropping the response (client
/// disconnect) closes the channel and the run aborts on its next emit.
pub(crate) fn spawn_streaming_execution(
    state: &AppState,
    nodes: Vec<WorkflowNode>,
    edges: Vec<WorkflowEdge>,
    workflow_id: String,
    workflow_name: String,
) -> Response {
    let execution_id = mint_execution_id();
    let cancel = state.running.register(&execution_id);
    let (sink, rx) = ProgressSink::channel(256);

    let running = state.running.clone();
    let teardown_id = execution_id.clone();
    let options = ExecuteOptions {
        execution_id: execution_id.clone(),
        workflow_id,
        workflow_name,
        cancel,
        teardown: Some(Box::new(move || running.remove(&teardown_id))),
    };

    let engine = state.engine.clone();
    let spawned_id = execution_id.clone();
    tokio::spawn(async move {
        if let Err(e) = engine.execute(&nodes, &edges, sink, options).await {
            tracing::debug!("Execution {} did not complete: {}", spawned_id, e);
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| Event::default().json_data(&event));
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&execution_id) {
        response.headers_mut().insert("x-execution-id", value);
    }
    response
}
