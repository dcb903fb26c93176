/// Workflow management REST API endpoints
///
/// CRUD for workflow definitions with registry hot-reload, plus streaming
/// execution of saved workflows. All changes are immediately visible to the
/// execution path through the ArcSwap registry.

use crate::{
    api::{executions::spawn_streaming_execution, ApiError},
    runtime::{
        engine::ExecutionEngine, engine::RunningExecutions, history::ExecutionStore,
        spider::SpiderClient,
    },
    workflow::{registry::WorkflowRegistry, storage::WorkflowStorage, types::Workflow},
};
use axum::{
    extract::{Path, State},
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Workflow storage for persistence
    pub storage: WorkflowStorage,
    /// Hot-reload registry of saved workflows
    pub registry: Arc<WorkflowRegistry>,
    /// Execution history store
    pub history: ExecutionStore,
    /// Workflow execution engine
    pub engine: Arc<ExecutionEngine>,
    /// Crawl/extraction client, shared with the engine's operations
    pub spider: Arc<SpiderClient>,
    /// Cancellation tokens of in-flight executions
    pub running: RunningExecutions,
}

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation and update
#[derive(Debug, Deserialize)]
pub struct SaveWorkflowRequest {
    pub workflow: Workflow,
}

/// Request body for saving a workflow copy as a template
#[derive(Debug, Deserialize)]
pub struct SaveTemplateRequest {
    pub workflow: Workflow,
    pub category: String,
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route(
            "/api/workflows/{id}/execute/stream",
            post(execute_workflow_stream),
        )
        .route("/api/templates", get(list_templates).post(save_template))
}

/// Create a new workflow
///
/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...], "edges": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<SaveWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let workflow = payload.workflow;

    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(ApiError::bad_request("Workflow id and name are required"));
    }

    match state.storage.get_workflow(&workflow.id).await {
        Ok(Some(_)) => {
            return Err(ApiError::conflict(format!(
                "Workflow '{}' already exists",
                workflow.id
            )))
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Failed to check workflow existence: {}", e);
            return Err(ApiError::internal("Failed to save workflow"));
        }
    }

    save_and_reload(&state, &workflow).await?;
    tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' created successfully", workflow.name),
    }))
}

/// List all workflows
///
/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match state.storage.list_workflows().await {
        Ok(workflows) => Ok(Json(json!({ "workflows": workflows }))),
        Err(e) => {
            tracing::error!("Failed to list workflows: {}", e);
            Err(ApiError::internal("Failed to list workflows"))
        }
    }
}

/// Get a specific workflow by ID
///
/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    match state.storage.get_workflow(&id).await {
        Ok(Some(workflow)) => Ok(Json(workflow)),
        Ok(None) => Err(ApiError::not_found(format!("Workflow '{}' not found", id))),
        Err(e) => {
            tracing::error!("Failed to get workflow {}: {}", id, e);
            Err(ApiError::internal("Failed to load workflow"))
        }
    }
}

/// Update an existing workflow
///
/// PUT /api/workflows/{id}
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SaveWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();

    if workflow.name.is_empty() {
        return Err(ApiError::bad_request("Workflow name is required"));
    }

    match state.storage.get_workflow(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(ApiError::not_found(format!("Workflow '{}' not found", id))),
        Err(e) => {
            tracing::error!("Failed to check workflow existence: {}", e);
            return Err(ApiError::internal("Failed to update workflow"));
        }
    }

    save_and_reload(&state, &workflow).await?;
    tracing::info!("🔥 Hot-reloaded workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' updated successfully", workflow.name),
    }))
}

/// Delete a workflow
///
/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.registry.remove_workflow(&id);

    match state.storage.delete_workflow(&id).await {
        Ok(true) => {
            tracing::info!("Deleted workflow: {}", id);
            Ok(Json(json!({ "message": "Workflow deleted successfully" })))
        }
        Ok(false) => Err(ApiError::not_found(format!("Workflow '{}' not found", id))),
        Err(e) => {
            tracing::error!("Failed to delete workflow: {}", e);
            Err(ApiError::internal("Failed to delete workflow"))
        }
    }
}

/// Execute a saved workflow with SSE progress
///
/// POST /api/workflows/{id}/execute/stream
/// The execution id is returned in the `x-execution-id` response header.
async fn execute_workflow_stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let entry = state
        .registry
        .get_workflow(&id)
        .ok_or_else(|| ApiError::not_found(format!("Workflow '{}' not found", id)))?;

    Ok(spawn_streaming_execution(
        &state,
        entry.workflow.nodes,
        entry.workflow.edges,
        entry.workflow.id,
        entry.workflow.name,
    ))
}

/// List workflow templates grouped by category
///
/// GET /api/templates
async fn list_templates(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match state.storage.list_templates().await {
        Ok(templates) => Ok(Json(json!({ "templates": templates }))),
        Err(e) => {
            tracing::error!("Failed to list templates: {}", e);
            Err(ApiError::internal("Failed to list templates"))
        }
    }
}

/// Save a workflow copy as a template
///
/// POST /api/templates
/// Body: { "workflow": {...}, "category": "news" }
/// Templates live in storage only; they never enter the hot-reload registry.
async fn save_template(
    State(state): State<AppState>,
    Json(payload): Json<SaveTemplateRequest>,
) -> Result<Json<Value>, ApiError> {
    let workflow = payload.workflow;

    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(ApiError::bad_request("Template id and name are required"));
    }

    match state
        .storage
        .save_as_template(&workflow, &payload.category)
        .await
    {
        Ok(()) => {
            tracing::info!(
                "📦 Saved template: {} ({}) in category '{}'",
                workflow.id,
                workflow.name,
                payload.category
            );
            Ok(Json(json!({"success": true})))
        }
        Err(e) => {
            tracing::error!("Failed to save template: {}", e);
            Err(ApiError::internal("Failed to save template"))
        }
    }
}

async fn save_and_reload(state: &AppState, workflow: &Workflow) -> Result<(), ApiError> {
    if let Err(e) = state.storage.save_workflow(workflow).await {
        tracing::error!("Failed to save workflow: {}", e);
        return Err(ApiError::internal("Failed to save workflow"));
    }

    if let Err(e) = state.registry.reload_workflow(&workflow.id).await {
        tracing::error!("Failed to reload workflow into registry: {}", e);
        return Err(ApiError::internal("Failed to reload workflow"));
    }

    Ok(())
}
