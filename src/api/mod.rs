/// HTTP API Layer
///
/// REST endpoints for workflow management and execution:
/// - Workflow CRUD with registry hot-reload
/// - Ad-hoc and saved-workflow execution (buffered and SSE)
/// - Execution history, logs, and cancellation

// Workflow management endpoints (POST/GET/PUT/DELETE + execute)
pub mod workflows;

// Execution, history and cancellation endpoints
pub mod executions;

// Re-export router builders
pub use executions::create_execution_routes;
pub use workflows::{create_workflow_routes, AppState};

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;

/// Boundary error: a status plus a `{error, details?}` JSON body
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({"error": self.message});
        if let Some(details) = self.details {
            body["details"] = json!(details);
        }
        (self.status, Json(body)).into_response()
    }
}
