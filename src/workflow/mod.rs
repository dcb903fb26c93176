/// Workflow Management Layer
///
/// Workflow definitions, validation, persistence, and the hot-reload
/// registry:
/// - Type definitions (Workflow, WorkflowNode, WorkflowEdge, NodeParams)
/// - Graph building and validation
/// - SQLite persistence with sqlx
/// - Lock-free hot-reload registry using ArcSwap

// Core workflow type definitions
pub mod types;

// Graph building and validation
pub mod graph;

// SQLite persistence layer for workflow storage
pub mod storage;

// Hot-reload registry using ArcSwap for zero-downtime updates
pub mod registry;

// Re-export commonly used types
pub use graph::{GraphError, ValidatedGraph};
pub use types::{NodeOutput, NodeType, ProgressEvent, Workflow, WorkflowEdge, WorkflowNode};
