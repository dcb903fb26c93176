/// Crawlflow: visual web-crawling workflow engine
///
/// Executes node/edge graphs built in a visual editor: crawl, extract,
/// filter, transform, and aggregate, with live per-node progress streaming
/// and a durable execution history.

// Core configuration and setup
pub mod config;

// Workflow management layer - definitions, validation, storage, registry
pub mod workflow;

// Runtime execution layer - scheduler, operations, events, history
pub mod runtime;

// HTTP API layer - REST endpoints for workflows and executions
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use runtime::{ExecuteOptions, ExecutionEngine, ExecutionOutcome, ProgressSink};
pub use server::start_server;
pub use workflow::{NodeOutput, NodeType, ProgressEvent, Workflow, WorkflowEdge, WorkflowNode};
