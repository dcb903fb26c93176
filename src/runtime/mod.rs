/// Runtime Execution Layer
///
/// The workflow execution engine and its collaborators:
/// - Breadth-first FIFO scheduling over the validated graph
/// - Node operation handlers
/// - Progress event emission over bounded channels
/// - Durable execution history
/// - The crawl/extract spider client

// Scheduler and cancellation tracking
pub mod engine;

// Individual node operation handlers
pub mod executor;

// Progress event emission
pub mod events;

// Execution record store
pub mod history;

// Crawl/extraction client
pub mod spider;

// Re-export main types
pub use engine::{EngineError, ExecuteOptions, ExecutionEngine, ExecutionOutcome};
pub use events::{NodeLogger, ProgressSink, TransportClosed};
pub use history::ExecutionStore;
