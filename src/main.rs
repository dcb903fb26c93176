/// Crawlflow: visual web-crawling workflow engine
///
/// Main entry point. Initializes configuration and starts the HTTP server
/// with workflow management and execution capabilities.

use crawlflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow management API at /api/workflows/*
/// - Execution and history API at /api/executions/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
