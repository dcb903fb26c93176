/// Server setup and initialization
///
/// Wires together all components: storage, registry, history, spider,
/// execution engine, and the HTTP routes. Provides the application factory
/// function used by both main and the integration tests.

use crate::{
    api::{create_execution_routes, create_workflow_routes, AppState},
    config::Config,
    runtime::{
        engine::{ExecutionEngine, RunningExecutions},
        executor::OperationRegistry,
        history::ExecutionStore,
        spider::{SpiderClient, SpiderConfig},
    },
    workflow::{registry::WorkflowRegistry, storage::WorkflowStorage},
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    tracing::info!("🗄️ Opening SQLite database");
    let db_path = format!("{}/crawlflow.db", config.database.data_dir);
    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    tracing::info!("📋 Initializing workflow storage");
    let storage = WorkflowStorage::new(pool.clone());
    storage.init_schema().await?;

    tracing::info!("🗂️ Initializing execution history store");
    let history = ExecutionStore::new(pool);
    history.init_schema().await?;

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(storage.clone()));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    tracing::info!("🕷️ Initializing spider client");
    if config.spider.api_key.is_none() {
        tracing::warn!("No API key configured; spider will use regex fallback extraction");
    }
    let spider = Arc::new(SpiderClient::new(SpiderConfig {
        api_key: config.spider.api_key.clone(),
        base_url: config.spider.base_url.clone(),
        model: config.spider.model.clone(),
    }));

    tracing::info!("🚀 Initializing execution engine");
    let operations = OperationRegistry::new(spider.clone());
    let engine = Arc::new(ExecutionEngine::new(operations, history.clone()));

    let app_state = AppState {
        storage,
        registry,
        history,
        engine,
        spider,
        running: RunningExecutions::new(),
    };

    tracing::info!("📡 Creating HTTP router");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes().with_state(app_state.clone()))
        .merge(create_execution_routes().with_state(app_state));

    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting crawlflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
