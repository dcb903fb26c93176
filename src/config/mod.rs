/// Configuration management for the crawlflow engine
///
/// Server address, database location, and spider credentials, all sourced
/// from environment variables with container-friendly defaults.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Crawl/extraction client configuration
    pub spider: SpiderSettings,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding crawlflow.db (created on demand)
    pub data_dir: String,
}

/// Spider client settings
///
/// Without an API key the spider falls back to regex extraction, so the
/// server runs fine fully offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("CRAWLFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("CRAWLFLOW_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("CRAWLFLOW_DATA_DIR")
                    .unwrap_or_else(|_| "data".to_string()),
            },
            spider: SpiderSettings {
                api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                base_url: std::env::var("ANTHROPIC_BASE_URL").ok(),
                model: std::env::var("CRAWLFLOW_MODEL")
                    .unwrap_or_else(|_| "claude-sonnet-4-5".to_string()),
            },
        }
    }
}
