/// SQLite persistence for execution history
///
/// Two tables: execution_history holds one row per run, execution_logs the
/// append-only per-node log lines. Records are created when a run starts
/// and receive exactly one terminal update; log rows are never updated.
/// Timestamps are stored as RFC 3339 text.

use crate::workflow::types::{
    ExecutionLogEntry, ExecutionRecord, ExecutionStatus, LogLevel, LogType, NodeOutput,
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePool, Row};

/// Partial update applied on an execution's terminal transition
///
/// Only the fields that are `Some` are written, so a failed run can set
/// status/error/completedAt without touching results.
#[derive(Debug, Default)]
pub struct ExecutionUpdate {
    pub status: Option<ExecutionStatus>,
    pub completed_at: Option<DateTime<Utc>>,
    pub nodes_executed: Option<i64>,
    pub results: Option<Vec<NodeOutput>>,
    pub error: Option<String>,
}

/// SQLite-backed store for execution records and logs
#[derive(Debug, Clone)]
pub struct ExecutionStore {
    pool: SqlitePool,
}

impl ExecutionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the history schema
    ///
    /// Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_history (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                workflow_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                nodes_executed INTEGER NOT NULL DEFAULT 0,
                results JSON,
                error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_execution_history_workflow
            ON execution_history(workflow_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                node_name TEXT NOT NULL,
                log_type TEXT NOT NULL,
                message TEXT,
                level TEXT,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_execution_logs_execution
            ON execution_logs(execution_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a fresh execution record
    pub async fn create(&self, record: &ExecutionRecord) -> Result<()> {
        let results_json = match &record.results {
            Some(results) => Some(serde_json::to_string(results)?),
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO execution_history
                (id, workflow_id, workflow_name, status, started_at,
                 completed_at, nodes_executed, results, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.workflow_id)
        .bind(&record.workflow_name)
        .bind(record.status.as_str())
        .bind(record.started_at.to_rfc3339())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(record.nodes_executed)
        .bind(results_json)
        .bind(&record.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Apply a partial update to an execution record
    ///
    /// The SET clause is built from the populated fields only; a fully
    /// empty update is a no-op.
    pub async fn update(&self, id: &str, update: ExecutionUpdate) -> Result<()> {
        let mut sets: Vec<&str> = Vec::new();
        if update.status.is_some() {
            sets.push("status = ?");
        }
        if update.completed_at.is_some() {
            sets.push("completed_at = ?");
        }
        if update.nodes_executed.is_some() {
            sets.push("nodes_executed = ?");
        }
        if update.results.is_some() {
            sets.push("results = ?");
        }
        if update.error.is_some() {
            sets.push("error = ?");
        }
        if sets.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "UPDATE execution_history SET {} WHERE id = ?",
            sets.join(", ")
        );

        let mut query = sqlx::query(&sql);
        if let Some(status) = update.status {
            query = query.bind(status.as_str());
        }
        if let Some(completed_at) = update.completed_at {
            query = query.bind(completed_at.to_rfc3339());
        }
        if let Some(nodes_executed) = update.nodes_executed {
            query = query.bind(nodes_executed);
        }
        if let Some(results) = &update.results {
            query = query.bind(serde_json::to_string(results)?);
        }
        if let Some(error) = &update.error {
            query = query.bind(error.clone());
        }

        query.bind(id).execute(&self.pool).await?;
        Ok(())
    }

    /// Append one log line for an execution
    pub async fn append_log(
        &self,
        execution_id: &str,
        node_id: &str,
        node_name: &str,
        log_type: LogType,
        message: Option<&str>,
        level: Option<LogLevel>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs
                (execution_id, node_id, node_name, log_type, message, level, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution_id)
        .bind(node_id)
        .bind(node_name)
        .bind(log_type.as_str())
        .bind(message)
        .bind(level.map(|l| l.as_str()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent executions across all workflows
    pub async fn get_all(&self, limit: i64) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM execution_history ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_record).collect()
    }

    /// Most recent executions of one workflow
    pub async fn get_by_workflow(
        &self,
        workflow_id: &str,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM execution_history
            WHERE workflow_id = ?
            ORDER BY started_at DESC LIMIT ?
            "#,
        )
        .bind(workflow_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_record).collect()
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<ExecutionRecord>> {
        let row = sqlx::query("SELECT * FROM execution_history WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(map_record).transpose()
    }

    /// Log lines of one execution in append order
    pub async fn logs_for(&self, execution_id: &str) -> Result<Vec<ExecutionLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, node_id, node_name, log_type, message, level, timestamp
            FROM execution_logs
            WHERE execution_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_log_entry).collect()
    }

    /// Delete an execution and its logs
    pub async fn delete(&self, id: &str) -> Result<bool> {
        // Logs first so a record never points at orphaned rows
        sqlx::query("DELETE FROM execution_logs WHERE execution_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("DELETE FROM execution_history WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow!("invalid timestamp '{}': {}", raw, e))?
        .with_timezone(&Utc))
}

fn map_record(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionRecord> {
    let status_raw: String = row.get("status");
    let status = ExecutionStatus::parse(&status_raw)
        .ok_or_else(|| anyhow!("unknown execution status '{}'", status_raw))?;

    let started_at_raw: String = row.get("started_at");
    let completed_at_raw: Option<String> = row.get("completed_at");
    let results_raw: Option<String> = row.get("results");

    Ok(ExecutionRecord {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        workflow_name: row.get("workflow_name"),
        status,
        started_at: parse_timestamp(&started_at_raw)?,
        completed_at: completed_at_raw.as_deref().map(parse_timestamp).transpose()?,
        nodes_executed: row.get("nodes_executed"),
        results: results_raw
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        error: row.get("error"),
    })
}

fn map_log_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionLogEntry> {
    let log_type_raw: String = row.get("log_type");
    let log_type = LogType::parse(&log_type_raw)
        .ok_or_else(|| anyhow!("unknown log type '{}'", log_type_raw))?;

    let level_raw: Option<String> = row.get("level");
    let timestamp_raw: String = row.get("timestamp");

    Ok(ExecutionLogEntry {
        execution_id: row.get("execution_id"),
        node_id: row.get("node_id"),
        node_name: row.get("node_name"),
        log_type,
        message: row.get("message"),
        level: level_raw.as_deref().and_then(LogLevel::parse),
        timestamp: parse_timestamp(&timestamp_raw)?,
    })
}
