/// Core workflow type definitions
///
/// Defines the structures for workflows, nodes, edges and execution records.
/// Nodes arrive from the visual editor as JSON with camelCase keys; the same
/// shapes are serialized back out for persistence and the progress stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A saved workflow definition: the node/edge graph plus editor metadata
///
/// Stored as a JSON document in SQLite and cached in the in-memory registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Unique workflow identifier (e.g. "wf_1705312200")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<WorkflowNode>,
    pub edges: Vec<WorkflowEdge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single node as submitted by the editor
///
/// `data` carries the display label plus type-specific parameters and is
/// decoded into a typed [`NodeParams`] variant at graph-build time, so the
/// scheduler and operations never touch untyped maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Unique node identifier within the workflow
    pub id: String,
    /// The node type, which selects the operation to run
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Canvas position, editor metadata only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Label plus type-specific parameters (see [`NodeParams`])
    #[serde(default)]
    pub data: Value,
}

/// Directed connection between two nodes
///
/// Only `source` and `target` affect execution order; the handle fields are
/// editor attachment metadata and pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEdge {
    pub id: String,
    /// Source node ID
    pub source: String,
    /// Target node ID
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

/// Node position on the editor canvas
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Available node types for the crawlflow engine
///
/// Each type maps to one operation in the registry:
/// - Input: seed URLs or a search query into the graph
/// - AiExtract: crawl each input URL and extract content via the spider
/// - AiAnalyze: annotate extracted results with an analysis
/// - AiFilter: keep results matching keywords or a regex
/// - BatchCrawl: link-mode crawl over a bounded page budget
/// - SearchEngine: search-query seed
/// - DataTransform: reshape results, optionally via a Lua script
/// - Export: wrap results with export metadata
/// - Output: terminal node; its result lands in the final payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeType {
    Input,
    AiExtract,
    AiAnalyze,
    AiFilter,
    BatchCrawl,
    SearchEngine,
    DataTransform,
    Export,
    Output,
}

/// Typed node parameters, one variant per [`NodeType`]
///
/// Decoded exactly once from the node's raw `data` object when the graph is
/// validated. Unknown keys (label, description, editor state) are ignored.
#[derive(Debug, Clone)]
pub enum NodeParams {
    Input(InputParams),
    AiExtract(AiExtractParams),
    AiAnalyze(AiAnalyzeParams),
    AiFilter(AiFilterParams),
    BatchCrawl(BatchCrawlParams),
    SearchEngine(SearchEngineParams),
    DataTransform(DataTransformParams),
    Export(ExportParams),
    Output(OutputParams),
}

impl NodeParams {
    /// Decode the editor's `data` object into the variant for `node_type`
    pub fn decode(node_type: NodeType, data: &Value) -> Result<Self, serde_json::Error> {
        // The editor may omit `data` entirely for freshly dropped nodes
        let data = if data.is_null() {
            Value::Object(Default::default())
        } else {
            data.clone()
        };

        Ok(match node_type {
            NodeType::Input => NodeParams::Input(serde_json::from_value(data)?),
            NodeType::AiExtract => NodeParams::AiExtract(serde_json::from_value(data)?),
            NodeType::AiAnalyze => NodeParams::AiAnalyze(serde_json::from_value(data)?),
            NodeType::AiFilter => NodeParams::AiFilter(serde_json::from_value(data)?),
            NodeType::BatchCrawl => NodeParams::BatchCrawl(serde_json::from_value(data)?),
            NodeType::SearchEngine => NodeParams::SearchEngine(serde_json::from_value(data)?),
            NodeType::DataTransform => NodeParams::DataTransform(serde_json::from_value(data)?),
            NodeType::Export => NodeParams::Export(serde_json::from_value(data)?),
            NodeType::Output => NodeParams::Output(serde_json::from_value(data)?),
        })
    }
}

/// A validated node: id, label and typed params, ready for the scheduler
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: String,
    pub node_type: NodeType,
    /// Display name, also used in progress events and log lines
    pub label: String,
    pub params: NodeParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    Single,
    Multiple,
    Search,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputParams {
    #[serde(default)]
    pub input_type: InputType,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub search_query: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionType {
    #[default]
    Content,
    Structured,
    Links,
    Analysis,
}

impl ExtractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionType::Content => "content",
            ExtractionType::Structured => "structured",
            ExtractionType::Links => "links",
            ExtractionType::Analysis => "analysis",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiExtractParams {
    #[serde(default)]
    pub extraction_type: ExtractionType,
    #[serde(default)]
    pub structured_fields: Vec<String>,
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    #[default]
    Summary,
    Sentiment,
    Classification,
    Custom,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Summary => "summary",
            AnalysisType::Sentiment => "sentiment",
            AnalysisType::Classification => "classification",
            AnalysisType::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalyzeParams {
    #[serde(default)]
    pub analysis_type: AnalysisType,
    #[serde(default)]
    pub custom_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterType {
    #[default]
    Keyword,
    AiCondition,
    Regex,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiFilterParams {
    #[serde(default)]
    pub filter_type: FilterType,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCrawlParams {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default)]
    pub follow_links: bool,
}

impl Default for BatchCrawlParams {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            follow_links: false,
        }
    }
}

fn default_max_depth() -> u32 {
    1
}

fn default_max_pages() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEngineParams {
    #[serde(default = "default_search_engine")]
    pub search_engine: String,
    #[serde(default)]
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchEngineParams {
    fn default() -> Self {
        Self {
            search_engine: default_search_engine(),
            query: String::new(),
            max_results: default_max_results(),
        }
    }
}

fn default_search_engine() -> String {
    "google".to_string()
}

fn default_max_results() -> usize {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformType {
    #[default]
    Map,
    Filter,
    Reduce,
    Custom,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTransformParams {
    #[serde(default)]
    pub transform_type: TransformType,
    /// Lua script run over the `data` array of input results
    #[serde(default)]
    pub transform_script: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportParams {
    #[serde(default = "default_export_format")]
    pub export_format: String,
    #[serde(default)]
    pub filename: Option<String>,
}

impl Default for ExportParams {
    fn default() -> Self {
        Self {
            export_format: default_export_format(),
            filename: None,
        }
    }
}

fn default_export_format() -> String {
    "json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputParams {
    #[serde(default = "default_output_type")]
    pub output_type: String,
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            output_type: default_output_type(),
        }
    }
}

fn default_output_type() -> String {
    "display".to_string()
}

/// Opaque, type-tagged record produced by running a node's operation
///
/// Produced once when a node finishes, stored for the lifetime of the
/// execution and read (never mutated) by all of the node's successors.
/// The accessors mirror how successors consume upstream data: absent
/// fields simply contribute nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeOutput(pub Value);

impl NodeOutput {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// The `urls` array of this output, empty when absent
    pub fn urls(&self) -> Vec<String> {
        self.0
            .get("urls")
            .and_then(Value::as_array)
            .map(|urls| {
                urls.iter()
                    .filter_map(|u| u.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The `results` array of this output, empty when absent
    pub fn results(&self) -> Vec<Value> {
        self.0
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    /// The `results` array, or the whole record when there is none
    ///
    /// Output nodes accept both shapes so they can sit downstream of any
    /// node type.
    pub fn results_or_self(&self) -> Vec<Value> {
        match self.0.get("results").and_then(Value::as_array) {
            Some(results) => results.clone(),
            None => vec![self.0.clone()],
        }
    }
}

/// Severity of an intermediate log line emitted by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(LogLevel::Info),
            "success" => Some(LogLevel::Success),
            "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Kind of a persisted execution log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    NodeStart,
    NodeComplete,
    NodeError,
    Log,
}

impl LogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::NodeStart => "node_start",
            LogType::NodeComplete => "node_complete",
            LogType::NodeError => "node_error",
            LogType::Log => "log",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "node_start" => Some(LogType::NodeStart),
            "node_complete" => Some(LogType::NodeComplete),
            "node_error" => Some(LogType::NodeError),
            "log" => Some(LogType::Log),
            _ => None,
        }
    }
}

/// One frame of the live execution stream
///
/// Frames for a node always appear as node_start, then any number of log
/// frames, then node_complete or node_error. A successful run ends with
/// `complete`; validation failures, transport loss and cancellation end
/// with the fatal `error` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    #[serde(rename_all = "camelCase")]
    NodeStart {
        node_id: String,
        node_name: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Log {
        node_id: String,
        node_name: String,
        message: String,
        level: LogLevel,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    NodeComplete {
        node_id: String,
        node_name: String,
        result: NodeOutput,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    NodeError {
        node_id: String,
        node_name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        results: Vec<NodeOutput>,
        nodes_executed: usize,
        timestamp: DateTime<Utc>,
    },
    /// Fatal frame: validation failure, transport loss or cancellation
    Error { error: String },
}

/// Lifecycle status of one workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }
}

/// Durable summary of one workflow run
///
/// Created when the scheduler starts (status `running`) and updated exactly
/// once more on the terminal transition. Never deleted by the engine itself;
/// deletion is an administrative API operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub nodes_executed: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<NodeOutput>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Append-only log line owned by the execution record store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub execution_id: String,
    pub node_id: String,
    pub node_name: String,
    pub log_type: LogType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    pub timestamp: DateTime<Utc>,
}
