/// Node operation implementations
///
/// One handler per node type, dispatched on the typed params variant. Every
/// handler gets the predecessor outputs plus a logger for intermediate
/// progress lines and returns a fresh output record. Handlers never touch
/// scheduling state; failures are plain errors for the engine to act on.

use crate::runtime::events::NodeLogger;
use crate::runtime::spider::{CrawlRequest, SpiderClient};
use crate::workflow::types::{
    AiAnalyzeParams, AiExtractParams, AiFilterParams, BatchCrawlParams, DataTransformParams,
    ExportParams, ExtractionType, FilterType, InputParams, InputType, NodeOutput, NodeParams,
    NodeSpec, OutputParams, SearchEngineParams,
};
use anyhow::Result;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Link discovery budget per crawled page
const LINKS_PER_PAGE: usize = 5;

/// Executes node operations against shared side-effect clients
#[derive(Debug, Clone)]
pub struct OperationRegistry {
    spider: Arc<SpiderClient>,
}

impl OperationRegistry {
    pub fn new(spider: Arc<SpiderClient>) -> Self {
        Self { spider }
    }

    /// Run one node's operation over its predecessor outputs
    pub async fn run(
        &self,
        node: &NodeSpec,
        inputs: &[NodeOutput],
        logger: &NodeLogger,
    ) -> Result<NodeOutput> {
        tracing::debug!("🚀 Running node operation: {} ({:?})", node.id, node.node_type);
        let start_time = std::time::Instant::now();

        let result = match &node.params {
            NodeParams::Input(params) => self.run_input(params, logger).await,
            NodeParams::AiExtract(params) => self.run_ai_extract(params, inputs, logger).await,
            NodeParams::AiAnalyze(params) => self.run_ai_analyze(params, inputs, logger).await,
            NodeParams::AiFilter(params) => self.run_ai_filter(params, inputs, logger).await,
            NodeParams::BatchCrawl(params) => self.run_batch_crawl(params, inputs, logger).await,
            NodeParams::SearchEngine(params) => self.run_search_engine(params, logger).await,
            NodeParams::DataTransform(params) => {
                self.run_data_transform(params, inputs, logger).await
            }
            NodeParams::Export(params) => self.run_export(params, inputs, logger).await,
            NodeParams::Output(params) => self.run_output(params, inputs).await,
        };

        match &result {
            Ok(_) => tracing::debug!(
                "✅ Node operation completed: {} in {:?}",
                node.id,
                start_time.elapsed()
            ),
            Err(e) => tracing::warn!("❌ Node operation failed: {} - {}", node.id, e),
        }

        result
    }

    /// Seed the graph with urls or a search query
    async fn run_input(&self, params: &InputParams, logger: &NodeLogger) -> Result<NodeOutput> {
        let (urls, search_query) = match params.input_type {
            InputType::Single => (
                params.url.iter().cloned().collect::<Vec<_>>(),
                None,
            ),
            InputType::Multiple => (params.urls.clone(), None),
            InputType::Search => (Vec::new(), params.search_query.clone()),
        };

        logger
            .info(format!("Seeding {} url(s)", urls.len()))
            .await?;

        let mut output = json!({"urls": urls});
        if let Some(query) = search_query {
            output["searchQuery"] = json!(query);
        }
        Ok(NodeOutput::new(output))
    }

    /// Crawl every input url and extract content
    ///
    /// Per-url failures are logged as warnings and skipped; the node only
    /// fails when something other than an individual crawl goes wrong.
    async fn run_ai_extract(
        &self,
        params: &AiExtractParams,
        inputs: &[NodeOutput],
        logger: &NodeLogger,
    ) -> Result<NodeOutput> {
        let urls: Vec<String> = inputs.iter().flat_map(|i| i.urls()).collect();
        logger
            .info(format!(
                "Extracting ({}) from {} url(s)",
                params.extraction_type.as_str(),
                urls.len()
            ))
            .await?;

        let mut results = Vec::new();
        let mut crawled_urls = Vec::new();
        for url in urls {
            let mut request = CrawlRequest::new(&url, params.extraction_type);
            request.structured_fields = params.structured_fields.clone();
            request.custom_prompt = params.custom_prompt.clone();

            match self.spider.crawl(&request).await {
                Ok(record) => {
                    logger.success(format!("Extracted {}", url)).await?;
                    crawled_urls.push(url);
                    results.push(record);
                }
                Err(e) => {
                    logger
                        .warning(format!("Skipping {}: {}", url, e))
                        .await?;
                }
            }
        }

        Ok(NodeOutput::new(json!({
            "results": results,
            "urls": crawled_urls,
        })))
    }

    /// Annotate each input result with an analysis field
    async fn run_ai_analyze(
        &self,
        params: &AiAnalyzeParams,
        inputs: &[NodeOutput],
        logger: &NodeLogger,
    ) -> Result<NodeOutput> {
        let results: Vec<Value> = inputs.iter().flat_map(|i| i.results()).collect();
        logger
            .info(format!(
                "Analyzing {} result(s) ({})",
                results.len(),
                params.analysis_type.as_str()
            ))
            .await?;

        let annotated: Vec<Value> = results
            .into_iter()
            .map(|mut record| {
                let note = match &params.custom_prompt {
                    Some(prompt) => format!("{} analysis: {}", params.analysis_type.as_str(), prompt),
                    None => format!("{} analysis", params.analysis_type.as_str()),
                };
                if let Value::Object(fields) = &mut record {
                    fields.insert("analysis".to_string(), json!(note));
                    record
                } else {
                    json!({"value": record, "analysis": note})
                }
            })
            .collect();

        Ok(NodeOutput::new(json!({"results": annotated})))
    }

    /// Keep only the input results that match the filter
    async fn run_ai_filter(
        &self,
        params: &AiFilterParams,
        inputs: &[NodeOutput],
        logger: &NodeLogger,
    ) -> Result<NodeOutput> {
        let results: Vec<Value> = inputs.iter().flat_map(|i| i.results()).collect();
        let total = results.len();

        let kept: Vec<Value> = match params.filter_type {
            FilterType::Keyword => {
                let keywords: Vec<String> =
                    params.keywords.iter().map(|k| k.to_lowercase()).collect();
                if keywords.is_empty() {
                    results
                } else {
                    results
                        .into_iter()
                        .filter(|record| {
                            let haystack = record.to_string().to_lowercase();
                            keywords.iter().any(|k| haystack.contains(k))
                        })
                        .collect()
                }
            }
            FilterType::Regex => match params.regex.as_deref().filter(|p| !p.is_empty()) {
                // No pattern behaves like the editor's match-all default
                None => results,
                Some(pattern) => {
                    let re = Regex::new(pattern)
                        .map_err(|e| anyhow::anyhow!("Invalid filter regex '{}': {}", pattern, e))?;
                    results
                        .into_iter()
                        .filter(|record| re.is_match(&record.to_string()))
                        .collect()
                }
            },
            FilterType::AiCondition => {
                // No model-side condition evaluation; fall back to containment
                // on the condition text so the node stays deterministic.
                match params.condition.as_deref() {
                    Some(condition) if !condition.is_empty() => {
                        let needle = condition.to_lowercase();
                        results
                            .into_iter()
                            .filter(|record| record.to_string().to_lowercase().contains(&needle))
                            .collect()
                    }
                    _ => results,
                }
            }
        };

        logger
            .info(format!("Kept {} of {} result(s)", kept.len(), total))
            .await?;

        Ok(NodeOutput::new(json!({
            "results": kept,
            "total": total,
        })))
    }

    /// Link-mode crawl over a bounded page and depth budget
    ///
    /// Seeds the queue with the input urls at depth 0; with followLinks set,
    /// discovered links (capped per page) are crawled one level deeper until
    /// maxDepth or maxPages is hit.
    async fn run_batch_crawl(
        &self,
        params: &BatchCrawlParams,
        inputs: &[NodeOutput],
        logger: &NodeLogger,
    ) -> Result<NodeOutput> {
        let mut queue: VecDeque<(String, u32)> = inputs
            .iter()
            .flat_map(|i| i.urls())
            .map(|url| (url, 0))
            .collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut results = Vec::new();

        logger
            .info(format!(
                "Batch crawl of up to {} page(s), depth {} from {} seed url(s)",
                params.max_pages,
                params.max_depth,
                queue.len()
            ))
            .await?;

        while let Some((url, depth)) = queue.pop_front() {
            if results.len() >= params.max_pages {
                break;
            }
            if !visited.insert(url.clone()) {
                continue;
            }

            let request = CrawlRequest::new(&url, ExtractionType::Links);
            match self.spider.crawl(&request).await {
                Ok(mut record) => {
                    if let Some(metadata) = record.get_mut("metadata") {
                        metadata["depth"] = json!(depth);
                    }
                    if params.follow_links {
                        queue_discovered_links(
                            &mut queue,
                            &visited,
                            &record,
                            depth,
                            params.max_depth,
                        );
                    }
                    logger
                        .success(format!("Crawled {} (depth {})", url, depth))
                        .await?;
                    results.push(record);
                }
                Err(e) => {
                    logger
                        .warning(format!("Skipping {}: {}", url, e))
                        .await?;
                }
            }
        }

        Ok(NodeOutput::new(json!({
            "results": results,
            "pagesCrawled": results.len(),
        })))
    }

    /// Search-engine seed; no provider is wired up, so the result set is empty
    async fn run_search_engine(
        &self,
        params: &SearchEngineParams,
        logger: &NodeLogger,
    ) -> Result<NodeOutput> {
        logger
            .warning(format!(
                "Search engine '{}' not configured; returning empty result set",
                params.search_engine
            ))
            .await?;

        Ok(NodeOutput::new(json!({
            "results": [],
            "searchQuery": params.query,
            "searchEngine": params.search_engine,
        })))
    }

    /// Reshape input results, optionally through a Lua script
    ///
    /// The script sees the input records as the global `data` array and its
    /// return value becomes the new results array.
    async fn run_data_transform(
        &self,
        params: &DataTransformParams,
        inputs: &[NodeOutput],
        logger: &NodeLogger,
    ) -> Result<NodeOutput> {
        let data: Vec<Value> = inputs.iter().flat_map(|i| i.results_or_self()).collect();

        let results = match params.transform_script.as_deref() {
            Some(script) if !script.trim().is_empty() => {
                logger
                    .info(format!("Transforming {} record(s) via script", data.len()))
                    .await?;
                run_lua_transform(script, &data)?
            }
            _ => {
                logger
                    .info(format!("Passing through {} record(s)", data.len()))
                    .await?;
                data
            }
        };

        Ok(NodeOutput::new(json!({"results": results})))
    }

    /// Wrap input results with export metadata
    async fn run_export(
        &self,
        params: &ExportParams,
        inputs: &[NodeOutput],
        logger: &NodeLogger,
    ) -> Result<NodeOutput> {
        let results: Vec<Value> = inputs.iter().flat_map(|i| i.results()).collect();
        logger
            .success(format!(
                "Exported {} result(s) as {}",
                results.len(),
                params.export_format
            ))
            .await?;

        let mut output = json!({
            "exported": true,
            "format": params.export_format,
            "count": results.len(),
            "results": results,
        });
        if let Some(filename) = &params.filename {
            output["filename"] = json!(filename);
        }
        Ok(NodeOutput::new(output))
    }

    /// Terminal node: collect whatever the predecessors produced
    async fn run_output(&self, params: &OutputParams, inputs: &[NodeOutput]) -> Result<NodeOutput> {
        let data: Vec<Value> = inputs.iter().flat_map(|i| i.results_or_self()).collect();
        Ok(NodeOutput::new(json!({
            "outputType": params.output_type,
            "data": data,
        })))
    }
}

/// Queue a crawled page's links one level deeper, within the depth bound
///
/// Nothing is queued once `depth` reaches `max_depth`; at most
/// [`LINKS_PER_PAGE`] unvisited links are taken from the record.
fn queue_discovered_links(
    queue: &mut VecDeque<(String, u32)>,
    visited: &HashSet<String>,
    record: &Value,
    depth: u32,
    max_depth: u32,
) {
    if depth >= max_depth {
        return;
    }
    if let Some(links) = record.get("links").and_then(Value::as_array) {
        for link in links.iter().take(LINKS_PER_PAGE) {
            if let Some(link) = link.as_str() {
                if !visited.contains(link) {
                    queue.push_back((link.to_string(), depth + 1));
                }
            }
        }
    }
}

/// Run a Lua transform script over the input records
///
/// The records are injected as the global `data` array; the script's return
/// value is converted back to JSON. A non-array return is wrapped so the
/// node always yields a results array.
fn run_lua_transform(script: &str, data: &[Value]) -> Result<Vec<Value>> {
    let lua = mlua::Lua::new();

    let mut lua_items = Vec::with_capacity(data.len());
    for item in data {
        lua_items.push(json_to_lua_string(item)?);
    }
    let setup_script = format!("data = {{{}}}", lua_items.join(", "));
    lua.load(&setup_script)
        .exec()
        .map_err(|e| anyhow::anyhow!("Failed to set up transform data: {}", e))?;

    let lua_result: mlua::Value = lua
        .load(script)
        .eval()
        .map_err(|e| anyhow::anyhow!("Transform script failed: {}", e))?;

    let json_result = lua_to_json(lua_result)?;
    Ok(match json_result {
        Value::Array(items) => items,
        other => vec![other],
    })
}

/// Render a JSON value as Lua table literal syntax
fn json_to_lua_string(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("nil".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(format!(
            "\"{}\"",
            s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
        )),
        Value::Array(arr) => {
            let mut lua_items = Vec::with_capacity(arr.len());
            for item in arr {
                lua_items.push(json_to_lua_string(item)?);
            }
            Ok(format!("{{{}}}", lua_items.join(", ")))
        }
        Value::Object(obj) => {
            let mut lua_pairs = Vec::with_capacity(obj.len());
            for (key, val) in obj {
                // Bracket notation keeps special characters in keys intact
                let lua_val = json_to_lua_string(val)?;
                lua_pairs.push(format!("[\"{}\"] = {}", key.replace('"', "\\\""), lua_val));
            }
            Ok(format!("{{{}}}", lua_pairs.join(", ")))
        }
    }
}

/// Convert a Lua value back to JSON
fn lua_to_json(lua_value: mlua::Value) -> Result<Value> {
    match lua_value {
        mlua::Value::Nil => Ok(Value::Null),
        mlua::Value::Boolean(b) => Ok(Value::Bool(b)),
        mlua::Value::Integer(i) => Ok(Value::Number(serde_json::Number::from(i))),
        mlua::Value::Number(f) => Ok(serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)),
        mlua::Value::String(s) => {
            let s_str = s
                .to_str()
                .map_err(|e| anyhow::anyhow!("Invalid UTF-8 in Lua string: {}", e))?;
            Ok(Value::String(s_str.to_string()))
        }
        mlua::Value::Table(table) => {
            // Tables with contiguous 1..n integer keys become JSON arrays
            let mut is_array = true;
            let mut max_index = 0;
            let mut count = 0;

            for pair in table.pairs::<mlua::Value, mlua::Value>() {
                let (key, _) =
                    pair.map_err(|e| anyhow::anyhow!("Failed to iterate Lua table: {}", e))?;
                count += 1;

                if let mlua::Value::Integer(i) = key {
                    if i > 0 {
                        max_index = max_index.max(i as usize);
                    } else {
                        is_array = false;
                        break;
                    }
                } else {
                    is_array = false;
                    break;
                }
            }

            if is_array && count > 0 && count == max_index {
                let mut arr = Vec::with_capacity(max_index);
                for i in 1..=max_index {
                    let val = table
                        .get(i)
                        .map_err(|e| anyhow::anyhow!("Failed to read Lua table entry: {}", e))?;
                    arr.push(lua_to_json(val)?);
                }
                Ok(Value::Array(arr))
            } else {
                let mut obj = serde_json::Map::new();
                for pair in table.pairs::<mlua::Value, mlua::Value>() {
                    let (key, value) =
                        pair.map_err(|e| anyhow::anyhow!("Failed to iterate Lua table: {}", e))?;
                    let key_str = match key {
                        mlua::Value::String(s) => s
                            .to_str()
                            .map_err(|e| anyhow::anyhow!("Invalid UTF-8 in Lua key: {}", e))?
                            .to_string(),
                        mlua::Value::Integer(i) => i.to_string(),
                        mlua::Value::Number(f) => f.to_string(),
                        _ => continue,
                    };
                    obj.insert(key_str, lua_to_json(value)?);
                }
                Ok(Value::Object(obj))
            }
        }
        _ => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::events::ProgressSink;
    use crate::runtime::history::ExecutionStore;
    use crate::runtime::spider::SpiderConfig;
    use crate::workflow::types::{NodeType, ProgressEvent};
    use sqlx::sqlite::SqlitePoolOptions;
    use tokio::sync::mpsc;

    async fn test_logger() -> (NodeLogger, mpsc::Receiver<ProgressEvent>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let history = ExecutionStore::new(pool);
        history.init_schema().await.unwrap();
        let (sink, rx) = ProgressSink::channel(64);
        let logger = NodeLogger::new(
            sink,
            history,
            "exec_test".to_string(),
            "n1".to_string(),
            "Node".to_string(),
        );
        (logger, rx)
    }

    fn registry() -> OperationRegistry {
        OperationRegistry::new(Arc::new(SpiderClient::new(SpiderConfig {
            api_key: None,
            base_url: None,
            model: "claude-sonnet-4-5".to_string(),
        })))
    }

    fn node(id: &str, node_type: NodeType, data: Value) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            node_type,
            label: id.to_string(),
            params: NodeParams::decode(node_type, &data).unwrap(),
        }
    }

    #[tokio::test]
    async fn input_node_seeds_urls() {
        let (logger, _rx) = test_logger().await;
        let spec = node(
            "seed",
            NodeType::Input,
            json!({"inputType": "multiple", "urls": ["https://a", "https://b"]}),
        );
        let output = registry().run(&spec, &[], &logger).await.unwrap();
        assert_eq!(output.urls(), vec!["https://a", "https://b"]);
    }

    #[tokio::test]
    async fn keyword_filter_keeps_matching_results() {
        let (logger, _rx) = test_logger().await;
        let spec = node(
            "filter",
            NodeType::AiFilter,
            json!({"filterType": "keyword", "keywords": ["rust"]}),
        );
        let input = NodeOutput::new(json!({"results": [
            {"title": "Rust 1.80 released"},
            {"title": "Cooking with cast iron"},
        ]}));
        let output = registry().run(&spec, &[input], &logger).await.unwrap();
        let results = output.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["title"], "Rust 1.80 released");
    }

    #[tokio::test]
    async fn regex_filter_without_pattern_keeps_everything() {
        let (logger, _rx) = test_logger().await;
        let spec = node("filter", NodeType::AiFilter, json!({"filterType": "regex"}));
        let input = NodeOutput::new(json!({"results": [
            {"title": "one"},
            {"title": "two"},
        ]}));
        let output = registry().run(&spec, &[input], &logger).await.unwrap();
        assert_eq!(output.results().len(), 2);
    }

    #[tokio::test]
    async fn invalid_regex_fails_the_node() {
        let (logger, _rx) = test_logger().await;
        let spec = node(
            "filter",
            NodeType::AiFilter,
            json!({"filterType": "regex", "regex": "("}),
        );
        let input = NodeOutput::new(json!({"results": [{"title": "x"}]}));
        let err = registry().run(&spec, &[input], &logger).await.unwrap_err();
        assert!(err.to_string().contains("Invalid filter regex"));
    }

    #[tokio::test]
    async fn lua_transform_reshapes_results() {
        let (logger, _rx) = test_logger().await;
        let script = r#"
            local out = {}
            for i, item in ipairs(data) do
                out[i] = { doubled = item["n"] * 2 }
            end
            return out
        "#;
        let spec = node(
            "transform",
            NodeType::DataTransform,
            json!({"transformScript": script}),
        );
        let input = NodeOutput::new(json!({"results": [{"n": 1}, {"n": 3}]}));
        let output = registry().run(&spec, &[input], &logger).await.unwrap();
        let results = output.results();
        assert_eq!(results, vec![json!({"doubled": 2}), json!({"doubled": 6})]);
    }

    #[tokio::test]
    async fn transform_without_script_passes_through() {
        let (logger, _rx) = test_logger().await;
        let spec = node("transform", NodeType::DataTransform, json!({}));
        let input = NodeOutput::new(json!({"results": [{"n": 1}]}));
        let output = registry().run(&spec, &[input], &logger).await.unwrap();
        assert_eq!(output.results(), vec![json!({"n": 1})]);
    }

    #[tokio::test]
    async fn output_node_accepts_bare_records() {
        let (logger, _rx) = test_logger().await;
        let spec = node("out", NodeType::Output, json!({"outputType": "api"}));
        let input = NodeOutput::new(json!({"urls": ["https://a"]}));
        let output = registry().run(&spec, &[input], &logger).await.unwrap();
        assert_eq!(output.as_value()["outputType"], "api");
        let data = output.as_value()["data"].as_array().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["urls"][0], "https://a");
    }

    #[test]
    fn discovered_links_respect_the_depth_bound() {
        let record = json!({"url": "https://a", "links": ["https://b", "https://c"]});
        let visited = HashSet::new();

        let mut queue = VecDeque::new();
        queue_discovered_links(&mut queue, &visited, &record, 0, 1);
        assert_eq!(
            queue,
            VecDeque::from([("https://b".to_string(), 1), ("https://c".to_string(), 1)])
        );

        // at max_depth the frontier stops growing
        let mut deeper = VecDeque::new();
        queue_discovered_links(&mut deeper, &visited, &record, 1, 1);
        assert!(deeper.is_empty());
    }

    #[test]
    fn discovered_links_skip_visited_and_cap_per_page() {
        let record = json!({"links": [
            "https://1", "https://2", "https://3", "https://4",
            "https://5", "https://6", "https://7",
        ]});
        let mut visited = HashSet::new();
        visited.insert("https://2".to_string());

        let mut queue = VecDeque::new();
        queue_discovered_links(&mut queue, &visited, &record, 0, 3);
        // 5 taken per page, one of them already visited
        assert_eq!(queue.len(), 4);
        assert!(queue.iter().all(|(_, depth)| *depth == 1));
    }

    #[test]
    fn json_lua_bridge_roundtrips_nested_values() {
        let value = json!({"a": [1, 2.5, "x"], "b": {"flag": true, "none": null}});
        let lua = mlua::Lua::new();
        let literal = json_to_lua_string(&value).unwrap();
        let evaluated: mlua::Value = lua.load(&format!("return {}", literal)).eval().unwrap();
        let back = lua_to_json(evaluated).unwrap();
        assert_eq!(back["a"], json!([1, 2.5, "x"]));
        assert_eq!(back["b"]["flag"], json!(true));
    }
}
