/// Crawl and extraction client
///
/// Fetches a page with a crawler user agent, then extracts content either
/// through the Anthropic messages API (when an API key is configured) or a
/// regex fallback that pulls the title and links straight from the HTML.
/// The model is asked for JSON; the first {...} blob in its reply is parsed
/// and mapped per extraction type, with the raw text as a last resort.

use crate::workflow::types::ExtractionType;
use anyhow::{anyhow, Result};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

const CRAWLER_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; CrawlflowSpider/1.0; +https://crawlflow.dev/bot)";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_HTML_CHARS: usize = 50_000;

/// Spider configuration, sourced from the environment
#[derive(Debug, Clone)]
pub struct SpiderConfig {
    /// Anthropic API key; when absent the regex fallback is used
    pub api_key: Option<String>,
    /// Override for the API origin
    pub base_url: Option<String>,
    /// Model used for extraction calls
    pub model: String,
}

/// One crawl request: a url plus the extraction strategy
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub url: String,
    pub extraction: ExtractionType,
    pub structured_fields: Vec<String>,
    pub custom_prompt: Option<String>,
}

impl CrawlRequest {
    pub fn new(url: impl Into<String>, extraction: ExtractionType) -> Self {
        Self {
            url: url.into(),
            extraction,
            structured_fields: Vec::new(),
            custom_prompt: None,
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// HTTP client for crawling pages and extracting content
#[derive(Debug, Clone)]
pub struct SpiderClient {
    http: reqwest::Client,
    config: SpiderConfig,
}

impl SpiderClient {
    pub fn new(config: SpiderConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    /// Fetch one page and extract per the request's strategy
    ///
    /// Returns a record of the form `{url, ...extracted, metadata}`.
    pub async fn crawl(&self, request: &CrawlRequest) -> Result<Value> {
        let html = self.fetch_page(&request.url).await?;

        let extracted = if self.config.api_key.is_some() {
            self.extract_with_model(&html, request).await?
        } else {
            fallback_extract(&html, request.extraction)
        };

        let mut record = Map::new();
        record.insert("url".to_string(), json!(request.url));
        if let Value::Object(fields) = extracted {
            for (key, value) in fields {
                record.insert(key, value);
            }
        }
        record.insert(
            "metadata".to_string(),
            json!({
                "timestamp": Utc::now().to_rfc3339(),
                "depth": 0,
            }),
        );

        Ok(Value::Object(record))
    }

    async fn fetch_page(&self, url: &str) -> Result<String> {
        let response = self
            .http
            .get(url)
            .header("User-Agent", CRAWLER_USER_AGENT)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to fetch page {}: {}", url, e))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Failed to fetch page {}: HTTP {}",
                url,
                response.status()
            ));
        }

        response
            .text()
            .await
            .map_err(|e| anyhow!("Failed to read page body from {}: {}", url, e))
    }

    async fn extract_with_model(&self, html: &str, request: &CrawlRequest) -> Result<Value> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("Spider API key not configured"))?;
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com");

        let prompt = build_prompt(html, request);
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: 4096,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("Extraction request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("Extraction API error {}: {}", status, detail));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Invalid extraction API response: {}", e))?;

        let text: String = parsed
            .content
            .iter()
            .map(|block| block.text.as_str())
            .collect();
        if text.is_empty() {
            return Err(anyhow!("Empty extraction API response"));
        }

        Ok(parse_model_response(&text, request.extraction))
    }
}

/// Build the extraction prompt for one page
fn build_prompt(html: &str, request: &CrawlRequest) -> String {
    let truncated = truncate_chars(html, MAX_HTML_CHARS);
    let guard = "IMPORTANT: Extract information ONLY from the HTML content provided below. \
                 Do NOT use any tools or fetch additional resources.";

    if let Some(custom) = &request.custom_prompt {
        return format!(
            "{custom}\n\n{guard}\n\nHTML:\n{truncated}\n\n\
             Please provide the result in JSON format if applicable."
        );
    }

    match request.extraction {
        ExtractionType::Content => format!(
            "Extract the main content from this webpage. Focus on the title, main text, \
             and key information. Ignore navigation, ads, and boilerplate.\n\n{guard}\n\n\
             HTML:\n{truncated}\n\n\
             Please provide the result in JSON format:\n\
             {{\n  \"title\": \"page title\",\n  \"content\": \"main content text\"\n}}"
        ),
        ExtractionType::Structured => format!(
            "Extract structured data from this webpage. Extract the following fields: {}.\n\n\
             {guard}\n\nHTML:\n{truncated}\n\n\
             Please provide the result in JSON format with the requested fields.",
            request.structured_fields.join(", ")
        ),
        ExtractionType::Links => format!(
            "Analyze this webpage and extract all important links. Categorize them and \
             identify which ones are most relevant for further crawling.\n\n{guard}\n\n\
             HTML:\n{truncated}\n\n\
             Please provide the result in JSON format:\n\
             {{\n  \"links\": [\"url1\", \"url2\"],\n  \"analysis\": \"brief analysis of the links\"\n}}"
        ),
        ExtractionType::Analysis => format!(
            "Analyze this webpage and provide a comprehensive summary covering the main \
             topic, key information, content quality, and recommendations.\n\n{guard}\n\n\
             HTML:\n{truncated}\n\n\
             Please provide the result in JSON format:\n\
             {{\n  \"title\": \"page title\",\n  \"analysis\": \"comprehensive analysis\"\n}}"
        ),
    }
}

/// Map the model's reply onto the extraction-type record shape
///
/// The first `{...}` blob in the text is parsed as JSON; anything else
/// degrades to `{content: <raw text>}`.
fn parse_model_response(text: &str, extraction: ExtractionType) -> Value {
    let blob = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return json!({"content": text}),
    };

    let parsed: Value = match serde_json::from_str(blob) {
        Ok(value) => value,
        Err(_) => return json!({"content": text}),
    };

    match extraction {
        ExtractionType::Content => json!({
            "title": parsed.get("title").cloned().unwrap_or(Value::Null),
            "content": parsed.get("content").cloned().unwrap_or(Value::Null),
        }),
        ExtractionType::Structured => json!({"structuredData": parsed}),
        ExtractionType::Links => json!({
            "links": parsed.get("links").cloned().unwrap_or(json!([])),
            "analysis": parsed.get("analysis").cloned().unwrap_or(Value::Null),
        }),
        ExtractionType::Analysis => json!({
            "title": parsed.get("title").cloned().unwrap_or(Value::Null),
            "analysis": parsed.get("analysis").cloned().unwrap_or(Value::Null),
        }),
    }
}

/// Keyless extraction: pull the title and absolute links out of the HTML
fn fallback_extract(html: &str, extraction: ExtractionType) -> Value {
    let title = Regex::new(r"(?is)<title[^>]*>(.*?)</title>")
        .ok()
        .and_then(|re| re.captures(html))
        .map(|caps| caps[1].trim().to_string());

    match extraction {
        ExtractionType::Content => {
            let content = truncate_chars(&strip_tags(html), 2000).to_string();
            json!({"title": title, "content": content})
        }
        ExtractionType::Structured => json!({"structuredData": {"title": title}}),
        ExtractionType::Links => {
            let links: Vec<String> = Regex::new(r#"href="(https?://[^"]+)""#)
                .map(|re| {
                    re.captures_iter(html)
                        .map(|caps| caps[1].to_string())
                        .collect()
                })
                .unwrap_or_default();
            json!({"links": links})
        }
        ExtractionType::Analysis => json!({
            "title": title,
            "analysis": "No API key configured; model analysis unavailable.",
        }),
    }
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 4);
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_HTML: &str = r#"<html><head><title>Rust Weekly</title></head>
        <body><h1>Issue 42</h1><p>News about the language.</p>
        <a href="https://example.com/a">a</a>
        <a href="https://example.com/b">b</a>
        <a href="/relative">skip</a></body></html>"#;

    #[test]
    fn prompt_includes_structured_fields() {
        let mut request = CrawlRequest::new("https://example.com", ExtractionType::Structured);
        request.structured_fields = vec!["price".to_string(), "sku".to_string()];
        let prompt = build_prompt("<html></html>", &request);
        assert!(prompt.contains("price, sku"));
    }

    #[test]
    fn custom_prompt_wins_over_extraction_type() {
        let mut request = CrawlRequest::new("https://example.com", ExtractionType::Content);
        request.custom_prompt = Some("List every product name.".to_string());
        let prompt = build_prompt("<html></html>", &request);
        assert!(prompt.starts_with("List every product name."));
    }

    #[test]
    fn model_response_json_blob_is_extracted() {
        let reply = r#"Here is the result:
            {"title": "Rust Weekly", "content": "Issue 42"}
            Let me know if you need more."#;
        let parsed = parse_model_response(reply, ExtractionType::Content);
        assert_eq!(parsed["title"], "Rust Weekly");
        assert_eq!(parsed["content"], "Issue 42");
    }

    #[test]
    fn unparseable_reply_degrades_to_raw_content() {
        let parsed = parse_model_response("plain prose, no json", ExtractionType::Content);
        assert_eq!(parsed["content"], "plain prose, no json");
    }

    #[test]
    fn fallback_pulls_title_and_absolute_links() {
        let content = fallback_extract(SAMPLE_HTML, ExtractionType::Content);
        assert_eq!(content["title"], "Rust Weekly");

        let links = fallback_extract(SAMPLE_HTML, ExtractionType::Links);
        let links = links["links"].as_array().unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], "https://example.com/a");
    }
}
