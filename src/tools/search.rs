//! Web search adapter
//!
//! Instant-answer style JSON endpoint (DuckDuckGo-compatible). Read-only,
//! no side effects; transient provider errors go back to the caller
//! unretried.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::agent::tools::{ArgKind, ToolAdapter, ToolArgs, ToolOutput};

const DEFAULT_MAX_RESULTS: usize = 5;

/// One search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub text: String,
    pub url: Option<String>,
}

pub struct WebSearchTool {
    client: reqwest::Client,
    base_url: String,
}

impl WebSearchTool {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url: base_url.trim_end_matches('/').to_string() }
    }
}

/// Pull hits out of an instant-answer response: the abstract first, then
/// related topics, nested topic groups flattened.
pub(crate) fn parse_hits(body: &Value, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();

    let abstract_text = body.get("AbstractText").and_then(|v| v.as_str()).unwrap_or("");
    if !abstract_text.is_empty() {
        hits.push(SearchHit {
            text: abstract_text.to_string(),
            url: body.get("AbstractURL").and_then(|v| v.as_str()).map(str::to_string),
        });
    }

    fn collect(topics: &Value, hits: &mut Vec<SearchHit>, max_results: usize) {
        let Some(items) = topics.as_array() else { return };
        for item in items {
            if hits.len() >= max_results {
                return;
            }
            if let Some(nested) = item.get("Topics") {
                collect(nested, hits, max_results);
                continue;
            }
            if let Some(text) = item.get("Text").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    hits.push(SearchHit {
                        text: text.to_string(),
                        url: item.get("FirstURL").and_then(|v| v.as_str()).map(str::to_string),
                    });
                }
            }
        }
    }

    if let Some(related) = body.get("RelatedTopics") {
        collect(related, &mut hits, max_results);
    }

    hits.truncate(max_results);
    hits
}

fn render_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| match &hit.url {
            Some(url) => format!("- {} ({})", hit.text, url),
            None => format!("- {}", hit.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl ToolAdapter for WebSearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn accepts(&self) -> ArgKind {
        ArgKind::Search
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns a headline list with source links."
    }

    async fn invoke(&self, args: ToolArgs) -> Result<ToolOutput> {
        let ToolArgs::Search { query, max_results } = args else {
            anyhow::bail!("search adapter received a non-search argument variant");
        };
        let max_results = max_results.unwrap_or(DEFAULT_MAX_RESULTS);

        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[("q", query.as_str()), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .context("Failed to send search request")?;

        if !response.status().is_success() {
            anyhow::bail!("search provider error: {}", response.status());
        }

        let body: Value = response.json().await.context("Failed to parse search response")?;
        let hits = parse_hits(&body, max_results);

        if hits.is_empty() {
            return Ok(ToolOutput::text(format!("No results for '{}'", query)));
        }

        let citation = hits.iter().find_map(|h| h.url.clone());
        let data = serde_json::json!(hits
            .iter()
            .map(|h| serde_json::json!({"text": h.text, "url": h.url}))
            .collect::<Vec<_>>());

        let mut output = ToolOutput::text(render_hits(&hits)).with_data(data);
        if let Some(citation) = citation {
            output = output.with_citation(citation);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hits_abstract_and_topics() {
        let body = serde_json::json!({
            "AbstractText": "Intermittent fasting is an eating pattern.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Intermittent_fasting",
            "RelatedTopics": [
                {"Text": "Fasting benefits", "FirstURL": "https://example.com/1"},
                {"Topics": [
                    {"Text": "Nested topic", "FirstURL": "https://example.com/2"}
                ]},
                {"Text": "No URL topic"}
            ]
        });

        let hits = parse_hits(&body, 10);
        assert_eq!(hits.len(), 4);
        assert!(hits[0].text.contains("Intermittent"));
        assert_eq!(hits[1].url.as_deref(), Some("https://example.com/1"));
        assert_eq!(hits[2].text, "Nested topic");
        assert!(hits[3].url.is_none());
    }

    #[test]
    fn test_parse_hits_respects_cap() {
        let topics: Vec<Value> = (0..20)
            .map(|i| serde_json::json!({"Text": format!("t{}", i), "FirstURL": "https://e.com"}))
            .collect();
        let body = serde_json::json!({"RelatedTopics": topics});

        assert_eq!(parse_hits(&body, 5).len(), 5);
    }

    #[test]
    fn test_render_hits_bullets_with_citations() {
        let hits = vec![
            SearchHit { text: "A".into(), url: Some("https://a".into()) },
            SearchHit { text: "B".into(), url: None },
        ];
        let rendered = render_hits(&hits);
        assert!(rendered.contains("- A (https://a)"));
        assert!(rendered.contains("- B"));
    }
}
