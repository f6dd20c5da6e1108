//! Tool Adapter framework
//!
//! Uniform wrappers around external capabilities behind the
//! [`ToolAdapter`] trait. Arguments are a tagged-variant enum checked
//! before dispatch; a mismatched or malformed variant never reaches an
//! adapter. The registry dispatches one round's calls concurrently, each
//! under a mandatory per-call timeout, and joins all results before the
//! caller continues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::agent::types::ToolCall;

/// Argument variant an adapter accepts. One per capability family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    Search,
    Finance,
    Knowledge,
    Message,
}

impl ArgKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Finance => "finance",
            Self::Knowledge => "knowledge",
            Self::Message => "message",
        }
    }

    /// Example JSON for the planning prompt.
    pub fn example(&self) -> Value {
        match self {
            Self::Search => serde_json::json!({"kind": "search", "query": "...", "max_results": 5}),
            Self::Finance => serde_json::json!({"kind": "finance", "symbol": "NVDA", "facets": ["price", "news"]}),
            Self::Knowledge => serde_json::json!({"kind": "knowledge", "query": "...", "top_k": 4}),
            Self::Message => serde_json::json!({"kind": "message", "channel_id": "...", "text": "..."}),
        }
    }
}

/// Facets of a financial lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinanceFacet {
    Price,
    Recommendations,
    Fundamentals,
    News,
}

/// Tagged-variant tool arguments. Replaces loosely-typed JSON bags: every
/// adapter names the variant it accepts and the registry checks it before
/// dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolArgs {
    Search {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_results: Option<usize>,
    },
    Finance {
        symbol: String,
        #[serde(default)]
        facets: Vec<FinanceFacet>,
    },
    Knowledge {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top_k: Option<usize>,
    },
    Message {
        channel_id: String,
        text: String,
    },
}

impl ToolArgs {
    pub fn kind(&self) -> ArgKind {
        match self {
            Self::Search { .. } => ArgKind::Search,
            Self::Finance { .. } => ArgKind::Finance,
            Self::Knowledge { .. } => ArgKind::Knowledge,
            Self::Message { .. } => ArgKind::Message,
        }
    }

    /// Content validation, applied before dispatch. Failures are permanent
    /// invocation errors; the provider is never contacted.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Search { query, max_results } => {
                if query.trim().is_empty() {
                    return Err("search query is empty".to_string());
                }
                if let Some(n) = max_results {
                    if *n == 0 || *n > 25 {
                        return Err(format!("max_results out of range: {}", n));
                    }
                }
            }
            Self::Finance { symbol, .. } => {
                if symbol.trim().is_empty() || symbol.len() > 12 {
                    return Err(format!("invalid ticker symbol: '{}'", symbol));
                }
            }
            Self::Knowledge { query, top_k } => {
                if query.trim().is_empty() {
                    return Err("knowledge query is empty".to_string());
                }
                if let Some(k) = top_k {
                    if *k == 0 || *k > 50 {
                        return Err(format!("top_k out of range: {}", k));
                    }
                }
            }
            Self::Message { channel_id, text } => {
                if channel_id.trim().is_empty() {
                    return Err("message channel_id is empty".to_string());
                }
                if text.trim().is_empty() {
                    return Err("message text is empty".to_string());
                }
            }
        }
        Ok(())
    }
}

/// Result payload of a capability invocation: raw text plus optional
/// structured fields and a source citation when available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), data: None, citation: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_citation(mut self, url: impl Into<String>) -> Self {
        self.citation = Some(url.into());
        self
    }
}

/// One external capability. Read-only adapters (search, finance,
/// knowledge) have no side effects; messaging is the exception.
/// Adapters never retry; transient provider errors go back to the caller.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Capability name (snake_case).
    fn name(&self) -> &str;

    /// The single argument variant this adapter accepts.
    fn accepts(&self) -> ArgKind;

    /// Human-readable description for the planning prompt.
    fn description(&self) -> &str;

    fn has_side_effects(&self) -> bool {
        false
    }

    async fn invoke(&self, args: ToolArgs) -> Result<ToolOutput>;
}

/// A tool call as the planner asked for it, arguments still unchecked.
#[derive(Debug, Clone, Deserialize)]
pub struct PlannedCall {
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

/// Tool registry: adapter lookup plus dispatch under timeouts.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolAdapter>>,
    /// Mandatory per-call timeout.
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self { tools: HashMap::new(), timeout }
    }

    pub fn register(&mut self, tool: Arc<dyn ToolAdapter>) {
        info!("Registered tool: {}", tool.name());
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolAdapter>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Catalog of the named tools for the planning prompt: name,
    /// description, argument example.
    pub fn prompt_catalog(&self, allowed: &[String]) -> String {
        let mut lines = Vec::new();
        for name in allowed {
            if let Some(tool) = self.tools.get(name) {
                lines.push(format!(
                    "- {}: {} Args example: {}",
                    tool.name(),
                    tool.description(),
                    tool.accepts().example()
                ));
            }
        }
        lines.join("\n")
    }

    /// Dispatch one round of planned calls.
    ///
    /// Unknown tools, wrong argument variants and invalid arguments are
    /// rejected before dispatch as permanent failures. Valid calls run
    /// concurrently, each bounded by the registry timeout; a timeout
    /// becomes a failed ToolCall, never an unbounded wait. All results are
    /// joined before returning, in planned order.
    pub async fn dispatch(&self, planned: Vec<PlannedCall>) -> Vec<ToolCall> {
        let timeout = self.timeout;

        let futures = planned.into_iter().map(|call| {
            let adapter = self.tools.get(&call.tool).cloned();
            async move {
                let Some(adapter) = adapter else {
                    return ToolCall::rejected(
                        &call.tool,
                        call.args,
                        format!("unknown tool: {}", call.tool),
                    );
                };

                let args: ToolArgs = match serde_json::from_value(call.args.clone()) {
                    Ok(args) => args,
                    Err(e) => {
                        return ToolCall::rejected(
                            &call.tool,
                            call.args,
                            format!("malformed arguments: {}", e),
                        );
                    }
                };

                if args.kind() != adapter.accepts() {
                    return ToolCall::rejected(
                        &call.tool,
                        call.args,
                        format!(
                            "argument variant '{}' not accepted by '{}'",
                            args.kind().as_str(),
                            call.tool
                        ),
                    );
                }

                if let Err(detail) = args.validate() {
                    return ToolCall::rejected(&call.tool, call.args, detail);
                }

                let start = Instant::now();
                debug!("dispatching {}", call.tool);
                match tokio::time::timeout(timeout, adapter.invoke(args.clone())).await {
                    Ok(Ok(output)) => ToolCall::succeeded(
                        &call.tool,
                        &args,
                        output,
                        start.elapsed().as_millis() as u64,
                    ),
                    Ok(Err(e)) => ToolCall::failed(
                        &call.tool,
                        &args,
                        e.to_string(),
                        start.elapsed().as_millis() as u64,
                    ),
                    Err(_) => ToolCall::timed_out(
                        &call.tool,
                        &args,
                        start.elapsed().as_millis() as u64,
                    ),
                }
            }
        });

        join_all(futures).await
    }
}

/// Extract the first balanced JSON object from text.
pub(crate) fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0;
    let mut end = start;

    for (i, c) in s[start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if end > start {
        Some(&s[start..end])
    } else {
        None
    }
}

/// Extract the first balanced JSON array from text.
pub(crate) fn extract_json_array(s: &str) -> Option<&str> {
    let start = s.find('[')?;
    let mut depth = 0;
    let mut end = start;

    for (i, c) in s[start..].char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    end = start + i + 1;
                    break;
                }
            }
            _ => {}
        }
    }

    if end > start {
        Some(&s[start..end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::ToolOutcome;

    struct EchoTool;

    #[async_trait]
    impl ToolAdapter for EchoTool {
        fn name(&self) -> &str {
            "search"
        }
        fn accepts(&self) -> ArgKind {
            ArgKind::Search
        }
        fn description(&self) -> &str {
            "Echo search queries"
        }
        async fn invoke(&self, args: ToolArgs) -> Result<ToolOutput> {
            match args {
                ToolArgs::Search { query, .. } => Ok(ToolOutput::text(format!("echo: {}", query))),
                _ => unreachable!("registry checks the variant"),
            }
        }
    }

    struct SlowTool;

    #[async_trait]
    impl ToolAdapter for SlowTool {
        fn name(&self) -> &str {
            "finance"
        }
        fn accepts(&self) -> ArgKind {
            ArgKind::Finance
        }
        fn description(&self) -> &str {
            "Never answers in time"
        }
        async fn invoke(&self, _args: ToolArgs) -> Result<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolOutput::text("too late"))
        }
    }

    fn registry(timeout_ms: u64) -> ToolRegistry {
        let mut registry = ToolRegistry::new(Duration::from_millis(timeout_ms));
        registry.register(Arc::new(EchoTool));
        registry.register(Arc::new(SlowTool));
        registry
    }

    #[test]
    fn test_args_tagged_serde() {
        let args: ToolArgs =
            serde_json::from_value(serde_json::json!({"kind": "search", "query": "rust"})).unwrap();
        assert_eq!(args.kind(), ArgKind::Search);

        let round = serde_json::to_value(&args).unwrap();
        assert_eq!(round["kind"], "search");
    }

    #[test]
    fn test_validate_rejects_empty_query() {
        let args = ToolArgs::Search { query: "   ".into(), max_results: None };
        assert!(args.validate().is_err());

        let args = ToolArgs::Message { channel_id: "c1".into(), text: "".into() };
        assert!(args.validate().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let registry = registry(1000);
        let calls = registry
            .dispatch(vec![PlannedCall {
                tool: "search".into(),
                args: serde_json::json!({"kind": "search", "query": "health trends"}),
            }])
            .await;

        assert_eq!(calls.len(), 1);
        match &calls[0].outcome {
            ToolOutcome::Success(out) => assert!(out.text.contains("health trends")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_rejects_unknown_tool() {
        let registry = registry(1000);
        let calls = registry
            .dispatch(vec![PlannedCall { tool: "nonexistent".into(), args: Value::Null }])
            .await;
        match &calls[0].outcome {
            ToolOutcome::Failed { detail, timed_out } => {
                assert!(detail.contains("unknown tool"));
                assert!(!timed_out);
            }
            _ => panic!("expected rejection"),
        }
        assert_eq!(calls[0].duration_ms, 0);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_variant_mismatch() {
        let registry = registry(1000);
        // Finance args aimed at the search tool: rejected before dispatch.
        let calls = registry
            .dispatch(vec![PlannedCall {
                tool: "search".into(),
                args: serde_json::json!({"kind": "finance", "symbol": "NVDA"}),
            }])
            .await;
        match &calls[0].outcome {
            ToolOutcome::Failed { detail, .. } => assert!(detail.contains("not accepted")),
            _ => panic!("expected rejection"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_timeout_recorded() {
        let registry = registry(50);
        let calls = registry
            .dispatch(vec![PlannedCall {
                tool: "finance".into(),
                args: serde_json::json!({"kind": "finance", "symbol": "NVDA"}),
            }])
            .await;
        match &calls[0].outcome {
            ToolOutcome::Failed { timed_out, .. } => assert!(timed_out),
            _ => panic!("expected timeout"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_preserves_order_and_isolates_failures() {
        let registry = registry(50);
        let calls = registry
            .dispatch(vec![
                PlannedCall {
                    tool: "search".into(),
                    args: serde_json::json!({"kind": "search", "query": "a"}),
                },
                PlannedCall {
                    tool: "finance".into(),
                    args: serde_json::json!({"kind": "finance", "symbol": "NVDA"}),
                },
                PlannedCall {
                    tool: "search".into(),
                    args: serde_json::json!({"kind": "search", "query": "b"}),
                },
            ])
            .await;

        assert_eq!(calls.len(), 3);
        assert!(calls[0].outcome.is_success());
        assert!(!calls[1].outcome.is_success());
        assert!(calls[2].outcome.is_success());
    }

    #[test]
    fn test_extract_json_helpers() {
        let text = "calls: [{\"tool\": \"search\"}] done";
        assert_eq!(extract_json_array(text), Some("[{\"tool\": \"search\"}]"));

        let text = "answer {\"answer\": \"hi\"} trailing";
        assert_eq!(extract_json_object(text), Some("{\"answer\": \"hi\"}"));

        assert_eq!(extract_json_array("no json"), None);
    }

    #[test]
    fn test_prompt_catalog_lists_allowed_only() {
        let registry = registry(1000);
        let catalog = registry.prompt_catalog(&["search".to_string()]);
        assert!(catalog.contains("search"));
        assert!(!catalog.contains("finance"));
    }
}
