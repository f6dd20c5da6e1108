//! Document query adapter
//!
//! Exposes the Knowledge Retriever to the agent loop as a regular tool:
//! the planner asks for `knowledge` queries the same way it asks for web
//! searches, and gets back the top matching chunks with their sources.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::agent::tools::{ArgKind, ToolAdapter, ToolArgs, ToolOutput};
use crate::knowledge::KnowledgeRetriever;

const DEFAULT_TOP_K: usize = 4;

pub struct KnowledgeTool {
    retriever: Arc<KnowledgeRetriever>,
}

impl KnowledgeTool {
    pub fn new(retriever: Arc<KnowledgeRetriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl ToolAdapter for KnowledgeTool {
    fn name(&self) -> &str {
        "knowledge"
    }

    fn accepts(&self) -> ArgKind {
        ArgKind::Knowledge
    }

    fn description(&self) -> &str {
        "Search the ingested reference documents for passages relevant to a query."
    }

    async fn invoke(&self, args: ToolArgs) -> Result<ToolOutput> {
        let ToolArgs::Knowledge { query, top_k } = args else {
            anyhow::bail!("knowledge adapter received a non-knowledge argument variant");
        };
        let top_k = top_k.unwrap_or(DEFAULT_TOP_K);

        let scored = self
            .retriever
            .query(&query, top_k)
            .await
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;

        if scored.is_empty() {
            return Ok(ToolOutput::text(format!(
                "No reference passages matched '{}'",
                query
            )));
        }

        let text = scored
            .iter()
            .map(|s| format!("[{}] {}", s.chunk.source_id, s.chunk.text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let data = serde_json::json!(scored
            .iter()
            .map(|s| serde_json::json!({"source": s.chunk.source_id, "score": s.score}))
            .collect::<Vec<_>>());

        let citation = scored
            .iter()
            .map(|s| s.chunk.source_id.as_str())
            .find(|source| source.starts_with("http"))
            .map(str::to_string);

        let mut output = ToolOutput::text(text).with_data(data);
        if let Some(citation) = citation {
            output = output.with_citation(citation);
        }
        Ok(output)
    }
}
