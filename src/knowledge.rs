//! Knowledge Retriever
//!
//! Retrieval-augmented context over ingested reference documents. Sources
//! are fetched through the [`DocumentFetcher`] boundary, split into chunks,
//! embedded, and held in an exact in-memory index. Queries return top-k
//! chunks by cosine similarity with deterministic tie-breaks by ingestion
//! order. Chunks are immutable: re-ingesting a source invalidates its old
//! chunks and creates new ones.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::AgentError;

/// Target chunk size, chars. Paragraphs are packed up to this bound.
const CHUNK_TARGET_CHARS: usize = 800;

/// A unit of ingested reference text. Immutable after creation.
#[derive(Debug, Clone)]
pub struct KnowledgeChunk {
    /// Stable id derived from source id and chunk index.
    pub id: String,
    /// Source identifier (URL or document id).
    pub source_id: String,
    /// Global ingestion sequence number. Tie-break key for ranking.
    pub seq: u64,
    /// Chunk text.
    pub text: String,
    /// Embedding vector, dimension fixed by the configured embedder.
    pub embedding: Vec<f32>,
}

/// A chunk scored against a query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: KnowledgeChunk,
    pub score: f32,
}

/// Document fetch boundary: URL in, raw text out.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// HTTP document fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client
            .get(url)
            .send()
            .await
            .context("Failed to fetch document")?;

        if !response.status().is_success() {
            anyhow::bail!("document fetch failed: {}", response.status());
        }

        let text = response.text().await.context("Failed to read document body")?;
        Ok(text)
    }
}

/// Split raw text into chunks of roughly [`CHUNK_TARGET_CHARS`] chars.
///
/// Paragraphs are packed greedily; an oversized paragraph is split on
/// sentence boundaries, and as a last resort on char boundaries.
/// Deterministic for a given input.
pub fn chunk_text(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if paragraph.chars().count() > CHUNK_TARGET_CHARS {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(split_long_paragraph(paragraph));
            continue;
        }

        if current.chars().count() + paragraph.chars().count() > CHUNK_TARGET_CHARS
            && !current.is_empty()
        {
            chunks.push(std::mem::take(&mut current));
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn split_long_paragraph(paragraph: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();

    for sentence in paragraph.split_inclusive(['.', '!', '?']) {
        if current.chars().count() + sentence.chars().count() > CHUNK_TARGET_CHARS
            && !current.is_empty()
        {
            parts.push(std::mem::take(&mut current));
        }

        // A single sentence over the bound gets hard-split on char counts.
        if sentence.chars().count() > CHUNK_TARGET_CHARS {
            let mut rest = sentence;
            while !rest.is_empty() {
                let head = crate::format::truncate_chars(rest, CHUNK_TARGET_CHARS);
                parts.push(head.trim().to_string());
                rest = &rest[head.len()..];
            }
            continue;
        }

        current.push_str(sentence);
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts.into_iter().map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
}

fn chunk_id(source_id: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b":");
    hasher.update(index.to_le_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Similarity index over ingested documents.
pub struct KnowledgeRetriever {
    fetcher: Arc<dyn DocumentFetcher>,
    embedder: Arc<dyn Embedder>,
    index: RwLock<Vec<KnowledgeChunk>>,
    next_seq: AtomicU64,
    /// Per-query timeout for the embedding call.
    query_timeout: Duration,
}

impl KnowledgeRetriever {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            fetcher,
            embedder,
            index: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            query_timeout: Duration::from_secs(20),
        }
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Ingest one source: fetch, chunk, embed, index.
    ///
    /// Returns the number of chunks added. Re-ingesting a source id
    /// invalidates its previous chunks. Embedding happens before the index
    /// is touched, so a mid-ingestion failure leaves other sources intact
    /// and never leaves this source half-indexed.
    pub async fn ingest(&self, source_id: &str) -> Result<usize, AgentError> {
        let ingestion_err = |detail: String| AgentError::Ingestion {
            source_id: source_id.to_string(),
            detail,
        };

        let raw = self.fetcher
            .fetch(source_id)
            .await
            .map_err(|e| ingestion_err(e.to_string()))?;

        let pieces = chunk_text(&raw);
        if pieces.is_empty() {
            return Err(ingestion_err("document produced no text chunks".to_string()));
        }

        let expected_dim = self.embedder.dimension();
        let mut embedded = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.iter().enumerate() {
            let embedding = self.embedder
                .embed(piece)
                .await
                .map_err(|e| ingestion_err(format!("embedding chunk {}: {}", i, e)))?;

            if embedding.len() != expected_dim {
                return Err(ingestion_err(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    expected_dim,
                    embedding.len()
                )));
            }

            embedded.push((piece.clone(), embedding));
        }

        self.invalidate(source_id);

        let mut index = self.index.write();
        for (i, (text, embedding)) in embedded.into_iter().enumerate() {
            index.push(KnowledgeChunk {
                id: chunk_id(source_id, i),
                source_id: source_id.to_string(),
                seq: self.next_seq.fetch_add(1, AtomicOrdering::Relaxed),
                text,
                embedding,
            });
        }

        let added = pieces.len();
        info!("ingested '{}': {} chunks", source_id, added);
        Ok(added)
    }

    /// Ingest several sources with partial-failure isolation: one failing
    /// source never blocks or corrupts the others.
    pub async fn ingest_all(&self, sources: &[String]) -> Vec<(String, Result<usize, AgentError>)> {
        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            let result = self.ingest(source).await;
            if let Err(e) = &result {
                warn!("{}", e);
            }
            results.push((source.clone(), result));
        }
        results
    }

    /// Top-k chunks by cosine similarity, ties broken by ingestion order
    /// (earliest first). Deterministic given an unchanged index.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>, AgentError> {
        if k == 0 || self.index.read().is_empty() {
            return Ok(Vec::new());
        }

        let embed = tokio::time::timeout(self.query_timeout, self.embedder.embed(text));
        let query_embedding = match embed.await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                return Err(AgentError::tool_transient("knowledge", e.to_string()));
            }
            Err(_) => {
                return Err(AgentError::Timeout {
                    tool: "knowledge".to_string(),
                    seconds: self.query_timeout.as_secs(),
                });
            }
        };

        let index = self.index.read();
        let mut scored: Vec<ScoredChunk> = index
            .iter()
            .map(|chunk| ScoredChunk {
                score: cosine_similarity(&query_embedding, &chunk.embedding),
                chunk: chunk.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk.seq.cmp(&b.chunk.seq))
        });
        scored.truncate(k);

        debug!("query matched {} chunks", scored.len());
        Ok(scored)
    }

    /// Remove every chunk of a source. Subsequent queries never return them.
    pub fn invalidate(&self, source_id: &str) {
        let mut index = self.index.write();
        let before = index.len();
        index.retain(|chunk| chunk.source_id != source_id);
        let removed = before - index.len();
        if removed > 0 {
            info!("invalidated '{}': {} chunks removed", source_id, removed);
        }
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Distinct source ids currently indexed.
    pub fn sources(&self) -> Vec<String> {
        let index = self.index.read();
        let mut sources: Vec<String> = index.iter().map(|c| c.source_id.clone()).collect();
        sources.dedup();
        sources.sort();
        sources.dedup();
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_text_packs_paragraphs() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("First"));
        assert!(chunks[0].contains("Third"));
    }

    #[test]
    fn test_chunk_text_splits_at_target() {
        let paragraph = "word ".repeat(50);
        let text = vec![paragraph; 10].join("\n\n");
        let chunks = chunk_text(&text);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= CHUNK_TARGET_CHARS + 2);
        }
    }

    #[test]
    fn test_chunk_text_handles_oversized_sentence() {
        let text = "a".repeat(CHUNK_TARGET_CHARS * 3);
        let chunks = chunk_text(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_text_empty() {
        assert!(chunk_text("").is_empty());
        assert!(chunk_text("\n\n\n\n").is_empty());
    }

    #[test]
    fn test_chunk_id_stable() {
        assert_eq!(chunk_id("doc", 0), chunk_id("doc", 0));
        assert_ne!(chunk_id("doc", 0), chunk_id("doc", 1));
        assert_ne!(chunk_id("doc", 0), chunk_id("other", 0));
    }
}
