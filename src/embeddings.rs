//! Embedding provider boundary
//!
//! Text goes in, a fixed-length vector comes out. The HTTP implementation
//! targets an Ollama-style embeddings API; the [`Embedder`] trait keeps the
//! Knowledge Retriever independent of the concrete provider. Query
//! embeddings are cached (bounded LRU with TTL) to reduce latency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;

/// Embedding provider: text to fixed-length vector.
///
/// All vectors from one provider instance share a dimension; the Knowledge
/// Retriever enforces that invariant at ingestion.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Dimensionality of every vector this provider produces.
    fn dimension(&self) -> usize;
}

/// Embedder configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Provider base URL (Ollama-style API).
    pub base_url: String,
    /// Embedding model name.
    pub model: String,
    /// Embedding dimension (depends on model).
    pub dimension: usize,
    /// Request timeout.
    pub timeout: Duration,
}

/// Get embedding dimension for known models
fn model_dimension(model: &str) -> usize {
    match model {
        "mxbai-embed-large" => 1024,
        "snowflake-arctic-embed" | "snowflake-arctic-embed-m" => 768,
        "nomic-embed-text" => 768,
        "all-minilm" | "all-minilm-l6-v2" => 384,
        "bge-large" | "bge-large-en" => 1024,
        "bge-base" | "bge-base-en" => 768,
        _ => 768, // Default fallback
    }
}

impl EmbeddingConfig {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            model: model.to_string(),
            dimension: model_dimension(model),
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP embedder with a bounded query cache.
pub struct HttpEmbedder {
    config: EmbeddingConfig,
    client: reqwest::Client,
    available: AtomicBool,
    /// LRU cache for embeddings (max 1000 entries, 1 hour TTL)
    cache: Cache<String, Vec<f32>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to create HTTP client");

        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(3600))
            .build();

        Self {
            config,
            client,
            available: AtomicBool::new(true),
            cache,
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Cache hit/miss counters.
    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.cache_hits.load(Ordering::Relaxed),
            self.cache_misses.load(Ordering::Relaxed),
        )
    }

    /// Probe the provider. Cached result is consulted before every request.
    pub async fn check_availability(&self) -> bool {
        match self.client
            .get(format!("{}/api/tags", self.config.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(resp) => {
                let available = resp.status().is_success();
                self.available.store(available, Ordering::Relaxed);
                available
            }
            Err(_) => {
                self.available.store(false, Ordering::Relaxed);
                false
            }
        }
    }

    /// Cached availability (fast, non-blocking).
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    async fn embed_uncached(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.config.base_url);

        let response = self.client
            .post(&url)
            .json(&serde_json::json!({
                "model": self.config.model,
                "prompt": text
            }))
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            let status = response.status();
            self.available.store(false, Ordering::Relaxed);
            anyhow::bail!("embedding request failed: {}", status);
        }

        let result: EmbeddingResponse = response.json().await
            .context("Failed to parse embedding response")?;

        Ok(result.embedding)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !self.is_available() {
            anyhow::bail!("embedding service unavailable");
        }

        let cache_key = text.trim().to_string();

        if let Some(cached) = self.cache.get(&cache_key).await {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(cached);
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let embedding = self.embed_uncached(text).await?;
        self.cache.insert(cache_key, embedding.clone()).await;

        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_known_model_dimensions() {
        assert_eq!(model_dimension("nomic-embed-text"), 768);
        assert_eq!(model_dimension("all-minilm"), 384);
        assert_eq!(model_dimension("something-new"), 768);
    }
}
