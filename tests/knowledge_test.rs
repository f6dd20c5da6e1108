//! Knowledge Retriever Integration Tests
//!
//! Retrieval properties with scripted fetcher and embedder boundaries:
//! top-k ordering, deterministic tie-breaks, invalidation, partial-failure
//! isolation, dimension enforcement.

use std::collections::HashMap;
use std::sync::Arc;

use agentpipe::{DocumentFetcher, Embedder, KnowledgeRetriever};
use anyhow::Result;
use async_trait::async_trait;

/// Serves canned documents; unknown URLs fail like an unreachable host.
struct MapFetcher {
    docs: HashMap<String, String>,
}

impl MapFetcher {
    fn new(docs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            docs: docs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        })
    }
}

#[async_trait]
impl DocumentFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        match self.docs.get(url) {
            Some(doc) => Ok(doc.clone()),
            None => anyhow::bail!("connection refused: {}", url),
        }
    }
}

/// Keyword-count embedding: dimension 3, one axis per keyword. Identical
/// texts embed identically, which makes tie-breaks observable.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let count = |needle: &str| text.matches(needle).count() as f32;
        Ok(vec![count("alpha") + 0.001, count("beta") + 0.001, count("gamma") + 0.001])
    }

    fn dimension(&self) -> usize {
        3
    }
}

/// Always produces a vector of the wrong length.
struct BrokenDimensionEmbedder;

#[async_trait]
impl Embedder for BrokenDimensionEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 2.0])
    }

    fn dimension(&self) -> usize {
        3
    }
}

fn retriever(docs: &[(&str, &str)]) -> KnowledgeRetriever {
    KnowledgeRetriever::new(MapFetcher::new(docs), Arc::new(KeywordEmbedder))
}

#[tokio::test]
async fn test_query_returns_at_most_k_sorted_by_similarity() {
    let retriever = retriever(&[
        ("doc-alpha", "alpha alpha alpha content here"),
        ("doc-beta", "beta beta beta content here"),
        ("doc-mixed", "alpha beta mixed content here"),
    ]);

    retriever.ingest("doc-alpha").await.unwrap();
    retriever.ingest("doc-beta").await.unwrap();
    retriever.ingest("doc-mixed").await.unwrap();

    let results = retriever.query("alpha alpha", 2).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.source_id, "doc-alpha");
    assert!(results[0].score >= results[1].score);

    // k larger than the index never over-returns.
    let all = retriever.query("alpha", 100).await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_tie_break_is_ingestion_order() {
    // Identical texts embed identically; the earlier-ingested source wins.
    let retriever = retriever(&[
        ("second-ingested", "alpha topic notes"),
        ("first-ingested", "alpha topic notes"),
    ]);

    retriever.ingest("first-ingested").await.unwrap();
    retriever.ingest("second-ingested").await.unwrap();

    let results = retriever.query("alpha", 2).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.source_id, "first-ingested");
    assert_eq!(results[1].chunk.source_id, "second-ingested");

    // Deterministic across repeated queries on an unchanged index.
    let again = retriever.query("alpha", 2).await.unwrap();
    assert_eq!(again[0].chunk.source_id, "first-ingested");
}

#[tokio::test]
async fn test_invalidate_removes_all_chunks_of_a_source() {
    let retriever = retriever(&[
        ("https://docs.example/a.pdf", "alpha document about one topic"),
        ("https://docs.example/b.pdf", "alpha document about another topic"),
    ]);

    retriever.ingest("https://docs.example/a.pdf").await.unwrap();
    retriever.ingest("https://docs.example/b.pdf").await.unwrap();

    retriever.invalidate("https://docs.example/a.pdf");

    let results = retriever.query("alpha", 10).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.chunk.source_id == "https://docs.example/b.pdf"));
}

#[tokio::test]
async fn test_ingest_all_isolates_failures() {
    let retriever = retriever(&[("good-doc", "alpha beta gamma")]);

    let results = retriever
        .ingest_all(&["good-doc".to_string(), "missing-doc".to_string()])
        .await;

    assert_eq!(results.len(), 2);
    assert!(results[0].1.is_ok());
    assert!(results[1].1.is_err());

    // The good source is fully queryable despite the failure.
    let hits = retriever.query("alpha", 5).await.unwrap();
    assert!(hits.iter().all(|r| r.chunk.source_id == "good-doc"));
    assert!(!hits.is_empty());
}

#[tokio::test]
async fn test_dimension_mismatch_is_an_ingestion_error() {
    let retriever = KnowledgeRetriever::new(
        MapFetcher::new(&[("doc", "some content")]),
        Arc::new(BrokenDimensionEmbedder),
    );

    let err = retriever.ingest("doc").await.unwrap_err();
    assert!(err.to_string().contains("dimension mismatch"));
    assert!(retriever.is_empty());
}

#[tokio::test]
async fn test_reingestion_replaces_old_chunks() {
    let retriever = retriever(&[("doc", "alpha content")]);

    retriever.ingest("doc").await.unwrap();
    let before = retriever.len();
    retriever.ingest("doc").await.unwrap();

    // Same source re-ingested: old chunks invalidated, not duplicated.
    assert_eq!(retriever.len(), before);
}

#[tokio::test]
async fn test_unreachable_source_is_an_ingestion_error() {
    let retriever = retriever(&[]);
    let err = retriever.ingest("https://nowhere.example/x.pdf").await.unwrap_err();
    assert!(err.to_string().contains("ingestion"));
}
