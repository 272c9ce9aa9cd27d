//! Document Store
//!
//! Embedded chunks with brute-force cosine search. Chunks are immutable once
//! added; a document is removed as a whole.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

/// One embedded slice of a document
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub text: String,
    pub doc_id: String,
    pub file_name: String,
    pub chunk_index: usize,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

/// A document as listed by the admin routes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub file_name: String,
    /// Size of the uploaded content in bytes
    pub size: usize,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

impl DocumentInfo {
    pub fn extension(&self) -> Option<&str> {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
    }
}

/// A chunk matched by a search, best first
#[derive(Clone, Debug)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Add a document and its chunks
    async fn add(&self, info: DocumentInfo, chunks: Vec<DocumentChunk>) -> Result<()>;

    /// Top `top_k` chunks scoring at least `min_score`; equal scores keep
    /// ingestion order
    async fn search(&self, query: &[f32], top_k: usize, min_score: f32) -> Result<Vec<ScoredChunk>>;

    /// A document already stored under this name and size
    async fn find(&self, file_name: &str, size: usize) -> Result<Option<DocumentInfo>>;

    async fn list(&self) -> Result<Vec<DocumentInfo>>;

    /// Remove a document's chunks; `false` if it was not stored
    async fn remove(&self, doc_id: &str) -> Result<bool>;

    async fn chunk_count(&self) -> Result<usize>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[derive(Default)]
struct Inner {
    /// Chunks in ingestion order
    chunks: Vec<DocumentChunk>,
    documents: HashMap<String, DocumentInfo>,
}

/// In-memory [`DocumentStore`]
#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: RwLock<Inner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn add(&self, info: DocumentInfo, chunks: Vec<DocumentChunk>) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.chunks.retain(|c| c.doc_id != info.id);
        inner.chunks.extend(chunks);
        inner.documents.insert(info.id.clone(), info);
        Ok(())
    }

    async fn search(&self, query: &[f32], top_k: usize, min_score: f32) -> Result<Vec<ScoredChunk>> {
        let inner = self.inner.read().await;

        // Enumerated position is the ingestion order tie-break
        let mut scored: Vec<(usize, f32)> = inner
            .chunks
            .iter()
            .enumerate()
            .map(|(pos, c)| (pos, cosine_similarity(query, &c.embedding)))
            .filter(|&(_, score)| score >= min_score)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| ScoredChunk {
                chunk: inner.chunks[pos].clone(),
                score,
            })
            .collect())
    }

    async fn find(&self, file_name: &str, size: usize) -> Result<Option<DocumentInfo>> {
        let inner = self.inner.read().await;
        Ok(inner
            .documents
            .values()
            .find(|d| d.file_name == file_name && d.size == size)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<DocumentInfo>> {
        let inner = self.inner.read().await;
        let mut docs: Vec<DocumentInfo> = inner.documents.values().cloned().collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn remove(&self, doc_id: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.documents.remove(doc_id).is_none() {
            return Ok(false);
        }
        inner.chunks.retain(|c| c.doc_id != doc_id);
        Ok(true)
    }

    async fn chunk_count(&self) -> Result<usize> {
        Ok(self.inner.read().await.chunks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc_id: &str, index: usize, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: format!("{doc_id}#{index}"),
            text: format!("chunk {index} of {doc_id}"),
            doc_id: doc_id.into(),
            file_name: format!("{doc_id}.md"),
            chunk_index: index,
            embedding,
        }
    }

    fn info(id: &str, chunks: usize) -> DocumentInfo {
        DocumentInfo {
            id: id.into(),
            file_name: format!("{id}.md"),
            size: 100,
            chunk_count: chunks,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_search_ranks_and_thresholds() {
        let store = MemoryDocumentStore::new();
        store
            .add(
                info("a", 3),
                vec![
                    chunk("a", 0, vec![1.0, 0.0]),
                    chunk("a", 1, vec![0.6, 0.8]),
                    chunk("a", 2, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.0], 4, 0.25).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a#0", "a#1"]);
        assert!(hits[0].score > hits[1].score);

        assert_eq!(store.search(&[1.0, 0.0], 1, 0.25).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_equal_scores_keep_ingestion_order() {
        let store = MemoryDocumentStore::new();
        store.add(info("first", 1), vec![chunk("first", 0, vec![1.0, 0.0])]).await.unwrap();
        store.add(info("second", 1), vec![chunk("second", 0, vec![2.0, 0.0])]).await.unwrap();
        store.add(info("third", 1), vec![chunk("third", 0, vec![1.0, 0.0])]).await.unwrap();

        let hits = store.search(&[1.0, 0.0], 3, 0.0).await.unwrap();
        let docs: Vec<&str> = hits.iter().map(|h| h.chunk.doc_id.as_str()).collect();
        assert_eq!(docs, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_remove_and_find() {
        let store = MemoryDocumentStore::new();
        store.add(info("a", 1), vec![chunk("a", 0, vec![1.0])]).await.unwrap();
        store.add(info("b", 1), vec![chunk("b", 0, vec![1.0])]).await.unwrap();

        assert_eq!(store.find("a.md", 100).await.unwrap().map(|d| d.id), Some("a".to_string()));
        assert!(store.find("a.md", 99).await.unwrap().is_none());

        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
        assert_eq!(store.chunk_count().await.unwrap(), 1);
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.search(&[1.0], 4, 0.0).await.unwrap().iter().all(|h| h.chunk.doc_id == "b"));
    }
}
