//! Knowledge Base
//!
//! Retrieval-augmented lookup over agronomy documents.
//!
//! ```text
//!  ingest:  file ──► extract_text ──► chunk_text ──► embed ──► DocumentStore
//!  lookup:  query ──► embed (retry, timeout) ──► cosine top-k ──► min_score
//! ```

pub mod chunk;
pub mod embedding;
pub mod ingest;
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agent_core::EmbeddingProvider;
use chrono::Utc;

use crate::error::{AdvisorError, Result};

pub use embedding::HashingEmbedder;
pub use store::{DocumentChunk, DocumentInfo, DocumentStore, MemoryDocumentStore, ScoredChunk};

/// Texts sent to the embedder per request during ingestion
const EMBED_BATCH: usize = 32;

/// Retrieval and chunking settings
#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub min_score: f32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Extra attempts after a transient embedding failure
    pub max_retries: u32,
    pub initial_backoff: Duration,
    /// Per-attempt deadline
    pub attempt_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            min_score: 0.25,
            chunk_size: 800,
            chunk_overlap: 100,
            max_retries: 2,
            initial_backoff: Duration::from_millis(200),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetrievalConfig {
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();
        Self {
            top_k: var("RETRIEVAL_TOP_K").unwrap_or(defaults.top_k).max(1),
            min_score: var::<f32>("RETRIEVAL_MIN_SCORE")
                .unwrap_or(defaults.min_score)
                .clamp(-1.0, 1.0),
            chunk_size: var("CHUNK_SIZE").unwrap_or(defaults.chunk_size).max(1),
            chunk_overlap: var("CHUNK_OVERLAP").unwrap_or(defaults.chunk_overlap),
            max_retries: var("RETRIEVAL_MAX_RETRIES").unwrap_or(defaults.max_retries),
            initial_backoff: var("RETRIEVAL_BACKOFF_MS")
                .map_or(defaults.initial_backoff, Duration::from_millis),
            attempt_timeout: var("RETRIEVAL_TIMEOUT_SECS")
                .map_or(defaults.attempt_timeout, Duration::from_secs),
        }
    }
}

/// Outcome of a directory ingestion
#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents: Vec<DocumentInfo>,
    pub skipped: Vec<(PathBuf, String)>,
}

/// Embedder plus document store
pub struct KnowledgeBase {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn DocumentStore>,
    config: RetrievalConfig,
}

impl KnowledgeBase {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn DocumentStore>, config: RetrievalConfig) -> Self {
        Self {
            embedder,
            store,
            config,
        }
    }

    /// Knowledge base over a fresh in-memory store
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>, config: RetrievalConfig) -> Self {
        Self::new(embedder, Arc::new(MemoryDocumentStore::new()), config)
    }

    pub const fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn embedding_model(&self) -> &str {
        self.embedder.model_name()
    }

    /// Chunks relevant to `query`, best first; empty when nothing clears
    /// `min_score`
    pub async fn lookup(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AdvisorError::EmptyQuery);
        }

        let mut vectors = self.embed_with_retry(&[query.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| AdvisorError::Embedding("no vector returned for query".into()))?;

        let hits = self
            .store
            .search(&vector, self.config.top_k, self.config.min_score)
            .await?;
        tracing::debug!(query, hits = hits.len(), "Knowledge base lookup");
        Ok(hits)
    }

    /// Embed with a per-attempt timeout, retrying transient failures with
    /// exponential backoff
    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let timeout_secs = self.config.attempt_timeout.as_secs();
        let mut attempt = 0;

        loop {
            let error = match tokio::time::timeout(self.config.attempt_timeout, self.embedder.embed(texts)).await {
                Ok(Ok(vectors)) => return Ok(vectors),
                Ok(Err(e)) => AdvisorError::from(e),
                Err(_) => AdvisorError::Timeout(timeout_secs),
            };

            if !error.is_transient() || attempt >= self.config.max_retries {
                return Err(error);
            }

            let delay = self.config.initial_backoff * 2u32.saturating_pow(attempt);
            tracing::warn!(attempt = attempt + 1, error = %error, ?delay, "Embedding failed, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Chunk, embed and store one document. Re-uploading a file with the same
    /// name and size returns the stored document.
    pub async fn ingest_text(&self, file_name: &str, content: &str) -> Result<DocumentInfo> {
        let file_name = file_name.trim();
        let text = ingest::extract_text(file_name, content)?;
        if text.trim().is_empty() {
            return Err(AdvisorError::EmptyDocument(file_name.to_string()));
        }

        if let Some(existing) = self.store.find(file_name, content.len()).await? {
            tracing::debug!(doc_id = %existing.id, "Document already ingested");
            return Ok(existing);
        }

        let pieces = chunk::chunk_text(&text, self.config.chunk_size, self.config.chunk_overlap);
        let mut embeddings = Vec::with_capacity(pieces.len());
        for batch in pieces.chunks(EMBED_BATCH) {
            let vectors = self.embed_with_retry(batch).await?;
            if vectors.len() != batch.len() {
                return Err(AdvisorError::Embedding(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            embeddings.extend(vectors);
        }

        let doc_id = ingest::document_id(file_name);
        let chunks: Vec<DocumentChunk> = pieces
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, (text, embedding))| DocumentChunk {
                id: format!("{doc_id}#{index}"),
                text,
                doc_id: doc_id.clone(),
                file_name: file_name.to_string(),
                chunk_index: index,
                embedding,
            })
            .collect();

        let info = DocumentInfo {
            id: doc_id,
            file_name: file_name.to_string(),
            size: content.len(),
            chunk_count: chunks.len(),
            created_at: Utc::now(),
        };
        self.store.add(info.clone(), chunks).await?;

        tracing::info!(doc_id = %info.id, file = %info.file_name, chunks = info.chunk_count, "Ingested document");
        Ok(info)
    }

    /// Ingest every supported file under `dir`. Files that fail are
    /// reported in `skipped`; a missing directory is an error.
    pub async fn ingest_dir(&self, dir: &Path) -> Result<IngestReport> {
        if !dir.is_dir() {
            return Err(AdvisorError::Config(format!(
                "knowledge directory {} does not exist",
                dir.display()
            )));
        }

        let mut report = IngestReport::default();
        for path in ingest::discover(dir) {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let result = match tokio::fs::read_to_string(&path).await {
                Ok(content) => self.ingest_text(&file_name, &content).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(info) => report.documents.push(info),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping document");
                    report.skipped.push((path, e.to_string()));
                }
            }
        }

        tracing::info!(
            dir = %dir.display(),
            documents = report.documents.len(),
            skipped = report.skipped.len(),
            "Knowledge directory ingested"
        );
        Ok(report)
    }

    pub async fn documents(&self) -> Result<Vec<DocumentInfo>> {
        self.store.list().await
    }

    /// Remove a document; `false` if no such id
    pub async fn remove(&self, doc_id: &str) -> Result<bool> {
        let removed = self.store.remove(doc_id).await?;
        if removed {
            tracing::info!(doc_id, "Removed document");
        }
        Ok(removed)
    }

    pub async fn chunk_count(&self) -> Result<usize> {
        self.store.chunk_count().await
    }
}
