//! Retrieval service
//!
//! Owns the write path (chunk, embed, add) and the query path (embed, search)
//! over one vector index. The index sits behind a read-write lock: queries
//! share it, writers take it only to apply already-embedded chunks.

use crate::cache::{CacheStats, EmbeddingCache};
use futures::stream::{self, StreamExt};
use kbqa_core::{
    Chunk, CollectionInfo, Document, IngestionFailure, IngestionReport, KbqaError, QueryResult,
    Result,
};
use kbqa_parser::Chunker;
use kbqa_vector::{EmbeddingClient, InMemoryIndex, VectorIndex};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Chunks sent to the embedding backend per request
const EMBED_BATCH_SIZE: usize = 64;

/// Documents embedded concurrently during ingestion
const INGEST_CONCURRENCY: usize = 4;

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub collection: CollectionInfo,
    pub chunk_count: usize,
    pub document_count: usize,
    pub cache: Option<CacheStats>,
}

/// Ingestion and similarity search over a single collection
pub struct RetrievalService {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingClient>,
    index: RwLock<Box<dyn VectorIndex>>,
    /// Serializes ingest and reindex
    write_guard: Mutex<()>,
    cache: Option<EmbeddingCache>,
    min_score: f32,
}

impl RetrievalService {
    /// Create a service over `index`.
    ///
    /// Fails if the index was built for a different embedding model or
    /// dimension than `embedder` produces.
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingClient>,
        index: Box<dyn VectorIndex>,
    ) -> Result<Self> {
        let collection = index.collection();
        if collection.embedding_model != embedder.model_id()
            || collection.dimension != embedder.dimension()
        {
            return Err(KbqaError::IndexError(format!(
                "collection '{}' expects {} (dim {}), embedder is {} (dim {})",
                collection.name,
                collection.embedding_model,
                collection.dimension,
                embedder.model_id(),
                embedder.dimension()
            )));
        }

        Ok(Self {
            chunker,
            embedder,
            index: RwLock::new(index),
            write_guard: Mutex::new(()),
            cache: None,
            min_score: 0.0,
        })
    }

    /// Create a service with an empty in-memory index
    pub fn in_memory(
        collection_name: &str,
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingClient>,
    ) -> Self {
        let collection = CollectionInfo::new(
            collection_name,
            embedder.model_id(),
            embedder.dimension(),
        );
        Self {
            chunker,
            embedder,
            index: RwLock::new(Box::new(InMemoryIndex::new(collection))),
            write_guard: Mutex::new(()),
            cache: None,
            min_score: 0.0,
        }
    }

    /// Cache query embeddings
    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Drop results scoring at or below `min_score`
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Ingest documents into the index.
    ///
    /// A document that cannot be chunked, embedded or indexed is recorded as a
    /// failure and the rest continue. Re-ingesting a document replaces its
    /// chunks in place and drops any trailing chunks it no longer has; one
    /// that is now blank loses all of them.
    pub async fn ingest(&self, documents: &[Document]) -> IngestionReport {
        let _guard = self.write_guard.lock().await;
        let mut report = IngestionReport::default();

        let prepared = self.prepare_all(documents).await;

        for (document, outcome) in documents.iter().zip(prepared) {
            let chunks = match outcome {
                Ok(chunks) => chunks,
                Err(failure) => {
                    // An emptied document stops answering with its old text
                    if document.text.trim().is_empty() {
                        let removed = self.index.write().await.remove_document(document.id);
                        if removed > 0 {
                            tracing::debug!("Removed {} chunks of emptied {}", removed, document.source_path);
                        }
                    }
                    report.failures.push(failure);
                    continue;
                }
            };

            let count = chunks.len();
            let mut index = self.index.write().await;
            match index.add(chunks) {
                Ok(()) => {
                    let stale = index.retain_document_prefix(document.id, count as u32);
                    if stale > 0 {
                        tracing::debug!("Dropped {} stale chunks of {}", stale, document.source_path);
                    }
                    report.documents_ingested += 1;
                    report.chunks_indexed += count;
                }
                Err(e) => {
                    tracing::warn!("Index rejected {}: {}", document.source_path, e);
                    report.failures.push(IngestionFailure {
                        source_path: document.source_path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Ingested {} documents ({} chunks, {} failures)",
            report.documents_ingested,
            report.chunks_indexed,
            report.failures.len()
        );
        report
    }

    /// Rebuild the index from scratch.
    ///
    /// Everything is embedded before the index is touched, then the contents
    /// are swapped under one write lock. Readers see either the old or the new
    /// index, never a mix.
    pub async fn reindex(&self, documents: &[Document]) -> Result<IngestionReport> {
        let _guard = self.write_guard.lock().await;
        let mut report = IngestionReport::default();
        let mut all_chunks = Vec::new();

        let prepared = self.prepare_all(documents).await;

        for outcome in prepared {
            match outcome {
                Ok(chunks) => {
                    report.documents_ingested += 1;
                    report.chunks_indexed += chunks.len();
                    all_chunks.extend(chunks);
                }
                Err(failure) => report.failures.push(failure),
            }
        }

        self.index.write().await.replace_all(all_chunks)?;

        tracing::info!(
            "Reindexed {} documents ({} chunks, {} failures)",
            report.documents_ingested,
            report.chunks_indexed,
            report.failures.len()
        );
        Ok(report)
    }

    /// Chunk and embed documents, preserving input order
    async fn prepare_all(
        &self,
        documents: &[Document],
    ) -> Vec<std::result::Result<Vec<Chunk>, IngestionFailure>> {
        let futures: Vec<_> = documents
            .iter()
            .map(|document| async move {
                self.prepare_document(document).await.map_err(|e| {
                    tracing::warn!("Skipping {}: {}", document.source_path, e);
                    let mut failure = IngestionFailure::from(e);
                    if failure.source_path.is_empty() {
                        failure.source_path = document.source_path.clone();
                    }
                    failure
                })
            })
            .collect();
        stream::iter(futures)
            .buffered(INGEST_CONCURRENCY)
            .collect()
            .await
    }

    async fn prepare_document(&self, document: &Document) -> Result<Vec<Chunk>> {
        let texts = self.chunker.chunk(&document.text);
        if texts.is_empty() {
            return Err(KbqaError::IngestionError {
                source_path: document.source_path.clone(),
                reason: "no indexable text".to_string(),
            });
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            embeddings.extend(self.embedder.embed_batch(batch).await?);
        }
        if embeddings.len() != texts.len() {
            return Err(KbqaError::EmbeddingError(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        Ok(texts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| Chunk::new(document.id, i as u32, text, embedding))
            .collect())
    }

    // ========================================================================
    // Query path
    // ========================================================================

    /// Top-k chunks related to `query`, most relevant first.
    ///
    /// An empty index or a query with nothing related yields an empty list.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<QueryResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(KbqaError::ValidationError(
                "Query cannot be empty".to_string(),
            ));
        }

        let query_vector = self.embed_query(query).await?;

        let results = {
            let index = self.index.read().await;
            index.search(&query_vector, k)?
        };

        let min_score = self.min_score;
        let results: Vec<QueryResult> = results
            .into_iter()
            .filter(|r| r.score > min_score)
            .collect();

        tracing::debug!("Search returned {} results (k={})", results.len(), k);
        Ok(results)
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let model = self.embedder.model_id();

        if let Some(cache) = &self.cache {
            if let Some(embedding) = cache.get(model, query).await {
                return Ok(embedding);
            }
        }

        let embedding = self.embedder.embed(query).await?;

        if let Some(cache) = &self.cache {
            cache.put(model, query, embedding.clone()).await;
        }
        Ok(embedding)
    }

    // ========================================================================
    // Introspection and persistence
    // ========================================================================

    /// Number of indexed chunks
    pub async fn size(&self) -> usize {
        self.index.read().await.size()
    }

    /// Remove every entry
    pub async fn clear(&self) {
        let _guard = self.write_guard.lock().await;
        self.index.write().await.clear();
    }

    pub async fn collection(&self) -> CollectionInfo {
        self.index.read().await.collection().clone()
    }

    pub async fn stats(&self) -> IndexStats {
        let index = self.index.read().await;
        IndexStats {
            collection: index.collection().clone(),
            chunk_count: index.size(),
            document_count: index.document_count(),
            cache: self.cache.as_ref().map(EmbeddingCache::stats),
        }
    }

    /// Write the index to a JSON snapshot
    pub async fn save_snapshot(&self, path: &Path) -> Result<()> {
        let index = self.index.read().await;
        kbqa_vector::save_snapshot(&**index, path)
    }
}

/// Load a persisted index for `expected`, if one is usable.
///
/// Returns `Ok(None)` when there is no snapshot, or when the snapshot belongs
/// to a different collection and `rebuild_on_mismatch` allows starting over.
pub fn restore_index(
    path: &Path,
    expected: &CollectionInfo,
    rebuild_on_mismatch: bool,
) -> Result<Option<InMemoryIndex>> {
    if !path.exists() {
        tracing::info!("No index snapshot at {}", path.display());
        return Ok(None);
    }

    let snapshot = match kbqa_vector::load_snapshot(path) {
        Ok(snapshot) => snapshot,
        Err(e) if rebuild_on_mismatch => {
            tracing::warn!("Ignoring unreadable snapshot: {}", e);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    match InMemoryIndex::from_snapshot(snapshot, expected) {
        Ok(index) => {
            tracing::info!(
                "Restored {} chunks of '{}' from {}",
                index.size(),
                expected.name,
                path.display()
            );
            Ok(Some(index))
        }
        Err(e) if rebuild_on_mismatch => {
            tracing::warn!("Snapshot is stale, rebuilding: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use kbqa_vector::HashingEmbedder;

    fn service() -> RetrievalService {
        RetrievalService::in_memory(
            "rag_docs",
            Chunker::default(),
            Arc::new(HashingEmbedder::new(384)),
        )
    }

    #[tokio::test]
    async fn test_empty_index_search_is_empty() {
        let service = service();
        let results = service.search("anything at all", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_search_from_blocking_context() {
        let service = service();
        let results = tokio_test::block_on(service.search("Python lists", 3)).unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_is_validation_error() {
        let service = service();
        let result = service.search("   ", 5).await;
        assert!(matches!(result, Err(KbqaError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_ingest_then_search() {
        let service = service();
        let report = service
            .ingest(&[
                Document::new("lists.txt", "Python lists are mutable sequences"),
                Document::new("tkinter.txt", "Tkinter builds desktop GUIs"),
            ])
            .await;

        assert_eq!(report.documents_ingested, 2);
        assert_eq!(report.chunks_indexed, 2);
        assert_eq!(service.size().await, 2);

        let results = service.search("What is a mutable sequence?", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.text, "Python lists are mutable sequences");
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent_and_drops_stale_chunks() {
        let service = RetrievalService::in_memory(
            "rag_docs",
            Chunker::with_chunk_size(20),
            Arc::new(HashingEmbedder::new(64)),
        );
        let long = Document::new("notes.txt", "First part here.\n\nSecond part here.");

        service.ingest(&[long.clone()]).await;
        let size = service.size().await;
        assert_eq!(size, 2);

        service.ingest(&[long]).await;
        assert_eq!(service.size().await, size);

        // Same file, now shorter
        service
            .ingest(&[Document::new("notes.txt", "Only one part.")])
            .await;
        assert_eq!(service.size().await, 1);
    }

    #[tokio::test]
    async fn test_reindex_replaces_contents() {
        let service = service();
        service
            .ingest(&[Document::new("old.txt", "Obsolete content about COBOL")])
            .await;

        let report = service
            .reindex(&[
                Document::new("a.txt", "Python lists are mutable sequences"),
                Document::new("empty.txt", "   "),
            ])
            .await
            .unwrap();

        assert_eq!(report.documents_ingested, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].source_path, "empty.txt");
        assert_eq!(service.size().await, 1);
        assert_eq!(service.stats().await.document_count, 1);
    }

    /// Texts starting with "beta" point along the second axis, all others
    /// along the first, so scores are exactly 1.0 or 0.0
    struct AxisEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingClient for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(if text.starts_with("beta") {
                vec![0.0, 1.0]
            } else {
                vec![1.0, 0.0]
            })
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::with_capacity(texts.len());
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_id(&self) -> &str {
            "axis"
        }

        fn max_input_chars(&self) -> usize {
            1000
        }
    }

    async fn axis_service(min_score: f32) -> RetrievalService {
        let service =
            RetrievalService::in_memory("rag_docs", Chunker::default(), Arc::new(AxisEmbedder))
                .with_min_score(min_score);
        service
            .ingest(&[
                Document::new("alpha.txt", "alpha passage"),
                Document::new("beta.txt", "beta passage"),
            ])
            .await;
        service
    }

    #[tokio::test]
    async fn test_min_score_is_a_strict_lower_bound() {
        let service = axis_service(0.0).await;
        let results = service.search("alpha question", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.text, "alpha passage");

        let service = axis_service(-1.0).await;
        let results = service.search("alpha question", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].chunk.text, "beta passage");
        assert_eq!(results[1].score, 0.0);

        let service = axis_service(1.0).await;
        assert!(service.search("alpha question", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_reingest_removes_old_chunks() {
        let service = service();
        service
            .ingest(&[
                Document::new("notes.txt", "Python lists are mutable sequences"),
                Document::new("gui.txt", "Tkinter builds desktop GUIs"),
            ])
            .await;
        assert_eq!(service.size().await, 2);

        let report = service.ingest(&[Document::new("notes.txt", "  \n ")]).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(service.size().await, 1);
        assert_eq!(service.stats().await.document_count, 1);
    }

    #[tokio::test]
    async fn test_query_cache_hits_on_repeat() {
        let service = service().with_cache(EmbeddingCache::new());
        service
            .ingest(&[Document::new("a.txt", "Python lists are mutable sequences")])
            .await;

        service.search("mutable lists", 3).await.unwrap();
        service.search("mutable lists", 3).await.unwrap();

        let cache = service.stats().await.cache.unwrap();
        assert_eq!(cache.hits, 1);
        assert_eq!(cache.misses, 1);
    }

    #[tokio::test]
    async fn test_embedder_mismatch_is_rejected() {
        let index = InMemoryIndex::new(CollectionInfo::new("rag_docs", "all-minilm", 384));
        let result = RetrievalService::new(
            Chunker::default(),
            Arc::new(HashingEmbedder::new(384)),
            Box::new(index),
        );
        assert!(matches!(result, Err(KbqaError::IndexError(_))));
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let service = service();
        service
            .ingest(&[Document::new("a.txt", "Python lists are mutable sequences")])
            .await;
        service.save_snapshot(&path).await.unwrap();

        let collection = service.collection().await;
        let restored = restore_index(&path, &collection, false).unwrap().unwrap();
        assert_eq!(restored.size(), 1);

        let other = CollectionInfo::new("rag_docs", "all-minilm", 384);
        assert!(restore_index(&path, &other, false).is_err());
        assert!(restore_index(&path, &other, true).unwrap().is_none());

        let missing = dir.path().join("missing.json");
        assert!(restore_index(&missing, &collection, false).unwrap().is_none());
    }
}
