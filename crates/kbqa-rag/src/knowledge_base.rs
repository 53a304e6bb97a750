//! Knowledge base assembly
//!
//! Builds the retrieval and answer services from `AppConfig` once at
//! startup: restores the persisted index when it still matches the
//! configured embedding model, and rebuilds it from the document directory
//! otherwise. Both the HTTP server and the CLI start from here.

use crate::cache::EmbeddingCache;
use crate::composer::{AnswerComposer, ComposerConfig};
use crate::llm::create_llm_client;
use crate::retrieval::{restore_index, RetrievalService};
use kbqa_core::{AppConfig, CollectionInfo, IngestionReport, KbqaError, LlmClient, Result};
use kbqa_parser::{Chunker, DirectoryLoader, LoadReport};
use kbqa_vector::{create_embedding_client, EmbeddingClient, InMemoryIndex};
use std::path::Path;
use std::sync::Arc;

/// The assembled question-answering services
pub struct KnowledgeBase {
    config: AppConfig,
    retrieval: Arc<RetrievalService>,
    composer: Arc<AnswerComposer>,
}

impl KnowledgeBase {
    /// Open the knowledge base with the configured LLM provider
    pub async fn open(config: AppConfig) -> Result<Self> {
        let llm = create_llm_client(&config.llm)?;
        Self::open_with_llm(config, llm).await
    }

    /// Open the knowledge base with a given LLM client
    pub async fn open_with_llm(config: AppConfig, llm: Arc<dyn LlmClient>) -> Result<Self> {
        let embedder = create_embedding_client(&config.embedding)?;
        let collection = CollectionInfo::new(
            config.rag.collection.clone(),
            embedder.model_id(),
            embedder.dimension(),
        );

        let restored = match &config.index.snapshot_path {
            Some(path) => restore_index(path, &collection, config.index.rebuild_on_mismatch)?,
            None => None,
        };
        let needs_build = restored.is_none();
        let index = restored.unwrap_or_else(|| InMemoryIndex::new(collection));

        let kb = Self::assemble(config, llm, embedder, index)?;

        if needs_build {
            let report = kb.rebuild().await?;
            if report.has_failures() {
                tracing::warn!("{} documents could not be indexed", report.failures.len());
            }
        }

        Ok(kb)
    }

    /// Open with an empty index, skipping the snapshot and the startup build.
    ///
    /// For callers that rebuild right away, so the corpus is embedded once.
    pub fn open_empty(config: AppConfig) -> Result<Self> {
        let llm = create_llm_client(&config.llm)?;
        Self::open_empty_with_llm(config, llm)
    }

    pub fn open_empty_with_llm(config: AppConfig, llm: Arc<dyn LlmClient>) -> Result<Self> {
        let embedder = create_embedding_client(&config.embedding)?;
        let collection = CollectionInfo::new(
            config.rag.collection.clone(),
            embedder.model_id(),
            embedder.dimension(),
        );
        Self::assemble(config, llm, embedder, InMemoryIndex::new(collection))
    }

    fn assemble(
        config: AppConfig,
        llm: Arc<dyn LlmClient>,
        embedder: Arc<dyn EmbeddingClient>,
        index: InMemoryIndex,
    ) -> Result<Self> {
        let mut retrieval = RetrievalService::new(
            Chunker::with_chunk_size(config.rag.chunk_size),
            embedder,
            Box::new(index),
        )?
        .with_min_score(config.rag.min_score);
        if config.embedding.cache_enabled {
            retrieval = retrieval.with_cache(EmbeddingCache::new());
        }
        let retrieval = Arc::new(retrieval);

        let composer = Arc::new(AnswerComposer::new(
            Arc::clone(&retrieval),
            llm,
            ComposerConfig::from_config(&config.rag, &config.llm),
        ));

        Ok(Self {
            config,
            retrieval,
            composer,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn retrieval(&self) -> &Arc<RetrievalService> {
        &self.retrieval
    }

    pub fn composer(&self) -> &Arc<AnswerComposer> {
        &self.composer
    }

    /// Read the configured document directory.
    ///
    /// A missing directory is logged and yields no documents.
    pub fn load_documents(&self) -> LoadReport {
        let dir = &self.config.rag.documents_dir;
        let loader = DirectoryLoader::new(dir).with_extensions(&self.config.rag.extensions);

        match loader.load() {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Document directory {} unavailable: {}", dir.display(), e);
                LoadReport::default()
            }
        }
    }

    /// Rebuild the whole index from the document directory and persist it
    pub async fn rebuild(&self) -> Result<IngestionReport> {
        let loaded = self.load_documents();
        let mut report = IngestionReport {
            failures: loaded.failures_as_ingestion(),
            ..Default::default()
        };

        report.merge(self.retrieval.reindex(&loaded.documents).await?);
        self.persist().await?;
        Ok(report)
    }

    /// Ingest a file or directory on top of the current index and persist it
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestionReport> {
        let loaded = if path.is_file() {
            let document = DirectoryLoader::new(&self.config.rag.documents_dir)
                .with_extensions(&self.config.rag.extensions)
                .load_file(path)
                .map_err(|e| KbqaError::IngestionError {
                    source_path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            LoadReport {
                documents: vec![document],
                failures: Vec::new(),
            }
        } else if path.is_dir() {
            DirectoryLoader::new(path)
                .with_extensions(&self.config.rag.extensions)
                .load()
                .map_err(|e| KbqaError::IngestionError {
                    source_path: path.display().to_string(),
                    reason: e.to_string(),
                })?
        } else {
            return Err(KbqaError::ValidationError(format!(
                "{} does not exist",
                path.display()
            )));
        };

        let mut report = IngestionReport {
            failures: loaded.failures_as_ingestion(),
            ..Default::default()
        };
        report.merge(self.retrieval.ingest(&loaded.documents).await);
        self.persist().await?;
        Ok(report)
    }

    /// Write the index snapshot, if persistence is configured
    pub async fn persist(&self) -> Result<()> {
        match &self.config.index.snapshot_path {
            Some(path) => self.retrieval.save_snapshot(path).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kbqa_core::{EmbeddingProvider, GenerationRequest};
    use std::fs;

    struct EchoLlm;

    #[async_trait]
    impl LlmClient for EchoLlm {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            Ok(format!("Based on: {}", request.context))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn config(docs: &Path, snapshot: Option<&Path>) -> AppConfig {
        let mut config = AppConfig::default();
        config.embedding.provider = EmbeddingProvider::Hashing;
        config.embedding.dimension = Some(256);
        config.rag.documents_dir = docs.to_path_buf();
        config.index.snapshot_path = snapshot.map(Path::to_path_buf);
        config
    }

    #[tokio::test]
    async fn test_open_builds_index_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("lists.txt"), "Python lists are mutable sequences").unwrap();
        fs::write(dir.path().join("gui.md"), "Tkinter builds desktop GUIs").unwrap();

        let kb = KnowledgeBase::open_with_llm(config(dir.path(), None), Arc::new(EchoLlm))
            .await
            .unwrap();

        assert_eq!(kb.retrieval().size().await, 2);
        let answer = kb
            .composer()
            .answer("What is a mutable sequence?", Some(1))
            .await
            .unwrap();
        assert_eq!(answer.text, "Based on: Python lists are mutable sequences");
    }

    #[tokio::test]
    async fn test_missing_directory_starts_empty() {
        let kb = KnowledgeBase::open_with_llm(
            config(Path::new("/nonexistent/kbqa-docs"), None),
            Arc::new(EchoLlm),
        )
        .await
        .unwrap();

        assert_eq!(kb.retrieval().size().await, 0);
    }

    #[tokio::test]
    async fn test_snapshot_is_reused_on_restart() {
        let docs = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let snapshot = state.path().join("index.json");
        fs::write(docs.path().join("lists.txt"), "Python lists are mutable sequences").unwrap();

        let kb = KnowledgeBase::open_with_llm(
            config(docs.path(), Some(&snapshot)),
            Arc::new(EchoLlm),
        )
        .await
        .unwrap();
        assert!(snapshot.exists());
        drop(kb);

        // A new file is not picked up because the snapshot is still valid
        fs::write(docs.path().join("gui.txt"), "Tkinter builds desktop GUIs").unwrap();
        let kb = KnowledgeBase::open_with_llm(
            config(docs.path(), Some(&snapshot)),
            Arc::new(EchoLlm),
        )
        .await
        .unwrap();
        assert_eq!(kb.retrieval().size().await, 1);

        // An explicit rebuild sees it
        let report = kb.rebuild().await.unwrap();
        assert_eq!(report.documents_ingested, 2);
        assert_eq!(kb.retrieval().size().await, 2);
    }

    #[tokio::test]
    async fn test_ingest_path_single_file_and_missing() {
        let docs = tempfile::tempdir().unwrap();
        let kb = KnowledgeBase::open_with_llm(config(docs.path(), None), Arc::new(EchoLlm))
            .await
            .unwrap();

        let file = docs.path().join("extra.txt");
        fs::write(&file, "Python dictionaries map keys to values").unwrap();
        let report = kb.ingest_path(&file).await.unwrap();
        assert_eq!(report.documents_ingested, 1);

        let result = kb.ingest_path(&docs.path().join("missing")).await;
        assert!(matches!(result, Err(KbqaError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_reingesting_same_file_by_another_spelling_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("data");
        fs::create_dir(&data).unwrap();
        fs::write(data.join("a.txt"), "Python lists are mutable sequences").unwrap();

        let kb = KnowledgeBase::open_with_llm(config(&data, None), Arc::new(EchoLlm))
            .await
            .unwrap();
        assert_eq!(kb.retrieval().size().await, 1);

        kb.ingest_path(&data.join(".").join("a.txt")).await.unwrap();
        kb.ingest_path(&root.path().join("data").join("..").join("data"))
            .await
            .unwrap();

        let stats = kb.retrieval().stats().await;
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.document_count, 1);
        let hits = kb.retrieval().search("mutable sequences", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_path_rejects_unconfigured_extension() {
        let docs = tempfile::tempdir().unwrap();
        let kb = KnowledgeBase::open_with_llm(config(docs.path(), None), Arc::new(EchoLlm))
            .await
            .unwrap();

        let file = docs.path().join("report.pdf");
        fs::write(&file, "binary").unwrap();
        let result = kb.ingest_path(&file).await;

        assert!(matches!(result, Err(KbqaError::IngestionError { .. })));
        assert_eq!(kb.retrieval().size().await, 0);
    }

    #[tokio::test]
    async fn test_open_empty_defers_the_build() {
        let docs = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let snapshot = state.path().join("index.json");
        fs::write(docs.path().join("lists.txt"), "Python lists are mutable sequences").unwrap();
        fs::write(docs.path().join("gui.txt"), "Tkinter builds desktop GUIs").unwrap();

        let kb =
            KnowledgeBase::open_empty_with_llm(config(docs.path(), Some(&snapshot)), Arc::new(EchoLlm))
                .unwrap();
        assert_eq!(kb.retrieval().size().await, 0);
        assert!(!snapshot.exists());

        let report = kb.rebuild().await.unwrap();
        assert_eq!(report.documents_ingested, 2);
        assert_eq!(kb.retrieval().size().await, 2);
        assert!(snapshot.exists());
    }
}
