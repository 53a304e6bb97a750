//! kbqa Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout kbqa:
//! - Documents, chunks and query results
//! - Collection identity (name + embedding model + dimension)
//! - Common error types
//! - The generation service trait
//! - Configuration management

pub mod config;

pub use config::{
    AppConfig, ConfigError, EmbeddingConfig, EmbeddingProvider, IndexConfig, LlmConfig,
    LlmProvider, LoggingConfig, RagConfig, ServerConfig,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for kbqa operations
#[derive(Error, Debug)]
pub enum KbqaError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Ingestion failed for {source_path}: {reason}")]
    IngestionError { source_path: String, reason: String },

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Generation error: {0}")]
    GenerationError(String),

    #[error("Index error: {0}")]
    IndexError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KbqaError {
    /// Whether a bounded retry may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::GenerationError(_))
    }

    /// Message safe to show to an end user.
    ///
    /// Internal details (URLs, provider payloads) stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::ValidationError(msg) => msg.clone(),
            Self::EmbeddingError(_) => {
                "Sorry, I could not process your question right now. Please try again.".to_string()
            }
            Self::GenerationError(_) => {
                "Sorry, an error occurred while generating the answer. Please try again later."
                    .to_string()
            }
            Self::ConfigError(_) => {
                "The assistant is not configured correctly. Please contact the administrator."
                    .to_string()
            }
            _ => "Sorry, an unexpected error occurred.".to_string(),
        }
    }
}

impl From<ConfigError> for KbqaError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KbqaError>;

// ============================================================================
// Identifiers
// ============================================================================

/// Namespace for deriving document ids from source paths
const DOCUMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6b62_7161_2d64_6f63_2d6e_7330_0000_0001);

/// Stable document identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    /// Derive the id from a source path, so re-reading a file yields the same id
    pub fn from_source(source_path: &str) -> Self {
        Self(Uuid::new_v5(&DOCUMENT_NAMESPACE, source_path.as_bytes()))
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable chunk identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(pub Uuid);

impl ChunkId {
    /// Derive the id from its parent document and position
    pub fn derive(document_id: DocumentId, chunk_index: u32) -> Self {
        Self(Uuid::new_v5(&document_id.0, &chunk_index.to_be_bytes()))
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Document Models
// ============================================================================

/// A source document as supplied by the loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier derived from the source path
    pub id: DocumentId,

    /// Raw text
    pub text: String,

    /// Where the text came from
    pub source_path: String,
}

impl Document {
    /// Create a document from a `(source_path, text)` pair
    pub fn new(source_path: impl Into<String>, text: impl Into<String>) -> Self {
        let source_path = source_path.into();
        Self {
            id: DocumentId::from_source(&source_path),
            text: text.into(),
            source_path,
        }
    }
}

/// A retrievable unit of a document with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,

    /// Parent document ID
    pub document_id: DocumentId,

    /// Chunk index within the document
    pub chunk_index: u32,

    /// Text content
    pub text: String,

    /// Embedding vector (collection dimension)
    pub embedding: Vec<f32>,
}

impl Chunk {
    /// Create a new chunk with a derived id
    pub fn new(
        document_id: DocumentId,
        chunk_index: u32,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: ChunkId::derive(document_id, chunk_index),
            document_id,
            chunk_index,
            text: text.into(),
            embedding,
        }
    }
}

// ============================================================================
// Search Types
// ============================================================================

/// A scored chunk returned by a search, most relevant first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub chunk: Chunk,

    /// Similarity score (higher is better)
    pub score: f32,
}

/// Identity of an index collection.
///
/// Two indexes are only compatible when all three fields match; vectors from
/// one embedding model cannot be scored against another's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub name: String,
    pub embedding_model: String,
    pub dimension: usize,
}

impl CollectionInfo {
    pub fn new(name: impl Into<String>, embedding_model: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            embedding_model: embedding_model.into(),
            dimension,
        }
    }

    /// Check that an index built for `other` can serve this collection
    pub fn ensure_compatible(&self, other: &CollectionInfo) -> Result<()> {
        if self == other {
            return Ok(());
        }
        Err(KbqaError::IndexError(format!(
            "collection '{}' ({}, dim {}) is incompatible with '{}' ({}, dim {})",
            other.name,
            other.embedding_model,
            other.dimension,
            self.name,
            self.embedding_model,
            self.dimension
        )))
    }
}

// ============================================================================
// Ingestion Types
// ============================================================================

/// A document that could not be ingested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionFailure {
    pub source_path: String,
    pub reason: String,
}

impl From<KbqaError> for IngestionFailure {
    fn from(err: KbqaError) -> Self {
        match err {
            KbqaError::IngestionError {
                source_path,
                reason,
            } => Self {
                source_path,
                reason,
            },
            other => Self {
                source_path: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

/// Outcome of an ingestion pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionReport {
    /// Documents successfully indexed
    pub documents_ingested: usize,

    /// Chunks written to the index
    pub chunks_indexed: usize,

    /// Documents skipped, with the reason
    pub failures: Vec<IngestionFailure>,
}

impl IngestionReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: IngestionReport) {
        self.documents_ingested += other.documents_ingested;
        self.chunks_indexed += other.chunks_indexed;
        self.failures.extend(other.failures);
    }
}

// ============================================================================
// Generation Types
// ============================================================================

/// Everything the generation service receives for one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Fixed system instructions (guardrails)
    pub system: String,

    /// Retrieved context, most relevant passage first
    pub context: String,

    /// The user's question
    pub question: String,
}

/// Answer with the passages it was grounded on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// Generated (or fallback) answer text
    pub text: String,

    /// Passages the answer was composed from
    pub passages: Vec<QueryResult>,

    /// False when no passage was found and the fallback was returned
    pub grounded: bool,

    /// Processing time in milliseconds
    pub processing_time_ms: u64,

    pub answered_at: DateTime<Utc>,
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for generation (LLM) clients
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate an answer from system instructions, context and question
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================
