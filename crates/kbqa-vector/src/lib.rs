//! kbqa Vector - Embeddings and vector index
//!
//! Provides the embedding clients and the vector index abstraction
//! for storing and searching document chunk embeddings.

use chrono::{DateTime, Utc};
use kbqa_core::{Chunk, CollectionInfo, DocumentId, KbqaError, QueryResult, Result};
use serde::{Deserialize, Serialize};

pub mod embedding;
pub mod memory_store;

pub use embedding::{
    create_embedding_client, EmbeddingClient, HashingEmbedder, OllamaEmbedding, OpenAiEmbedding,
};
pub use memory_store::{load_snapshot, save_snapshot, InMemoryIndex};

/// Current on-disk snapshot format
pub const SNAPSHOT_VERSION: u32 = 1;

/// Trait for vector index backends.
///
/// One index holds one collection. Search results are ordered by
/// descending score; equal scores keep insertion order (earlier first).
/// Implementations may answer approximately but must keep that ordering.
pub trait VectorIndex: Send + Sync {
    /// Identity of the collection this index serves
    fn collection(&self) -> &CollectionInfo;

    /// Append chunks; a chunk whose id is already stored replaces it in place.
    ///
    /// The whole batch is rejected if any embedding has the wrong dimension.
    fn add(&mut self, chunks: Vec<Chunk>) -> Result<()>;

    /// Top-k entries by similarity to `query_vector`
    fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<QueryResult>>;

    /// Number of stored entries
    fn size(&self) -> usize;

    /// Number of distinct documents with at least one entry
    fn document_count(&self) -> usize;

    /// Drop every entry
    fn clear(&mut self);

    /// Drop all entries of a document, returning how many were removed
    fn remove_document(&mut self, document_id: DocumentId) -> usize;

    /// Drop entries of a document whose chunk index is `>= live_chunks`
    fn retain_document_prefix(&mut self, document_id: DocumentId, live_chunks: u32) -> usize;

    /// Serializable copy of every entry, in insertion order
    fn snapshot(&self) -> IndexSnapshot;

    /// Replace the whole contents in one step.
    ///
    /// Nothing changes if the new chunks are invalid.
    fn replace_all(&mut self, chunks: Vec<Chunk>) -> Result<()> {
        validate_chunks(self.collection().dimension, &chunks)?;
        self.clear();
        self.add(chunks)
    }
}

/// Persisted form of an index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub collection: CollectionInfo,
    pub created_at: DateTime<Utc>,
    pub chunks: Vec<Chunk>,
}

/// Check every chunk's embedding against the collection dimension
pub fn validate_chunks(dimension: usize, chunks: &[Chunk]) -> Result<()> {
    for chunk in chunks {
        if chunk.embedding.len() != dimension {
            return Err(KbqaError::IndexError(format!(
                "chunk {} has dimension {}, collection expects {}",
                chunk.id,
                chunk.embedding.len(),
                dimension
            )));
        }
        if chunk.embedding.iter().any(|v| !v.is_finite()) {
            return Err(KbqaError::IndexError(format!(
                "chunk {} has a non-finite embedding value",
                chunk.id
            )));
        }
    }
    Ok(())
}

/// Cosine similarity; zero when either vector has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Euclidean length of a vector
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        // Scale does not matter
        assert!((cosine_similarity(&[2.0, 2.0], &[1.0, 1.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_validate_chunks() {
        let doc = DocumentId::from_source("a.txt");
        let ok = Chunk::new(doc, 0, "a", vec![1.0, 0.0]);
        let wrong_dim = Chunk::new(doc, 1, "b", vec![1.0]);
        let nan = Chunk::new(doc, 2, "c", vec![f32::NAN, 0.0]);

        assert!(validate_chunks(2, &[ok.clone()]).is_ok());
        assert!(validate_chunks(2, &[ok.clone(), wrong_dim]).is_err());
        assert!(validate_chunks(2, &[ok, nan]).is_err());
    }
}
