//! In-memory vector index with JSON snapshots
//!
//! Brute-force cosine scan over every entry. Comfortable up to a few
//! thousand chunks; swap in an ANN backend behind `VectorIndex` beyond that.

use crate::{l2_norm, validate_chunks, IndexSnapshot, VectorIndex, SNAPSHOT_VERSION};
use chrono::Utc;
use kbqa_core::{Chunk, ChunkId, CollectionInfo, DocumentId, KbqaError, QueryResult, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Stored entry; the embedding norm is cached for scoring
#[derive(Debug, Clone)]
struct IndexEntry {
    chunk: Chunk,
    norm: f32,
}

impl IndexEntry {
    fn new(chunk: Chunk) -> Self {
        let norm = l2_norm(&chunk.embedding);
        Self { chunk, norm }
    }
}

/// In-memory index for a single collection
#[derive(Debug, Clone)]
pub struct InMemoryIndex {
    collection: CollectionInfo,
    /// Insertion order
    entries: Vec<IndexEntry>,
    /// Chunk id -> position in `entries`
    positions: HashMap<ChunkId, usize>,
}

impl InMemoryIndex {
    /// Create an empty index
    pub fn new(collection: CollectionInfo) -> Self {
        Self {
            collection,
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Rebuild an index from a snapshot, refusing incompatible collections
    pub fn from_snapshot(snapshot: IndexSnapshot, expected: &CollectionInfo) -> Result<Self> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(KbqaError::IndexError(format!(
                "snapshot version {} is not supported (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }
        expected.ensure_compatible(&snapshot.collection)?;

        let mut index = Self::new(snapshot.collection);
        index.add(snapshot.chunks)?;
        Ok(index)
    }

    /// Look up a stored chunk
    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.positions.get(&id).map(|&pos| &self.entries[pos].chunk)
    }

    fn rebuild_positions(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.chunk.id, pos))
            .collect();
    }

    fn retain_entries<F>(&mut self, keep: F) -> usize
    where
        F: Fn(&Chunk) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|entry| keep(&entry.chunk));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.rebuild_positions();
        }
        removed
    }
}

impl VectorIndex for InMemoryIndex {
    fn collection(&self) -> &CollectionInfo {
        &self.collection
    }

    fn add(&mut self, chunks: Vec<Chunk>) -> Result<()> {
        validate_chunks(self.collection.dimension, &chunks)?;

        for chunk in chunks {
            match self.positions.get(&chunk.id) {
                Some(&pos) => {
                    // Update in place: keeps the original insertion position
                    self.entries[pos] = IndexEntry::new(chunk);
                }
                None => {
                    self.positions.insert(chunk.id, self.entries.len());
                    self.entries.push(IndexEntry::new(chunk));
                }
            }
        }

        Ok(())
    }

    fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<QueryResult>> {
        if query_vector.len() != self.collection.dimension {
            return Err(KbqaError::IndexError(format!(
                "query vector has dimension {}, collection '{}' expects {}",
                query_vector.len(),
                self.collection.name,
                self.collection.dimension
            )));
        }
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query_norm = l2_norm(query_vector);

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| {
                let score = if query_norm == 0.0 || entry.norm == 0.0 {
                    0.0
                } else {
                    let dot: f32 = query_vector
                        .iter()
                        .zip(entry.chunk.embedding.iter())
                        .map(|(a, b)| a * b)
                        .sum();
                    dot / (query_norm * entry.norm)
                };
                (pos, score)
            })
            .collect();

        // Stable sort: equal scores stay in insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(pos, score)| QueryResult {
                chunk: self.entries[pos].chunk.clone(),
                score,
            })
            .collect())
    }

    fn size(&self) -> usize {
        self.entries.len()
    }

    fn document_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.chunk.document_id)
            .collect::<HashSet<_>>()
            .len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }

    fn remove_document(&mut self, document_id: DocumentId) -> usize {
        self.retain_entries(|chunk| chunk.document_id != document_id)
    }

    fn retain_document_prefix(&mut self, document_id: DocumentId, live_chunks: u32) -> usize {
        self.retain_entries(|chunk| {
            chunk.document_id != document_id || chunk.chunk_index < live_chunks
        })
    }

    fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            version: SNAPSHOT_VERSION,
            collection: self.collection.clone(),
            created_at: Utc::now(),
            chunks: self.entries.iter().map(|e| e.chunk.clone()).collect(),
        }
    }
}

// ============================================================================
// Snapshot persistence
// ============================================================================

/// Write an index snapshot as JSON.
///
/// Writes to a temporary file first so a crash never leaves a torn snapshot.
pub fn save_snapshot(index: &dyn VectorIndex, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                KbqaError::StorageError(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
    }

    let snapshot = index.snapshot();
    let data = serde_json::to_vec(&snapshot)
        .map_err(|e| KbqaError::StorageError(format!("Failed to serialize snapshot: {e}")))?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, data).map_err(|e| {
        KbqaError::StorageError(format!("Failed to write {}: {e}", tmp_path.display()))
    })?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        KbqaError::StorageError(format!("Failed to move snapshot to {}: {e}", path.display()))
    })?;

    tracing::debug!(
        "Saved {} chunks of '{}' to {}",
        snapshot.chunks.len(),
        snapshot.collection.name,
        path.display()
    );
    Ok(())
}

/// Read a snapshot file
pub fn load_snapshot(path: &Path) -> Result<IndexSnapshot> {
    let data = std::fs::read(path).map_err(|e| {
        KbqaError::StorageError(format!("Failed to read {}: {e}", path.display()))
    })?;
    serde_json::from_slice(&data).map_err(|e| {
        KbqaError::StorageError(format!("Failed to parse snapshot {}: {e}", path.display()))
    })
}
