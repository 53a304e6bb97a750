//! Query embedding cache
//!
//! A repeated question skips the embedding backend. Entries are keyed by the
//! embedding model and the exact query text, so switching models never
//! serves a vector from the wrong space.
//!
//! Search results are not cached: they depend on the index contents, which
//! change on every ingestion.

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Embeddings kept at most (384 floats each for the default model)
const MAX_ENTRIES: u64 = 10_000;

/// Embeddings are stable for a model, so entries only age out slowly
const TIME_TO_LIVE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model: String,
    text: String,
}

impl CacheKey {
    fn new(model: &str, text: &str) -> Self {
        Self {
            model: model.to_string(),
            text: text.to_string(),
        }
    }
}

/// Lookup counters shared by clones of one cache
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Query embeddings by model and text
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Cache<CacheKey, Vec<f32>>,
    counters: Arc<Counters>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .time_to_live(TIME_TO_LIVE)
                .build(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// The cached embedding of `text` under `model`, counting the lookup
    pub async fn get(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        let found = self.cache.get(&CacheKey::new(model, text)).await;
        let counter = if found.is_some() {
            &self.counters.hits
        } else {
            &self.counters.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    pub async fn put(&self, model: &str, text: &str, embedding: Vec<f32>) {
        self.cache.insert(CacheKey::new(model, text), embedding).await;
    }

    /// Lookup counts so far
    pub fn stats(&self) -> CacheStats {
        CacheStats::from_counts(
            self.counters.hits.load(Ordering::Relaxed),
            self.counters.misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Share of lookups served from the cache, 0.0 before any lookup
    pub hit_rate: f64,
}

impl CacheStats {
    fn from_counts(hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        Self {
            hits,
            misses,
            hit_rate,
        }
    }
}
