//! Embedding clients for generating vector representations
//!
//! Supports the OpenAI and Ollama embedding APIs plus a local
//! feature-hashing embedder that needs no network.

use async_trait::async_trait;
use kbqa_core::{EmbeddingConfig, EmbeddingProvider, KbqaError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;
use twox_hash::XxHash64;

// ============================================================================
// Embedding Trait
// ============================================================================

/// Trait for embedding generation
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts, one per input, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimension
    fn dimension(&self) -> usize;

    /// Model identifier, part of the collection identity
    fn model_id(&self) -> &str;

    /// Longest input accepted, in characters
    fn max_input_chars(&self) -> usize;
}

/// Reject inputs the backend would silently truncate
fn check_input(text: &str, max_chars: usize) -> Result<()> {
    let len = text.chars().count();
    if len > max_chars {
        return Err(KbqaError::EmbeddingError(format!(
            "input of {len} characters exceeds the model limit of {max_chars}"
        )));
    }
    Ok(())
}

fn check_inputs(texts: &[String], max_chars: usize) -> Result<()> {
    texts.iter().try_for_each(|t| check_input(t, max_chars))
}

/// Check a backend response against what was asked for
fn check_output(embeddings: &[Vec<f32>], expected_count: usize, dimension: usize) -> Result<()> {
    if embeddings.len() != expected_count {
        return Err(KbqaError::EmbeddingError(format!(
            "backend returned {} embeddings for {} inputs",
            embeddings.len(),
            expected_count
        )));
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
        return Err(KbqaError::EmbeddingError(format!(
            "backend returned dimension {}, expected {}",
            bad.len(),
            dimension
        )));
    }
    Ok(())
}

fn http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| KbqaError::ConfigError(format!("Failed to build HTTP client: {e}")))
}

// ============================================================================
// OpenAI Embedding Client
// ============================================================================

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// OpenAI embedding API client
pub struct OpenAiEmbedding {
    client: Client,
    api_key: String,
    model: String,
    dimension: usize,
    max_input_chars: usize,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiEmbedding {
    /// Create a new OpenAI embedding client
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = Self::default_dimension(&model);

        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model,
            dimension,
            max_input_chars: 8000,
        }
    }

    /// Create from config
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| KbqaError::ConfigError("OpenAI API key required".to_string()))?;

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            api_key: api_key.clone(),
            model: config.model.clone(),
            dimension: config
                .dimension
                .unwrap_or_else(|| Self::default_dimension(&config.model)),
            max_input_chars: config.max_input_chars,
        })
    }

    fn default_dimension(model: &str) -> usize {
        match model {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_batch(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| KbqaError::EmbeddingError("No embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        check_inputs(texts, self.max_input_chars)?;

        let request = OpenAiEmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let response = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| KbqaError::EmbeddingError(format!("Embedding request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(KbqaError::EmbeddingError(format!(
                "OpenAI embedding error ({status}): {error_text}"
            )));
        }

        let result: OpenAiEmbeddingResponse = response.json().await.map_err(|e| {
            KbqaError::EmbeddingError(format!("Failed to parse embedding response: {e}"))
        })?;

        // Sort by index and extract embeddings
        let mut data = result.data;
        data.sort_by_key(|e| e.index);
        let embeddings: Vec<Vec<f32>> = data.into_iter().map(|e| e.embedding).collect();

        check_output(&embeddings, texts.len(), self.dimension)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }
}

// ============================================================================
// Ollama Embedding Client
// ============================================================================

/// Ollama embedding API client
pub struct OllamaEmbedding {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    max_input_chars: usize,
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedding {
    /// Create a new Ollama embedding client
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimension = Self::default_dimension(&model);

        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model,
            dimension,
            max_input_chars: 2000,
        }
    }

    /// Create from config
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config
                .dimension
                .unwrap_or_else(|| Self::default_dimension(&config.model)),
            max_input_chars: config.max_input_chars,
        })
    }

    fn default_dimension(model: &str) -> usize {
        let name = model.split(':').next().unwrap_or(model);
        match name {
            "all-minilm" => 384,
            "mxbai-embed-large" => 1024,
            _ => 768, // nomic-embed-text and most others
        }
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        check_input(text, self.max_input_chars)?;

        let request = OllamaEmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                KbqaError::EmbeddingError(format!("Ollama embedding request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(KbqaError::EmbeddingError(format!(
                "Ollama embedding error ({status}): {error_text}"
            )));
        }

        let result: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            KbqaError::EmbeddingError(format!("Failed to parse embedding response: {e}"))
        })?;

        check_output(std::slice::from_ref(&result.embedding), 1, self.dimension)?;
        Ok(result.embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        // Ollama doesn't have native batch embedding, so we process sequentially
        check_inputs(texts, self.max_input_chars)?;
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }
}

// ============================================================================
// Hashing Embedder
// ============================================================================

/// Words too common to carry meaning
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when",
    "where", "which", "who", "why", "with", "you",
];

/// Deterministic local embedder using signed feature hashing.
///
/// Each content word is hashed into one of `dimension` buckets with a
/// hash-derived sign, and the result is L2-normalized. Texts sharing words
/// score high; unrelated texts score near zero.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
    max_input_chars: usize,
}

impl HashingEmbedder {
    pub const MODEL_ID: &'static str = "hashing-v1";

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            model_id: Self::MODEL_ID.to_string(),
            max_input_chars: usize::MAX,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let mut embedder = Self::new(config.dimension.unwrap_or(384));
        embedder.max_input_chars = config.max_input_chars;
        embedder
    }

    /// Override the input ceiling
    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .filter(|t| !STOPWORDS.contains(&t.as_str()))
            .map(|t| {
                // Crude plural folding: "sequences" and "sequence" share a bucket
                if t.chars().count() > 3 && t.ends_with('s') && !t.ends_with("ss") {
                    t[..t.len() - 1].to_string()
                } else {
                    t
                }
            })
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in Self::tokens(text) {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.as_bytes());
            let hash = hasher.finish();

            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = crate::l2_norm(&vector);
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingClient for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        check_input(text, self.max_input_chars)?;
        Ok(self.vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        check_inputs(texts, self.max_input_chars)?;
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }
}

// ============================================================================
// Factory function
// ============================================================================

/// Create an embedding client from config
pub fn create_embedding_client(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>> {
    let client: Arc<dyn EmbeddingClient> = match config.provider {
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbedding::from_config(config)?),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedding::from_config(config)?),
        EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::from_config(config)),
    };

    tracing::info!(
        "Embedding client: {} (dimension {})",
        client.model_id(),
        client.dimension()
    );
    Ok(client)
}

// ============================================================================
// Tests
// ============================================================================
