//! kbqa Configuration Management
//!
//! Handles configuration from environment variables and TOML files
//! with sensible defaults for local development.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Generation (LLM) provider configuration
    pub llm: LlmConfig,

    /// Embedding model configuration
    pub embedding: EmbeddingConfig,

    /// Retrieval and answer composition
    pub rag: RagConfig,

    /// Index storage
    pub index: IndexConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileReadError {
            path: path.clone(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path,
            message: e.to_string(),
        })
    }

    /// Merge with environment variables (env takes precedence)
    pub fn with_env_override(mut self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Load from an optional file, then apply environment overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env_override()
    }

    /// Apply overrides from a variable lookup
    fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(host) = lookup("API_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            self.server.port = parse_value("API_PORT", port)?;
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        // LLM
        if let Some(provider) = lookup("LLM_PROVIDER") {
            self.llm.provider = provider.parse()?;
        }
        // Provider-specific key first, generic key wins if both are set
        let provider_key = match self.llm.provider {
            LlmProvider::Groq => lookup("GROQ_API_KEY"),
            LlmProvider::OpenAI => lookup("OPENAI_API_KEY"),
            LlmProvider::Ollama => None,
        };
        if let Some(key) = lookup("LLM_API_KEY").or(provider_key) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.llm.base_url = Some(url);
        }
        if let Some(url) = lookup("OLLAMA_URL") {
            self.llm.ollama_url = url.clone();
            self.embedding.ollama_url = url;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(temperature) = lookup("LLM_TEMPERATURE") {
            self.llm.temperature = parse_value("LLM_TEMPERATURE", temperature)?;
        }
        if let Some(timeout) = lookup("LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_value("LLM_TIMEOUT_SECS", timeout)?;
        }

        // Embedding
        if let Some(provider) = lookup("EMBEDDING_PROVIDER") {
            self.embedding.provider = provider.parse()?;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(dimension) = lookup("EMBEDDING_DIMENSION") {
            self.embedding.dimension = Some(parse_value("EMBEDDING_DIMENSION", dimension)?);
        }
        if self.embedding.provider == EmbeddingProvider::OpenAI {
            if let Some(key) = lookup("OPENAI_API_KEY") {
                self.embedding.api_key = Some(key);
            }
        }

        // RAG
        if let Some(collection) = lookup("KBQA_COLLECTION") {
            self.rag.collection = collection;
        }
        if let Some(dir) = lookup("DOCUMENTS_DIR") {
            self.rag.documents_dir = PathBuf::from(dir);
        }
        if let Some(top_k) = lookup("RAG_TOP_K") {
            self.rag.top_k = parse_value("RAG_TOP_K", top_k)?;
        }

        // Index
        if let Some(path) = lookup("INDEX_SNAPSHOT_PATH") {
            self.index.snapshot_path = Some(PathBuf::from(path));
        }

        // Logging
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("LOG_JSON") {
            self.logging.json_format = parse_value("LOG_JSON", json)?;
        }

        Ok(())
    }

    /// Check the settings that must be right before anything starts.
    ///
    /// Failures here are fatal: callers halt startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm.provider.requires_api_key()
            && self.llm.api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::MissingRequired(
                self.llm.provider.api_key_env().to_string(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::MissingRequired("LLM_MODEL".to_string()));
        }
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "LLM_TEMPERATURE".to_string(),
                value: self.llm.temperature.to_string(),
            });
        }
        if self.embedding.model.trim().is_empty() {
            return Err(ConfigError::MissingRequired("EMBEDDING_MODEL".to_string()));
        }
        if self.embedding.provider == EmbeddingProvider::OpenAI
            && self.embedding.api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::MissingRequired("OPENAI_API_KEY".to_string()));
        }
        if self.rag.collection.trim().is_empty() {
            return Err(ConfigError::MissingRequired("KBQA_COLLECTION".to_string()));
        }
        if self.rag.top_k == 0 || self.rag.top_k > self.rag.max_top_k {
            return Err(ConfigError::InvalidValue {
                key: "RAG_TOP_K".to_string(),
                value: self.rag.top_k.to_string(),
            });
        }
        if self.rag.chunk_size == 0 || self.rag.chunk_size > self.embedding.max_input_chars {
            // Larger chunks would be rejected by the embedder at ingest
            return Err(ConfigError::InvalidValue {
                key: "rag.chunk_size".to_string(),
                value: self.rag.chunk_size.to_string(),
            });
        }
        if self.rag.max_passages == 0 {
            return Err(ConfigError::InvalidValue {
                key: "rag.max_passages".to_string(),
                value: "0".to_string(),
            });
        }
        if self.rag.max_per_passage == 0 {
            return Err(ConfigError::InvalidValue {
                key: "rag.max_per_passage".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    })
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Enable CORS
    pub cors_enabled: bool,

    /// Allowed origins for CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 120,
            cors_enabled: true,
            // Empty by default - set via CORS_ORIGINS env var
            cors_origins: vec![],
        }
    }
}

/// Generation provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider to use
    pub provider: LlmProvider,

    /// API key (OpenAI or Groq)
    pub api_key: Option<String>,

    /// Base URL override for OpenAI-compatible APIs
    pub base_url: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Model name to use
    pub model: String,

    /// Maximum tokens for completion
    pub max_tokens: u32,

    /// Temperature for generation (0.0 - 1.0)
    pub temperature: f32,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Retries after a failed or timed out generation call
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::Groq,
            api_key: None,
            base_url: None,
            ollama_url: "http://localhost:11434".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

/// Supported generation providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Groq,
    Ollama,
}

impl LlmProvider {
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, Self::Ollama)
    }

    /// Environment variable that carries this provider's key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::Groq => "GROQ_API_KEY",
            Self::Ollama => "LLM_API_KEY",
        }
    }

    /// Default endpoint for OpenAI-compatible providers
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Ollama => "http://localhost:11434",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "groq" => Ok(Self::Groq),
            "ollama" => Ok(Self::Ollama),
            _ => Err(ConfigError::InvalidValue {
                key: "LLM_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Embedding model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding backend
    pub provider: EmbeddingProvider,

    /// Model identifier (part of the collection identity)
    pub model: String,

    /// Output dimension; inferred from the model name when unset
    pub dimension: Option<usize>,

    /// OpenAI API key
    pub api_key: Option<String>,

    /// Ollama server URL
    pub ollama_url: String,

    /// Maximum input length accepted by the model, in characters
    pub max_input_chars: usize,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Cache query embeddings
    pub cache_enabled: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Ollama,
            model: "all-minilm".to_string(),
            dimension: None,
            api_key: None,
            ollama_url: "http://localhost:11434".to_string(),
            // all-MiniLM-L6-v2 truncates at 256 word pieces
            max_input_chars: 2000,
            timeout_secs: 30,
            cache_enabled: true,
        }
    }
}

/// Supported embedding backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    OpenAI,
    Ollama,
    /// Local feature-hashing embedder, no network
    Hashing,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "hashing" => Ok(Self::Hashing),
            _ => Err(ConfigError::InvalidValue {
                key: "EMBEDDING_PROVIDER".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// RAG pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Collection (knowledge base) name
    pub collection: String,

    /// Directory scanned for source documents
    pub documents_dir: PathBuf,

    /// File extensions picked up by the loader
    pub extensions: Vec<String>,

    /// Default number of passages to retrieve
    pub top_k: usize,

    /// Upper bound accepted for top_k
    pub max_top_k: usize,

    /// Results must score above this to count as related
    pub min_score: f32,

    /// Maximum passages placed in the context
    pub max_passages: usize,

    /// Per-passage character limit in the context
    pub max_per_passage: usize,

    /// Chunk ceiling in characters
    pub chunk_size: usize,

    /// Domain description used in the system prompt
    pub assistant_scope: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            collection: "rag_docs".to_string(),
            documents_dir: PathBuf::from("data"),
            extensions: vec!["txt".to_string(), "md".to_string()],
            top_k: 5,
            max_top_k: 10,
            min_score: 0.0,
            max_passages: 5,
            max_per_passage: 500,
            chunk_size: 1000,
            assistant_scope: "programming, web development, Python tkinter, \
                French-English translation, etc."
                .to_string(),
        }
    }
}

/// Index storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Where the index snapshot is written; `None` keeps it in memory only
    pub snapshot_path: Option<PathBuf>,

    /// Rebuild from documents when the snapshot is missing or incompatible
    pub rebuild_on_mismatch: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            snapshot_path: Some(PathBuf::from("data/.kbqa/index.json")),
            rebuild_on_mismatch: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or an EnvFilter directive
    pub level: String,

    /// JSON format for logs
    pub json_format: bool,

    /// Include file/line in logs
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` wins over the configured level when set.
    pub fn init(&self) {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.clone()));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_file(self.include_location)
            .with_line_number(self.include_location)
            .with_writer(std::io::stderr);

        // A second init (tests, embedded use) keeps the first subscriber
        let result = if self.json_format {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        if let Err(e) = result {
            tracing::debug!("Tracing subscriber already installed: {}", e);
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rag.max_per_passage, 500);
        assert_eq!(config.rag.collection, "rag_docs");
        assert_eq!(config.llm.model, "llama-3.1-8b-instant");
        assert!((config.llm.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_llm_provider_parse() {
        assert_eq!("groq".parse::<LlmProvider>().unwrap(), LlmProvider::Groq);
        assert_eq!(
            "OpenAI".parse::<LlmProvider>().unwrap(),
            LlmProvider::OpenAI
        );
        assert_eq!(
            "ollama".parse::<LlmProvider>().unwrap(),
            LlmProvider::Ollama
        );
        assert!("invalid".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("GROQ_API_KEY", "gsk_test"),
                ("LLM_TEMPERATURE", "0.2"),
                ("EMBEDDING_PROVIDER", "hashing"),
                ("KBQA_COLLECTION", "python_docs"),
                ("RAG_TOP_K", "3"),
            ]))
            .unwrap();

        assert_eq!(config.llm.api_key.as_deref(), Some("gsk_test"));
        assert!((config.llm.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.embedding.provider, EmbeddingProvider::Hashing);
        assert_eq!(config.rag.collection, "python_docs");
        assert_eq!(config.rag.top_k, 3);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("API_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate_requires_api_key() {
        let config = AppConfig::default();
        match config.validate() {
            Err(ConfigError::MissingRequired(key)) => assert_eq!(key, "GROQ_API_KEY"),
            other => panic!("expected missing key, got {other:?}"),
        }

        let mut config = AppConfig::default();
        config.llm.api_key = Some("gsk_test".to_string());
        assert!(config.validate().is_ok());

        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::Ollama;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_temperature() {
        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::Ollama;
        config.llm.temperature = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_empty_context_limits() {
        let valid = || {
            let mut config = AppConfig::default();
            config.llm.provider = LlmProvider::Ollama;
            config
        };
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.rag.max_passages = 0;
        match config.validate() {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "rag.max_passages"),
            other => panic!("expected invalid max_passages, got {other:?}"),
        }

        let mut config = valid();
        config.rag.max_per_passage = 0;
        match config.validate() {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "rag.max_per_passage"),
            other => panic!("expected invalid max_per_passage, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_chunk_size_within_embedder_limit() {
        let mut config = AppConfig::default();
        config.llm.provider = LlmProvider::Ollama;
        config.embedding.max_input_chars = 800;
        config.rag.chunk_size = 800;
        assert!(config.validate().is_ok());

        config.rag.chunk_size = 801;
        match config.validate() {
            Err(ConfigError::InvalidValue { key, value }) => {
                assert_eq!(key, "rag.chunk_size");
                assert_eq!(value, "801");
            }
            other => panic!("expected invalid chunk_size, got {other:?}"),
        }
    }

    #[test]
    fn test_from_file_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kbqa.toml");
        std::fs::write(
            &path,
            r#"
[llm]
provider = "ollama"
model = "llama3.1"

[rag]
collection = "python_docs"
max_per_passage = 300
"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.llm.model, "llama3.1");
        assert_eq!(config.rag.collection, "python_docs");
        assert_eq!(config.rag.max_per_passage, 300);
        // Unset fields fall back to defaults
        assert_eq!(config.rag.top_k, 5);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_from_file_missing() {
        let err = AppConfig::from_file("/nonexistent/kbqa.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError { .. }));
    }
}
