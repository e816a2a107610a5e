use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ChunkwiseError;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".chunkwise.toml";

/// Top-level configuration loaded from `.chunkwise.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
/// The binary applies CLI flags; [`ChunkwiseConfig::apply_env`] applies the
/// environment layer.
///
/// # Examples
///
/// ```
/// use chunkwise_core::ChunkwiseConfig;
///
/// let config = ChunkwiseConfig::default();
/// assert_eq!(config.chunker.max_chunk_size, 1500);
/// assert_eq!(config.store.collection, "CodeChunks");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkwiseConfig {
    /// Chunking budgets.
    #[serde(default)]
    pub chunker: ChunkerConfig,
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Vector store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Chat model settings for `ask`.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Directory indexing settings.
    #[serde(default)]
    pub index: IndexConfig,
    /// Retrieval and context assembly settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl ChunkwiseConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Io`] if the file cannot be read, or
    /// [`ChunkwiseError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use chunkwise_core::ChunkwiseConfig;
    /// use std::path::Path;
    ///
    /// let config = ChunkwiseConfig::from_file(Path::new(".chunkwise.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, ChunkwiseError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunkwise_core::ChunkwiseConfig;
    ///
    /// let toml = r#"
    /// [chunker]
    /// max_chunk_size = 800
    /// "#;
    /// let config = ChunkwiseConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.chunker.max_chunk_size, 800);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, ChunkwiseError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Render the configuration as TOML, as written by `chunkwise init`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String, ChunkwiseError> {
        toml::to_string_pretty(self).map_err(|e| ChunkwiseError::Config(e.to_string()))
    }

    /// Override settings from process environment variables.
    ///
    /// Recognized: `WEAVIATE_URL`, `WEAVIATE_COLLECTION`, `OLLAMA_URL`,
    /// `OLLAMA_EMBED_MODEL`, `OLLAMA_CHAT_MODEL`, `CHUNKWISE_EMBEDDING_API_KEY`,
    /// `CHUNKWISE_LLM_API_KEY`.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Override settings from an arbitrary variable lookup.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunkwise_core::ChunkwiseConfig;
    ///
    /// let mut config = ChunkwiseConfig::default();
    /// config.apply_env_with(|key| (key == "OLLAMA_CHAT_MODEL").then(|| "qwen2.5".to_string()));
    /// assert_eq!(config.llm.model, "qwen2.5");
    /// ```
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("WEAVIATE_URL") {
            self.store.url = url;
        }
        if let Some(collection) = get("WEAVIATE_COLLECTION") {
            self.store.collection = collection;
        }
        if let Some(url) = get("OLLAMA_URL") {
            if self.embedding.provider == "ollama" {
                self.embedding.base_url = Some(url.clone());
            }
            if self.llm.provider == "ollama" {
                self.llm.base_url = Some(url);
            }
        }
        if let Some(model) = get("OLLAMA_EMBED_MODEL") {
            self.embedding.model = model;
        }
        if let Some(model) = get("OLLAMA_CHAT_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = get("CHUNKWISE_EMBEDDING_API_KEY") {
            self.embedding.api_key = Some(key);
        }
        if let Some(key) = get("CHUNKWISE_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkwiseError::Config`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ChunkwiseError> {
        if self.chunker.max_chunk_size == 0 {
            return Err(ChunkwiseError::Config(
                "chunker.max_chunk_size must be greater than zero".into(),
            ));
        }
        if self.chunker.fallback_lines == 0 {
            return Err(ChunkwiseError::Config(
                "chunker.fallback_lines must be greater than zero".into(),
            ));
        }
        if self.chunker.fallback_overlap >= self.chunker.fallback_lines {
            return Err(ChunkwiseError::Config(format!(
                "chunker.fallback_overlap ({}) must be smaller than fallback_lines ({})",
                self.chunker.fallback_overlap, self.chunker.fallback_lines
            )));
        }
        if self.embedding.dimensions == 0 {
            return Err(ChunkwiseError::Config(
                "embedding.dimensions must be greater than zero".into(),
            ));
        }
        if self.embedding.batch_size == 0 || self.embedding.max_in_flight == 0 {
            return Err(ChunkwiseError::Config(
                "embedding.batch_size and embedding.max_in_flight must be greater than zero".into(),
            ));
        }
        if self.index.workers == 0 {
            return Err(ChunkwiseError::Config(
                "index.workers must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Chunking budgets.
///
/// # Examples
///
/// ```
/// use chunkwise_core::ChunkerConfig;
///
/// let config = ChunkerConfig::default();
/// assert_eq!(config.fallback_lines, 50);
/// assert_eq!(config.fallback_overlap, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Maximum chunk content length in characters (default: 1500).
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    /// Lines per fallback window (default: 50).
    #[serde(default = "default_fallback_lines")]
    pub fallback_lines: usize,
    /// Lines shared between consecutive fallback windows (default: 5).
    #[serde(default = "default_fallback_overlap")]
    pub fallback_overlap: usize,
}

fn default_max_chunk_size() -> usize {
    1500
}

fn default_fallback_lines() -> usize {
    50
}

fn default_fallback_overlap() -> usize {
    5
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            fallback_lines: default_fallback_lines(),
            fallback_overlap: default_fallback_overlap(),
        }
    }
}

/// Configuration for the embedding provider.
///
/// # Examples
///
/// ```
/// use chunkwise_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.provider, "ollama");
/// assert_eq!(config.model, "mxbai-embed-large");
/// assert_eq!(config.dimensions, 1024);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: `"ollama"` or `"openai"` (any compatible endpoint).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Base URL of the provider (default depends on the provider).
    pub base_url: Option<String>,
    /// API key, sent as a bearer token when set.
    pub api_key: Option<String>,
    /// Model name (default: `"mxbai-embed-large"`).
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Expected vector dimensionality (default: 1024).
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// Texts per request (default: 32).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent requests across all workers (default: 4).
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Retries for transient failures (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff between retries in milliseconds, doubled per attempt (default: 500).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Per-request timeout in seconds (default: 60).
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

fn default_embedding_provider() -> String {
    "ollama".into()
}

fn default_embedding_model() -> String {
    "mxbai-embed-large".into()
}

fn default_embedding_dimensions() -> usize {
    1024
}

fn default_batch_size() -> usize {
    32
}

fn default_max_in_flight() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_embedding_timeout() -> u64 {
    60
}

impl EmbeddingConfig {
    /// Base URL with the provider default applied.
    pub fn resolved_base_url(&self) -> String {
        let url = match (&self.base_url, self.provider.as_str()) {
            (Some(url), _) => url.as_str(),
            (None, "openai") => "https://api.openai.com",
            (None, _) => "http://localhost:11434",
        };
        url.trim_end_matches('/').to_string()
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            base_url: None,
            api_key: None,
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            batch_size: default_batch_size(),
            max_in_flight: default_max_in_flight(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

/// Vector store configuration.
///
/// # Examples
///
/// ```
/// use chunkwise_core::StoreConfig;
///
/// let config = StoreConfig::default();
/// assert_eq!(config.backend, "weaviate");
/// assert_eq!(config.url, "http://localhost:8080");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend: `"weaviate"` or `"sqlite"`.
    #[serde(default = "default_store_backend")]
    pub backend: String,
    /// Weaviate base URL.
    #[serde(default = "default_store_url")]
    pub url: String,
    /// Collection (Weaviate class) name.
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Database file for the sqlite backend.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Weaviate API key, sent as a bearer token when set.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
    /// Retries after a timed-out or refused request (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff between retries in milliseconds, doubled per attempt (default: 500).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_store_backend() -> String {
    "weaviate".into()
}

fn default_store_url() -> String {
    "http://localhost:8080".into()
}

fn default_collection() -> String {
    "CodeChunks".into()
}

fn default_store_path() -> PathBuf {
    PathBuf::from(".chunkwise/index.db")
}

fn default_store_timeout() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            url: default_store_url(),
            collection: default_collection(),
            path: default_store_path(),
            api_key: None,
            timeout_secs: default_store_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Chat model configuration.
///
/// # Examples
///
/// ```
/// use chunkwise_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "llama3.2");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (`"ollama"`, `"openai"`); both speak the chat completions API.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    /// Model identifier.
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Request timeout in seconds (default: 120).
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_provider() -> String {
    "ollama".into()
}

fn default_llm_model() -> String {
    "llama3.2".into()
}

fn default_llm_timeout() -> u64 {
    120
}

impl LlmConfig {
    /// Base URL with the provider default applied.
    pub fn resolved_base_url(&self) -> String {
        let url = match (&self.base_url, self.provider.as_str()) {
            (Some(url), _) => url.as_str(),
            (None, "openai") => "https://api.openai.com",
            (None, _) => "http://localhost:11434",
        };
        url.trim_end_matches('/').to_string()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: None,
            base_url: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// Directory indexing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Files indexed concurrently (default: 4).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Extensions to index, without dots; empty means every supported one.
    #[serde(default)]
    pub extensions: Vec<String>,
}

fn default_workers() -> usize {
    4
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            extensions: Vec::new(),
        }
    }
}

/// Retrieval and context assembly configuration.
///
/// # Examples
///
/// ```
/// use chunkwise_core::RetrievalConfig;
///
/// let config = RetrievalConfig::default();
/// assert_eq!(config.context_size, 5);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Chunks retrieved per question (default: 5).
    #[serde(default = "default_context_size")]
    pub context_size: usize,
    /// Token budget for the assembled context (default: 4096).
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

fn default_context_size() -> usize {
    5
}

fn default_max_context_tokens() -> usize {
    4096
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            context_size: default_context_size(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = ChunkwiseConfig::default();
        assert_eq!(config.chunker.max_chunk_size, 1500);
        assert_eq!(config.chunker.fallback_lines, 50);
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.embedding.dimensions, 1024);
        assert_eq!(config.store.backend, "weaviate");
        assert_eq!(config.store.collection, "CodeChunks");
        assert_eq!(config.llm.model, "llama3.2");
        assert_eq!(config.index.workers, 4);
        assert!(config.index.extensions.is_empty());
        assert_eq!(config.retrieval.context_size, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[chunker]
max_chunk_size = 900

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dimensions = 1536
batch_size = 16

[store]
backend = "sqlite"
path = "/tmp/idx.db"

[llm]
model = "qwen2.5-coder"

[index]
workers = 8
extensions = ["py", "rs"]

[retrieval]
context_size = 8
max_context_tokens = 2000
"#;
        let config = ChunkwiseConfig::from_toml(toml).unwrap();
        assert_eq!(config.chunker.max_chunk_size, 900);
        assert_eq!(config.chunker.fallback_lines, 50);
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.embedding.resolved_base_url(), "https://api.openai.com");
        assert_eq!(config.store.backend, "sqlite");
        assert_eq!(config.store.path, PathBuf::from("/tmp/idx.db"));
        assert_eq!(config.llm.model, "qwen2.5-coder");
        assert_eq!(config.index.extensions, vec!["py", "rs"]);
        assert_eq!(config.retrieval.max_context_tokens, 2000);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = ChunkwiseConfig::from_toml("").unwrap();
        assert_eq!(config.chunker.max_chunk_size, 1500);
        assert_eq!(config.embedding.resolved_base_url(), "http://localhost:11434");
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = ChunkwiseConfig::from_toml("{{invalid}}");
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = ChunkwiseConfig::default();
        config.apply_env_with(|key| match key {
            "WEAVIATE_URL" => Some("http://weaviate:8080".into()),
            "WEAVIATE_COLLECTION" => Some("Repo".into()),
            "OLLAMA_URL" => Some("http://ollama:11434/".into()),
            "OLLAMA_EMBED_MODEL" => Some("nomic-embed-text".into()),
            "OLLAMA_CHAT_MODEL" => Some("  ".into()),
            _ => None,
        });
        assert_eq!(config.store.url, "http://weaviate:8080");
        assert_eq!(config.store.collection, "Repo");
        assert_eq!(config.embedding.resolved_base_url(), "http://ollama:11434");
        assert_eq!(config.llm.resolved_base_url(), "http://ollama:11434");
        assert_eq!(config.embedding.model, "nomic-embed-text");
        assert_eq!(config.llm.model, "llama3.2");
    }

    #[test]
    fn validate_rejects_overlap_not_below_window() {
        let mut config = ChunkwiseConfig::default();
        config.chunker.fallback_overlap = 50;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fallback_overlap"));
    }

    #[test]
    fn to_toml_round_trips() {
        let config = ChunkwiseConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = ChunkwiseConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.store.collection, config.store.collection);
        assert_eq!(parsed.chunker.max_chunk_size, config.chunker.max_chunk_size);
    }
}
