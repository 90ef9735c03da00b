//! Configuration for the API query service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::confidence::ConfidencePolicy;
use crate::error::{Result, RetrievalError};

/// Configuration for the API query service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory holding the persisted vector index.
    pub index_dir: PathBuf,

    /// Embedding provider configuration.
    pub embedding: EmbeddingConfig,

    /// Retrieval and synthesis configuration.
    pub query: QueryConfig,

    /// Remote specification fetching.
    pub fetch: FetchConfig,
}

impl ServiceConfig {
    /// Create a new configuration with default values.
    pub fn new(index_dir: impl Into<PathBuf>) -> Self {
        Self {
            index_dir: index_dir.into(),
            embedding: EmbeddingConfig::default(),
            query: QueryConfig::default(),
            fetch: FetchConfig::default(),
        }
    }

    /// Set the embedding configuration.
    pub fn with_embedding(mut self, config: EmbeddingConfig) -> Self {
        self.embedding = config;
        self
    }

    /// Set the query configuration.
    pub fn with_query(mut self, config: QueryConfig) -> Self {
        self.query = config;
        self
    }

    /// Set the fetch configuration.
    pub fn with_fetch(mut self, config: FetchConfig) -> Self {
        self.fetch = config;
        self
    }

    /// Parse and validate a TOML document. Missing keys take defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RetrievalError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML configuration file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RetrievalError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        self.query.validate()?;
        if self.fetch.timeout_secs == 0 {
            return Err(RetrievalError::Config("fetch.timeout_secs must be > 0".into()));
        }
        if self.fetch.max_body_bytes == 0 {
            return Err(RetrievalError::Config("fetch.max_body_bytes must be > 0".into()));
        }
        if self.embedding.dimension == Some(0) {
            return Err(RetrievalError::Config("embedding.dimension must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new(dirs::data_dir().unwrap_or_default().join("apiq/index"))
    }
}

/// Configuration for the embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which provider to use.
    pub provider: EmbeddingProviderType,

    /// Model to use for embeddings.
    pub model: Option<String>,

    /// Output dimension override.
    pub dimension: Option<usize>,

    /// Base URL for OpenAI-compatible endpoints.
    pub base_url: Option<String>,

    /// Whether to cache embeddings.
    pub cache_enabled: bool,

    /// Maximum cache size.
    pub cache_max_entries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::Hashing,
            model: None,
            dimension: None,
            base_url: None,
            cache_enabled: true,
            cache_max_entries: 10000,
        }
    }
}

/// Type of embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderType {
    /// OpenAI embeddings API.
    #[serde(rename = "openai")]
    OpenAI,
    /// Local token-hashing embeddings.
    Hashing,
}

/// Configuration for retrieval and synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Matches retrieved when the caller gives no `top_k`.
    pub top_k: usize,

    /// Upper bound on a caller-supplied `top_k`.
    pub max_top_k: usize,

    /// Weight of the candidate's similarity in confidence.
    pub similarity_weight: f32,

    /// Confidence added when the endpoint method matches the request intent.
    pub intent_bonus: f32,

    /// Lowest confidence reported when at least one match exists.
    pub confidence_floor: f32,
}

impl QueryConfig {
    fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RetrievalError::Config("query.top_k must be > 0".into()));
        }
        if self.max_top_k < self.top_k {
            return Err(RetrievalError::Config(
                "query.max_top_k must be >= query.top_k".into(),
            ));
        }
        ConfidencePolicy::new(
            self.similarity_weight,
            self.intent_bonus,
            self.confidence_floor,
        )?;
        Ok(())
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_top_k: 50,
            similarity_weight: 0.7,
            intent_bonus: 0.3,
            confidence_floor: 0.05,
        }
    }
}

/// Configuration for fetching specifications over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Whole-request timeout.
    pub timeout_secs: u64,

    /// Largest accepted response body.
    pub max_body_bytes: usize,
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}
