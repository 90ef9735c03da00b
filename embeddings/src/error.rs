//! Error types for embedding providers.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors raised while turning text into vectors.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The provider is missing credentials or a model.
    #[error("embedding provider '{0}' is not configured")]
    ProviderNotConfigured(String),

    /// The remote API answered with a non-success status.
    #[error("embedding API returned {status}: {body}")]
    ApiStatus { status: u16, body: String },

    /// The provider answered with something we could not use.
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A vector had the wrong number of components.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A batch call returned a different number of vectors than inputs.
    #[error("batch returned {actual} embeddings for {expected} inputs")]
    BatchSizeMismatch { expected: usize, actual: usize },

    /// Input exceeds what the provider accepts.
    #[error("text too long: {length} characters, max {max_length}")]
    TextTooLong { length: usize, max_length: usize },

    /// Embedding cache could not be read or written.
    #[error("cache error: {0}")]
    Cache(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
