//! Error types for ingestion and querying.

use apiq_embeddings::EmbeddingError;
use apiq_spec_parser::SpecError;
use apiq_vector_index::IndexError;
use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors surfaced by the query service.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Neither JSON nor YAML, or an unrecognized document shape.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The document parsed but is missing required structure.
    #[error("malformed specification: {0}")]
    MalformedSpec(String),

    /// Remote retrieval failed.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Unknown document id on lookup.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Index error.
    #[error("index error: {0}")]
    Index(IndexError),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Rejected input, such as an empty query.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<SpecError> for RetrievalError {
    fn from(err: SpecError) -> Self {
        match err {
            SpecError::UnsupportedFormat(msg) => Self::UnsupportedFormat(msg),
            SpecError::MalformedSpec(msg) => Self::MalformedSpec(msg),
        }
    }
}

impl From<IndexError> for RetrievalError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotFound(doc_id) => Self::NotFound(doc_id),
            other => Self::Index(other),
        }
    }
}
