//! Error types for the vector index.

use thiserror::Error;

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors that can occur in the vector index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Unknown document id on lookup.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Vector length differs from the index dimension.
    #[error("dimension mismatch for {id}: expected {expected}, got {actual}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },

    /// A chunk in an upsert batch is owned by a different document.
    #[error("chunk {chunk_id} belongs to {actual}, not {expected}")]
    DocumentMismatch {
        chunk_id: String,
        expected: String,
        actual: String,
    },

    /// The same chunk id appears twice in one batch.
    #[error("duplicate chunk id in batch: {0}")]
    DuplicateChunk(String),

    /// The index was closed.
    #[error("index is closed")]
    Closed,

    /// A commit task panicked or was aborted.
    #[error("commit task failed: {0}")]
    Task(String),

    /// Storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Similarity computation error.
    #[error("similarity error: {0}")]
    Similarity(#[from] apiq_embeddings::EmbeddingError),
}

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to create the index directory.
    #[error("failed to create directory: {0}")]
    CreateDirectory(String),

    /// Failed to read a document file.
    #[error("failed to read file: {0}")]
    ReadFile(String),

    /// Failed to write a document file.
    #[error("failed to write file: {0}")]
    WriteFile(String),

    /// Failed to delete a document file.
    #[error("failed to delete file: {0}")]
    DeleteFile(String),
}
