//! Error types for specification parsing.

use thiserror::Error;

/// Result type alias for parser operations.
pub type Result<T> = std::result::Result<T, SpecError>;

/// Errors raised while turning a raw document into endpoint operations.
#[derive(Error, Debug)]
pub enum SpecError {
    /// Neither JSON nor YAML, or a shape we do not recognize.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Recognized format, but required structure is missing or yields no
    /// operations.
    #[error("malformed specification: {0}")]
    MalformedSpec(String),
}

impl SpecError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedSpec(message.into())
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedFormat(message.into())
    }
}
