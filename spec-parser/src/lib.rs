//! API specification parsing and chunking.
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌──────────────────┐   ┌─────────┐
//! │ raw bytes │──▶│ RawSpec  │──▶│ EndpointOperation│──▶│  Chunk  │
//! │ JSON/YAML │   │ (typed)  │   │ (format-neutral) │   │ + meta  │
//! └───────────┘   └──────────┘   └──────────────────┘   └─────────┘
//!                  OpenApi2
//!                  OpenApi3
//!                  Postman
//! ```
//!
//! Format quirks stay inside [`openapi`] and [`postman`]; everything after
//! [`parse`] only sees [`EndpointOperation`] and [`Chunk`].

pub mod chunker;
pub mod error;
pub mod format;
pub mod openapi;
pub mod operation;
pub mod postman;

pub use chunker::{Chunk, ChunkMetadata, chunk, render_text};
pub use error::{Result, SpecError};
pub use format::{RawSpec, SourceType};
pub use operation::{EndpointOperation, HttpMethod, Parameter, ParameterLocation};

use tracing::info;

/// Normalized result of parsing one document.
#[derive(Debug, Clone)]
pub struct ParsedSpec {
    pub source_type: SourceType,
    /// `info.title` for OpenAPI, `info.name` for Postman.
    pub title: Option<String>,
    pub version: Option<String>,
    pub base_url: Option<String>,
    pub operations: Vec<EndpointOperation>,
}

/// Parse a raw document into endpoint operations.
///
/// `declared` skips shape sniffing. A document that yields no operations is
/// [`SpecError::MalformedSpec`].
pub fn parse(raw: &[u8], declared: Option<SourceType>) -> Result<ParsedSpec> {
    let spec = RawSpec::from_bytes(raw, declared)?;
    let parsed = match &spec {
        RawSpec::OpenApi2(doc) => doc.normalize()?,
        RawSpec::OpenApi3(doc) => doc.normalize()?,
        RawSpec::Postman(collection) => collection.normalize()?,
    };

    if parsed.operations.is_empty() {
        return Err(SpecError::malformed(format!(
            "{} document contains no operations",
            parsed.source_type
        )));
    }

    info!(
        source_type = %parsed.source_type,
        title = ?parsed.title,
        operations = parsed.operations.len(),
        "parsed specification"
    );
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_paths_is_malformed() {
        let err = parse(br#"{"openapi": "3.0.0", "paths": {}}"#, None).unwrap_err();
        assert!(matches!(err, SpecError::MalformedSpec(_)), "{err}");
    }

    #[test]
    fn test_declared_format_skips_sniffing() {
        let raw = br#"{"item": [{"name": "Ping", "request": "https://x.test/ping"}]}"#;
        let parsed = parse(raw, Some(SourceType::Postman)).unwrap();
        assert_eq!(parsed.source_type, SourceType::Postman);
        assert_eq!(parsed.operations.len(), 1);
    }
}
