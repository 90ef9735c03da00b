//! One retrievable chunk per endpoint operation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::operation::{EndpointOperation, HttpMethod, Parameter};

/// Structured metadata kept alongside a chunk's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub method: HttpMethod,
    pub path: String,
    pub summary: String,
    pub tags: Vec<String>,
    pub parameter_names: Vec<String>,
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub body_fields: Vec<String>,
}

impl ChunkMetadata {
    /// `"{METHOD} {path}"`.
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// The smallest indexed unit of documentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Turn operations into chunks, preserving order.
pub fn chunk(doc_id: &str, operations: &[EndpointOperation]) -> Vec<Chunk> {
    let mut seen: HashMap<(HttpMethod, &str), u32> = HashMap::new();

    operations
        .iter()
        .map(|op| {
            let occurrence = seen.entry((op.method, op.path.as_str())).or_insert(0);
            let chunk_id = chunk_id(doc_id, op.method, &op.path, *occurrence);
            *occurrence += 1;

            Chunk {
                chunk_id,
                doc_id: doc_id.to_string(),
                text: render_text(op),
                metadata: ChunkMetadata {
                    method: op.method,
                    path: op.path.clone(),
                    summary: op.summary.clone(),
                    tags: op.tags.iter().cloned().collect(),
                    parameter_names: op.parameters.iter().map(|p| p.name.clone()).collect(),
                    parameters: op.parameters.clone(),
                    body_fields: op.body_fields.clone(),
                },
            }
        })
        .collect()
}

/// Render the embedding text for an operation.
pub fn render_text(op: &EndpointOperation) -> String {
    let parameters = if op.parameters.is_empty() {
        "none".to_string()
    } else {
        op.parameter_names().join(", ")
    };
    let tags = if op.tags.is_empty() {
        "none".to_string()
    } else {
        op.tags.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
    };

    format!(
        "{} {}\n{}\nParameters: {parameters}\nTags: {tags}",
        op.method, op.path, op.summary
    )
}

/// Hex SHA-256 of the operation identity. Repeats of the same
/// `method + path` within a document mix in their occurrence number.
pub fn chunk_id(doc_id: &str, method: HttpMethod, path: &str, occurrence: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(method.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(path.as_bytes());
    if occurrence > 0 {
        hasher.update([0u8]);
        hasher.update(occurrence.to_be_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::ParameterLocation;
    use pretty_assertions::assert_eq;

    fn find_by_status() -> EndpointOperation {
        let mut op = EndpointOperation::new(HttpMethod::Get, "/pet/findByStatus")
            .with_summary(Some("Finds Pets by status"));
        op.parameters = vec![Parameter::new("status", ParameterLocation::Query)];
        op.tags.insert("pet".to_string());
        op
    }

    #[test]
    fn test_text_template() {
        assert_eq!(
            render_text(&find_by_status()),
            "GET /pet/findByStatus\nFinds Pets by status\nParameters: status\nTags: pet"
        );

        let bare = EndpointOperation::new(HttpMethod::Delete, "/cache");
        assert_eq!(
            render_text(&bare),
            "DELETE /cache\nDELETE /cache\nParameters: none\nTags: none"
        );
    }

    #[test]
    fn test_ids_are_stable_and_scoped_to_document() {
        let ops = vec![find_by_status()];
        let first = chunk("doc-1", &ops);
        let again = chunk("doc-1", &ops);
        let other = chunk("doc-2", &ops);

        assert_eq!(first[0].chunk_id, again[0].chunk_id);
        assert_ne!(first[0].chunk_id, other[0].chunk_id);
        assert_eq!(first[0].chunk_id.len(), 64);
        assert_eq!(first[0].metadata.parameter_names, vec!["status"]);
    }

    #[test]
    fn test_duplicate_operations_get_distinct_ids() {
        let ops = vec![find_by_status(), find_by_status()];
        let chunks = chunk("doc", &ops);

        assert_eq!(chunks.len(), 2);
        assert_ne!(chunks[0].chunk_id, chunks[1].chunk_id);
        assert_eq!(
            chunks[0].chunk_id,
            chunk_id("doc", HttpMethod::Get, "/pet/findByStatus", 0)
        );
    }
}
