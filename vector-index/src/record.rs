//! Records stored in and returned by the index.

use std::collections::{BTreeMap, BTreeSet};

use apiq_embeddings::Embedding;
use apiq_spec_parser::{Chunk, ChunkMetadata, HttpMethod, SourceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry entry for one ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub doc_id: String,

    /// Display name; defaults to the document title or the id.
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub source_type: SourceType,

    pub endpoint_count: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Owned chunk ids, in operation order. Set by the index on upsert.
    #[serde(default)]
    pub chunk_ids: Vec<String>,

    pub indexed_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(doc_id: impl Into<String>, source_type: SourceType) -> Self {
        let doc_id = doc_id.into();
        Self {
            name: doc_id.clone(),
            doc_id,
            title: None,
            source_type,
            endpoint_count: 0,
            base_url: None,
            chunk_ids: Vec::new(),
            indexed_at: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_endpoint_count(mut self, endpoint_count: usize) -> Self {
        self.endpoint_count = endpoint_count;
        self
    }
}

/// A chunk with its vector and insertion sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Embedding,
    /// Insertion order across the whole index, used to break score ties.
    pub seq: u64,
}

/// On-disk form of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub document: DocumentRecord,
    pub chunks: Vec<IndexedChunk>,
}

/// One similarity hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedMatch {
    pub chunk_id: String,
    pub doc_id: String,
    pub document_name: String,
    pub doc_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Cosine similarity clamped to `[0, 1]`.
    pub similarity_score: f32,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Optional restrictions on a similarity query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_ids: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<BTreeSet<HttpMethod>>,
    /// Minimum reported score; matches below it are dropped.
    #[serde(default)]
    pub min_score: f32,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_ids.get_or_insert_with(BTreeSet::new).insert(doc_id.into());
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.methods.get_or_insert_with(BTreeSet::new).insert(method);
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub(crate) fn admits(&self, chunk: &Chunk) -> bool {
        let doc_ok = self
            .doc_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(&chunk.doc_id));
        let method_ok = self
            .methods
            .as_ref()
            .is_none_or(|methods| methods.contains(&chunk.metadata.method));
        doc_ok && method_ok
    }
}

/// Index-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub unique_documents: usize,
    pub document_types: BTreeMap<SourceType, usize>,
}
