//! # API Query Retrieval
//!
//! Answers natural-language requests such as "find pets by status" with a
//! drafted HTTP call, using API specifications that were ingested earlier.
//!
//! - **Ingestion**: parse, chunk, embed and index a specification, all or
//!   nothing, from bytes or a URL
//! - **Retrieval**: embed the request and rank indexed operations
//! - **Synthesis**: pick an operation by verb intent and rank, then fill in
//!   URL, headers and body skeleton with a bounded confidence
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      ApiQueryService                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  raw / URL ──► SpecParser ──► Chunker ──► EmbeddingProvider     │
//! │  (SpecFetcher)                                  │               │
//! │                                                 ▼               │
//! │                                          ┌──────────────┐       │
//! │  request ──► RetrievalEngine ──────────► │ VectorIndex  │       │
//! │                     │                    └──────────────┘       │
//! │                     ▼                                           │
//! │             QuerySynthesizer ──► QueryResult                    │
//! │   (IntentLexicon + ConfidencePolicy)                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use apiq_retrieval::{ApiQueryService, IngestOptions, ServiceConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let service = ApiQueryService::new(ServiceConfig::default()).await?;
//! service
//!     .ingest_url(
//!         "https://petstore.swagger.io/v2/swagger.json",
//!         IngestOptions::new().with_doc_id("petstore"),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//!
//! let result = service.generate("Find pets by status", true).await;
//! ```

pub mod confidence;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod intent;
pub mod service;
pub mod synthesizer;

pub use confidence::ConfidencePolicy;
pub use config::{EmbeddingConfig, EmbeddingProviderType, FetchConfig, QueryConfig, ServiceConfig};
pub use engine::{QueryStage, RetrievalEngine};
pub use error::{Result, RetrievalError};
pub use fetch::SpecFetcher;
pub use intent::{Intent, IntentLexicon, IntentSource};
pub use service::{
    ApiQueryService, ApiQueryServiceBuilder, DocumentSummary, HealthReport, IngestOptions,
};
pub use synthesizer::{
    GeneratedQuery, QueryResult, QuerySynthesizer, RelevantDocument, RuleBasedSynthesizer, explain,
};

// Re-export from dependencies for convenience
pub use apiq_embeddings::{EmbeddingProvider, HashingProvider};
pub use apiq_spec_parser::{Chunk, HttpMethod, SourceType};
pub use apiq_vector_index::{DocumentRecord, IndexStats, QueryFilter, RetrievedMatch, VectorIndex};
