//! # Embeddings
//!
//! Text-to-vector providers and similarity math used by the API query
//! builder. The embedding model is a black box behind [`EmbeddingProvider`];
//! everything downstream only sees fixed-dimension `f32` vectors.
//!
//! ## Providers
//!
//! - **OpenAI**: remote `text-embedding-3-*` models over HTTP
//! - **Hashing**: deterministic local bag-of-tokens vectors, no network
//! - **Cached**: wraps any provider with an [`EmbeddingCache`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings                                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider ──► Embedding ──► cosine_similarity          │
//! │       │                                                         │
//! │       ▼                                                         │
//! │  OpenAI / Hashing ◄── CachedProvider ──► EmbeddingCache         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod provider;
pub mod similarity;

pub use cache::{CachedProvider, EmbeddingCache};
pub use error::{EmbeddingError, Result};
pub use provider::{
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, HashingProvider, OpenAIProvider,
};
pub use similarity::{SimilarityResult, cosine_similarity, normalize, rank_top_k, to_unit_score};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of the local hashing provider's vectors.
pub const DEFAULT_DIMENSION: usize = 384;
