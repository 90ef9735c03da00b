//! Query embedding and index lookup.

use std::fmt;
use std::sync::Arc;

use apiq_embeddings::EmbeddingProvider;
use apiq_vector_index::{QueryFilter, RetrievedMatch, VectorIndex};
use tracing::{debug, warn};

use crate::error::{Result, RetrievalError};

/// Lifecycle of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    Received,
    Embedded,
    Retrieved,
    Synthesized,
    Returned,
    Failed,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Embedded => "embedded",
            Self::Retrieved => "retrieved",
            Self::Synthesized => "synthesized",
            Self::Returned => "returned",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Embeds queries and ranks indexed chunks against them.
#[derive(Clone)]
pub struct RetrievalEngine {
    provider: Arc<dyn EmbeddingProvider>,
    index: VectorIndex,
    default_top_k: usize,
    max_top_k: usize,
}

impl RetrievalEngine {
    pub const DEFAULT_TOP_K: usize = 5;

    pub fn new(provider: Arc<dyn EmbeddingProvider>, index: VectorIndex) -> Self {
        Self {
            provider,
            index,
            default_top_k: Self::DEFAULT_TOP_K,
            max_top_k: 50,
        }
    }

    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k;
        self
    }

    pub fn with_max_top_k(mut self, max_top_k: usize) -> Self {
        self.max_top_k = max_top_k;
        self
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Top matches for `query_text`; an empty index yields an empty list.
    pub async fn retrieve(&self, query_text: &str, top_k: Option<usize>) -> Result<Vec<RetrievedMatch>> {
        self.retrieve_filtered(query_text, top_k, &QueryFilter::default())
            .await
    }

    pub async fn retrieve_filtered(
        &self,
        query_text: &str,
        top_k: Option<usize>,
        filter: &QueryFilter,
    ) -> Result<Vec<RetrievedMatch>> {
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return Err(RetrievalError::InvalidRequest("query text is empty".into()));
        }
        let top_k = match top_k {
            Some(0) => {
                return Err(RetrievalError::InvalidRequest("top_k must be at least 1".into()));
            }
            Some(k) if k > self.max_top_k => {
                debug!(requested = k, max = self.max_top_k, "clamping top_k");
                self.max_top_k
            }
            Some(k) => k,
            None => self.default_top_k,
        };
        debug!(stage = %QueryStage::Received, top_k, "query received");

        let vector = match self.provider.embed_text(query_text).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(stage = %QueryStage::Failed, "query embedding failed: {e}");
                return Err(e.into());
            }
        };
        debug!(stage = %QueryStage::Embedded, dimension = vector.len(), "query embedded");

        let matches = match self.index.query(&vector, top_k, Some(filter)).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!(stage = %QueryStage::Failed, "index query failed: {e}");
                return Err(e.into());
            }
        };
        debug!(stage = %QueryStage::Retrieved, matches = matches.len(), "query retrieved");

        Ok(matches)
    }
}
