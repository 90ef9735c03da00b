//! The transport-independent API query service.

use std::sync::Arc;

use apiq_embeddings::{
    CachedProvider, DEFAULT_DIMENSION, EmbeddingCache, EmbeddingProvider, HashingProvider,
    OpenAIProvider,
};
use apiq_spec_parser::{Chunk, SourceType};
use apiq_vector_index::{DocumentRecord, IndexStats, QueryFilter, RetrievedMatch, VectorIndex};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::confidence::ConfidencePolicy;
use crate::config::{EmbeddingConfig, EmbeddingProviderType, ServiceConfig};
use crate::engine::{QueryStage, RetrievalEngine};
use crate::error::{Result, RetrievalError};
use crate::fetch::SpecFetcher;
use crate::synthesizer::{GeneratedQuery, QueryResult, QuerySynthesizer, RuleBasedSynthesizer};

/// Optional inputs to an ingestion.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Skip format detection.
    pub source_type: Option<SourceType>,

    /// Reuse an id to replace a document; a UUID v4 is generated otherwise.
    pub doc_id: Option<String>,

    /// Display name; defaults to the document title.
    pub name: Option<String>,
}

impl IngestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = Some(source_type);
        self
    }

    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// What an ingestion stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub doc_id: String,
    pub name: String,
    pub source_type: SourceType,
    pub endpoint_count: usize,
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

impl From<DocumentRecord> for DocumentSummary {
    fn from(record: DocumentRecord) -> Self {
        Self {
            chunk_count: record.chunk_ids.len(),
            doc_id: record.doc_id,
            name: record.name,
            source_type: record.source_type,
            endpoint_count: record.endpoint_count,
            title: record.title,
            base_url: record.base_url,
            indexed_at: record.indexed_at,
        }
    }
}

/// Liveness report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// The index is open and answering.
    pub healthy: bool,
    pub persistent: bool,
    pub total_chunks: usize,
    pub unique_documents: usize,
    pub embedding_provider: String,
    pub embedding_model: String,
}

/// Ingests API specifications and answers natural-language requests against
/// them.
///
/// Cloning is cheap; clones share the index, provider and synthesizer.
#[derive(Clone)]
pub struct ApiQueryService {
    engine: RetrievalEngine,
    synthesizer: Arc<dyn QuerySynthesizer>,
    fetcher: SpecFetcher,
}

impl ApiQueryService {
    /// Create a new service builder.
    pub fn builder() -> ApiQueryServiceBuilder {
        ApiQueryServiceBuilder::new()
    }

    /// Open the persistent index at `config.index_dir` with the configured
    /// embedding provider.
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        ApiQueryServiceBuilder::new().with_config(config).build().await
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    pub fn index(&self) -> &VectorIndex {
        self.engine.index()
    }

    /// Parse, chunk, embed and index `raw`, all or nothing.
    ///
    /// Re-ingesting under an existing id replaces that document's chunks.
    /// `cancel` is checked between stages; once the commit starts it runs to
    /// completion.
    pub async fn ingest(
        &self,
        raw: &[u8],
        options: IngestOptions,
        cancel: &CancellationToken,
    ) -> Result<DocumentSummary> {
        let doc_id = match options.doc_id {
            Some(id) if id.trim().is_empty() => {
                return Err(RetrievalError::InvalidRequest("doc_id is empty".into()));
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };
        info!(%doc_id, bytes = raw.len(), "ingest started");
        ensure_not_cancelled(cancel)?;

        let parsed = apiq_spec_parser::parse(raw, options.source_type).inspect_err(|e| {
            warn!(%doc_id, "ingest rejected: {e}");
        })?;
        ensure_not_cancelled(cancel)?;

        let chunks = apiq_spec_parser::chunk(&doc_id, &parsed.operations);
        debug!(%doc_id, chunks = chunks.len(), "chunked specification");
        ensure_not_cancelled(cancel)?;

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let vectors = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(cancelled(&doc_id)),
            vectors = self.engine.provider().embed_texts(&texts) => vectors.inspect_err(|e| {
                warn!(%doc_id, "ingest embedding failed: {e}");
            })?,
        };
        ensure_not_cancelled(cancel)?;

        let name = options
            .name
            .or_else(|| parsed.title.clone())
            .unwrap_or_else(|| doc_id.clone());
        let record = DocumentRecord::new(doc_id, parsed.source_type)
            .with_name(name)
            .with_title(parsed.title)
            .with_base_url(parsed.base_url)
            .with_endpoint_count(parsed.operations.len());

        let stored = self
            .index()
            .upsert(record, chunks.into_iter().zip(vectors).collect())
            .await?;
        info!(
            doc_id = %stored.doc_id,
            source_type = %stored.source_type,
            endpoints = stored.endpoint_count,
            "ingest committed"
        );
        Ok(stored.into())
    }

    /// Fetch a specification over HTTP and ingest it. No index lock is held
    /// during the fetch.
    pub async fn ingest_url(
        &self,
        url: &str,
        options: IngestOptions,
        cancel: &CancellationToken,
    ) -> Result<DocumentSummary> {
        let raw = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetrievalError::Cancelled),
            raw = self.fetcher.fetch(url) => raw?,
        };
        self.ingest(&raw, options, cancel).await
    }

    /// Remove a document and all of its chunks. Unknown ids remove nothing.
    pub async fn delete(&self, doc_id: &str) -> Result<usize> {
        let removed = self.index().delete(doc_id).await?;
        info!(%doc_id, removed, "deleted document");
        Ok(removed)
    }

    pub async fn stats(&self) -> IndexStats {
        self.index().stats().await
    }

    /// Ranked matches for `text`.
    pub async fn search(&self, text: &str, top_k: Option<usize>) -> Result<Vec<RetrievedMatch>> {
        self.engine.retrieve(text, top_k).await
    }

    /// Ranked matches restricted by `filter`.
    pub async fn search_filtered(
        &self,
        text: &str,
        top_k: Option<usize>,
        filter: &QueryFilter,
    ) -> Result<Vec<RetrievedMatch>> {
        self.engine.retrieve_filtered(text, top_k, filter).await
    }

    /// Draft an API call for `text`. Failures are reported in the result.
    pub async fn generate(&self, text: &str, include_explanation: bool) -> QueryResult {
        let matches = match self.engine.retrieve(text, None).await {
            Ok(matches) => matches,
            Err(e) => return QueryResult::failure(text, e.to_string()),
        };

        let mut result = self.synthesizer.synthesize(text, &matches).await;
        debug!(
            stage = %QueryStage::Synthesized,
            synthesizer = self.synthesizer.name(),
            confidence = result.confidence(),
            "query synthesized"
        );
        if !include_explanation {
            result.explanation = None;
        }
        debug!(stage = %QueryStage::Returned, success = result.success, "query returned");
        result
    }

    pub async fn document(&self, doc_id: &str) -> Result<DocumentRecord> {
        Ok(self.index().document(doc_id).await?)
    }

    pub async fn documents(&self) -> Vec<DocumentRecord> {
        self.index().documents().await
    }

    pub async fn document_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>> {
        Ok(self.index().chunks_for(doc_id).await?)
    }

    pub fn explain(&self, query: &GeneratedQuery) -> String {
        crate::synthesizer::explain(query)
    }

    pub async fn health(&self) -> HealthReport {
        let stats = self.stats().await;
        let provider = self.engine.provider();
        HealthReport {
            healthy: !self.index().is_closed(),
            persistent: self.index().is_persistent(),
            total_chunks: stats.total_chunks,
            unique_documents: stats.unique_documents,
            embedding_provider: provider.name().to_string(),
            embedding_model: provider.default_model().to_string(),
        }
    }

    /// Flush pending writes and close the index.
    pub async fn close(&self) -> Result<()> {
        self.index().close().await?;
        Ok(())
    }
}

fn cancelled(doc_id: &str) -> RetrievalError {
    info!(%doc_id, "ingest cancelled");
    RetrievalError::Cancelled
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(RetrievalError::Cancelled);
    }
    Ok(())
}

/// Builder for [`ApiQueryService`].
#[derive(Default)]
pub struct ApiQueryServiceBuilder {
    config: ServiceConfig,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    index: Option<VectorIndex>,
    synthesizer: Option<Arc<dyn QuerySynthesizer>>,
}

impl ApiQueryServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this provider instead of the configured one.
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use an already opened index instead of opening `index_dir`.
    pub fn with_index(mut self, index: VectorIndex) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn QuerySynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub async fn build(self) -> Result<ApiQueryService> {
        let config = self.config;
        config.validate()?;

        let provider = match self.provider {
            Some(provider) => provider,
            None => build_provider(&config.embedding),
        };
        let index = match self.index {
            Some(index) => index,
            None => VectorIndex::open(&config.index_dir, provider.dimension()).await?,
        };
        if index.dimension() != provider.dimension() {
            return Err(RetrievalError::Config(format!(
                "index dimension {} does not match provider '{}' dimension {}",
                index.dimension(),
                provider.name(),
                provider.dimension()
            )));
        }

        let synthesizer: Arc<dyn QuerySynthesizer> = match self.synthesizer {
            Some(synthesizer) => synthesizer,
            None => {
                let query = &config.query;
                let confidence = ConfidencePolicy::new(
                    query.similarity_weight,
                    query.intent_bonus,
                    query.confidence_floor,
                )?;
                Arc::new(RuleBasedSynthesizer::default().with_confidence(confidence))
            }
        };

        let engine = RetrievalEngine::new(provider, index)
            .with_default_top_k(config.query.top_k)
            .with_max_top_k(config.query.max_top_k);

        info!(
            provider = engine.provider().name(),
            dimension = engine.index().dimension(),
            persistent = engine.index().is_persistent(),
            synthesizer = synthesizer.name(),
            "API query service ready"
        );
        Ok(ApiQueryService {
            engine,
            synthesizer,
            fetcher: SpecFetcher::new(&config.fetch)?,
        })
    }
}

fn build_provider(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
    match config.provider {
        EmbeddingProviderType::Hashing => Arc::new(HashingProvider::new(
            config.dimension.unwrap_or(DEFAULT_DIMENSION),
        )),
        EmbeddingProviderType::OpenAI => {
            let mut provider = OpenAIProvider::new();
            if let Some(model) = &config.model {
                provider = provider.with_model(model);
            }
            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url);
            }
            if let Some(dimension) = config.dimension {
                provider = provider.with_dimensions(dimension);
            }
            if !provider.is_available() {
                warn!("OPENAI_API_KEY is not set; embedding requests will fail");
            }
            if config.cache_enabled {
                Arc::new(CachedProvider::new(
                    provider,
                    EmbeddingCache::new(config.cache_max_entries),
                ))
            } else {
                Arc::new(provider)
            }
        }
    }
}
