//! Embedding providers.
//!
//! The rest of the system treats the model as a black box `text → vector`
//! behind [`EmbeddingProvider`]. Two implementations ship here: a remote
//! OpenAI-compatible client and a deterministic local hashing embedder.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::similarity::normalize;

/// Request for generating embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    /// Text to embed.
    pub text: String,

    /// Model to use (provider-specific).
    pub model: Option<String>,
}

impl EmbeddingRequest {
    /// Create a new embedding request.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
        }
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Response from embedding generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// The generated embedding.
    pub embedding: Embedding,

    /// Model used to generate the embedding.
    pub model: String,

    /// Token usage (if available).
    pub tokens_used: Option<u64>,
}

/// Trait for embedding providers.
///
/// Implementations must be deterministic for a given model version: the same
/// text always maps to the same vector, and every vector has
/// [`dimension`](EmbeddingProvider::dimension) components.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;

    /// Length of every vector this provider produces.
    fn dimension(&self) -> usize;

    /// Generate an embedding for the given text.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse>;

    /// Generate embeddings for multiple texts, in input order.
    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.embed(request).await?);
        }
        Ok(results)
    }

    /// Embed a single string and return just the vector.
    async fn embed_text(&self, text: &str) -> Result<Embedding> {
        let response = self.embed(EmbeddingRequest::new(text)).await?;
        check_dimension(self.dimension(), &response.embedding)?;
        Ok(response.embedding)
    }

    /// Embed many strings and return just the vectors, in input order.
    async fn embed_texts(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        let requests = texts.iter().map(|t| EmbeddingRequest::new(*t)).collect();
        let responses = self.embed_batch(requests).await?;
        if responses.len() != texts.len() {
            return Err(EmbeddingError::BatchSizeMismatch {
                expected: texts.len(),
                actual: responses.len(),
            });
        }
        let expected = self.dimension();
        responses
            .into_iter()
            .map(|r| check_dimension(expected, &r.embedding).map(|()| r.embedding))
            .collect()
    }

    /// Check if the provider is available (API key set, etc.).
    fn is_available(&self) -> bool;
}

fn check_dimension(expected: usize, embedding: &[f32]) -> Result<()> {
    if embedding.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(())
}

/// OpenAI embedding provider.
pub struct OpenAIProvider {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Default model.
    default_model: String,

    /// Requested output dimension, when the model supports shortening.
    dimensions: Option<usize>,
}

impl OpenAIProvider {
    /// Longest input we send; the API rejects more than ~8k tokens.
    pub const MAX_INPUT_CHARS: usize = 32_000;

    /// Create a new OpenAI provider reading `OPENAI_API_KEY`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            default_model: "text-embedding-3-small".to_string(),
            dimensions: None,
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the default model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Ask the API for shortened vectors.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    async fn post_embeddings(&self, input: serde_json::Value, model: &str) -> Result<OpenAIEmbeddingResponse> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| EmbeddingError::ProviderNotConfigured(self.name().to_string()))?;

        let mut body = serde_json::json!({
            "input": input,
            "model": model
        });
        if let Some(dims) = self.dimensions {
            body["dimensions"] = serde_json::json!(dims);
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);

            return Err(EmbeddingError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn check_length(text: &str) -> Result<()> {
    let length = text.chars().count();
    if length > OpenAIProvider::MAX_INPUT_CHARS {
        return Err(EmbeddingError::TextTooLong {
            length,
            max_length: OpenAIProvider::MAX_INPUT_CHARS,
        });
    }
    Ok(())
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn dimension(&self) -> usize {
        if let Some(dims) = self.dimensions {
            return dims;
        }
        match self.default_model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        }
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        check_length(&request.text)?;
        let model = request.model.unwrap_or_else(|| self.default_model.clone());

        debug!(model = %model, "requesting embedding");
        let result = self
            .post_embeddings(serde_json::json!(request.text), &model)
            .await?;

        let tokens_used = result.usage.as_ref().map(|u| u.total_tokens);
        let embedding = result
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding in response".to_string()))?
            .embedding;

        Ok(EmbeddingResponse {
            embedding,
            model: result.model,
            tokens_used,
        })
    }

    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        for request in &requests {
            check_length(&request.text)?;
        }

        let model = requests[0]
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let texts: Vec<&str> = requests.iter().map(|r| r.text.as_str()).collect();

        debug!(count = texts.len(), model = %model, "requesting batch embeddings");
        let mut result = self.post_embeddings(serde_json::json!(texts), &model).await?;

        if result.data.len() != requests.len() {
            return Err(EmbeddingError::BatchSizeMismatch {
                expected: requests.len(),
                actual: result.data.len(),
            });
        }

        // The API may answer out of order; `index` is authoritative.
        result.data.sort_by_key(|item| item.index);
        let responses: Vec<EmbeddingResponse> = result
            .data
            .into_iter()
            .map(|item| EmbeddingResponse {
                embedding: item.embedding,
                model: result.model.clone(),
                tokens_used: None,
            })
            .collect();

        info!("Generated {} batch embeddings", responses.len());
        Ok(responses)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
    model: String,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    total_tokens: u64,
}

/// Deterministic local embedder based on feature hashing.
///
/// Text is split into lowercase word tokens (camelCase and snake_case are
/// broken apart, stop words dropped, plural `s` stripped) and each token is
/// hashed with SHA-256 into one of `dimension` buckets. The resulting count
/// vector is L2-normalized. Hashing is stable across processes, so persisted
/// vectors stay comparable after a restart.
#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "be", "by", "of", "in", "for", "on", "with", "to", "at",
    "from", "as", "and", "or", "me", "my", "i", "we", "our", "you", "your", "all", "some",
    "this", "that", "it", "its", "please",
];

impl HashingProvider {
    /// Name reported as the model for hashed vectors.
    pub const MODEL: &'static str = "token-hash-v1";

    /// Create a hashing provider producing `dimension`-long vectors.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Split text into normalized tokens.
    pub fn tokenize(text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        for word in text.split(|c: char| !c.is_alphanumeric()) {
            for part in split_camel_case(word) {
                let lower = part.to_lowercase();
                if lower.is_empty() || STOP_WORDS.contains(&lower.as_str()) {
                    continue;
                }
                tokens.push(stem(lower));
            }
        }
        tokens
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(bytes) % self.dimension as u64) as usize
    }

    fn vectorize(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        for token in Self::tokenize(text) {
            vector[self.bucket(&token)] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self::new(crate::DEFAULT_DIMENSION)
    }
}

fn split_camel_case(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut prev_lower = false;
    for (i, c) in word.char_indices() {
        if c.is_uppercase() && prev_lower {
            parts.push(&word[start..i]);
            start = i;
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
    }
    parts.push(&word[start..]);
    parts
}

fn stem(token: String) -> String {
    if token.len() > 4 && token.ends_with("ies") {
        return format!("{}y", &token[..token.len() - 3]);
    }
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        return token[..token.len() - 1].to_string();
    }
    token
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    fn default_model(&self) -> &str {
        Self::MODEL
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let embedding = self.vectorize(&request.text);
        Ok(EmbeddingResponse {
            embedding,
            model: Self::MODEL.to_string(),
            tokens_used: Some(Self::tokenize(&request.text).len() as u64),
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_embedding_request() {
        let request = EmbeddingRequest::new("Hello world").with_model("text-embedding-3-small");

        assert_eq!(request.text, "Hello world");
        assert_eq!(request.model, Some("text-embedding-3-small".to_string()));
    }

    #[test]
    fn test_openai_provider_dimensions() {
        let provider = OpenAIProvider::new().with_model("text-embedding-3-large");
        assert_eq!(provider.dimension(), 3072);

        let shortened = OpenAIProvider::new().with_dimensions(256);
        assert_eq!(shortened.dimension(), 256);
    }

    #[test]
    fn test_tokenize_splits_paths_and_camel_case() {
        let tokens = HashingProvider::tokenize("GET /pet/findByStatus api_key");
        assert_eq!(tokens, vec!["get", "pet", "find", "statu", "api", "key"]);
    }

    #[test]
    fn test_tokenize_stems_plurals() {
        assert_eq!(HashingProvider::tokenize("Finds Pets"), vec!["find", "pet"]);
        assert_eq!(HashingProvider::tokenize("categories"), vec!["category"]);
        assert_eq!(HashingProvider::tokenize("address"), vec!["address"]);
    }

    #[tokio::test]
    async fn test_hashing_provider_is_deterministic() {
        let provider = HashingProvider::new(64);
        let a = provider.embed_text("Find pets by status").await.unwrap();
        let b = provider.embed_text("Find pets by status").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_hashing_provider_ranks_related_text_higher() {
        let provider = HashingProvider::default();
        let query = provider.embed_text("find pets by status").await.unwrap();
        let related = provider
            .embed_text("GET /pet/findByStatus\nFinds Pets by status")
            .await
            .unwrap();
        let unrelated = provider
            .embed_text("POST /store/order\nPlace an order")
            .await
            .unwrap();

        let near = cosine_similarity(&query, &related).unwrap();
        let far = cosine_similarity(&query, &unrelated).unwrap();
        assert!(near > far, "expected {near} > {far}");
    }

    #[tokio::test]
    async fn test_openai_batch_restores_index_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "data": [
                    { "index": 1, "embedding": [0.0, 1.0] },
                    { "index": 0, "embedding": [1.0, 0.0] }
                ],
                "usage": { "prompt_tokens": 4, "total_tokens": 4 }
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new()
            .with_api_key("test-key")
            .with_base_url(server.uri())
            .with_dimensions(2);

        let vectors = provider.embed_texts(&["first", "second"]).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_openai_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new()
            .with_api_key("test-key")
            .with_base_url(server.uri());

        let err = provider.embed_text("anything").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::ApiStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_openai_without_key_is_not_configured() {
        let provider = OpenAIProvider {
            api_key: None,
            ..OpenAIProvider::new()
        };
        let err = provider.embed_text("anything").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::ProviderNotConfigured(_)));
    }
}
