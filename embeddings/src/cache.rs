//! Embedding cache so re-ingesting a document does not re-embed unchanged
//! chunks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse};

/// Cache entry for an embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Hash of model + text.
    pub key: String,

    /// The embedding vector.
    pub embedding: Embedding,

    /// Model used to generate the embedding.
    pub model: String,

    /// Insertion counter, used for oldest-first eviction.
    pub stamp: u64,
}

/// Cache for embeddings keyed by `(model, text)`.
pub struct EmbeddingCache {
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,

    /// Where the cache is persisted, if anywhere.
    cache_path: Option<PathBuf>,

    max_entries: usize,

    /// Monotonic insertion counter.
    clock: AtomicU64,
}

impl EmbeddingCache {
    /// Create a new in-memory cache.
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_path: None,
            max_entries: max_entries.max(1),
            clock: AtomicU64::new(0),
        }
    }

    /// Create a cache backed by a JSON file, loading it if it exists.
    pub async fn with_persistence(path: impl AsRef<Path>, max_entries: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let cache = Self {
            cache_path: Some(path.clone()),
            ..Self::new(max_entries)
        };

        if fs::try_exists(&path).await? {
            cache.load().await?;
        }

        Ok(cache)
    }

    /// Compute a stable cache key. SHA-256 keeps keys valid across restarts.
    fn hash_key(text: &str, model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn next_stamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Get an embedding from the cache.
    pub async fn get(&self, text: &str, model: &str) -> Option<Embedding> {
        let key = Self::hash_key(text, model);
        let cache = self.cache.read().await;
        cache.get(&key).map(|e| e.embedding.clone())
    }

    /// Put an embedding in the cache, evicting the oldest entry when full.
    pub async fn put(&self, text: &str, model: &str, embedding: Embedding) -> Result<()> {
        let key = Self::hash_key(text, model);
        let entry = CacheEntry {
            key: key.clone(),
            embedding,
            model: model.to_string(),
            stamp: self.next_stamp(),
        };

        {
            let mut cache = self.cache.write().await;
            if cache.len() >= self.max_entries && !cache.contains_key(&key) {
                if let Some(oldest_key) = cache
                    .iter()
                    .min_by_key(|(_, v)| v.stamp)
                    .map(|(k, _)| k.clone())
                {
                    cache.remove(&oldest_key);
                }
            }
            cache.insert(key, entry);
        }
        debug!(model, "cached embedding");

        if self.cache_path.is_some() {
            self.save().await?;
        }

        Ok(())
    }

    /// Number of cached embeddings.
    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Whether the cache holds nothing.
    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Clear the entire cache.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
        info!("Cleared embedding cache");
    }

    async fn save(&self) -> Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        let content = {
            let cache = self.cache.read().await;
            let entries: Vec<&CacheEntry> = cache.values().collect();
            serde_json::to_string(&entries)?
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, path).await?;
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        let Some(path) = &self.cache_path else {
            return Ok(());
        };
        let content = fs::read_to_string(path).await?;
        let entries: Vec<CacheEntry> = serde_json::from_str(&content)
            .map_err(|e| EmbeddingError::Cache(format!("{}: {e}", path.display())))?;

        let mut cache = self.cache.write().await;
        let mut newest = 0;
        for entry in entries {
            newest = newest.max(entry.stamp + 1);
            cache.insert(entry.key.clone(), entry);
        }
        self.clock.fetch_max(newest, Ordering::Relaxed);

        info!("Loaded {} cache entries from disk", cache.len());
        Ok(())
    }
}

/// A provider wrapper that consults an [`EmbeddingCache`] first.
pub struct CachedProvider<P> {
    provider: P,
    cache: EmbeddingCache,
}

impl<P> CachedProvider<P>
where
    P: EmbeddingProvider,
{
    /// Create a new cached provider.
    pub fn new(provider: P, cache: EmbeddingCache) -> Self {
        Self { provider, cache }
    }

    /// Get the underlying cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }
}

#[async_trait]
impl<P> EmbeddingProvider for CachedProvider<P>
where
    P: EmbeddingProvider,
{
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn default_model(&self) -> &str {
        self.provider.default_model()
    }

    fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string());

        if let Some(embedding) = self.cache.get(&request.text, &model).await {
            debug!("embedding cache hit");
            return Ok(EmbeddingResponse {
                embedding,
                model,
                tokens_used: None,
            });
        }

        let text = request.text.clone();
        let response = self.provider.embed(request).await?;
        self.cache
            .put(&text, &model, response.embedding.clone())
            .await?;

        Ok(response)
    }

    /// Serve hits from the cache and embed every miss in one inner batch.
    async fn embed_batch(&self, requests: Vec<EmbeddingRequest>) -> Result<Vec<EmbeddingResponse>> {
        let mut slots: Vec<Option<EmbeddingResponse>> = Vec::with_capacity(requests.len());
        let mut misses = Vec::new();
        let mut miss_keys = Vec::new();

        for request in requests {
            let model = request
                .model
                .clone()
                .unwrap_or_else(|| self.provider.default_model().to_string());
            if let Some(embedding) = self.cache.get(&request.text, &model).await {
                slots.push(Some(EmbeddingResponse {
                    embedding,
                    model,
                    tokens_used: None,
                }));
            } else {
                miss_keys.push((slots.len(), request.text.clone(), model));
                misses.push(request);
                slots.push(None);
            }
        }

        debug!(
            hits = slots.len() - misses.len(),
            misses = misses.len(),
            "embedding cache batch lookup"
        );

        if !misses.is_empty() {
            let responses = self.provider.embed_batch(misses).await?;
            if responses.len() != miss_keys.len() {
                return Err(EmbeddingError::BatchSizeMismatch {
                    expected: miss_keys.len(),
                    actual: responses.len(),
                });
            }
            for ((slot, text, model), response) in miss_keys.into_iter().zip(responses) {
                self.cache
                    .put(&text, &model, response.embedding.clone())
                    .await?;
                slots[slot] = Some(response);
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    fn is_available(&self) -> bool {
        self.provider.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{HashingProvider, OpenAIProvider};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_cache_put_get() {
        let cache = EmbeddingCache::new(100);
        let embedding = vec![1.0, 2.0, 3.0];

        cache
            .put("hello", "model-1", embedding.clone())
            .await
            .unwrap();

        assert_eq!(cache.get("hello", "model-1").await, Some(embedding));
        assert_eq!(cache.get("hello", "model-2").await, None);
    }

    #[tokio::test]
    async fn test_cache_eviction() {
        let cache = EmbeddingCache::new(2);

        cache.put("a", "model", vec![1.0]).await.unwrap();
        cache.put("b", "model", vec![2.0]).await.unwrap();
        cache.put("c", "model", vec![3.0]).await.unwrap();

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.get("c", "model").await, Some(vec![3.0]));
    }

    #[tokio::test]
    async fn test_cache_survives_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("embeddings.json");

        {
            let cache = EmbeddingCache::with_persistence(&path, 10).await.unwrap();
            cache.put("persist me", "m", vec![0.5, 0.5]).await.unwrap();
        }

        let cache = EmbeddingCache::with_persistence(&path, 10).await.unwrap();
        assert_eq!(cache.get("persist me", "m").await, Some(vec![0.5, 0.5]));
    }

    #[tokio::test]
    async fn test_cached_provider_fills_cache() {
        let provider = CachedProvider::new(HashingProvider::new(16), EmbeddingCache::new(10));

        let first = provider.embed_text("list orders").await.unwrap();
        let second = provider.embed_text("list orders").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.cache().len().await, 1);
    }

    #[tokio::test]
    async fn test_cached_batch_sends_only_misses_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(serde_json::json!({ "input": ["first", "third"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "data": [
                    { "index": 0, "embedding": [1.0, 0.0] },
                    { "index": 1, "embedding": [0.0, 1.0] }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let openai = OpenAIProvider::new()
            .with_api_key("test-key")
            .with_base_url(server.uri())
            .with_dimensions(2);
        let cache = EmbeddingCache::new(10);
        cache
            .put("second", openai.default_model(), vec![0.6, 0.8])
            .await
            .unwrap();
        let provider = CachedProvider::new(openai, cache);

        let texts = ["first", "second", "third"];
        let expected = vec![vec![1.0, 0.0], vec![0.6, 0.8], vec![0.0, 1.0]];
        assert_eq!(provider.embed_texts(&texts).await.unwrap(), expected);
        assert_eq!(provider.embed_texts(&texts).await.unwrap(), expected);

        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert_eq!(provider.cache().len().await, 3);
    }
}
