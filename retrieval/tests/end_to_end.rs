//! End-to-end tests: ingest fixture specifications, then query them.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use apiq_embeddings::{EmbeddingError, EmbeddingRequest, EmbeddingResponse};
use apiq_retrieval::{
    ApiQueryService, EmbeddingProvider, FetchConfig, HashingProvider, HttpMethod, IngestOptions,
    QueryFilter, RetrievalError, ServiceConfig, SourceType, VectorIndex,
};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIMENSION: usize = 384;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fixtures are shared with the parser crate.
fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../spec-parser/tests/fixtures")
}

fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixtures_dir().join(name)).unwrap()
}

/// Hashing embeddings that can be switched to fail or slowed down.
struct ScriptedProvider {
    inner: HashingProvider,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    fn new() -> Self {
        Self {
            inner: HashingProvider::new(DIMENSION),
            failing: AtomicBool::new(false),
            delay: None,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        self.inner.default_model()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(
        &self,
        request: EmbeddingRequest,
    ) -> apiq_embeddings::Result<EmbeddingResponse> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::InvalidResponse("scripted failure".into()));
        }
        self.inner.embed(request).await
    }

    fn is_available(&self) -> bool {
        true
    }
}

async fn service_with(provider: Arc<dyn EmbeddingProvider>) -> ApiQueryService {
    init_tracing();
    ApiQueryService::builder()
        .with_provider(provider)
        .with_index(VectorIndex::in_memory(DIMENSION))
        .build()
        .await
        .unwrap()
}

async fn service() -> ApiQueryService {
    service_with(Arc::new(HashingProvider::new(DIMENSION))).await
}

async fn ingest_fixture(service: &ApiQueryService, name: &str, doc_id: &str) -> apiq_retrieval::DocumentSummary {
    service
        .ingest(
            &fixture(name),
            IngestOptions::new().with_doc_id(doc_id),
            &CancellationToken::new(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_find_pets_by_status() {
    let service = service().await;
    let summary = ingest_fixture(&service, "petstore.json", "petstore").await;
    assert_eq!(summary.endpoint_count, 7);

    let result = service.generate("Find pets by status", true).await;
    assert!(result.success, "{:?}", result.error);
    let query = result.generated_query.clone().unwrap();
    assert_eq!(query.method, Some(HttpMethod::Get));
    assert_eq!(
        query.url.as_deref(),
        Some("https://petstore.swagger.io/v2/pet/findByStatus?status=")
    );
    assert!(query.confidence >= 0.5, "confidence {}", query.confidence);
    assert_eq!(query.parameters_used, vec!["status".to_string()]);
    assert!(result.explanation.is_some());
    assert_eq!(result.relevant_documents[0].endpoint, "GET /pet/findByStatus");
}

#[tokio::test]
async fn test_delete_a_pet() {
    let service = service().await;
    ingest_fixture(&service, "petstore.json", "petstore").await;

    let result = service.generate("Delete a pet", true).await;
    assert!(result.success);
    let query = result.generated_query.unwrap();
    assert_eq!(query.method, Some(HttpMethod::Delete));
    assert!(query.url.unwrap().contains("/pet/{petId}"));
    assert!(query.headers.unwrap().contains_key("api_key"));
}

#[tokio::test]
async fn test_empty_index_yields_zero_confidence() {
    let result = service().await.generate("Find pets by status", true).await;

    assert!(result.success);
    assert_eq!(result.confidence(), 0.0);
    assert!(result.relevant_documents.is_empty());
    assert_eq!(result.context_used, 0);
}

#[tokio::test]
async fn test_postman_counts_nested_requests() {
    let service = service().await;
    let summary = ingest_fixture(&service, "shop.postman_collection.json", "shop").await;

    assert_eq!(summary.source_type, SourceType::Postman);
    assert_eq!(summary.endpoint_count, 6);
    assert_eq!(summary.chunk_count, 6);
    assert_eq!(summary.name, "Shop API");
}

#[tokio::test]
async fn test_reingest_is_idempotent() {
    let service = service().await;
    let first = ingest_fixture(&service, "petstore.json", "petstore").await;
    let stats = service.stats().await;
    let chunks = service.document_chunks("petstore").await.unwrap();

    let second = ingest_fixture(&service, "petstore.json", "petstore").await;

    assert_eq!(service.stats().await, stats);
    assert_eq!(second.chunk_count, first.chunk_count);
    let again = service.document_chunks("petstore").await.unwrap();
    let ids = |chunks: &[apiq_retrieval::Chunk]| -> Vec<String> {
        chunks.iter().map(|c| c.chunk_id.clone()).collect()
    };
    assert_eq!(ids(&again), ids(&chunks));
}

#[tokio::test]
async fn test_delete_cascades_to_chunks() -> anyhow::Result<()> {
    let service = service().await;
    ingest_fixture(&service, "petstore.json", "petstore").await;
    ingest_fixture(&service, "inventory.yaml", "inventory").await;
    assert_eq!(service.stats().await.total_chunks, 11);

    assert_eq!(service.delete("petstore").await?, 7);
    let stats = service.stats().await;
    assert_eq!(stats.total_chunks, 4);
    assert_eq!(stats.unique_documents, 1);
    assert_eq!(stats.document_types.get(&SourceType::OpenApi3), Some(&1));

    let matches = service.search("find pets by status", Some(20)).await?;
    assert_eq!(matches.len(), 4);
    assert!(matches.iter().all(|m| m.doc_id == "inventory"));

    assert!(matches!(
        service.document("petstore").await,
        Err(RetrievalError::NotFound(_))
    ));
    assert_eq!(service.delete("petstore").await?, 0);
    Ok(())
}

#[tokio::test]
async fn test_rejected_input_leaves_index_unchanged() {
    let service = service().await;
    ingest_fixture(&service, "inventory.yaml", "inventory").await;
    let before = service.stats().await;
    let token = CancellationToken::new();

    let err = service
        .ingest(br#"{"openapi": "3.0.0", "info": {"title": "x"}}"#, IngestOptions::new(), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::MalformedSpec(_)), "{err}");

    let err = service
        .ingest(b"[1, 2, 3]", IngestOptions::new(), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::UnsupportedFormat(_)), "{err}");

    let err = service
        .ingest(
            &fixture("petstore.json"),
            IngestOptions::new().with_doc_id("inventory").with_source_type(SourceType::Postman),
            &token,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::MalformedSpec(_)), "{err}");

    assert_eq!(service.stats().await, before);
    assert_eq!(service.document("inventory").await.unwrap().endpoint_count, 4);
}

#[tokio::test]
async fn test_cancelled_ingest_leaves_index_unchanged() {
    let service = service_with(Arc::new(ScriptedProvider::slow(Duration::from_secs(30)))).await;
    let before = service.stats().await;

    let token = CancellationToken::new();
    token.cancel();
    let err = service
        .ingest(&fixture("petstore.json"), IngestOptions::new(), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::Cancelled));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });
    let err = service
        .ingest(&fixture("petstore.json"), IngestOptions::new(), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::Cancelled));

    assert_eq!(service.stats().await, before);
    assert!(service.documents().await.is_empty());
}

#[tokio::test]
async fn test_embedding_failure_is_reported_then_recovers() {
    let provider = Arc::new(ScriptedProvider::new());
    let service = service_with(Arc::clone(&provider) as Arc<dyn EmbeddingProvider>).await;
    ingest_fixture(&service, "petstore.json", "petstore").await;

    provider.set_failing(true);
    let result = service.generate("Find pets by status", true).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("scripted failure"));
    assert!(result.generated_query.is_none());
    assert!(matches!(
        service.search("Find pets by status", None).await,
        Err(RetrievalError::Embedding(_))
    ));

    provider.set_failing(false);
    let result = service.generate("Find pets by status", true).await;
    assert!(result.success);
    assert!(result.confidence() > 0.0);
}

#[tokio::test]
async fn test_search_filtered_by_document() {
    let service = service().await;
    ingest_fixture(&service, "petstore.json", "petstore").await;
    ingest_fixture(&service, "inventory.yaml", "inventory").await;

    let filter = QueryFilter::new().with_doc_id("petstore");
    let matches = service
        .search_filtered("delete an item", Some(10), &filter)
        .await
        .unwrap();
    assert_eq!(matches.len(), 7);
    assert!(matches.iter().all(|m| m.doc_id == "petstore"));

    let scores: Vec<f32> = matches.iter().map(|m| m.similarity_score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
}

#[tokio::test]
async fn test_ingest_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/swagger.json"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(fixture("petstore.json")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let service = service().await;
    let token = CancellationToken::new();
    let summary = service
        .ingest_url(
            &format!("{}/v2/swagger.json", server.uri()),
            IngestOptions::new().with_name("Petstore (remote)"),
            &token,
        )
        .await
        .unwrap();
    assert_eq!(summary.endpoint_count, 7);
    assert_eq!(summary.name, "Petstore (remote)");

    let before = service.stats().await;
    let err = service
        .ingest_url(&format!("{}/broken.json", server.uri()), IngestOptions::new(), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::Fetch(_)), "{err}");
    assert_eq!(service.stats().await, before);
}

#[tokio::test]
async fn test_ingest_url_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(fixture("petstore.json"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let config = ServiceConfig::new(temp_dir.path()).with_fetch(FetchConfig {
        timeout_secs: 1,
        ..FetchConfig::default()
    });
    let service = ApiQueryService::new(config).await.unwrap();

    let err = service
        .ingest_url(
            &format!("{}/slow.json", server.uri()),
            IngestOptions::new(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RetrievalError::Fetch(_)), "{err}");
    assert_eq!(service.stats().await.total_chunks, 0);
}

#[tokio::test]
async fn test_persisted_index_survives_restart() -> anyhow::Result<()> {
    init_tracing();
    let temp_dir = TempDir::new()?;

    {
        let service = ApiQueryService::new(ServiceConfig::new(temp_dir.path())).await?;
        service
            .ingest(
                &fixture("petstore.json"),
                IngestOptions::new().with_doc_id("petstore"),
                &CancellationToken::new(),
            )
            .await?;
        service.close().await?;
    }

    let service = ApiQueryService::new(ServiceConfig::new(temp_dir.path())).await?;
    let health = service.health().await;
    assert!(health.healthy);
    assert!(health.persistent);
    assert_eq!(health.total_chunks, 7);

    let record = service.document("petstore").await?;
    assert_eq!(record.name, "Swagger Petstore");
    assert_eq!(record.base_url.as_deref(), Some("https://petstore.swagger.io/v2"));

    let result = service.generate("Delete a pet", false).await;
    assert_eq!(
        result.generated_query.and_then(|q| q.method),
        Some(HttpMethod::Delete)
    );
    Ok(())
}

#[tokio::test]
async fn test_explain_generated_query() {
    let service = service().await;
    ingest_fixture(&service, "petstore.json", "petstore").await;

    let query = service
        .generate("Find pets by status", false)
        .await
        .generated_query
        .unwrap();
    let text = service.explain(&query);

    assert!(text.starts_with("API Query Explanation:\n- Method: GET\n"));
    assert!(text.contains("- Purpose: Finds Pets by status"));
    assert!(text.contains("- Parameters Used: status"));
}
