//! Turning retrieved chunks into a candidate API call.

use std::collections::BTreeMap;

use apiq_spec_parser::{HttpMethod, ParameterLocation, SourceType};
use apiq_vector_index::RetrievedMatch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::confidence::ConfidencePolicy;
use crate::intent::{Intent, IntentLexicon, IntentSource};

/// A drafted API call. Only `confidence` is set when nothing was retrieved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<HttpMethod>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    pub confidence: f32,

    /// Summary of the chosen endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,

    #[serde(default)]
    pub parameters_used: Vec<String>,
}

impl GeneratedQuery {
    fn empty() -> Self {
        Self {
            method: None,
            url: None,
            headers: None,
            body: None,
            confidence: 0.0,
            purpose: None,
            parameters_used: Vec::new(),
        }
    }
}

/// One retrieved match as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantDocument {
    pub document: String,
    pub doc_type: SourceType,
    pub relevance_score: f32,
    /// `"{METHOD} {path}"`.
    pub endpoint: String,
}

impl From<&RetrievedMatch> for RelevantDocument {
    fn from(m: &RetrievedMatch) -> Self {
        Self {
            document: m.document_name.clone(),
            doc_type: m.doc_type,
            relevance_score: m.similarity_score,
            endpoint: m.metadata.endpoint(),
        }
    }
}

/// Outcome of a generate request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,

    pub user_query: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_query: Option<GeneratedQuery>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,

    #[serde(default)]
    pub relevant_documents: Vec<RelevantDocument>,

    /// Number of matches fed to synthesis.
    pub context_used: usize,

    /// Set only when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// A failed request.
    pub fn failure(user_query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            user_query: user_query.into(),
            generated_query: None,
            explanation: None,
            relevant_documents: Vec::new(),
            context_used: 0,
            error: Some(error.into()),
        }
    }

    /// Confidence of the generated query, `0` when there is none.
    pub fn confidence(&self) -> f32 {
        self.generated_query.as_ref().map_or(0.0, |q| q.confidence)
    }
}

/// Produces a [`QueryResult`] from a request and its retrieved matches.
///
/// Synthesis cannot fail: an empty match set is a valid zero-confidence
/// result.
#[async_trait]
pub trait QuerySynthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, query_text: &str, matches: &[RetrievedMatch]) -> QueryResult;
}

/// Keyword intent plus retrieval rank, no language model.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedSynthesizer {
    lexicon: IntentLexicon,
    confidence: ConfidencePolicy,
}

impl RuleBasedSynthesizer {
    pub fn new(lexicon: IntentLexicon, confidence: ConfidencePolicy) -> Self {
        Self {
            lexicon,
            confidence,
        }
    }

    pub fn with_lexicon(mut self, lexicon: IntentLexicon) -> Self {
        self.lexicon = lexicon;
        self
    }

    pub fn with_confidence(mut self, confidence: ConfidencePolicy) -> Self {
        self.confidence = confidence;
        self
    }

    /// Synchronous core of [`QuerySynthesizer::synthesize`].
    pub fn draft(&self, query_text: &str, matches: &[RetrievedMatch]) -> QueryResult {
        let relevant_documents = matches.iter().map(RelevantDocument::from).collect();

        let Some(top) = matches.first() else {
            return QueryResult {
                success: true,
                user_query: query_text.to_string(),
                generated_query: Some(GeneratedQuery {
                    confidence: self.confidence.no_match(),
                    ..GeneratedQuery::empty()
                }),
                explanation: Some(
                    "No relevant documentation was found for this request.".to_string(),
                ),
                relevant_documents,
                context_used: 0,
                error: None,
            };
        };

        let intent = self.lexicon.detect(query_text);
        let agreeing = matches.iter().find(|m| m.metadata.method == intent.method);
        let candidate = agreeing.unwrap_or(top);
        let agrees = agreeing.is_some();

        let query = GeneratedQuery {
            method: Some(candidate.metadata.method),
            url: Some(build_url(candidate)),
            headers: Some(build_headers(candidate)),
            body: build_body(candidate),
            confidence: self.confidence.score(candidate.similarity_score, agrees),
            purpose: Some(candidate.metadata.summary.clone()),
            parameters_used: candidate.metadata.parameter_names.clone(),
        };
        debug!(
            method = %candidate.metadata.method,
            path = %candidate.metadata.path,
            intent = %intent.method,
            agrees,
            confidence = query.confidence,
            "synthesized query"
        );

        QueryResult {
            success: true,
            user_query: query_text.to_string(),
            explanation: Some(explain_choice(candidate, &intent, agrees, matches.len())),
            generated_query: Some(query),
            relevant_documents,
            context_used: matches.len(),
            error: None,
        }
    }
}

#[async_trait]
impl QuerySynthesizer for RuleBasedSynthesizer {
    fn name(&self) -> &str {
        "rule-based"
    }

    async fn synthesize(&self, query_text: &str, matches: &[RetrievedMatch]) -> QueryResult {
        self.draft(query_text, matches)
    }
}

/// Base URL + path template, then `?name=` placeholders for query parameters.
fn build_url(candidate: &RetrievedMatch) -> String {
    let mut url = candidate
        .base_url
        .as_deref()
        .map(|base| base.trim_end_matches('/').to_string())
        .unwrap_or_default();
    url.push_str(&candidate.metadata.path);

    let query: Vec<String> = candidate
        .metadata
        .parameters
        .iter()
        .filter(|p| p.location == ParameterLocation::Query)
        .map(|p| format!("{}=", p.name))
        .collect();
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query.join("&"));
    }
    url
}

fn build_headers(candidate: &RetrievedMatch) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    if candidate.metadata.method.has_body() {
        headers.insert("Content-Type".to_string(), "application/json".to_string());
    }
    for param in &candidate.metadata.parameters {
        if param.location == ParameterLocation::Header {
            headers.entry(param.name.clone()).or_default();
        }
    }
    headers
}

/// Skeleton body for methods that carry one.
fn build_body(candidate: &RetrievedMatch) -> Option<Value> {
    if !candidate.metadata.method.has_body() {
        return None;
    }

    let fields: Vec<&str> = if candidate.metadata.body_fields.is_empty() {
        candidate
            .metadata
            .parameters
            .iter()
            .filter(|p| p.location == ParameterLocation::FormData)
            .map(|p| p.name.as_str())
            .collect()
    } else {
        candidate.metadata.body_fields.iter().map(String::as_str).collect()
    };

    let body: Map<String, Value> = fields
        .into_iter()
        .map(|field| (field.to_string(), Value::String(String::new())))
        .collect();
    Some(Value::Object(body))
}

fn explain_choice(candidate: &RetrievedMatch, intent: &Intent, agrees: bool, considered: usize) -> String {
    let wording = match &intent.source {
        IntentSource::Keyword(keyword) => format!("the keyword \"{keyword}\""),
        IntentSource::Default => "no verb keyword (default)".to_string(),
    };
    let agreement = if agrees {
        format!("the chosen endpoint agrees with the {} intent", intent.method)
    } else {
        format!(
            "no retrieved endpoint uses {}, so the top-ranked match was used",
            intent.method
        )
    };

    format!(
        "Selected {} {} from \"{}\" (similarity {:.2}). The request implies {} from {wording}; {agreement}. {considered} relevant endpoint(s) considered.",
        candidate.metadata.method,
        candidate.metadata.path,
        candidate.document_name,
        candidate.similarity_score,
        intent.method,
    )
}

/// Human-readable multi-line description of a generated query.
pub fn explain(query: &GeneratedQuery) -> String {
    if query.method.is_none() && query.url.is_none() {
        return "No query was generated.".to_string();
    }

    let method = query.method.map_or("UNKNOWN", HttpMethod::as_str);
    let url = query.url.as_deref().unwrap_or("unknown URL");
    let purpose = query.purpose.as_deref().unwrap_or("No explanation provided");

    let mut lines = vec![
        "API Query Explanation:".to_string(),
        format!("- Method: {method}"),
        format!("- URL: {url}"),
        format!("- Purpose: {purpose}"),
        format!("- Confidence: {:.2}/1.00", query.confidence),
    ];
    if let Some(headers) = query.headers.as_ref().filter(|h| !h.is_empty()) {
        let rendered: Vec<String> = headers.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        lines.push(format!("- Headers: {}", rendered.join(", ")));
    }
    if let Some(body) = query.body.as_ref().filter(|b| b.as_object().is_none_or(|o| !o.is_empty())) {
        lines.push(format!("- Body: {body}"));
    }
    if !query.parameters_used.is_empty() {
        lines.push(format!("- Parameters Used: {}", query.parameters_used.join(", ")));
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiq_spec_parser::{ChunkMetadata, Parameter};
    use pretty_assertions::assert_eq;

    fn hit(method: HttpMethod, path: &str, score: f32, params: Vec<Parameter>) -> RetrievedMatch {
        let metadata = ChunkMetadata {
            method,
            path: path.to_string(),
            summary: format!("{method} {path}"),
            tags: vec!["pet".to_string()],
            parameter_names: params.iter().map(|p| p.name.clone()).collect(),
            parameters: params,
            body_fields: Vec::new(),
        };
        RetrievedMatch {
            chunk_id: format!("{method}{path}"),
            doc_id: "petstore".to_string(),
            document_name: "Petstore".to_string(),
            doc_type: SourceType::OpenApi2,
            base_url: Some("https://petstore.swagger.io/v2/".to_string()),
            similarity_score: score,
            text: String::new(),
            metadata,
        }
    }

    #[test]
    fn test_empty_matches() {
        let result = RuleBasedSynthesizer::default().draft("anything", &[]);

        assert!(result.success);
        assert_eq!(result.confidence(), 0.0);
        assert!(result.relevant_documents.is_empty());
        let query = result.generated_query.unwrap();
        assert_eq!(query.method, None);
        assert_eq!(query.url, None);
        assert!(result.explanation.unwrap().contains("No relevant documentation"));
    }

    #[test]
    fn test_url_with_query_placeholders() {
        let matches = vec![hit(
            HttpMethod::Get,
            "/pet/findByStatus",
            0.9,
            vec![
                Parameter::new("status", ParameterLocation::Query),
                Parameter::new("limit", ParameterLocation::Query),
            ],
        )];
        let result = RuleBasedSynthesizer::default().draft("Find pets by status", &matches);
        let query = result.generated_query.unwrap();

        assert_eq!(
            query.url.as_deref(),
            Some("https://petstore.swagger.io/v2/pet/findByStatus?status=&limit=")
        );
        assert_eq!(query.body, None);
        assert_eq!(query.headers, Some(BTreeMap::new()));
        assert!((query.confidence - (0.7 * 0.9 + 0.3)).abs() < 1e-6);
    }

    #[test]
    fn test_prefers_method_agreeing_with_intent() {
        let matches = vec![
            hit(HttpMethod::Get, "/pet/{petId}", 0.8, vec![Parameter::new("petId", ParameterLocation::Path)]),
            hit(
                HttpMethod::Delete,
                "/pet/{petId}",
                0.7,
                vec![
                    Parameter::new("petId", ParameterLocation::Path),
                    Parameter::new("api_key", ParameterLocation::Header),
                ],
            ),
        ];
        let result = RuleBasedSynthesizer::default().draft("Delete a pet", &matches);
        let query = result.generated_query.clone().unwrap();

        assert_eq!(query.method, Some(HttpMethod::Delete));
        assert_eq!(query.url.as_deref(), Some("https://petstore.swagger.io/v2/pet/{petId}"));
        assert_eq!(query.headers.unwrap().get("api_key").map(String::as_str), Some(""));
        assert_eq!(result.relevant_documents.len(), 2);
        assert_eq!(result.relevant_documents[0].endpoint, "GET /pet/{petId}");
        assert!(result.explanation.unwrap().contains("agrees with the DELETE intent"));
    }

    #[test]
    fn test_falls_back_to_top_match() {
        let matches = vec![hit(HttpMethod::Get, "/store/inventory", 0.6, Vec::new())];
        let result = RuleBasedSynthesizer::default().draft("remove the inventory", &matches);
        let query = result.generated_query.unwrap();

        assert_eq!(query.method, Some(HttpMethod::Get));
        assert!((query.confidence - 0.7 * 0.6).abs() < 1e-6);
        assert!(result.explanation.unwrap().contains("top-ranked match was used"));
    }

    #[test]
    fn test_body_skeleton_for_post() {
        let mut post = hit(
            HttpMethod::Post,
            "/pet",
            0.5,
            vec![Parameter::new("X-Trace", ParameterLocation::Header)],
        );
        post.metadata.body_fields = vec!["name".to_string(), "photoUrls".to_string()];
        let query = RuleBasedSynthesizer::default()
            .draft("add a pet", &[post])
            .generated_query
            .unwrap();

        assert_eq!(
            query.body,
            Some(serde_json::json!({ "name": "", "photoUrls": "" }))
        );
        let headers = query.headers.unwrap();
        assert_eq!(headers.get("Content-Type").map(String::as_str), Some("application/json"));
        assert_eq!(headers.get("X-Trace").map(String::as_str), Some(""));
    }

    #[test]
    fn test_form_data_fills_body_when_no_fields() {
        let put = hit(
            HttpMethod::Put,
            "/profile",
            0.5,
            vec![Parameter::new("nickname", ParameterLocation::FormData)],
        );
        let query = RuleBasedSynthesizer::default()
            .draft("update my profile", &[put])
            .generated_query
            .unwrap();
        assert_eq!(query.body, Some(serde_json::json!({ "nickname": "" })));
    }

    #[test]
    fn test_higher_similarity_never_lowers_confidence() {
        let synthesizer = RuleBasedSynthesizer::default();
        let low = synthesizer.draft("find pets", &[hit(HttpMethod::Get, "/pet", 0.2, Vec::new())]);
        let high = synthesizer.draft("find pets", &[hit(HttpMethod::Get, "/pet", 0.9, Vec::new())]);
        assert!(high.confidence() >= low.confidence());
    }

    #[test]
    fn test_explain_lists_sections() {
        let matches = vec![hit(
            HttpMethod::Delete,
            "/pet/{petId}",
            0.8,
            vec![Parameter::new("petId", ParameterLocation::Path)],
        )];
        let query = RuleBasedSynthesizer::default()
            .draft("Delete a pet", &matches)
            .generated_query
            .unwrap();

        let text = explain(&query);
        assert!(text.starts_with("API Query Explanation:\n- Method: DELETE\n"));
        assert!(text.contains("- Confidence: 0.86/1.00"));
        assert!(text.contains("- Parameters Used: petId"));
        assert!(!text.contains("- Body:"));

        assert_eq!(explain(&GeneratedQuery::empty()), "No query was generated.");
    }

    #[test]
    fn test_explain_includes_headers_and_body() {
        let mut post = hit(HttpMethod::Post, "/pet", 0.5, Vec::new());
        post.metadata.body_fields = vec!["name".to_string()];
        let query = RuleBasedSynthesizer::default()
            .draft("add a pet", &[post])
            .generated_query
            .unwrap();

        let text = explain(&query);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "API Query Explanation:");
        assert_eq!(lines[5], "- Headers: Content-Type: application/json");
        assert_eq!(lines[6], r#"- Body: {"name":""}"#);
        assert_eq!(lines.len(), 7);
        assert!(text.ends_with('\n'));
    }
}
