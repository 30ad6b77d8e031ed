//! Second-stage reranking of the head of a ranking.
//!
//! A [`Reranker`] scores `(query, document)` pairs jointly, which the
//! retrieval channels cannot do. [`HttpReranker`] calls a local inference
//! server exposing `POST {base_url}/rerank`; [`OverlapReranker`] is an
//! offline scorer based on query-term coverage.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codeseek_core::{EmbeddingConfig, RerankModelSpec, RerankProvider, SeekError};
use serde::{Deserialize, Serialize};

use crate::embedding::{identifiers, split_identifier};

/// Scores documents against a query.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Model alias the scores come from.
    fn model_id(&self) -> &str;

    /// One relevance score in `[0, 1]` per document, in input order.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, SeekError>;
}

/// Lowercased identifiers and their `snake_case` / `camelCase` parts.
fn terms(text: &str) -> HashSet<String> {
    let mut terms = HashSet::new();
    for word in identifiers(text) {
        terms.insert(word.to_lowercase());
        terms.extend(split_identifier(word));
    }
    terms
}

/// Offline reranker: the share of query terms a document contains, plus a
/// bonus when the whole query appears verbatim.
///
/// # Examples
///
/// ```
/// use codeseek_engine::rerank::OverlapReranker;
///
/// let reranker = OverlapReranker::new("overlap");
/// let close = reranker.score("parse config", "fn parse_config(path: &str) {}");
/// let far = reranker.score("parse config", "fn render_button() {}");
/// assert!(close > far);
/// ```
#[derive(Debug, Clone)]
pub struct OverlapReranker {
    model_id: String,
}

impl OverlapReranker {
    /// Create an overlap reranker reporting `model_id`.
    pub fn new(model_id: &str) -> Self {
        Self {
            model_id: model_id.to_string(),
        }
    }

    /// Score one document synchronously.
    pub fn score(&self, query: &str, document: &str) -> f32 {
        let wanted = terms(query);
        if wanted.is_empty() {
            return 0.0;
        }
        let present = terms(document);
        let covered = wanted.iter().filter(|t| present.contains(*t)).count();
        let coverage = covered as f32 / wanted.len() as f32;

        let phrase = document
            .to_lowercase()
            .contains(&query.trim().to_lowercase());
        0.8 * coverage + if phrase { 0.2 } else { 0.0 }
    }
}

#[async_trait]
impl Reranker for OverlapReranker {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, SeekError> {
        Ok(documents.iter().map(|d| self.score(query, d)).collect())
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
    return_documents: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RerankResponse {
    Wrapped { results: Vec<RerankItem> },
    Bare(Vec<RerankItem>),
}

#[derive(Deserialize)]
struct RerankItem {
    index: usize,
    #[serde(alias = "score")]
    relevance_score: f32,
}

/// Client for a local inference server exposing `POST {base_url}/rerank`.
///
/// Accepts both `{"results": [{"index", "relevance_score"}]}` and a bare
/// `[{"index", "score"}]` array. Raw logits are mapped through a sigmoid.
pub struct HttpReranker {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    spec: RerankModelSpec,
}

impl std::fmt::Debug for HttpReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReranker")
            .field("base_url", &self.base_url)
            .field("model", &self.spec.name)
            .finish_non_exhaustive()
    }
}

impl HttpReranker {
    /// Create a client for `spec` using the server settings in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Config`] if the HTTP client cannot be built.
    pub fn new(spec: &RerankModelSpec, config: &EmbeddingConfig) -> Result<Self, SeekError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SeekError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config
                .api_key
                .clone()
                .or_else(|| std::env::var("CODESEEK_API_KEY").ok()),
            spec: spec.clone(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    fn model_id(&self) -> &str {
        &self.spec.id
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, SeekError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let request = RerankRequest {
            model: &self.spec.name,
            query,
            documents,
            top_n: documents.len(),
            return_documents: false,
        };

        let mut builder = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                SeekError::ModelUnavailable {
                    model: self.spec.id.clone(),
                    reason: format!("cannot reach {}: {e}", self.base_url),
                }
            } else {
                SeekError::Embedding(format!("rerank request failed: {e}"))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(SeekError::Embedding(format!(
                "inference server returned {status} for reranker '{}': {body}",
                self.spec.name
            )));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| SeekError::Embedding(format!("failed to parse rerank response: {e}")))?;

        scores_in_order(parsed, documents.len())
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn scores_in_order(response: RerankResponse, expected: usize) -> Result<Vec<f32>, SeekError> {
    let items = match response {
        RerankResponse::Wrapped { results } => results,
        RerankResponse::Bare(items) => items,
    };

    let mut scores = vec![None; expected];
    for item in items {
        if let Some(slot) = scores.get_mut(item.index) {
            *slot = Some(item.relevance_score);
        }
    }
    let mut scores = scores
        .into_iter()
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| {
            SeekError::Embedding(format!("reranker did not score all {expected} documents"))
        })?;

    if scores.iter().any(|s| !(0.0..=1.0).contains(s)) {
        for s in &mut scores {
            *s = sigmoid(*s);
        }
    }
    Ok(scores)
}

/// Build the reranker for a model according to its provider.
///
/// # Errors
///
/// Returns [`SeekError::Config`] if the HTTP client cannot be created.
///
/// # Examples
///
/// ```
/// use codeseek_core::{EmbeddingConfig, RerankRegistry};
/// use codeseek_engine::rerank::build_reranker;
///
/// let spec = RerankRegistry::default().resolve(None).unwrap();
/// let reranker = build_reranker(&spec, &EmbeddingConfig::default()).unwrap();
/// assert_eq!(reranker.model_id(), "overlap");
/// ```
pub fn build_reranker(
    spec: &RerankModelSpec,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn Reranker>, SeekError> {
    match spec.provider {
        RerankProvider::Overlap => Ok(Arc::new(OverlapReranker::new(&spec.id))),
        RerankProvider::Http => Ok(Arc::new(HttpReranker::new(spec, config)?)),
    }
}
