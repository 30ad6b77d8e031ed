//! Embedding gateway: the boundary to the inference capability.
//!
//! [`Embedder`] is the opaque `embed(texts) -> vectors` capability.
//! [`HttpEmbedder`] talks to a locally running server with an
//! OpenAI-compatible `/embeddings` endpoint; [`HashEmbedder`] is an offline
//! feature-hashing model that needs no runtime at all. [`EmbeddingGateway`]
//! wraps either one with batching, validation and a content-keyed cache.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codeseek_core::{EmbeddingConfig, ModelProvider, ModelSpec, SeekError};
use codeseek_discover::fingerprint;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};

/// Vectors kept in memory when no capacity is configured.
pub const DEFAULT_CACHE_CAPACITY: u64 = 65_536;

type CacheKey = (String, String);

/// The inference capability: turns texts into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded alongside every vector.
    fn model_id(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    /// Embed `texts`, returning one vector per text in the same order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SeekError>;
}

/// Scale `vector` to unit length in place. Zero vectors are left alone.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Offline embedder based on signed feature hashing.
///
/// Identifiers are split on `snake_case` and `camelCase` boundaries, and
/// each token contributes its whole form, its lowercase parts and its
/// character trigrams. Texts sharing vocabulary end up close together,
/// which is enough for a useful semantic channel without a model runtime.
///
/// # Examples
///
/// ```
/// use codeseek_engine::embedding::HashEmbedder;
///
/// let embedder = HashEmbedder::new("hash-384", 384);
/// let a = embedder.embed_one("fn parse_config(path: &Path)");
/// let b = embedder.embed_one("fn parse_config(path: &Path)");
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 384);
/// ```
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    model_id: String,
    dimensions: usize,
}

impl HashEmbedder {
    /// Create a hashing embedder with the given id and vector length.
    pub fn new(model_id: &str, dimensions: usize) -> Self {
        Self {
            model_id: model_id.to_string(),
            dimensions: dimensions.max(1),
        }
    }

    /// Embed a single text synchronously.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for word in identifiers(text) {
            let lower = word.to_lowercase();
            self.add_feature(&mut vector, "w", &lower, 1.0);

            let parts = split_identifier(word);
            if parts.len() > 1 {
                for part in &parts {
                    self.add_feature(&mut vector, "p", part, 0.6);
                }
            }
            for part in &parts {
                let padded: Vec<char> = format!("^{part}$").chars().collect();
                for gram in padded.windows(3) {
                    let gram: String = gram.iter().collect();
                    self.add_feature(&mut vector, "g", &gram, 0.25);
                }
            }
        }

        l2_normalize(&mut vector);
        vector
    }

    fn add_feature(&self, vector: &mut [f32], namespace: &str, token: &str, weight: f32) {
        let hash = fnv1a(namespace.as_bytes(), token.as_bytes());
        let slot = (hash % self.dimensions as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[slot] += sign * weight;
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SeekError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(namespace: &[u8], token: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in namespace.iter().chain(b":").chain(token) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Alphanumeric runs (underscores included) of at least two characters.
pub(crate) fn identifiers(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .map(|w| w.trim_matches('_'))
        .filter(|w| w.chars().count() >= 2)
}

/// Split `parseHTTPConfig_v2` into `["parse", "http", "config", "v2"]`.
pub(crate) fn split_identifier(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for segment in word.split('_').filter(|s| !s.is_empty()) {
        let chars: Vec<char> = segment.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            let boundary = i > 0
                && c.is_uppercase()
                && (chars[i - 1].is_lowercase()
                    || chars.get(i + 1).is_some_and(|n| n.is_lowercase()));
            if boundary && !current.is_empty() {
                parts.push(current.to_lowercase());
                current.clear();
            }
            current.push(c);
        }
        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }
    parts
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Client for a local inference server exposing `POST {base_url}/embeddings`.
///
/// # Examples
///
/// ```
/// use codeseek_core::{EmbeddingConfig, ModelRegistry};
/// use codeseek_engine::embedding::{Embedder, HttpEmbedder};
///
/// let spec = ModelRegistry::default().resolve(Some("bge-small")).unwrap();
/// let embedder = HttpEmbedder::new(&spec, &EmbeddingConfig::default()).unwrap();
/// assert_eq!(embedder.model_id(), "bge-small");
/// assert_eq!(embedder.dimensions(), 384);
/// ```
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    spec: ModelSpec,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.spec.name)
            .finish_non_exhaustive()
    }
}

impl HttpEmbedder {
    /// Create a client for `spec` using the server settings in `config`.
    ///
    /// Falls back to the `CODESEEK_API_KEY` env var if no key is configured.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Config`] if the HTTP client cannot be built.
    pub fn new(spec: &ModelSpec, config: &EmbeddingConfig) -> Result<Self, SeekError> {
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

    fn unavailable(&self, reason: String) -> SeekError {
        SeekError::ModelUnavailable {
            model: self.spec.id.clone(),
            reason,
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.spec.id
    }

    fn dimensions(&self) -> usize {
        self.spec.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SeekError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.spec.name,
            input: texts,
        };

        let mut builder = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                self.unavailable(format!("cannot reach {}: {e}", self.base_url))
            } else {
                SeekError::Embedding(format!("HTTP request failed: {e}"))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(SeekError::Embedding(format!(
                "inference server returned {status} for model '{}': {body}",
                self.spec.name
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| SeekError::Embedding(format!("failed to parse response: {e}")))?;

        Ok(order_by_index(parsed.data))
    }
}

fn order_by_index(mut data: Vec<EmbedDataItem>) -> Vec<Vec<f32>> {
    if data.iter().all(|item| item.index.is_some()) {
        data.sort_by_key(|item| item.index);
    }
    data.into_iter().map(|item| item.embedding).collect()
}

/// Build the embedder for a model according to its provider.
///
/// # Errors
///
/// Returns [`SeekError::Config`] if the HTTP client cannot be created.
///
/// # Examples
///
/// ```
/// use codeseek_core::{EmbeddingConfig, ModelRegistry};
/// use codeseek_engine::embedding::build_embedder;
///
/// let spec = ModelRegistry::default().resolve(None).unwrap();
/// let embedder = build_embedder(&spec, &EmbeddingConfig::default()).unwrap();
/// assert_eq!(embedder.model_id(), "hash-384");
/// ```
pub fn build_embedder(
    spec: &ModelSpec,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn Embedder>, SeekError> {
    match spec.provider {
        ModelProvider::Hash => Ok(Arc::new(HashEmbedder::new(&spec.id, spec.dimensions))),
        ModelProvider::Http => Ok(Arc::new(HttpEmbedder::new(spec, config)?)),
    }
}

/// Counters reported by the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    /// Vectors produced by the embedder.
    pub computed: usize,
    /// Vectors served from the cache.
    pub cache_hits: usize,
}

/// Batching, caching front for an [`Embedder`].
///
/// Vectors are cached under `(model id, SHA-256 of text)`, so identical text
/// in several files, or text that reappears after an edit is reverted, is
/// embedded once. The cache holds at most a fixed number of vectors and
/// evicts the least useful ones beyond that.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use codeseek_engine::embedding::{EmbeddingGateway, HashEmbedder};
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// rt.block_on(async {
///     let gateway = EmbeddingGateway::new(Arc::new(HashEmbedder::new("hash-384", 384)), 32);
///     let texts = vec!["fn a() {}".to_string(), "fn a() {}".to_string()];
///     let vectors = gateway.embed(&texts, "hash-384").await.unwrap();
///     assert_eq!(vectors.len(), 2);
///     assert_eq!(gateway.cache_len(), 1);
/// });
/// ```
pub struct EmbeddingGateway {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    cache: Cache<CacheKey, Arc<Vec<f32>>>,
    computed: AtomicUsize,
    cache_hits: AtomicUsize,
}

impl std::fmt::Debug for EmbeddingGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingGateway")
            .field("model", &self.embedder.model_id())
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl EmbeddingGateway {
    /// Wrap `embedder`, sending at most `batch_size` texts per call.
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self::with_capacity(embedder, batch_size, DEFAULT_CACHE_CAPACITY)
    }

    /// Like [`EmbeddingGateway::new`], caching at most `capacity` vectors.
    pub fn with_capacity(embedder: Arc<dyn Embedder>, batch_size: usize, capacity: u64) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            cache: Cache::builder().max_capacity(capacity.max(1)).build(),
            computed: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
        }
    }

    /// Model the gateway produces vectors for.
    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    /// Vector length of the wrapped embedder.
    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    fn check_model(&self, model_id: &str) -> Result<(), SeekError> {
        if model_id != self.embedder.model_id() {
            return Err(SeekError::ModelUnavailable {
                model: model_id.to_string(),
                reason: format!(
                    "the embedding gateway serves '{}'",
                    self.embedder.model_id()
                ),
            });
        }
        Ok(())
    }

    /// Embed `texts` with `model_id`, one vector per text, in order.
    ///
    /// # Errors
    ///
    /// - [`SeekError::ModelUnavailable`] if `model_id` is not the embedder's
    ///   model or the inference capability is unreachable.
    /// - [`SeekError::Embedding`] if the embedder returns the wrong number of
    ///   vectors or vectors of the wrong length.
    pub async fn embed(&self, texts: &[String], model_id: &str) -> Result<Vec<Vec<f32>>, SeekError> {
        self.check_model(model_id)?;

        let keys: Vec<CacheKey> = texts
            .iter()
            .map(|t| (model_id.to_string(), fingerprint(t.as_bytes())))
            .collect();

        let mut results: Vec<Option<Arc<Vec<f32>>>> =
            keys.iter().map(|k| self.cache.get(k)).collect();

        // Distinct texts still missing, in first-seen order
        let mut pending: Vec<usize> = Vec::new();
        let mut seen: HashSet<&CacheKey> = HashSet::new();
        for (i, key) in keys.iter().enumerate() {
            if results[i].is_none() && seen.insert(key) {
                pending.push(i);
            }
        }
        self.cache_hits
            .fetch_add(texts.len() - pending.len(), Ordering::Relaxed);

        // Fresh vectors are served from here; the cache may evict them at once
        let mut fresh: HashMap<&CacheKey, Arc<Vec<f32>>> = HashMap::new();
        for batch in pending.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.embedder.embed(&inputs).await?;
            self.validate(&inputs, &vectors)?;

            for (&i, mut vector) in batch.iter().zip(vectors) {
                l2_normalize(&mut vector);
                let vector = Arc::new(vector);
                self.cache.insert(keys[i].clone(), vector.clone());
                fresh.insert(&keys[i], vector);
            }
            self.computed.fetch_add(batch.len(), Ordering::Relaxed);
        }

        for (slot, key) in results.iter_mut().zip(&keys) {
            if slot.is_none() {
                *slot = fresh.get(key).cloned();
            }
        }

        results
            .into_iter()
            .map(|v| {
                v.map(|v| v.as_ref().clone())
                    .ok_or_else(|| SeekError::Embedding("vector missing from cache".into()))
            })
            .collect()
    }

    /// Embed a single query text.
    ///
    /// # Errors
    ///
    /// Same as [`EmbeddingGateway::embed`].
    pub async fn embed_query(&self, text: &str, model_id: &str) -> Result<Vec<f32>, SeekError> {
        let mut vectors = self.embed(&[text.to_string()], model_id).await?;
        vectors
            .pop()
            .ok_or_else(|| SeekError::Embedding("embedder returned no vector".into()))
    }

    /// Seed the cache with vectors already stored for `model_id`.
    pub fn prime<I>(&self, model_id: &str, entries: I)
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        for (text_hash, vector) in entries {
            if vector.len() == self.embedder.dimensions() {
                self.cache
                    .insert((model_id.to_string(), text_hash), Arc::new(vector));
            }
        }
    }

    /// Number of cached vectors.
    pub fn cache_len(&self) -> usize {
        self.cache.run_pending_tasks();
        self.cache.entry_count() as usize
    }

    /// Counters since the gateway was created.
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            computed: self.computed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    fn validate(&self, inputs: &[String], vectors: &[Vec<f32>]) -> Result<(), SeekError> {
        if vectors.len() != inputs.len() {
            return Err(SeekError::Embedding(format!(
                "model '{}' returned {} vectors for {} texts",
                self.embedder.model_id(),
                vectors.len(),
                inputs.len()
            )));
        }
        let expected = self.embedder.dimensions();
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(SeekError::Embedding(format!(
                "model '{}' returned a {}-dimensional vector, expected {expected}",
                self.embedder.model_id(),
                bad.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    /// Records every batch it receives.
    struct CountingEmbedder {
        inner: HashEmbedder,
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_id(&self) -> &str {
            self.inner.model_id()
        }
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SeekError> {
            self.batches.lock().unwrap().push(texts.len());
            self.inner.embed(texts).await
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn model_id(&self) -> &str {
            "short"
        }
        fn dimensions(&self) -> usize {
            8
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SeekError> {
            Ok(texts.iter().map(|_| vec![1.0; 4]).collect())
        }
    }

    #[test]
    fn hash_vectors_are_unit_length() {
        let embedder = HashEmbedder::new("hash-384", 384);
        let v = embedder.embed_one("fn connect_database(url: &str) -> Connection");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_vocabulary_scores_higher() {
        let embedder = HashEmbedder::new("hash-384", 384);
        let query = embedder.embed_one("open database connection");
        let related = embedder.embed_one("fn open_connection(db: &Database) -> Connection {}");
        let unrelated = embedder.embed_one("fn render_button(color: Color) -> Widget {}");
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[test]
    fn text_without_identifiers_is_zero() {
        let embedder = HashEmbedder::new("hash-256", 256);
        assert!(embedder.embed_one("{ } ( ) ;").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn identifiers_split_on_case_and_underscores() {
        assert_eq!(
            split_identifier("parseHTTPConfig_v2"),
            vec!["parse", "http", "config", "v2"]
        );
        assert_eq!(split_identifier("snake_case"), vec!["snake", "case"]);
        assert_eq!(split_identifier("plain"), vec!["plain"]);
    }

    #[tokio::test]
    async fn gateway_batches_and_caches() {
        let embedder = Arc::new(CountingEmbedder {
            inner: HashEmbedder::new("hash-64", 64),
            batches: Mutex::new(Vec::new()),
        });
        let gateway = EmbeddingGateway::new(embedder.clone(), 2);

        let texts: Vec<String> = ["a1", "b2", "c3", "a1", "d4"].iter().map(|s| s.to_string()).collect();
        let vectors = gateway.embed(&texts, "hash-64").await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(vectors[0], vectors[3]);
        assert_eq!(*embedder.batches.lock().unwrap(), vec![2, 2]);
        assert_eq!(gateway.cache_len(), 4);

        // Second call is served entirely from the cache
        gateway.embed(&texts, "hash-64").await.unwrap();
        assert_eq!(embedder.batches.lock().unwrap().len(), 2);
        let stats = gateway.stats();
        assert_eq!(stats.computed, 4);
        assert_eq!(stats.cache_hits, 1 + 5);
    }

    #[tokio::test]
    async fn gateway_cache_is_bounded() {
        let embedder = Arc::new(CountingEmbedder {
            inner: HashEmbedder::new("hash-64", 64),
            batches: Mutex::new(Vec::new()),
        });
        let gateway = EmbeddingGateway::with_capacity(embedder.clone(), 8, 2);

        let texts: Vec<String> = (0..6).map(|i| format!("fn item_{i}() {{}}")).collect();
        let vectors = gateway.embed(&texts, "hash-64").await.unwrap();
        assert_eq!(vectors.len(), 6);
        for (text, vector) in texts.iter().zip(&vectors) {
            let expected = embedder.inner.embed_one(text);
            assert!(vector.iter().zip(&expected).all(|(a, b)| (a - b).abs() < 1e-6));
        }
        assert!(gateway.cache_len() <= 2);
    }

    #[tokio::test]
    async fn gateway_rejects_other_models() {
        let gateway = EmbeddingGateway::new(Arc::new(HashEmbedder::new("hash-384", 384)), 8);
        let err = gateway.embed_query("query", "bge-small").await.unwrap_err();
        assert!(matches!(err, SeekError::ModelUnavailable { .. }));
        assert!(err.to_string().contains("bge-small"));
    }

    #[tokio::test]
    async fn gateway_validates_dimensions() {
        let gateway = EmbeddingGateway::new(Arc::new(ShortEmbedder), 8);
        let err = gateway.embed_query("query", "short").await.unwrap_err();
        assert!(matches!(err, SeekError::Embedding(_)));
        assert!(err.to_string().contains("expected 8"));
    }

    #[tokio::test]
    async fn primed_vectors_skip_the_embedder() {
        let embedder = Arc::new(CountingEmbedder {
            inner: HashEmbedder::new("hash-64", 64),
            batches: Mutex::new(Vec::new()),
        });
        let gateway = EmbeddingGateway::new(embedder.clone(), 8);
        let text = "fn cached() {}".to_string();
        gateway.prime("hash-64", vec![(fingerprint(text.as_bytes()), vec![0.5; 64])]);

        let vector = gateway.embed_query(&text, "hash-64").await.unwrap();
        assert_eq!(vector, vec![0.5; 64]);
        assert!(embedder.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn response_parsing_respects_index() {
        let json = r#"{
            "data": [
                {"embedding": [0.4, 0.5], "index": 1},
                {"embedding": [0.1, 0.2], "index": 0}
            ]
        }"#;
        let response: EmbedResponse = serde_json::from_str(json).unwrap();
        let vectors = order_by_index(response.data);
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.4, 0.5]]);
    }

    #[test]
    fn request_format_is_openai_compatible() {
        let input = vec!["fn main() {}".to_string()];
        let request = EmbedRequest {
            model: "BAAI/bge-small-en-v1.5",
            input: &input,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "BAAI/bge-small-en-v1.5");
        assert_eq!(json["input"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_server_is_model_unavailable() {
        let spec = codeseek_core::ModelRegistry::default()
            .resolve(Some("bge-small"))
            .unwrap();
        let config = EmbeddingConfig {
            // Port 9 (discard) on localhost is closed in test environments
            base_url: "http://127.0.0.1:9/v1".into(),
            timeout_secs: 2,
            ..EmbeddingConfig::default()
        };
        let embedder = HttpEmbedder::new(&spec, &config).unwrap();
        let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, SeekError::ModelUnavailable { .. }), "{err}");
    }
}
