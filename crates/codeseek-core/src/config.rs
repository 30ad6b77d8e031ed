use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SeekError;
use crate::models::{ModelRegistry, ModelSpec, RerankRegistry};
use crate::types::{FusionKind, SearchMode};

/// Name of the per-repository configuration file.
pub const CONFIG_FILE_NAME: &str = ".codeseek.toml";

/// Top-level configuration loaded from `.codeseek.toml`.
///
/// Resolution order is CLI flags > config file > defaults.
///
/// # Examples
///
/// ```
/// use codeseek_core::SeekConfig;
///
/// let config = SeekConfig::default();
/// assert_eq!(config.index.model, "hash-384");
/// assert_eq!(config.search.top_k, 10);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeekConfig {
    /// Index lifecycle settings.
    #[serde(default)]
    pub index: IndexConfig,
    /// Chunk sizing.
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Inference capability settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Query defaults.
    #[serde(default)]
    pub search: SearchConfig,
    /// Extra models merged into the built-in registry.
    #[serde(default)]
    pub models: BTreeMap<String, ModelSpec>,
}

impl SeekConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Io`] if the file cannot be read, or
    /// [`SeekError::Toml`] / [`SeekError::Config`] if it is invalid.
    pub fn from_file(path: &Path) -> Result<Self, SeekError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load `<root>/.codeseek.toml` if present, defaults otherwise.
    ///
    /// # Errors
    ///
    /// Same as [`SeekConfig::from_file`].
    pub fn discover(root: &Path) -> Result<Self, SeekError> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Toml`] if parsing fails, or
    /// [`SeekError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use codeseek_core::SeekConfig;
    ///
    /// let toml = r#"
    /// [search]
    /// top_k = 25
    /// "#;
    /// let config = SeekConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.search.top_k, 25);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, SeekError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Config`] naming the offending key.
    pub fn validate(&self) -> Result<(), SeekError> {
        if self.index.workers == 0 {
            return Err(SeekError::Config("index.workers must be at least 1".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(SeekError::Config(
                "embedding.batch_size must be at least 1".into(),
            ));
        }
        if self.chunking.max_tokens < 16 {
            return Err(SeekError::Config(
                "chunking.max_tokens must be at least 16".into(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.search.threshold) {
            return Err(SeekError::Config(format!(
                "search.threshold must be within [-1, 1], got {}",
                self.search.threshold
            )));
        }
        if self.search.lexical_weight < 0.0 || self.search.semantic_weight < 0.0 {
            return Err(SeekError::Config(
                "search weights must not be negative".into(),
            ));
        }
        if self.search.rerank_top_n == 0 {
            return Err(SeekError::Config(
                "search.rerank_top_n must be at least 1".into(),
            ));
        }
        if self.embedding.cache_capacity == 0 {
            return Err(SeekError::Config(
                "embedding.cache_capacity must be at least 1".into(),
            ));
        }
        RerankRegistry::default().resolve(Some(&self.search.rerank_model))?;
        Ok(())
    }

    /// Built-in model registry with `[models.*]` entries merged in.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Config`] if a custom model is malformed.
    pub fn registry(&self) -> Result<ModelRegistry, SeekError> {
        let mut registry = ModelRegistry::default();
        for (alias, spec) in &self.models {
            registry.register(alias, spec.clone())?;
        }
        Ok(registry)
    }
}

/// Index lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Active model alias (default: `"hash-384"`).
    #[serde(default = "default_model")]
    pub model: String,
    /// Files chunked and embedded concurrently (default: 4).
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_model() -> String {
    "hash-384".into()
}

fn default_workers() -> usize {
    4
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            workers: default_workers(),
        }
    }
}

/// Chunk sizing configuration.
///
/// # Examples
///
/// ```
/// use codeseek_core::ChunkingConfig;
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.max_tokens, 512);
/// assert_eq!(config.overlap_lines, 2);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Upper bound on tokens per chunk; further capped by the model window.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Lines of preceding context carried by fallback windows.
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,
    /// Chunks with fewer non-whitespace characters are merged into a neighbour.
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
}

fn default_max_tokens() -> usize {
    512
}

fn default_overlap_lines() -> usize {
    2
}

fn default_min_chunk_chars() -> usize {
    16
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_lines: default_overlap_lines(),
            min_chunk_chars: default_min_chunk_chars(),
        }
    }
}

/// Configuration for the inference capability.
///
/// # Examples
///
/// ```
/// use codeseek_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.base_url, "http://127.0.0.1:8080/v1");
/// assert_eq!(config.batch_size, 32);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the local inference server (http models only).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Optional bearer token for the inference server.
    pub api_key: Option<String>,
    /// Timeout for a single inference call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Texts sent per inference call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Vectors kept in the in-memory embedding cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/v1".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    32
}

fn default_cache_capacity() -> u64 {
    65_536
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            batch_size: default_batch_size(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Query defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default retrieval mode.
    #[serde(default)]
    pub mode: SearchMode,
    /// Minimum cosine similarity for semantic hits (default: 0.0).
    #[serde(default)]
    pub threshold: f64,
    /// Maximum results returned (default: 10).
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Hybrid fusion formula.
    #[serde(default)]
    pub fusion: FusionKind,
    /// Reciprocal rank fusion constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
    /// Weight of the lexical channel for weighted fusion.
    #[serde(default = "default_weight")]
    pub lexical_weight: f64,
    /// Weight of the semantic channel for weighted fusion.
    #[serde(default = "default_weight")]
    pub semantic_weight: f64,
    /// Lines of chunk text rendered per result.
    #[serde(default = "default_snippet_lines")]
    pub snippet_lines: usize,
    /// Reorder the head of the ranking with a reranking model.
    #[serde(default)]
    pub rerank: bool,
    /// Reranking model alias (default: `"overlap"`).
    #[serde(default = "default_rerank_model")]
    pub rerank_model: String,
    /// Leading results passed to the reranker.
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
}

fn default_top_k() -> usize {
    10
}

fn default_rrf_k() -> usize {
    60
}

fn default_weight() -> f64 {
    0.5
}

fn default_snippet_lines() -> usize {
    3
}

fn default_rerank_model() -> String {
    "overlap".into()
}

fn default_rerank_top_n() -> usize {
    30
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            threshold: 0.0,
            top_k: default_top_k(),
            fusion: FusionKind::default(),
            rrf_k: default_rrf_k(),
            lexical_weight: default_weight(),
            semantic_weight: default_weight(),
            snippet_lines: default_snippet_lines(),
            rerank: false,
            rerank_model: default_rerank_model(),
            rerank_top_n: default_rerank_top_n(),
        }
    }
}
