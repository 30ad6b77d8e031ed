use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SeekError;

/// How vectors for a model are produced.
///
/// # Examples
///
/// ```
/// use codeseek_core::ModelProvider;
///
/// assert_eq!(format!("{}", ModelProvider::Http), "http");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    /// Deterministic in-process feature hashing; needs no inference runtime.
    Hash,
    /// A locally running inference server with an OpenAI-compatible
    /// `/embeddings` endpoint.
    Http,
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelProvider::Hash => write!(f, "hash"),
            ModelProvider::Http => write!(f, "http"),
        }
    }
}

/// A registered embedding model.
///
/// `id` is the short alias stored in the index metadata; `name` is the full
/// model name sent to the inference server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Registry alias (e.g. `"bge-small"`).
    #[serde(default)]
    pub id: String,
    /// Full model name (e.g. `"BAAI/bge-small-en-v1.5"`).
    pub name: String,
    /// Vector producer.
    pub provider: ModelProvider,
    /// Vector length.
    pub dimensions: usize,
    /// Context window of the model, in tokens. Bounds the chunk budget.
    pub max_tokens: usize,
    /// One-line description for `codeseek models`.
    #[serde(default)]
    pub description: String,
}

/// Known embedding models, keyed by alias.
///
/// # Examples
///
/// ```
/// use codeseek_core::ModelRegistry;
///
/// let registry = ModelRegistry::default();
/// let spec = registry.resolve(Some("bge-small")).unwrap();
/// assert_eq!(spec.dimensions, 384);
/// assert_eq!(registry.resolve(None).unwrap().id, "hash-384");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelSpec>,
    default_model: String,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        let mut registry = Self {
            models: BTreeMap::new(),
            default_model: "hash-384".into(),
        };

        registry.insert(
            "hash-384",
            "codeseek/feature-hash-384",
            ModelProvider::Hash,
            384,
            8192,
            "Offline feature-hashing model; no inference runtime required",
        );
        registry.insert(
            "hash-256",
            "codeseek/feature-hash-256",
            ModelProvider::Hash,
            256,
            8192,
            "Smaller offline feature-hashing model",
        );
        registry.insert(
            "bge-small",
            "BAAI/bge-small-en-v1.5",
            ModelProvider::Http,
            384,
            512,
            "Small, fast English embedding model",
        );
        registry.insert(
            "minilm",
            "sentence-transformers/all-MiniLM-L6-v2",
            ModelProvider::Http,
            384,
            256,
            "Lightweight English embedding model",
        );
        registry.insert(
            "nomic-v1.5",
            "nomic-embed-text-v1.5",
            ModelProvider::Http,
            768,
            8192,
            "High-quality English embedding model with large context window",
        );
        registry.insert(
            "jina-code",
            "jina-embeddings-v2-base-code",
            ModelProvider::Http,
            768,
            8192,
            "Code-specific embedding model",
        );
        registry.insert(
            "mxbai-xsmall",
            "mixedbread-ai/mxbai-embed-xsmall-v1",
            ModelProvider::Http,
            384,
            4096,
            "Mixedbread xsmall embedding model (4k context, 384 dims)",
        );

        registry
    }
}

impl ModelRegistry {
    fn insert(
        &mut self,
        alias: &str,
        name: &str,
        provider: ModelProvider,
        dimensions: usize,
        max_tokens: usize,
        description: &str,
    ) {
        self.models.insert(
            alias.to_string(),
            ModelSpec {
                id: alias.to_string(),
                name: name.to_string(),
                provider,
                dimensions,
                max_tokens,
                description: description.to_string(),
            },
        );
    }

    /// Register (or replace) a model under `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Config`] if the model spec has zero dimensions or a
    /// zero token window.
    pub fn register(&mut self, alias: &str, mut spec: ModelSpec) -> Result<(), SeekError> {
        if spec.dimensions == 0 {
            return Err(SeekError::Config(format!(
                "model '{alias}' must have at least one dimension"
            )));
        }
        if spec.max_tokens == 0 {
            return Err(SeekError::Config(format!(
                "model '{alias}' must have a non-zero max_tokens"
            )));
        }
        spec.id = alias.to_string();
        self.models.insert(alias.to_string(), spec);
        Ok(())
    }

    /// Resolve an alias or full model name; `None` selects the default model.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::UnknownModel`] listing the known aliases.
    pub fn resolve(&self, requested: Option<&str>) -> Result<ModelSpec, SeekError> {
        let key = requested.unwrap_or(&self.default_model);

        if let Some(spec) = self.models.get(key) {
            return Ok(spec.clone());
        }

        self.models
            .values()
            .find(|spec| spec.name == key)
            .cloned()
            .ok_or_else(|| SeekError::UnknownModel {
                name: key.to_string(),
                available: self.aliases().join(", "),
            })
    }

    /// Sorted list of registered aliases.
    pub fn aliases(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    /// All registered models in alias order.
    pub fn models(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// Alias of the default model.
    pub fn default_alias(&self) -> &str {
        &self.default_model
    }
}

/// How rerank scores are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankProvider {
    /// In-process query-term coverage; needs no inference runtime.
    Overlap,
    /// A locally running inference server with a `/rerank` endpoint.
    Http,
}

impl fmt::Display for RerankProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RerankProvider::Overlap => write!(f, "overlap"),
            RerankProvider::Http => write!(f, "http"),
        }
    }
}

/// A registered cross-encoder (or offline) reranking model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerankModelSpec {
    /// Registry alias (e.g. `"jina"`).
    pub id: String,
    /// Full model name sent to the inference server.
    pub name: String,
    /// Score producer.
    pub provider: RerankProvider,
    /// One-line description for `codeseek models --rerank`.
    pub description: String,
}

/// Known reranking models, keyed by alias.
///
/// # Examples
///
/// ```
/// use codeseek_core::{RerankProvider, RerankRegistry};
///
/// let registry = RerankRegistry::default();
/// assert_eq!(registry.resolve(None).unwrap().id, "overlap");
/// let mxbai = registry.resolve(Some("mixedbread-ai/mxbai-rerank-xsmall-v1")).unwrap();
/// assert_eq!(mxbai.id, "mxbai");
/// assert_eq!(mxbai.provider, RerankProvider::Http);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankRegistry {
    models: BTreeMap<String, RerankModelSpec>,
    default_model: String,
}

impl Default for RerankRegistry {
    fn default() -> Self {
        let mut models = BTreeMap::new();
        let mut insert = |alias: &str, name: &str, provider, description: &str| {
            models.insert(
                alias.to_string(),
                RerankModelSpec {
                    id: alias.to_string(),
                    name: name.to_string(),
                    provider,
                    description: description.to_string(),
                },
            );
        };

        insert(
            "overlap",
            "codeseek/term-overlap",
            RerankProvider::Overlap,
            "Offline query-term coverage scorer",
        );
        insert(
            "jina",
            "jina-reranker-v1-turbo-en",
            RerankProvider::Http,
            "Jina Turbo reranker tuned for English code and text relevance",
        );
        insert(
            "bge",
            "BAAI/bge-reranker-base",
            RerankProvider::Http,
            "BGE reranker base model for multilingual use",
        );
        insert(
            "mxbai",
            "mixedbread-ai/mxbai-rerank-xsmall-v1",
            RerankProvider::Http,
            "Mixedbread xsmall reranker for local inference",
        );

        Self {
            models,
            default_model: "overlap".into(),
        }
    }
}

impl RerankRegistry {
    /// Resolve an alias or full model name; `None` selects the default.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::UnknownModel`] listing the known aliases.
    pub fn resolve(&self, requested: Option<&str>) -> Result<RerankModelSpec, SeekError> {
        let key = requested.unwrap_or(&self.default_model);

        if let Some(spec) = self.models.get(key) {
            return Ok(spec.clone());
        }

        self.models
            .values()
            .find(|spec| spec.name == key)
            .cloned()
            .ok_or_else(|| SeekError::UnknownModel {
                name: key.to_string(),
                available: self.aliases().join(", "),
            })
    }

    /// Sorted list of registered aliases.
    pub fn aliases(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    /// All registered models in alias order.
    pub fn models(&self) -> impl Iterator<Item = &RerankModelSpec> {
        self.models.values()
    }

    /// Alias of the default model.
    pub fn default_alias(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_alias_and_full_name() {
        let registry = ModelRegistry::default();
        let by_alias = registry.resolve(Some("jina-code")).unwrap();
        let by_name = registry
            .resolve(Some("jina-embeddings-v2-base-code"))
            .unwrap();
        assert_eq!(by_alias, by_name);
        assert_eq!(by_alias.id, "jina-code");
        assert_eq!(by_alias.dimensions, 768);
    }

    #[test]
    fn unknown_model_lists_aliases() {
        let registry = ModelRegistry::default();
        let err = registry.resolve(Some("gpt-embed-9000")).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("gpt-embed-9000"));
        assert!(msg.contains("bge-small"));
        assert!(msg.contains("hash-384"));
    }

    #[test]
    fn aliases_are_sorted() {
        let aliases = ModelRegistry::default().aliases();
        let mut sorted = aliases.clone();
        sorted.sort();
        assert_eq!(aliases, sorted);
    }

    #[test]
    fn register_rejects_zero_dimensions() {
        let mut registry = ModelRegistry::default();
        let spec = ModelSpec {
            id: String::new(),
            name: "broken".into(),
            provider: ModelProvider::Http,
            dimensions: 0,
            max_tokens: 512,
            description: String::new(),
        };
        assert!(registry.register("broken", spec).is_err());
    }

    #[test]
    fn register_sets_id_from_alias() {
        let mut registry = ModelRegistry::default();
        let spec = ModelSpec {
            id: String::new(),
            name: "local/e5-small".into(),
            provider: ModelProvider::Http,
            dimensions: 384,
            max_tokens: 512,
            description: "custom".into(),
        };
        registry.register("e5", spec).unwrap();
        assert_eq!(registry.resolve(Some("e5")).unwrap().id, "e5");
    }

    #[test]
    fn rerank_registry_resolves_aliases() {
        let registry = RerankRegistry::default();
        assert_eq!(registry.aliases(), vec!["bge", "jina", "mxbai", "overlap"]);
        assert_eq!(registry.default_alias(), "overlap");

        let jina = registry.resolve(Some("jina")).unwrap();
        assert_eq!(jina.name, "jina-reranker-v1-turbo-en");
        assert_eq!(registry.resolve(Some("BAAI/bge-reranker-base")).unwrap().id, "bge");

        let err = registry.resolve(Some("colbert")).unwrap_err();
        assert!(err.to_string().contains("colbert"));
        assert!(err.to_string().contains("mxbai"));
    }
}
