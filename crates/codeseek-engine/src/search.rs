//! Query engine: lexical, semantic and hybrid retrieval.
//!
//! Every call is a fresh evaluation. Semantic and hybrid queries first make
//! sure the index exists and is current for the active model, then compare
//! the query vector against every stored vector in scope. Results are ranked
//! by score, then path, then start byte, and capped after ranking. An
//! optional rerank stage reorders the head of the ranking before the cap.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use codeseek_core::{SearchConfig, SearchMode, SearchResult, SeekError};
use codeseek_discover::{discover, normalize_path, DiscoverOptions};
use tokio_util::sync::CancellationToken;

use crate::chunker::Chunk;
use crate::fusion::{fuse, rank_order, ChunkKey, FusedScore, FusionStrategy};
use crate::lexical::{compile_pattern, search_files};
use crate::lifecycle::IndexManager;
use crate::rerank::Reranker;
use crate::store::cosine_similarity;

/// A search request.
///
/// # Examples
///
/// ```
/// use codeseek_core::SearchMode;
/// use codeseek_engine::search::SearchQuery;
///
/// let query = SearchQuery::new("parse_config", SearchMode::Lexical);
/// assert_eq!(query.top_k, 10);
/// assert!(!query.regex);
/// ```
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Pattern (lexical) and/or natural-language text (semantic).
    pub text: String,
    /// Channels to run.
    pub mode: SearchMode,
    /// Treat `text` as a regular expression in the lexical channel.
    pub regex: bool,
    /// Case-insensitive lexical matching.
    pub case_insensitive: bool,
    /// Minimum cosine similarity for semantic hits.
    pub threshold: f64,
    /// Maximum results; 0 means unlimited.
    pub top_k: usize,
    /// Restrict to these paths, relative to the root.
    pub scope: Vec<PathBuf>,
    /// Bypass ignore files in the lexical channel.
    pub no_ignore: bool,
    /// Include hidden files in the lexical channel.
    pub hidden: bool,
    /// Hybrid score combination.
    pub fusion: FusionStrategy,
    /// Lines of chunk text per snippet.
    pub snippet_lines: usize,
    /// Reorder the head of the ranking with the engine's reranker.
    pub rerank: bool,
    /// Leading results passed to the reranker.
    pub rerank_top_n: usize,
}

impl SearchQuery {
    /// Query with default settings.
    pub fn new(text: impl Into<String>, mode: SearchMode) -> Self {
        let mut query = Self::from_config(text, &SearchConfig::default());
        query.mode = mode;
        query
    }

    /// Query using the `[search]` defaults from configuration.
    pub fn from_config(text: impl Into<String>, config: &SearchConfig) -> Self {
        Self {
            text: text.into(),
            mode: config.mode,
            regex: false,
            case_insensitive: false,
            threshold: config.threshold,
            top_k: config.top_k,
            scope: Vec::new(),
            no_ignore: false,
            hidden: false,
            fusion: FusionStrategy::from_config(config),
            snippet_lines: config.snippet_lines,
            rerank: config.rerank,
            rerank_top_n: config.rerank_top_n,
        }
    }

    fn normalized_scope(&self) -> Vec<String> {
        self.scope.iter().map(|p| normalize_path(p)).collect()
    }
}

struct Candidate {
    chunk: Chunk,
    language: String,
}

/// Executes [`SearchQuery`]s against one repository.
pub struct SearchEngine {
    manager: Arc<IndexManager>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl SearchEngine {
    /// Create an engine over `manager`'s repository and index.
    pub fn new(manager: Arc<IndexManager>) -> Self {
        Self {
            manager,
            reranker: None,
        }
    }

    /// Use `reranker` for queries with [`SearchQuery::rerank`] set.
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Run a query to completion.
    ///
    /// # Errors
    ///
    /// See [`SearchEngine::search_with_cancel`].
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SeekError> {
        self.search_with_cancel(query, &CancellationToken::new()).await
    }

    /// Run a query; `cancel` stops an index build triggered by the query.
    ///
    /// # Errors
    ///
    /// - [`SeekError::Pattern`] for an invalid lexical pattern.
    /// - [`SeekError::DimensionMismatch`] if the index was built with a
    ///   model other than the active one.
    /// - [`SeekError::ModelUnavailable`] if the query cannot be embedded or
    ///   the reranker is unreachable.
    /// - [`SeekError::Config`] if reranking is requested without a reranker.
    pub async fn search_with_cancel(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchResult>, SeekError> {
        let mut candidates: HashMap<ChunkKey, Candidate> = HashMap::new();

        let lexical = if query.mode == SearchMode::Semantic {
            Vec::new()
        } else {
            self.lexical_channel(query, &mut candidates)?
        };

        let semantic = if query.mode.uses_index() {
            self.semantic_channel(query, cancel, &mut candidates).await?
        } else {
            Vec::new()
        };

        let (lexical_hits, semantic_hits) = (lexical.len(), semantic.len());
        let ranked = match query.mode {
            SearchMode::Hybrid => fuse(query.fusion, &lexical, &semantic),
            SearchMode::Lexical => single_channel(lexical, true),
            SearchMode::Semantic => single_channel(semantic, false),
        };

        let ranked = if query.rerank {
            self.rerank_head(query, ranked, &candidates).await?
        } else {
            ranked.into_iter().map(|fused| (fused, None)).collect()
        };

        let cap = if query.top_k == 0 {
            usize::MAX
        } else {
            query.top_k
        };

        let results = ranked
            .into_iter()
            .take(cap)
            .enumerate()
            .filter_map(|(i, (fused, rerank_score))| {
                let candidate = candidates.remove(&fused.key)?;
                Some(SearchResult {
                    file_path: PathBuf::from(&candidate.chunk.file_path),
                    span: candidate.chunk.span,
                    snippet: snippet(&candidate.chunk.text, query.snippet_lines),
                    language: Some(candidate.language),
                    lexical_score: fused.lexical,
                    semantic_score: fused.semantic,
                    rerank_score,
                    score: fused.score,
                    rank: i + 1,
                })
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            mode = %query.mode,
            lexical = lexical_hits,
            semantic = semantic_hits,
            reranked = query.rerank,
            returned = results.len(),
            "search finished"
        );
        Ok(results)
    }

    async fn rerank_head(
        &self,
        query: &SearchQuery,
        ranked: Vec<FusedScore>,
        candidates: &HashMap<ChunkKey, Candidate>,
    ) -> Result<Vec<(FusedScore, Option<f64>)>, SeekError> {
        let reranker = self.reranker.as_ref().ok_or_else(|| {
            SeekError::Config("reranking was requested but no reranker is configured".into())
        })?;

        let head = ranked.len().min(query.rerank_top_n.max(1));
        let documents: Vec<String> = ranked[..head]
            .iter()
            .map(|fused| {
                candidates
                    .get(&fused.key)
                    .map(|c| c.chunk.text.clone())
                    .unwrap_or_default()
            })
            .collect();
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let scores = reranker.rerank(&query.text, &documents).await?;
        if scores.len() != documents.len() {
            return Err(SeekError::Embedding(format!(
                "reranker '{}' returned {} scores for {} documents",
                reranker.model_id(),
                scores.len(),
                documents.len()
            )));
        }
        tracing::debug!(model = reranker.model_id(), head, "reranked results");
        Ok(apply_rerank(ranked, &scores))
    }

    fn lexical_channel(
        &self,
        query: &SearchQuery,
        candidates: &mut HashMap<ChunkKey, Candidate>,
    ) -> Result<Vec<(ChunkKey, f64)>, SeekError> {
        let pattern = compile_pattern(&query.text, query.regex, query.case_insensitive)?;
        let ctx = self.manager.context();
        let options = DiscoverOptions {
            scope: query.scope.clone(),
            no_ignore: query.no_ignore,
            hidden: query.hidden,
        };
        let files = discover(&ctx.root, &options)?;
        let hits = search_files(&files, &pattern, &ctx.chunker_config());

        Ok(hits
            .into_iter()
            .map(|hit| {
                let key = ChunkKey::new(hit.chunk.file_path.clone(), hit.chunk.span.start_byte);
                candidates.entry(key.clone()).or_insert(Candidate {
                    language: hit.language.name().to_string(),
                    chunk: hit.chunk,
                });
                (key, hit.score)
            })
            .collect())
    }

    async fn semantic_channel(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
        candidates: &mut HashMap<ChunkKey, Candidate>,
    ) -> Result<Vec<(ChunkKey, f64)>, SeekError> {
        let report = self.manager.ensure_ready(cancel).await?;
        if report.cancelled {
            tracing::warn!("index refresh cancelled; searching the committed state");
        }

        let store = self
            .manager
            .store()
            .ok_or_else(|| SeekError::Database("index disappeared during search".into()))?;
        let model = &self.manager.context().model;
        store.ensure_model(&model.id, model.dimensions)?;

        let query_vector = self.manager.gateway().embed_query(&query.text, &model.id).await?;
        let rows = store.load_vectors(&query.normalized_scope())?;

        let mut hits = Vec::new();
        for row in rows {
            let similarity = cosine_similarity(&query_vector, &row.vector);
            if similarity < query.threshold {
                continue;
            }
            let key = ChunkKey::new(row.chunk.file_path.clone(), row.chunk.span.start_byte);
            candidates.entry(key.clone()).or_insert(Candidate {
                chunk: row.chunk,
                language: row.language,
            });
            hits.push((key, similarity));
        }
        Ok(hits)
    }
}

fn single_channel(hits: Vec<(ChunkKey, f64)>, lexical: bool) -> Vec<FusedScore> {
    let mut ranked: Vec<FusedScore> = hits
        .into_iter()
        .map(|(key, score)| FusedScore {
            key,
            lexical: lexical.then_some(score),
            semantic: (!lexical).then_some(score),
            score,
        })
        .collect();
    ranked.sort_by(|a, b| rank_order(a.score, &a.key, b.score, &b.key));
    ranked
}

/// Attach `scores` to the head of `ranked` and reorder that head by them.
///
/// Ties keep their retrieval order; the tail is left as is.
fn apply_rerank(ranked: Vec<FusedScore>, scores: &[f32]) -> Vec<(FusedScore, Option<f64>)> {
    let mut out: Vec<(FusedScore, Option<f64>)> = ranked
        .into_iter()
        .enumerate()
        .map(|(i, fused)| (fused, scores.get(i).map(|&s| f64::from(s))))
        .collect();
    let head = scores.len().min(out.len());
    out[..head].sort_by(|a, b| b.1.unwrap_or(0.0).total_cmp(&a.1.unwrap_or(0.0)));
    out
}

/// First `lines` lines of `text`, without the trailing newline.
fn snippet(text: &str, lines: usize) -> String {
    text.lines()
        .take(lines.max(1))
        .collect::<Vec<_>>()
        .join("\n")
}
