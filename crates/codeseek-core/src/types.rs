use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Retrieval channel(s) used by a query.
///
/// # Examples
///
/// ```
/// use codeseek_core::SearchMode;
///
/// let mode: SearchMode = "sem".parse().unwrap();
/// assert_eq!(mode, SearchMode::Semantic);
/// assert_eq!(SearchMode::default(), SearchMode::Hybrid);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Literal or regex matching over raw file content.
    Lexical,
    /// Embedding similarity against the index.
    Semantic,
    /// Both channels, fused into one ranking.
    #[default]
    Hybrid,
}

impl SearchMode {
    /// Whether this mode reads vectors from the index.
    pub fn uses_index(self) -> bool {
        !matches!(self, SearchMode::Lexical)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Lexical => write!(f, "lexical"),
            SearchMode::Semantic => write!(f, "semantic"),
            SearchMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lexical" | "lex" | "grep" => Ok(SearchMode::Lexical),
            "semantic" | "sem" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(format!("unknown search mode: {other}")),
        }
    }
}

/// Score fusion formula for hybrid search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionKind {
    /// Reciprocal Rank Fusion over the two channel rankings.
    #[default]
    Rrf,
    /// Weighted sum of normalized channel scores.
    Weighted,
}

impl fmt::Display for FusionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FusionKind::Rrf => write!(f, "rrf"),
            FusionKind::Weighted => write!(f, "weighted"),
        }
    }
}

impl FromStr for FusionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rrf" => Ok(FusionKind::Rrf),
            "weighted" => Ok(FusionKind::Weighted),
            other => Err(format!("unknown fusion strategy: {other}")),
        }
    }
}

/// Location of a chunk inside its file.
///
/// Byte offsets are half-open (`start..end`); lines are 1-indexed and inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    /// First byte of the chunk.
    pub start_byte: usize,
    /// One past the last byte of the chunk.
    pub end_byte: usize,
    /// First line of the chunk.
    pub start_line: u32,
    /// Last line of the chunk.
    pub end_line: u32,
}

impl Span {
    /// Length of the span in bytes.
    pub fn len(&self) -> usize {
        self.end_byte - self.start_byte
    }

    /// Whether the span covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.start_byte == self.end_byte
    }
}

/// A ranked search result.
///
/// # Examples
///
/// ```
/// use codeseek_core::{SearchResult, Span};
/// use std::path::PathBuf;
///
/// let result = SearchResult {
///     file_path: PathBuf::from("src/db.rs"),
///     span: Span { start_byte: 0, end_byte: 20, start_line: 1, end_line: 2 },
///     snippet: "fn connect() { ... }".into(),
///     language: Some("rust".into()),
///     lexical_score: None,
///     semantic_score: Some(0.81),
///     rerank_score: None,
///     score: 0.81,
///     rank: 1,
/// };
/// assert_eq!(result.rank, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Path to the file, relative to the repository root.
    pub file_path: PathBuf,
    /// Location of the matched chunk.
    pub span: Span,
    /// First lines of the chunk.
    pub snippet: String,
    /// Detected language of the file.
    pub language: Option<String>,
    /// Lexical channel score in `[0, 1)`, if the chunk matched lexically.
    pub lexical_score: Option<f64>,
    /// Cosine similarity in `[-1, 1]`, if the chunk matched semantically.
    pub semantic_score: Option<f64>,
    /// Relevance in `[0, 1]` from the reranker, if the chunk was reranked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
    /// Fused score of the retrieval channels.
    pub score: f64,
    /// 1-based position in the ranking.
    pub rank: usize,
}

/// Lifecycle state of a repository index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    /// No index on disk.
    Absent,
    /// First build in progress.
    Building,
    /// Index matches the last discovered file set.
    Ready,
    /// Stale files are being re-indexed.
    Updating,
    /// Prior state discarded; building from scratch.
    Rebuilding,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexState::Absent => write!(f, "absent"),
            IndexState::Building => write!(f, "building"),
            IndexState::Ready => write!(f, "ready"),
            IndexState::Updating => write!(f, "updating"),
            IndexState::Rebuilding => write!(f, "rebuilding"),
        }
    }
}

/// Summary of a repository index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    /// Lifecycle state.
    pub state: IndexState,
    /// Number of file records.
    pub file_count: usize,
    /// Number of stored chunks.
    pub chunk_count: usize,
    /// Model the vectors belong to.
    pub model_id: Option<String>,
    /// Vector length.
    pub dimensions: Option<usize>,
    /// RFC 3339 creation time.
    pub created_at: Option<String>,
    /// RFC 3339 time of the last committed change.
    pub last_update: Option<String>,
    /// Size of the index database in bytes.
    pub index_size_bytes: u64,
}

impl IndexStatus {
    /// Status for a repository that has never been indexed.
    pub fn absent() -> Self {
        Self {
            state: IndexState::Absent,
            file_count: 0,
            chunk_count: 0,
            model_id: None,
            dimensions: None,
            created_at: None,
            last_update: None,
            index_size_bytes: 0,
        }
    }
}

/// Output format for CLI subcommands.
///
/// # Examples
///
/// ```
/// use codeseek_core::OutputFormat;
///
/// let fmt: OutputFormat = "ndjson".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Jsonl);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// A single JSON document.
    Json,
    /// One JSON record per line.
    Jsonl,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Jsonl => write!(f, "jsonl"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "jsonl" | "ndjson" => Ok(OutputFormat::Jsonl),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_mode_from_str() {
        assert_eq!("lexical".parse::<SearchMode>().unwrap(), SearchMode::Lexical);
        assert_eq!("GREP".parse::<SearchMode>().unwrap(), SearchMode::Lexical);
        assert_eq!("hybrid".parse::<SearchMode>().unwrap(), SearchMode::Hybrid);
        assert!("fuzzy".parse::<SearchMode>().is_err());
        assert!(!SearchMode::Lexical.uses_index());
        assert!(SearchMode::Hybrid.uses_index());
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("jsonl".parse::<OutputFormat>().unwrap(), OutputFormat::Jsonl);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn search_result_serializes_camel_case() {
        let result = SearchResult {
            file_path: PathBuf::from("b.py"),
            span: Span {
                start_byte: 0,
                end_byte: 10,
                start_line: 1,
                end_line: 1,
            },
            snippet: "def f(): pass".into(),
            language: Some("python".into()),
            lexical_score: Some(0.5),
            semantic_score: None,
            rerank_score: None,
            score: 0.016,
            rank: 1,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["filePath"], "b.py");
        assert_eq!(json["span"]["startLine"], 1);
        assert_eq!(json["lexicalScore"], 0.5);
        assert!(json["semanticScore"].is_null());
        assert!(json.get("rerankScore").is_none());
    }

    #[test]
    fn absent_status_is_empty() {
        let status = IndexStatus::absent();
        assert_eq!(status.state, IndexState::Absent);
        assert_eq!(status.file_count, 0);
        assert!(status.model_id.is_none());
        assert_eq!(format!("{}", status.state), "absent");
    }
}
