//! Lexical channel: literal or regex matching over raw file content.
//!
//! Matches are attributed to the chunk containing their first byte, using
//! the same chunker settings as the index so that lexical and semantic hits
//! on the same code share a `(path, start_byte)` key.

use codeseek_core::SeekError;
use codeseek_discover::{DiscoveredFile, Language};
use regex::{Regex, RegexBuilder};

use crate::chunker::{chunk_file, Chunk, ChunkerConfig};

/// A chunk with at least one lexical match.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    /// The matching chunk.
    pub chunk: Chunk,
    /// Language of the file.
    pub language: Language,
    /// Number of matches starting inside the chunk.
    pub matches: usize,
    /// `matches / (matches + 1)`, in `[0.5, 1)`.
    pub score: f64,
}

/// Normalize a match count into `[0.5, 1)`.
///
/// # Examples
///
/// ```
/// use codeseek_engine::lexical::lexical_score;
///
/// assert_eq!(lexical_score(1), 0.5);
/// assert!(lexical_score(3) > lexical_score(2));
/// assert!(lexical_score(1000) < 1.0);
/// ```
pub fn lexical_score(matches: usize) -> f64 {
    let n = matches as f64;
    n / (n + 1.0)
}

/// Compile the query pattern.
///
/// Literal patterns are escaped; `regex` keeps the pattern as written.
///
/// # Errors
///
/// Returns [`SeekError::Pattern`] for an empty or invalid pattern.
///
/// # Examples
///
/// ```
/// use codeseek_engine::lexical::compile_pattern;
///
/// let re = compile_pattern("a.b", false, false).unwrap();
/// assert!(re.is_match("a.b"));
/// assert!(!re.is_match("axb"));
///
/// let re = compile_pattern("fn\\s+main", true, true).unwrap();
/// assert!(re.is_match("FN  main"));
/// ```
pub fn compile_pattern(pattern: &str, regex: bool, case_insensitive: bool) -> Result<Regex, SeekError> {
    if pattern.is_empty() {
        return Err(SeekError::Pattern("pattern must not be empty".into()));
    }
    let source = if regex {
        pattern.to_string()
    } else {
        regex::escape(pattern)
    };
    RegexBuilder::new(&source)
        .case_insensitive(case_insensitive)
        .multi_line(true)
        .build()
        .map_err(|e| SeekError::Pattern(format!("'{pattern}': {e}")))
}

/// Find matching chunks across `files`.
///
/// Files without a match are never chunked. Zero-width matches are ignored.
pub fn search_files(files: &[DiscoveredFile], pattern: &Regex, config: &ChunkerConfig) -> Vec<LexicalHit> {
    let mut hits = Vec::new();

    for file in files {
        let starts: Vec<usize> = pattern
            .find_iter(&file.content)
            .filter(|m| !m.is_empty())
            .map(|m| m.start())
            .collect();
        if starts.is_empty() {
            continue;
        }

        let outcome = chunk_file(&file.path, &file.content, file.language, config);
        for chunk in outcome.chunks {
            let range = chunk.span.start_byte..chunk.span.end_byte;
            let matches = starts.iter().filter(|s| range.contains(s)).count();
            if matches > 0 {
                hits.push(LexicalHit {
                    score: lexical_score(matches),
                    language: file.language,
                    matches,
                    chunk,
                });
            }
        }
    }

    tracing::debug!(hits = hits.len(), "lexical channel finished");
    hits
}
