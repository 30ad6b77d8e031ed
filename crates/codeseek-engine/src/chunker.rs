//! Content-aware chunking using tree-sitter, with a line-window fallback.
//!
//! Splits a file into contiguous, non-overlapping chunks that together cover
//! the whole file. Languages with a bundled grammar are cut at syntactic
//! units (functions, classes, type definitions); everything else, and any
//! unit that exceeds the token budget, is cut into line windows. Output
//! depends only on `(path, content, language, config)`.

use std::fmt;
use std::str::FromStr;

use codeseek_core::{ChunkingConfig, ModelSpec, Span};
use codeseek_discover::{fingerprint, Language};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tree_sitter::{Node, Parser};

/// Rough bytes-per-token ratio used for budget estimates.
const BYTES_PER_TOKEN: usize = 4;

/// Estimate the token count of `text`.
///
/// # Examples
///
/// ```
/// use codeseek_engine::chunker::estimate_tokens;
///
/// assert_eq!(estimate_tokens(""), 0);
/// assert_eq!(estimate_tokens("fn main() {}"), 3);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(BYTES_PER_TOKEN)
}

/// What kind of unit a chunk represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    Type,
    Module,
    /// Statements or declarations that are not named definitions.
    Block,
    /// A fixed-size line window produced by the fallback strategy.
    Window,
}

impl ChunkKind {
    /// Whether this kind is a named definition (kept in its own chunk).
    pub fn is_definition(self) -> bool {
        !matches!(self, ChunkKind::Block | ChunkKind::Window)
    }

    fn from_node_kind(kind: &str, scoped: bool) -> Option<Self> {
        if kind.contains("method") {
            Some(ChunkKind::Method)
        } else if kind.contains("function") || kind == "function_item" {
            Some(if scoped {
                ChunkKind::Method
            } else {
                ChunkKind::Function
            })
        } else if kind.contains("class") || kind.contains("object_declaration") {
            Some(ChunkKind::Class)
        } else if kind.contains("struct")
            || kind.contains("enum")
            || kind.contains("trait")
            || kind.contains("interface")
            || kind.contains("impl")
            || kind.contains("union")
            || kind.contains("protocol")
            || kind == "type_declaration"
            || kind == "type_item"
        {
            Some(ChunkKind::Type)
        } else if kind.contains("module") || kind.contains("namespace") || kind == "mod_item" {
            Some(ChunkKind::Module)
        } else {
            None
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChunkKind::Function => "function",
            ChunkKind::Method => "method",
            ChunkKind::Class => "class",
            ChunkKind::Type => "type",
            ChunkKind::Module => "module",
            ChunkKind::Block => "block",
            ChunkKind::Window => "window",
        };
        f.write_str(s)
    }
}

impl FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(ChunkKind::Function),
            "method" => Ok(ChunkKind::Method),
            "class" => Ok(ChunkKind::Class),
            "type" => Ok(ChunkKind::Type),
            "module" => Ok(ChunkKind::Module),
            "block" => Ok(ChunkKind::Block),
            "window" => Ok(ChunkKind::Window),
            other => Err(format!("unknown chunk kind: {other}")),
        }
    }
}

/// Chunking strategy, selected by whether a grammar is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Cut at syntactic units found by tree-sitter.
    Syntax,
    /// Cut into line windows bounded by the token budget.
    Window,
}

impl ChunkStrategy {
    /// Pick the strategy for a language.
    pub fn select(language: Language) -> Self {
        if language.tree_sitter_language().is_some() {
            ChunkStrategy::Syntax
        } else {
            ChunkStrategy::Window
        }
    }
}

/// Chunk sizing derived from configuration and the active model.
///
/// # Examples
///
/// ```
/// use codeseek_core::{ChunkingConfig, ModelRegistry};
/// use codeseek_engine::chunker::ChunkerConfig;
///
/// let minilm = ModelRegistry::default().resolve(Some("minilm")).unwrap();
/// let config = ChunkerConfig::for_model(&minilm, &ChunkingConfig::default());
/// assert_eq!(config.max_tokens, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Upper bound on tokens per chunk.
    pub max_tokens: usize,
    /// Preceding lines carried as context by window chunks.
    pub overlap_lines: usize,
    /// Chunks with fewer non-whitespace characters merge into a neighbour.
    pub min_chunk_chars: usize,
}

impl ChunkerConfig {
    /// Budget capped by the model's context window.
    pub fn for_model(model: &ModelSpec, config: &ChunkingConfig) -> Self {
        Self {
            max_tokens: config.max_tokens.min(model.max_tokens).max(16),
            overlap_lines: config.overlap_lines,
            min_chunk_chars: config.min_chunk_chars,
        }
    }

    fn budget_bytes(&self) -> usize {
        self.max_tokens * BYTES_PER_TOKEN
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        let defaults = ChunkingConfig::default();
        Self {
            max_tokens: defaults.max_tokens,
            overlap_lines: defaults.overlap_lines,
            min_chunk_chars: defaults.min_chunk_chars,
        }
    }
}

/// A chunk of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Identifier, stable while the file content is unchanged.
    pub id: String,
    /// Normalized path of the parent file.
    pub file_path: String,
    /// Position of the chunk within its file.
    pub ordinal: usize,
    /// Byte and line span.
    pub span: Span,
    /// Unit kind.
    pub kind: ChunkKind,
    /// Entity name for syntactic units.
    pub name: Option<String>,
    /// Exact file content covered by `span`.
    pub text: String,
    /// Lines preceding a window chunk, embedded with it but not part of the span.
    pub context: Option<String>,
    /// Token estimate of `text`.
    pub token_estimate: usize,
    /// SHA-256 of [`Chunk::embedding_text`]; the embedding cache key.
    pub text_hash: String,
}

impl Chunk {
    /// Text sent to the embedder.
    pub fn embedding_text(&self) -> String {
        match &self.context {
            Some(context) => format!("{context}{}", self.text),
            None => self.text.clone(),
        }
    }
}

/// Result of chunking one file.
#[derive(Debug, Clone)]
pub struct ChunkOutcome {
    /// Chunks in file order.
    pub chunks: Vec<Chunk>,
    /// Strategy that produced the chunks.
    pub strategy: ChunkStrategy,
    /// Why syntax-aware chunking was abandoned, if it was.
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
struct Piece {
    start: usize,
    end: usize,
    kind: ChunkKind,
    name: Option<String>,
    context_start: Option<usize>,
}

#[derive(Debug)]
struct Unit {
    start: usize,
    end: usize,
    kind: ChunkKind,
    name: Option<String>,
}

/// Byte offsets of every line start, for span and line lookups.
struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let mut starts = vec![0];
        for (i, b) in content.bytes().enumerate() {
            if b == b'\n' && i + 1 < content.len() {
                starts.push(i + 1);
            }
        }
        Self {
            starts,
            len: content.len(),
        }
    }

    /// 0-based line containing `byte`.
    fn line_of(&self, byte: usize) -> usize {
        self.starts.partition_point(|&s| s <= byte).saturating_sub(1)
    }

    fn line_start(&self, byte: usize) -> usize {
        self.starts[self.line_of(byte)]
    }

    /// First line start at or after `byte`, or the end of the content.
    fn next_line_start(&self, byte: usize) -> usize {
        let i = self.starts.partition_point(|&s| s < byte);
        self.starts.get(i).copied().unwrap_or(self.len)
    }

    fn span(&self, start: usize, end: usize) -> Span {
        let last = if end > start { end - 1 } else { start };
        Span {
            start_byte: start,
            end_byte: end,
            start_line: self.line_of(start) as u32 + 1,
            end_line: self.line_of(last) as u32 + 1,
        }
    }
}

/// Split a file into chunks.
///
/// Content that is empty or whitespace-only yields no chunks. Syntax errors
/// or a missing parse tree switch the file to window chunking; this is
/// reported in [`ChunkOutcome::fallback_reason`] and never fails.
///
/// # Examples
///
/// ```
/// use codeseek_discover::Language;
/// use codeseek_engine::chunker::{chunk_file, ChunkerConfig, ChunkStrategy};
///
/// let source = "def hello():\n    return 'hi'\n\n\ndef bye():\n    return 'bye'\n";
/// let outcome = chunk_file("greet.py", source, Language::Python, &ChunkerConfig::default());
/// assert_eq!(outcome.strategy, ChunkStrategy::Syntax);
/// assert_eq!(outcome.chunks.len(), 2);
/// assert_eq!(outcome.chunks[0].name.as_deref(), Some("hello"));
/// ```
pub fn chunk_file(
    path: &str,
    content: &str,
    language: Language,
    config: &ChunkerConfig,
) -> ChunkOutcome {
    let strategy = ChunkStrategy::select(language);

    if content.trim().is_empty() {
        return ChunkOutcome {
            chunks: Vec::new(),
            strategy,
            fallback_reason: None,
        };
    }

    let lines = LineIndex::new(content);

    let (pieces, strategy, fallback_reason) = match strategy {
        ChunkStrategy::Syntax => match syntax_pieces(content, language, &lines, config) {
            Ok(pieces) => (pieces, ChunkStrategy::Syntax, None),
            Err(reason) => {
                tracing::debug!(path, %reason, "falling back to window chunking");
                let pieces = window_pieces(content, &lines, 0, content.len(), None, config);
                (pieces, ChunkStrategy::Window, Some(reason))
            }
        },
        ChunkStrategy::Window => (
            window_pieces(content, &lines, 0, content.len(), None, config),
            ChunkStrategy::Window,
            None,
        ),
    };

    let pieces = merge_trivial(pieces, content, config.min_chunk_chars);
    let file_hash = fingerprint(content.as_bytes());

    let chunks = pieces
        .into_iter()
        .enumerate()
        .map(|(ordinal, piece)| {
            let text = content[piece.start..piece.end].to_string();
            let context = piece
                .context_start
                .filter(|&c| c < piece.start)
                .map(|c| content[c..piece.start].to_string());
            let mut chunk = Chunk {
                id: chunk_id(path, &file_hash, ordinal, piece.start, piece.end),
                file_path: path.to_string(),
                ordinal,
                span: lines.span(piece.start, piece.end),
                kind: piece.kind,
                name: piece.name,
                token_estimate: estimate_tokens(&text),
                text,
                context,
                text_hash: String::new(),
            };
            chunk.text_hash = fingerprint(chunk.embedding_text().as_bytes());
            chunk
        })
        .collect();

    ChunkOutcome {
        chunks,
        strategy,
        fallback_reason,
    }
}

fn chunk_id(path: &str, file_hash: &str, ordinal: usize, start: usize, end: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hasher.update([0]);
    hasher.update(file_hash.as_bytes());
    hasher.update([0]);
    hasher.update(format!("{ordinal}:{start}:{end}").as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

fn syntax_pieces(
    content: &str,
    language: Language,
    lines: &LineIndex,
    config: &ChunkerConfig,
) -> Result<Vec<Piece>, String> {
    let ts_language = language
        .tree_sitter_language()
        .ok_or_else(|| format!("no grammar for {}", language.name()))?;

    let mut parser = Parser::new();
    parser
        .set_language(&ts_language)
        .map_err(|e| format!("failed to set language: {e}"))?;

    let tree = parser
        .parse(content, None)
        .ok_or_else(|| "parser produced no tree".to_string())?;
    let root = tree.root_node();
    if root.has_error() {
        return Err("source contains syntax errors".into());
    }

    let budget = config.budget_bytes();
    let source = content.as_bytes();
    let mut units = Vec::new();
    collect_units(root, source, budget, false, &mut units);

    if units.is_empty() {
        return Ok(window_pieces(content, lines, 0, content.len(), None, config));
    }

    let groups = group_units(units, lines, budget);

    // Each piece runs to the end of its unit's last line, so blank lines and
    // comments between units open the following piece.
    let mut pieces = Vec::new();
    let mut start = 0;
    for (i, group) in groups.iter().enumerate() {
        let end = if i + 1 == groups.len() {
            content.len()
        } else {
            lines.next_line_start(group.end)
        };
        if end - start > budget {
            pieces.extend(window_pieces(
                content,
                lines,
                start,
                end,
                group.name.clone(),
                config,
            ));
        } else {
            pieces.push(Piece {
                start,
                end,
                kind: group.kind,
                name: group.name.clone(),
                context_start: None,
            });
        }
        start = end;
    }

    Ok(pieces)
}

fn node_name(node: &Node, source: &[u8]) -> Option<String> {
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .or_else(|| node.child_by_field_name("declarator"))
        .and_then(|n| n.utf8_text(source).ok())
        .map(|text| {
            // C declarators carry the parameter list
            let head = text.split('(').next().unwrap_or(text);
            head.split_whitespace().collect::<Vec<_>>().join(" ")
        })
        .filter(|name| !name.is_empty())
}

/// Comments, attributes and decorators belong to the definition below them.
fn is_prefix(kind: &str) -> bool {
    kind.contains("comment") || kind == "attribute_item" || kind == "decorator"
}

fn collect_units(node: Node, source: &[u8], budget: usize, scoped: bool, out: &mut Vec<Unit>) {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();

    let mut prefix: Option<usize> = None;
    let mut prev_end: Option<usize> = None;

    for child in children {
        if is_prefix(child.kind()) {
            // A comment on the last line of the previous unit stays with it
            let trailing = prev_end.is_some_and(|end| {
                prefix.is_none() && !source[end..child.start_byte()].contains(&b'\n')
            });
            if !trailing {
                prefix.get_or_insert(child.start_byte());
            }
            continue;
        }
        let start = prefix.take().unwrap_or(child.start_byte());
        prev_end = Some(child.end_byte());

        // Python decorators wrap the real definition
        let target = if child.kind() == "decorated_definition" {
            child.child_by_field_name("definition").unwrap_or(child)
        } else {
            child
        };

        let kind = ChunkKind::from_node_kind(target.kind(), scoped).unwrap_or(ChunkKind::Block);
        let name = if kind.is_definition() {
            node_name(&target, source)
        } else {
            None
        };

        let len = child.end_byte() - start;
        if len > budget {
            if let Some(body) = target.child_by_field_name("body") {
                let before = out.len();
                collect_units(body, source, budget, kind.is_definition() || scoped, out);
                if out.len() > before {
                    // The header up to the first inner unit travels with it
                    out[before].start = start;
                    if out[before].name.is_none() {
                        out[before].name = name;
                        out[before].kind = kind;
                    }
                    if let Some(last) = out.last_mut() {
                        last.end = last.end.max(child.end_byte());
                    }
                    continue;
                }
            }
        }

        out.push(Unit {
            start,
            end: child.end_byte(),
            kind,
            name,
        });
    }
}

struct Group {
    start: usize,
    end: usize,
    kind: ChunkKind,
    name: Option<String>,
}

/// Snap units to line starts and coalesce neighbouring non-definitions.
fn group_units(units: Vec<Unit>, lines: &LineIndex, budget: usize) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();

    for unit in units {
        let line_start = lines.line_start(unit.start);

        if let Some(last) = groups.last_mut() {
            // Two units sharing a line stay together
            if line_start < last.end {
                last.end = last.end.max(unit.end);
                continue;
            }
            if !unit.kind.is_definition()
                && !last.kind.is_definition()
                && unit.end - last.start <= budget
            {
                last.end = unit.end;
                continue;
            }
        }

        groups.push(Group {
            start: line_start,
            end: unit.end,
            kind: unit.kind,
            name: unit.name,
        });
    }

    groups
}

/// Cut `[start, end)` into line windows of at most the byte budget.
fn window_pieces(
    content: &str,
    lines: &LineIndex,
    start: usize,
    end: usize,
    name: Option<String>,
    config: &ChunkerConfig,
) -> Vec<Piece> {
    let budget = config.budget_bytes();
    let mut bounds: Vec<(usize, usize)> = Vec::new();
    let mut current_start = start;
    let mut offset = start;

    for line in content[start..end].split_inclusive('\n') {
        let line_start = offset;
        let line_end = offset + line.len();
        offset = line_end;

        if line.len() > budget {
            if current_start < line_start {
                bounds.push((current_start, line_start));
            }
            let mut s = line_start;
            while s < line_end {
                let mut e = (s + budget).min(line_end);
                while !content.is_char_boundary(e) {
                    e -= 1;
                }
                if e <= s {
                    e = s + 1;
                    while !content.is_char_boundary(e) {
                        e += 1;
                    }
                }
                bounds.push((s, e));
                s = e;
            }
            current_start = line_end;
        } else if line_end - current_start > budget && current_start < line_start {
            bounds.push((current_start, line_start));
            current_start = line_start;
        }
    }
    if current_start < end {
        bounds.push((current_start, end));
    }

    bounds
        .into_iter()
        .enumerate()
        .map(|(i, (s, e))| {
            let context_start = if i == 0 || config.overlap_lines == 0 {
                None
            } else {
                let line = lines.line_of(s);
                let ctx_line = line.saturating_sub(config.overlap_lines);
                let ctx = lines.starts[ctx_line].max(start);
                (ctx < s).then_some(ctx)
            };
            Piece {
                start: s,
                end: e,
                kind: ChunkKind::Window,
                name: name.clone(),
                context_start,
            }
        })
        .collect()
}

fn significant_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

/// Fold low-signal pieces into their neighbours.
fn merge_trivial(pieces: Vec<Piece>, content: &str, min_chars: usize) -> Vec<Piece> {
    let mut merged: Vec<Piece> = Vec::with_capacity(pieces.len());
    let mut carry: Option<usize> = None;

    for mut piece in pieces {
        if let Some(start) = carry.take() {
            piece.start = start;
            if piece.context_start.is_some_and(|c| c >= piece.start) {
                piece.context_start = None;
            }
        }

        let trivial = significant_chars(&content[piece.start..piece.end]) < min_chars;
        if trivial {
            if let Some(prev) = merged.last_mut() {
                prev.end = piece.end;
            } else {
                carry = Some(piece.start);
            }
            continue;
        }
        merged.push(piece);
    }

    // Everything was trivial: keep the whole file as one chunk
    if let Some(start) = carry {
        merged.push(Piece {
            start,
            end: content.len(),
            kind: ChunkKind::Block,
            name: None,
            context_start: None,
        });
    }

    merged
}
