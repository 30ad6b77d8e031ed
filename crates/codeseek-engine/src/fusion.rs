//! Score fusion for hybrid search.
//!
//! Each channel produces a ranked list of chunk keys with channel-native
//! scores. [`fuse`] merges them into one deterministic ranking: fused score
//! descending, then path ascending, then start byte ascending.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use codeseek_core::{FusionKind, SearchConfig};

/// Identity of a chunk across channels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkKey {
    /// Normalized file path.
    pub path: String,
    /// First byte of the chunk.
    pub start_byte: usize,
}

impl ChunkKey {
    /// Build a key.
    pub fn new(path: impl Into<String>, start_byte: usize) -> Self {
        Self {
            path: path.into(),
            start_byte,
        }
    }
}

/// How channel scores combine into one.
///
/// # Examples
///
/// ```
/// use codeseek_core::SearchConfig;
/// use codeseek_engine::fusion::FusionStrategy;
///
/// let strategy = FusionStrategy::from_config(&SearchConfig::default());
/// assert_eq!(strategy, FusionStrategy::ReciprocalRank { k: 60 });
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionStrategy {
    /// `sum(1 / (k + rank))` over the channels a chunk appears in.
    ReciprocalRank {
        /// Damping constant.
        k: usize,
    },
    /// Weighted sum of normalized scores. Lexical scores are used as is;
    /// cosine similarity is mapped from `[-1, 1]` to `[0, 1]`.
    Weighted {
        /// Weight of the lexical channel.
        lexical: f64,
        /// Weight of the semantic channel.
        semantic: f64,
    },
}

impl Default for FusionStrategy {
    fn default() -> Self {
        FusionStrategy::ReciprocalRank { k: 60 }
    }
}

impl FusionStrategy {
    /// Strategy selected by `[search]` settings.
    pub fn from_config(config: &SearchConfig) -> Self {
        match config.fusion {
            FusionKind::Rrf => FusionStrategy::ReciprocalRank { k: config.rrf_k },
            FusionKind::Weighted => FusionStrategy::Weighted {
                lexical: config.lexical_weight,
                semantic: config.semantic_weight,
            },
        }
    }
}

/// A chunk's per-channel and fused scores.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedScore {
    /// Chunk identity.
    pub key: ChunkKey,
    /// Lexical score, if matched lexically.
    pub lexical: Option<f64>,
    /// Cosine similarity, if matched semantically.
    pub semantic: Option<f64>,
    /// Combined score.
    pub score: f64,
}

/// Deterministic ranking order shared by every mode.
pub fn rank_order(a_score: f64, a_key: &ChunkKey, b_score: f64, b_key: &ChunkKey) -> Ordering {
    b_score
        .partial_cmp(&a_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a_key.cmp(b_key))
}

fn channel_ranks(hits: &[(ChunkKey, f64)]) -> Vec<(&ChunkKey, f64, usize)> {
    let mut ordered: Vec<&(ChunkKey, f64)> = hits.iter().collect();
    ordered.sort_by(|a, b| rank_order(a.1, &a.0, b.1, &b.0));
    ordered
        .into_iter()
        .enumerate()
        .map(|(i, (key, score))| (key, *score, i + 1))
        .collect()
}

/// Merge the two channels into one ranked list.
///
/// A chunk found by only one channel stays eligible. Input order does not
/// matter; each channel is ranked by its own scores first.
///
/// # Examples
///
/// ```
/// use codeseek_engine::fusion::{fuse, ChunkKey, FusionStrategy};
///
/// let lexical = vec![(ChunkKey::new("b.py", 0), 0.5)];
/// let semantic = vec![
///     (ChunkKey::new("a.py", 0), 0.9),
///     (ChunkKey::new("b.py", 0), 0.4),
/// ];
/// let fused = fuse(FusionStrategy::default(), &lexical, &semantic);
/// assert_eq!(fused[0].key, ChunkKey::new("b.py", 0));
/// assert_eq!(fused.len(), 2);
/// ```
pub fn fuse(
    strategy: FusionStrategy,
    lexical: &[(ChunkKey, f64)],
    semantic: &[(ChunkKey, f64)],
) -> Vec<FusedScore> {
    let mut merged: BTreeMap<ChunkKey, FusedScore> = BTreeMap::new();

    for (channel, hits) in [(0usize, lexical), (1, semantic)] {
        for (key, score, rank) in channel_ranks(hits) {
            let entry = merged.entry(key.clone()).or_insert_with(|| FusedScore {
                key: key.clone(),
                lexical: None,
                semantic: None,
                score: 0.0,
            });
            let contribution = match strategy {
                FusionStrategy::ReciprocalRank { k } => 1.0 / (k as f64 + rank as f64),
                FusionStrategy::Weighted {
                    lexical: lexical_weight,
                    semantic: semantic_weight,
                } => {
                    if channel == 0 {
                        lexical_weight * score
                    } else {
                        semantic_weight * ((score + 1.0) / 2.0)
                    }
                }
            };
            entry.score += contribution;
            if channel == 0 {
                entry.lexical = Some(score);
            } else {
                entry.semantic = Some(score);
            }
        }
    }

    let mut fused: Vec<FusedScore> = merged.into_values().collect();
    fused.sort_by(|a, b| rank_order(a.score, &a.key, b.score, &b.key));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str, start: usize) -> ChunkKey {
        ChunkKey::new(path, start)
    }

    #[test]
    fn rrf_result_in_both_ranks_higher() {
        let lexical = vec![(key("shared.rs", 0), 0.5), (key("lex.rs", 0), 0.75)];
        let semantic = vec![(key("sem.rs", 0), 0.9), (key("shared.rs", 0), 0.3)];
        let fused = fuse(FusionStrategy::default(), &lexical, &semantic);

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].key, key("shared.rs", 0));
        assert_eq!(fused[0].lexical, Some(0.5));
        assert_eq!(fused[0].semantic, Some(0.3));
    }

    #[test]
    fn rrf_uses_one_based_ranks() {
        let semantic = vec![(key("a.rs", 0), 0.9)];
        let fused = fuse(FusionStrategy::ReciprocalRank { k: 60 }, &[], &semantic);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn weighted_normalizes_cosine() {
        let strategy = FusionStrategy::Weighted {
            lexical: 0.5,
            semantic: 0.5,
        };
        let fused = fuse(strategy, &[(key("a.rs", 0), 0.5)], &[(key("a.rs", 0), 0.0)]);
        // 0.5 * 0.5 + 0.5 * (0 + 1) / 2
        assert!((fused[0].score - 0.5).abs() < 1e-12);

        let negative = fuse(strategy, &[], &[(key("b.rs", 0), -1.0)]);
        assert_eq!(negative[0].score, 0.0);
    }

    #[test]
    fn ties_break_by_path_then_start() {
        let semantic = vec![
            (key("b.rs", 10), 0.5),
            (key("a.rs", 40), 0.5),
            (key("a.rs", 5), 0.5),
        ];
        let strategy = FusionStrategy::Weighted {
            lexical: 0.0,
            semantic: 1.0,
        };
        let fused = fuse(strategy, &[], &semantic);
        let order: Vec<_> = fused.iter().map(|f| (f.key.path.as_str(), f.key.start_byte)).collect();
        assert_eq!(order, vec![("a.rs", 5), ("a.rs", 40), ("b.rs", 10)]);
    }

    #[test]
    fn input_order_does_not_matter() {
        let a = vec![(key("x.rs", 0), 0.2), (key("y.rs", 0), 0.9)];
        let b = vec![(key("y.rs", 0), 0.9), (key("x.rs", 0), 0.2)];
        assert_eq!(
            fuse(FusionStrategy::default(), &a, &[]),
            fuse(FusionStrategy::default(), &b, &[])
        );
    }

    #[test]
    fn empty_inputs() {
        assert!(fuse(FusionStrategy::default(), &[], &[]).is_empty());
    }
}
