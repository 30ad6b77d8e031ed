//! Indexing and retrieval for codeseek.
//!
//! Splits source files into syntax-aware chunks, embeds them through a
//! cached gateway, persists chunks and vectors in a local SQLite index kept
//! in sync with the working tree, and answers lexical, semantic and hybrid
//! queries fused with Reciprocal Rank Fusion, optionally reranked.

pub mod chunker;
pub mod embedding;
pub mod fusion;
pub mod lexical;
pub mod lifecycle;
pub mod rerank;
pub mod search;
pub mod store;

pub use chunker::{chunk_file, Chunk, ChunkKind, ChunkerConfig};
pub use embedding::{build_embedder, Embedder, EmbeddingGateway, HashEmbedder, HttpEmbedder};
pub use fusion::{fuse, FusionStrategy};
pub use lifecycle::{
    EngineContext, FileUpdate, IndexEvent, IndexManager, IndexMode, IndexReport, ProgressCallback,
};
pub use rerank::{build_reranker, HttpReranker, OverlapReranker, Reranker};
pub use search::{SearchEngine, SearchQuery};
pub use store::IndexStore;
