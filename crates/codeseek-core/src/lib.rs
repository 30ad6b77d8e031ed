//! Core types, configuration, and error handling for codeseek.
//!
//! This crate provides the shared foundation used by the other crates:
//! - [`SeekError`]: unified error type using `thiserror`
//! - [`SeekConfig`]: configuration loaded from `.codeseek.toml`
//! - [`ModelRegistry`]: known embedding models and their dimensions
//! - [`RerankRegistry`]: known reranking models
//! - Shared types: [`SearchResult`], [`Span`], [`IndexStatus`], [`SearchMode`],
//!   [`OutputFormat`]

mod config;
mod error;
mod models;
mod types;

pub use config::{
    ChunkingConfig, EmbeddingConfig, IndexConfig, SearchConfig, SeekConfig, CONFIG_FILE_NAME,
};
pub use error::SeekError;
pub use models::{
    ModelProvider, ModelRegistry, ModelSpec, RerankModelSpec, RerankProvider, RerankRegistry,
};
pub use types::{
    FusionKind, IndexState, IndexStatus, OutputFormat, SearchMode, SearchResult, Span,
};

/// A convenience `Result` type for codeseek operations.
pub type Result<T> = std::result::Result<T, SeekError>;
