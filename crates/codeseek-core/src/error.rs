use std::path::PathBuf;

/// Errors that can occur across the codeseek workspace.
///
/// Library crates return this type directly; it also implements
/// [`miette::Diagnostic`] so the binary can render help for recoverable cases.
///
/// # Examples
///
/// ```
/// use codeseek_core::SeekError;
///
/// let err = SeekError::Config("workers must be at least 1".into());
/// assert!(err.to_string().contains("workers"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum SeekError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(code(codeseek::config))]
    Config(String),

    /// Source code parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Index database failure.
    #[error("index database error: {0}")]
    Database(String),

    /// The inference capability answered, but the answer was unusable.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The inference capability could not be reached at all.
    #[error("model '{model}' is unavailable: {reason}")]
    #[diagnostic(
        code(codeseek::model_unavailable),
        help("start the inference server configured under [embedding], or pick an offline model such as hash-384")
    )]
    ModelUnavailable {
        /// Model that was requested.
        model: String,
        /// What went wrong while contacting it.
        reason: String,
    },

    /// Query vectors and stored vectors come from different models.
    #[diagnostic(
        code(codeseek::dimension_mismatch),
        help("run `codeseek switch-model <model>` or `codeseek index --full` to rebuild for the active model")
    )]
    #[error(
        "index was built with model '{index_model}' ({index_dims} dims) but the active model is '{query_model}' ({query_dims} dims)"
    )]
    DimensionMismatch {
        /// Model recorded in the index.
        index_model: String,
        /// Dimensionality recorded in the index.
        index_dims: usize,
        /// Model active for this operation.
        query_model: String,
        /// Dimensionality of the active model.
        query_dims: usize,
    },

    /// An index already exists for another model and no rebuild was requested.
    #[error("index already exists for model '{existing}'; refusing to create one for '{requested}' without a rebuild")]
    #[diagnostic(
        code(codeseek::model_conflict),
        help("run `codeseek switch-model {requested}` to rebuild with the new model")
    )]
    ModelConflict {
        /// Model currently recorded in the index.
        existing: String,
        /// Model that was requested.
        requested: String,
    },

    /// The persisted index is structurally inconsistent.
    #[error("index is corrupted: {0}")]
    #[diagnostic(
        code(codeseek::index_corruption),
        help("run `codeseek index --full` to rebuild it, or `codeseek clean` to remove it")
    )]
    IndexCorruption(String),

    /// No model is registered under the requested name.
    #[error("unknown model '{name}'; available models: {available}")]
    #[diagnostic(code(codeseek::unknown_model), help("list models with `codeseek models`"))]
    UnknownModel {
        /// Requested alias or full name.
        name: String,
        /// Comma-separated list of known aliases.
        available: String,
    },

    /// Invalid lexical search pattern.
    #[error("invalid search pattern: {0}")]
    #[diagnostic(code(codeseek::pattern))]
    Pattern(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl SeekError {
    /// Whether recovering from this error requires rebuilding the index.
    ///
    /// # Examples
    ///
    /// ```
    /// use codeseek_core::SeekError;
    ///
    /// assert!(SeekError::IndexCorruption("bad metadata".into()).needs_rebuild());
    /// assert!(!SeekError::Config("x".into()).needs_rebuild());
    /// ```
    pub fn needs_rebuild(&self) -> bool {
        matches!(
            self,
            SeekError::IndexCorruption(_)
                | SeekError::DimensionMismatch { .. }
                | SeekError::ModelConflict { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: SeekError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn dimension_mismatch_names_both_models() {
        let err = SeekError::DimensionMismatch {
            index_model: "bge-small".into(),
            index_dims: 384,
            query_model: "nomic-v1.5".into(),
            query_dims: 768,
        };
        let msg = err.to_string();
        assert!(msg.contains("bge-small"));
        assert!(msg.contains("nomic-v1.5"));
        assert!(msg.contains("384"));
        assert!(msg.contains("768"));
        assert!(err.needs_rebuild());
    }

    #[test]
    fn model_unavailable_names_model() {
        let err = SeekError::ModelUnavailable {
            model: "jina-code".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "model 'jina-code' is unavailable: connection refused"
        );
        assert!(!err.needs_rebuild());
    }

    #[test]
    fn file_not_found_shows_path() {
        let err = SeekError::FileNotFound(PathBuf::from("/tmp/missing.rs"));
        assert!(err.to_string().contains("/tmp/missing.rs"));
    }
}
