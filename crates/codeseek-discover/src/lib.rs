//! File discovery for codeseek.
//!
//! Walks a repository with the `ignore` crate (gitignore, `.ignore` and
//! `.codeseekignore` aware), detects languages, and hands out
//! `(path, content, fingerprint)` records for the indexer and the lexical
//! search channel.

mod language;
mod walker;

pub use language::Language;
pub use walker::{
    discover, discover_file, fingerprint, normalize_path, read_file, DiscoverOptions, DiscoveredFile,
    IGNORE_FILE_NAME, INDEX_DIR_NAME,
};
