use std::path::{Component, Path, PathBuf};

use codeseek_core::SeekError;
use sha2::{Digest, Sha256};

use crate::language::Language;

/// Maximum file size to process (1 MB).
const MAX_FILE_SIZE: u64 = 1_048_576;

/// Number of bytes to check for binary detection.
const BINARY_CHECK_SIZE: usize = 8192;

/// Directory holding the persisted index; never discovered as content.
pub const INDEX_DIR_NAME: &str = ".codeseek";

/// Project-specific ignore file honoured alongside `.gitignore`.
pub const IGNORE_FILE_NAME: &str = ".codeseekignore";

/// A source file discovered during repository walking.
///
/// # Examples
///
/// ```
/// use codeseek_discover::{fingerprint, DiscoveredFile, Language};
///
/// let content = "fn main() {}".to_string();
/// let file = DiscoveredFile {
///     path: "src/main.rs".into(),
///     language: Language::Rust,
///     fingerprint: fingerprint(content.as_bytes()),
///     content,
/// };
/// assert_eq!(file.fingerprint.len(), 64);
/// ```
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Normalized path relative to the repository root (`/`-separated).
    pub path: String,
    /// Detected language.
    pub language: Language,
    /// Full file content.
    pub content: String,
    /// SHA-256 of the raw bytes, hex encoded.
    pub fingerprint: String,
}

/// Walk settings supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    /// Restrict results to these paths (files or directories, relative to root).
    pub scope: Vec<PathBuf>,
    /// Ignore `.gitignore`, `.ignore` and `.codeseekignore` rules.
    pub no_ignore: bool,
    /// Include hidden files and directories.
    pub hidden: bool,
}

/// SHA-256 of `bytes`, hex encoded.
///
/// # Examples
///
/// ```
/// use codeseek_discover::fingerprint;
///
/// assert_eq!(fingerprint(b"a"), fingerprint(b"a"));
/// assert_ne!(fingerprint(b"a"), fingerprint(b"b"));
/// ```
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Normalize a relative path: `/` separators, no `.` components, no leading `./`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use codeseek_discover::normalize_path;
///
/// assert_eq!(normalize_path(Path::new("./src/../src/lib.rs")), "src/lib.rs");
/// ```
pub fn normalize_path(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
        }
    }
    parts.join("/")
}

fn in_scope(relative: &str, scope: &[String]) -> bool {
    if scope.is_empty() {
        return true;
    }
    scope.iter().any(|s| {
        s.is_empty() || relative == s || relative.starts_with(&format!("{s}/"))
    })
}

/// Walk a repository and return indexable text files, sorted by path.
///
/// Respects `.gitignore`, `.ignore` and `.codeseekignore` unless
/// `no_ignore` is set. Skips binary files, files larger than 1 MB, files
/// that are not UTF-8, and files with unknown extensions. The index
/// directory is never returned.
///
/// # Errors
///
/// Returns [`SeekError::FileNotFound`] if `root` does not exist.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use codeseek_discover::{discover, DiscoverOptions};
///
/// let files = discover(Path::new("."), &DiscoverOptions::default()).unwrap();
/// for f in &files {
///     println!("{}: {:?}", f.path, f.language);
/// }
/// ```
pub fn discover(root: &Path, options: &DiscoverOptions) -> Result<Vec<DiscoveredFile>, SeekError> {
    if !root.exists() {
        return Err(SeekError::FileNotFound(root.to_path_buf()));
    }

    let scope: Vec<String> = options.scope.iter().map(|p| normalize_path(p)).collect();
    let respect_ignore = !options.no_ignore;

    let walk_root = root.to_path_buf();
    let walk_scope = scope.clone();
    let mut builder = ignore::WalkBuilder::new(root);
    builder
        .hidden(!options.hidden)
        .ignore(respect_ignore)
        .git_ignore(respect_ignore)
        .git_global(respect_ignore)
        .git_exclude(respect_ignore)
        .parents(respect_ignore)
        .filter_entry(move |entry| {
            let name = entry.file_name();
            if name == INDEX_DIR_NAME || name == ".git" {
                return false;
            }
            let relative = entry
                .path()
                .strip_prefix(&walk_root)
                .map(normalize_path)
                .unwrap_or_default();
            leads_to_scope(&relative, &walk_scope)
        });
    if respect_ignore {
        builder.add_custom_ignore_filename(IGNORE_FILE_NAME);
    }

    let mut files = Vec::new();

    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::debug!(error = %err, "skipping unreadable walk entry");
                continue;
            }
        };

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path();
        let relative = match path.strip_prefix(root) {
            Ok(r) => normalize_path(r),
            Err(_) => normalize_path(path),
        };
        if !in_scope(&relative, &scope) {
            continue;
        }

        if let Some(file) = load_file(path, relative)? {
            files.push(file);
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Discover a single file with the same filters as [`discover`].
///
/// Returns `Ok(None)` when the file is missing, not indexable, ignored,
/// hidden (unless `options.hidden`), or inside the index directory. The
/// walk only descends into the directories leading to `relative`.
///
/// # Errors
///
/// Same as [`discover`].
pub fn discover_file(
    root: &Path,
    relative: &Path,
    options: &DiscoverOptions,
) -> Result<Option<DiscoveredFile>, SeekError> {
    let normalized = normalize_path(relative);
    if normalized.is_empty() {
        return Ok(None);
    }
    let scoped = DiscoverOptions {
        scope: vec![PathBuf::from(&normalized)],
        ..options.clone()
    };
    Ok(discover(root, &scoped)?
        .into_iter()
        .find(|f| f.path == normalized))
}

/// Load a single file relative to `root`, bypassing ignore rules.
///
/// Returns `Ok(None)` when the file exists but is not indexable (binary,
/// too large, unknown extension) and when it does not exist at all.
///
/// # Errors
///
/// Returns [`SeekError::Io`] on read failures other than "not found".
pub fn read_file(root: &Path, relative: &Path) -> Result<Option<DiscoveredFile>, SeekError> {
    let normalized = normalize_path(relative);
    let absolute = root.join(&normalized);
    if !absolute.is_file() {
        return Ok(None);
    }
    load_file(&absolute, normalized)
}

fn load_file(path: &Path, relative: String) -> Result<Option<DiscoveredFile>, SeekError> {
    let language = Language::from_path(path);
    if !language.is_indexable() {
        return Ok(None);
    }

    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if metadata.len() > MAX_FILE_SIZE {
        tracing::debug!(path = %relative, size = metadata.len(), "skipping large file");
        return Ok(None);
    }

    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    // Null bytes in the first 8KB mean binary
    let check_len = bytes.len().min(BINARY_CHECK_SIZE);
    if bytes[..check_len].contains(&0) {
        return Ok(None);
    }

    let fingerprint = fingerprint(&bytes);
    let Ok(content) = String::from_utf8(bytes) else {
        tracing::debug!(path = %relative, "skipping non-UTF-8 file");
        return Ok(None);
    };

    Ok(Some(DiscoveredFile {
        path: relative,
        language,
        content,
        fingerprint,
    }))
}
