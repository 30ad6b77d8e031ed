use std::path::Path;

/// Language detected from a file extension.
///
/// Languages with a tree-sitter grammar get syntax-aware chunking;
/// [`Language::PlainText`] files are indexed with line windows only.
///
/// # Examples
///
/// ```
/// use codeseek_discover::Language;
///
/// assert_eq!(Language::from_extension("rs"), Language::Rust);
/// assert_eq!(Language::from_extension("py"), Language::Python);
/// assert_eq!(Language::from_extension("md"), Language::PlainText);
/// assert_eq!(Language::from_extension("png"), Language::Unknown);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    TypeScript,
    Tsx,
    JavaScript,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
    Php,
    Kotlin,
    Swift,
    PlainText,
    Unknown,
}

impl Language {
    /// Detect language from a file extension string (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "rs" => Language::Rust,
            "py" | "pyi" => Language::Python,
            "ts" | "mts" | "cts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Language::Cpp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            "md" | "markdown" | "txt" | "rst" | "adoc" | "toml" | "yaml" | "yml" | "json"
            | "ini" | "cfg" | "sh" | "bash" | "zsh" | "fish" | "sql" | "html" | "css"
            | "scss" | "xml" | "proto" | "graphql" | "lua" | "ex" | "exs" | "hs" | "ml"
            | "scala" | "cs" | "dart" | "r" | "pl" | "vue" | "svelte" | "tf" => {
                Language::PlainText
            }
            _ => Language::Unknown,
        }
    }

    /// Detect language from a path; files without an extension are unknown.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown)
    }

    /// Lowercase name used in results and stored records.
    pub fn name(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Kotlin => "kotlin",
            Language::Swift => "swift",
            Language::PlainText => "text",
            Language::Unknown => "unknown",
        }
    }

    /// Inverse of [`Language::name`].
    pub fn from_name(name: &str) -> Self {
        match name {
            "rust" => Language::Rust,
            "python" => Language::Python,
            "typescript" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "javascript" => Language::JavaScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" => Language::C,
            "cpp" => Language::Cpp,
            "ruby" => Language::Ruby,
            "php" => Language::Php,
            "kotlin" => Language::Kotlin,
            "swift" => Language::Swift,
            "text" => Language::PlainText,
            _ => Language::Unknown,
        }
    }

    /// Get the tree-sitter grammar for this language.
    ///
    /// Returns `None` when no grammar is bundled.
    pub fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Language::Java => Some(tree_sitter_java::LANGUAGE.into()),
            Language::C => Some(tree_sitter_c::LANGUAGE.into()),
            Language::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            Language::Ruby => Some(tree_sitter_ruby::LANGUAGE.into()),
            Language::Php => Some(tree_sitter_php::LANGUAGE_PHP.into()),
            Language::Kotlin => Some(tree_sitter_kotlin_ng::LANGUAGE.into()),
            Language::Swift => Some(tree_sitter_swift::LANGUAGE.into()),
            Language::PlainText | Language::Unknown => None,
        }
    }

    /// Whether files in this language are indexed at all.
    pub fn is_indexable(self) -> bool {
        self != Language::Unknown
    }
}
