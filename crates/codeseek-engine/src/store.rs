//! SQLite storage for file records, chunks and their vectors.
//!
//! One database per repository at `<root>/.codeseek/index.db`. Every index
//! is tagged with exactly one model id and dimensionality; vectors are
//! little-endian `f32` BLOBs and cosine similarity is computed in Rust.
//! Per-file writes happen in a single transaction, so a file is either fully
//! replaced or left exactly as it was.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use codeseek_core::{IndexState, IndexStatus, SeekError};
use codeseek_discover::INDEX_DIR_NAME;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::chunker::{Chunk, ChunkKind};

/// Version of the on-disk layout; bumped on incompatible changes.
pub const SCHEMA_VERSION: u32 = 1;

/// File name of the database inside the index directory.
pub const INDEX_FILE_NAME: &str = "index.db";

/// Stored state of one indexed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Normalized relative path.
    pub path: String,
    /// SHA-256 of the file's bytes when it was indexed.
    pub fingerprint: String,
    /// Language name.
    pub language: String,
    /// Ids of the file's chunks, in order.
    pub chunk_ids: Vec<String>,
    /// RFC 3339 time of the last (re)index of this file.
    pub indexed_at: String,
}

/// A stored chunk with its vector, as read for similarity search.
#[derive(Debug, Clone)]
pub struct VectorRow {
    /// The chunk.
    pub chunk: Chunk,
    /// Language of the parent file.
    pub language: String,
    /// Unit-length embedding.
    pub vector: Vec<f32>,
}

/// Persistent, model-tagged chunk and vector index.
///
/// # Examples
///
/// ```
/// use codeseek_engine::store::IndexStore;
///
/// let store = IndexStore::in_memory().unwrap();
/// store.create_index("hash-384", 384, false).unwrap();
/// let status = store.status().unwrap();
/// assert_eq!(status.file_count, 0);
/// assert_eq!(status.model_id.as_deref(), Some("hash-384"));
/// ```
pub struct IndexStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn db_error(what: &str, e: rusqlite::Error) -> SeekError {
    SeekError::Database(format!("{what}: {e}"))
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

const CHUNK_COLUMNS: &str = "id, file_path, ordinal, start_byte, end_byte, start_line, end_line, \
                             kind, name, text, context, token_estimate, text_hash";

fn chunk_from_row(row: &Row) -> rusqlite::Result<Chunk> {
    let kind: String = row.get(7)?;
    let kind = kind
        .parse::<ChunkKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, e.into()))?;

    Ok(Chunk {
        id: row.get(0)?,
        file_path: row.get(1)?,
        ordinal: row.get::<_, i64>(2)? as usize,
        span: codeseek_core::Span {
            start_byte: row.get::<_, i64>(3)? as usize,
            end_byte: row.get::<_, i64>(4)? as usize,
            start_line: row.get(5)?,
            end_line: row.get(6)?,
        },
        kind,
        name: row.get(8)?,
        text: row.get(9)?,
        context: row.get(10)?,
        token_estimate: row.get::<_, i64>(11)? as usize,
        text_hash: row.get(12)?,
    })
}

impl IndexStore {
    /// Directory holding the index for `root`.
    pub fn index_dir(root: &Path) -> PathBuf {
        root.join(INDEX_DIR_NAME)
    }

    /// Path of the index database for `root`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    /// use codeseek_engine::store::IndexStore;
    ///
    /// let path = IndexStore::index_path(Path::new("/repo"));
    /// assert!(path.ends_with(".codeseek/index.db"));
    /// ```
    pub fn index_path(root: &Path) -> PathBuf {
        Self::index_dir(root).join(INDEX_FILE_NAME)
    }

    /// Whether an index database exists for `root`.
    pub fn exists(root: &Path) -> bool {
        Self::index_path(root).is_file()
    }

    /// Open or create the index database for `root`.
    ///
    /// # Errors
    ///
    /// - [`SeekError::Database`] if the database cannot be opened.
    /// - [`SeekError::IndexCorruption`] if an existing file is not a usable
    ///   index or was written by another schema version.
    pub fn open(root: &Path) -> Result<Self, SeekError> {
        let path = Self::index_path(root);
        let existed = path.is_file();
        std::fs::create_dir_all(Self::index_dir(root)).map_err(|e| {
            SeekError::Database(format!("failed to create index directory: {e}"))
        })?;

        let conn = Connection::open(&path)
            .map_err(|e| db_error("failed to open database", e))?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.clone()),
        };
        match store.init_schema() {
            Ok(()) => {}
            Err(SeekError::Database(msg)) if existed => {
                return Err(SeekError::IndexCorruption(format!(
                    "{} is not a readable index: {msg}",
                    path.display()
                )))
            }
            Err(e) => return Err(e),
        }
        store.check_schema_version()?;
        tracing::debug!(path = %path.display(), "opened index");
        Ok(store)
    }

    /// Create an in-memory index (for tests).
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Database`] if schema creation fails.
    pub fn in_memory() -> Result<Self, SeekError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| db_error("failed to create in-memory database", e))?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, SeekError> {
        self.conn
            .lock()
            .map_err(|_| SeekError::Database("index connection lock poisoned".into()))
    }

    fn init_schema(&self) -> Result<(), SeekError> {
        self.conn()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS metadata (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS files (
                    path TEXT PRIMARY KEY,
                    fingerprint TEXT NOT NULL,
                    language TEXT NOT NULL,
                    chunk_ids TEXT NOT NULL,
                    indexed_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS chunks (
                    id TEXT PRIMARY KEY,
                    file_path TEXT NOT NULL,
                    ordinal INTEGER NOT NULL,
                    start_byte INTEGER NOT NULL,
                    end_byte INTEGER NOT NULL,
                    start_line INTEGER NOT NULL,
                    end_line INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    name TEXT,
                    text TEXT NOT NULL,
                    context TEXT,
                    token_estimate INTEGER NOT NULL,
                    text_hash TEXT NOT NULL,
                    embedding BLOB NOT NULL
                );

                CREATE INDEX IF NOT EXISTS chunks_by_file ON chunks(file_path, ordinal);
                CREATE INDEX IF NOT EXISTS chunks_by_text ON chunks(text_hash);
                ",
            )
            .map_err(|e| db_error("failed to create schema", e))
    }

    fn check_schema_version(&self) -> Result<(), SeekError> {
        let conn = self.conn()?;
        if let Some(version) = get_metadata(&conn, "schema_version")? {
            if version != SCHEMA_VERSION.to_string() {
                return Err(SeekError::IndexCorruption(format!(
                    "index schema version {version} is not supported (expected {SCHEMA_VERSION})"
                )));
            }
        }
        Ok(())
    }

    /// Model id and dimensionality recorded in the index, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::IndexCorruption`] if the metadata is unparseable.
    pub fn model(&self) -> Result<Option<(String, usize)>, SeekError> {
        let conn = self.conn()?;
        read_model(&conn)
    }

    /// Tag the index with a model, optionally discarding prior content.
    ///
    /// Recording the same model twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::ModelConflict`] if the index already belongs to
    /// another model (or dimensionality) and `rebuild` is false.
    pub fn create_index(&self, model_id: &str, dimensions: usize, rebuild: bool) -> Result<(), SeekError> {
        let mut conn = self.conn()?;
        let existing = read_model(&conn)?;

        if let Some((existing_id, existing_dims)) = &existing {
            let same = existing_id == model_id && *existing_dims == dimensions;
            if same && !rebuild {
                return Ok(());
            }
            if !same && !rebuild {
                return Err(SeekError::ModelConflict {
                    existing: existing_id.clone(),
                    requested: model_id.to_string(),
                });
            }
        }

        let tx = conn
            .transaction()
            .map_err(|e| db_error("failed to begin transaction", e))?;
        if rebuild {
            tx.execute_batch("DELETE FROM chunks; DELETE FROM files; DELETE FROM metadata;")
                .map_err(|e| db_error("failed to clear index", e))?;
        }
        let timestamp = now();
        set_metadata(&tx, "schema_version", &SCHEMA_VERSION.to_string())?;
        set_metadata(&tx, "model_id", model_id)?;
        set_metadata(&tx, "dimensions", &dimensions.to_string())?;
        set_metadata(&tx, "created_at", &timestamp)?;
        set_metadata(&tx, "updated_at", &timestamp)?;
        tx.commit()
            .map_err(|e| db_error("failed to commit index creation", e))?;

        tracing::info!(model = model_id, dimensions, rebuild, "created index");
        Ok(())
    }

    /// Atomically replace everything stored for `path`.
    ///
    /// Old chunks are deleted, the new chunks and vectors inserted and the
    /// file record rewritten in one transaction.
    ///
    /// # Errors
    ///
    /// - [`SeekError::Database`] if no model is recorded or a write fails;
    ///   the prior state of the file is left intact.
    /// - [`SeekError::Embedding`] if a vector does not have the index
    ///   dimensionality.
    pub fn upsert_file(
        &self,
        path: &str,
        fingerprint: &str,
        language: &str,
        chunks: &[(Chunk, Vec<f32>)],
    ) -> Result<FileRecord, SeekError> {
        let mut conn = self.conn()?;
        let (model_id, dimensions) = read_model(&conn)?
            .ok_or_else(|| SeekError::Database("index has no model; create it first".into()))?;

        for (chunk, vector) in chunks {
            if chunk.file_path != path {
                return Err(SeekError::Database(format!(
                    "chunk {} belongs to {}, not {path}",
                    chunk.id, chunk.file_path
                )));
            }
            if vector.len() != dimensions {
                return Err(SeekError::Embedding(format!(
                    "vector for {path} chunk {} has {} dimensions; index model '{model_id}' uses {dimensions}",
                    chunk.ordinal,
                    vector.len()
                )));
            }
        }

        let record = FileRecord {
            path: path.to_string(),
            fingerprint: fingerprint.to_string(),
            language: language.to_string(),
            chunk_ids: chunks.iter().map(|(c, _)| c.id.clone()).collect(),
            indexed_at: now(),
        };
        let chunk_ids = serde_json::to_string(&record.chunk_ids)?;

        let tx = conn
            .transaction()
            .map_err(|e| db_error("failed to begin transaction", e))?;

        tx.execute("DELETE FROM chunks WHERE file_path = ?1", params![path])
            .map_err(|e| db_error("failed to delete chunks", e))?;

        {
            let mut insert = tx
                .prepare(
                    "INSERT INTO chunks
                     (id, file_path, ordinal, start_byte, end_byte, start_line, end_line,
                      kind, name, text, context, token_estimate, text_hash, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                )
                .map_err(|e| db_error("failed to prepare chunk insert", e))?;

            for (chunk, vector) in chunks {
                insert
                    .execute(params![
                        chunk.id,
                        chunk.file_path,
                        chunk.ordinal as i64,
                        chunk.span.start_byte as i64,
                        chunk.span.end_byte as i64,
                        chunk.span.start_line,
                        chunk.span.end_line,
                        chunk.kind.to_string(),
                        chunk.name,
                        chunk.text,
                        chunk.context,
                        chunk.token_estimate as i64,
                        chunk.text_hash,
                        floats_to_bytes(vector),
                    ])
                    .map_err(|e| db_error("failed to insert chunk", e))?;
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO files (path, fingerprint, language, chunk_ids, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.path,
                record.fingerprint,
                record.language,
                chunk_ids,
                record.indexed_at
            ],
        )
        .map_err(|e| db_error("failed to record file", e))?;
        set_metadata(&tx, "updated_at", &record.indexed_at)?;

        tx.commit()
            .map_err(|e| db_error("failed to commit file update", e))?;

        tracing::debug!(path, chunks = chunks.len(), "committed file");
        Ok(record)
    }

    /// Delete all chunks and the record of `path`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Database`] on failure; nothing is deleted then.
    pub fn remove_file(&self, path: &str) -> Result<bool, SeekError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| db_error("failed to begin transaction", e))?;
        tx.execute("DELETE FROM chunks WHERE file_path = ?1", params![path])
            .map_err(|e| db_error("failed to delete chunks", e))?;
        let removed = tx
            .execute("DELETE FROM files WHERE path = ?1", params![path])
            .map_err(|e| db_error("failed to delete file record", e))?;
        if removed > 0 {
            set_metadata(&tx, "updated_at", &now())?;
        }
        tx.commit()
            .map_err(|e| db_error("failed to commit removal", e))?;

        if removed > 0 {
            tracing::debug!(path, "removed file from index");
        }
        Ok(removed > 0)
    }

    /// Drop every file and vector and re-tag the index for another model.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Database`] on failure.
    pub fn switch_model(&self, model_id: &str, dimensions: usize) -> Result<(), SeekError> {
        let previous = self.model()?.map(|(id, _)| id);
        self.create_index(model_id, dimensions, true)?;
        tracing::info!(from = ?previous, to = model_id, "switched index model");
        Ok(())
    }

    /// Remove the index directory of `root`. Returns whether anything existed.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Io`] if the directory cannot be removed.
    pub fn clean(root: &Path) -> Result<bool, SeekError> {
        let dir = Self::index_dir(root);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(path = %dir.display(), "removed index");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SeekError::Io(e)),
        }
    }

    /// Summary of the index. `state` is `Ready` once a model is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Database`] on query failure.
    pub fn status(&self) -> Result<IndexStatus, SeekError> {
        let conn = self.conn()?;
        let model = read_model(&conn)?;

        let file_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .map_err(|e| db_error("failed to count files", e))?;
        let chunk_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .map_err(|e| db_error("failed to count chunks", e))?;

        let index_size_bytes = match &self.path {
            Some(path) => std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            None => {
                let page_count: i64 = conn
                    .query_row("PRAGMA page_count", [], |row| row.get(0))
                    .unwrap_or(0);
                let page_size: i64 = conn
                    .query_row("PRAGMA page_size", [], |row| row.get(0))
                    .unwrap_or(4096);
                (page_count * page_size) as u64
            }
        };

        Ok(IndexStatus {
            state: if model.is_some() {
                IndexState::Ready
            } else {
                IndexState::Absent
            },
            file_count: file_count as usize,
            chunk_count: chunk_count as usize,
            model_id: model.as_ref().map(|(id, _)| id.clone()),
            dimensions: model.map(|(_, dims)| dims),
            created_at: get_metadata(&conn, "created_at")?,
            last_update: get_metadata(&conn, "updated_at")?,
            index_size_bytes,
        })
    }

    /// Reject reads by a model other than the one the index was built with.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::DimensionMismatch`] if the model id or the
    /// dimensionality differs from the index metadata.
    ///
    /// # Examples
    ///
    /// ```
    /// use codeseek_engine::store::IndexStore;
    ///
    /// let store = IndexStore::in_memory().unwrap();
    /// store.create_index("hash-384", 384, false).unwrap();
    /// assert!(store.ensure_model("hash-384", 384).is_ok());
    /// assert!(store.ensure_model("nomic-v1.5", 768).is_err());
    /// ```
    pub fn ensure_model(&self, model_id: &str, dimensions: usize) -> Result<(), SeekError> {
        match self.model()? {
            Some((index_model, index_dims)) if index_model != model_id || index_dims != dimensions => {
                Err(SeekError::DimensionMismatch {
                    index_model,
                    index_dims,
                    query_model: model_id.to_string(),
                    query_dims: dimensions,
                })
            }
            _ => Ok(()),
        }
    }

    /// Stored fingerprint of every indexed file.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Database`] on query failure.
    pub fn file_fingerprints(&self) -> Result<HashMap<String, String>, SeekError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT path, fingerprint FROM files")
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| db_error("failed to query files", e))?;

        let mut map = HashMap::new();
        for row in rows {
            let (path, fingerprint): (String, String) =
                row.map_err(|e| db_error("failed to read row", e))?;
            map.insert(path, fingerprint);
        }
        Ok(map)
    }

    /// Record of one file, if indexed.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::IndexCorruption`] if the chunk-id list is unreadable.
    pub fn file_record(&self, path: &str) -> Result<Option<FileRecord>, SeekError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT path, fingerprint, language, chunk_ids, indexed_at FROM files WHERE path = ?1",
                params![path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| db_error("failed to read file record", e))?;

        row.map(|(path, fingerprint, language, ids, indexed_at)| {
            let chunk_ids = serde_json::from_str(&ids).map_err(|e| {
                SeekError::IndexCorruption(format!("chunk list of {path} is unreadable: {e}"))
            })?;
            Ok(FileRecord {
                path,
                fingerprint,
                language,
                chunk_ids,
                indexed_at,
            })
        })
        .transpose()
    }

    /// Chunks of `path` in order.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Database`] on query failure.
    pub fn chunks_for_file(&self, path: &str) -> Result<Vec<Chunk>, SeekError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHUNK_COLUMNS} FROM chunks WHERE file_path = ?1 ORDER BY ordinal"
            ))
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![path], chunk_from_row)
            .map_err(|e| db_error("failed to query chunks", e))?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row.map_err(|e| db_error("failed to read chunk", e))?);
        }
        Ok(chunks)
    }

    /// Vectors already stored for any of `text_hashes`.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Database`] on query failure.
    pub fn vectors_for_text_hashes(
        &self,
        text_hashes: &[String],
    ) -> Result<HashMap<String, Vec<f32>>, SeekError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT embedding FROM chunks WHERE text_hash = ?1 LIMIT 1")
            .map_err(|e| db_error("failed to prepare query", e))?;

        let mut found = HashMap::new();
        for hash in text_hashes {
            if found.contains_key(hash) {
                continue;
            }
            let blob: Option<Vec<u8>> = stmt
                .query_row(params![hash], |row| row.get(0))
                .optional()
                .map_err(|e| db_error("failed to read vector", e))?;
            if let Some(blob) = blob {
                found.insert(hash.clone(), bytes_to_floats(&blob));
            }
        }
        Ok(found)
    }

    /// Every stored chunk and vector whose path is within `scope`.
    ///
    /// An empty scope means the whole repository.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Database`] on query failure.
    pub fn load_vectors(&self, scope: &[String]) -> Result<Vec<VectorRow>, SeekError> {
        let conn = self.conn()?;
        let columns = CHUNK_COLUMNS
            .split(", ")
            .map(|c| format!("c.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {columns}, f.language, c.embedding
                 FROM chunks c JOIN files f ON f.path = c.file_path
                 ORDER BY c.file_path, c.ordinal"
            ))
            .map_err(|e| db_error("failed to prepare query", e))?;

        let rows = stmt
            .query_map([], |row| {
                let chunk = chunk_from_row(row)?;
                let language: String = row.get(13)?;
                let blob: Vec<u8> = row.get(14)?;
                Ok((chunk, language, blob))
            })
            .map_err(|e| db_error("failed to query vectors", e))?;

        let mut out = Vec::new();
        for row in rows {
            let (chunk, language, blob) = row.map_err(|e| db_error("failed to read vector row", e))?;
            if !in_scope(&chunk.file_path, scope) {
                continue;
            }
            out.push(VectorRow {
                chunk,
                language,
                vector: bytes_to_floats(&blob),
            });
        }
        Ok(out)
    }

    /// Check structural consistency of the index.
    ///
    /// Verifies the metadata, that every vector has the index
    /// dimensionality, that every file's chunk-id list matches its stored
    /// chunks and that no chunk is orphaned.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::IndexCorruption`] describing the first problem found.
    pub fn verify(&self) -> Result<(), SeekError> {
        let conn = self.conn()?;

        let model = read_model(&conn)?;
        let file_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .map_err(|e| db_error("failed to count files", e))?;

        let Some((model_id, dimensions)) = model else {
            if file_count > 0 {
                return Err(SeekError::IndexCorruption(
                    "files are indexed but no model is recorded".into(),
                ));
            }
            return Ok(());
        };

        match get_metadata(&conn, "schema_version")? {
            Some(v) if v == SCHEMA_VERSION.to_string() => {}
            other => {
                return Err(SeekError::IndexCorruption(format!(
                    "unexpected schema version {other:?}"
                )))
            }
        }

        let bad_vector: Option<(String, i64)> = conn
            .query_row(
                "SELECT id, length(embedding) FROM chunks WHERE length(embedding) != ?1 LIMIT 1",
                params![(dimensions * 4) as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| db_error("failed to check vectors", e))?;
        if let Some((id, len)) = bad_vector {
            return Err(SeekError::IndexCorruption(format!(
                "chunk {id} has a {len}-byte vector; model '{model_id}' needs {dimensions} dimensions"
            )));
        }

        let orphans: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE file_path NOT IN (SELECT path FROM files)",
                [],
                |row| row.get(0),
            )
            .map_err(|e| db_error("failed to check orphans", e))?;
        if orphans > 0 {
            return Err(SeekError::IndexCorruption(format!(
                "{orphans} chunks belong to no indexed file"
            )));
        }

        let mut files = conn
            .prepare("SELECT path, chunk_ids FROM files")
            .map_err(|e| db_error("failed to prepare query", e))?;
        let mut chunk_ids = conn
            .prepare("SELECT id, kind FROM chunks WHERE file_path = ?1 ORDER BY ordinal")
            .map_err(|e| db_error("failed to prepare query", e))?;

        let rows = files
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| db_error("failed to query files", e))?;
        for row in rows {
            let (path, listed) = row.map_err(|e| db_error("failed to read row", e))?;
            let listed: Vec<String> = serde_json::from_str(&listed).map_err(|e| {
                SeekError::IndexCorruption(format!("chunk list of {path} is unreadable: {e}"))
            })?;

            let stored = chunk_ids
                .query_map(params![path], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| db_error("failed to query chunks", e))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| db_error("failed to read chunk", e))?;

            if let Some((id, kind)) = stored.iter().find(|(_, k)| k.parse::<ChunkKind>().is_err()) {
                return Err(SeekError::IndexCorruption(format!(
                    "chunk {id} of {path} has unknown kind '{kind}'"
                )));
            }
            let stored: Vec<String> = stored.into_iter().map(|(id, _)| id).collect();
            if stored != listed {
                return Err(SeekError::IndexCorruption(format!(
                    "{path} lists {} chunks but {} are stored",
                    listed.len(),
                    stored.len()
                )));
            }
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<(), SeekError> {
        self.conn()?
            .execute_batch(sql)
            .map_err(|e| db_error("raw statement failed", e))
    }
}

fn read_model(conn: &Connection) -> Result<Option<(String, usize)>, SeekError> {
    let Some(model_id) = get_metadata(conn, "model_id")? else {
        return Ok(None);
    };
    let dims = get_metadata(conn, "dimensions")?.ok_or_else(|| {
        SeekError::IndexCorruption(format!("model '{model_id}' has no recorded dimensions"))
    })?;
    let dims: usize = dims.parse().map_err(|_| {
        SeekError::IndexCorruption(format!("corrupted dimension metadata in index: '{dims}'"))
    })?;
    Ok(Some((model_id, dims)))
}

fn get_metadata(conn: &Connection, key: &str) -> Result<Option<String>, SeekError> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| db_error(&format!("failed to get metadata '{key}'"), e))
}

fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<(), SeekError> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
    .map_err(|e| db_error(&format!("failed to set metadata '{key}'"), e))?;
    Ok(())
}

/// Whether a normalized path falls under one of the scope prefixes.
pub(crate) fn in_scope(path: &str, scope: &[String]) -> bool {
    scope.is_empty()
        || scope
            .iter()
            .any(|s| s.is_empty() || path == s || path.starts_with(&format!("{s}/")))
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; 0 for empty or mismatched inputs.
///
/// # Examples
///
/// ```
/// use codeseek_engine::store::cosine_similarity;
///
/// assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
/// assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codeseek_core::Span;

    fn chunk(path: &str, ordinal: usize, text: &str) -> Chunk {
        let start = ordinal * 100;
        Chunk {
            id: format!("{path}#{ordinal}"),
            file_path: path.into(),
            ordinal,
            span: Span {
                start_byte: start,
                end_byte: start + text.len(),
                start_line: ordinal as u32 + 1,
                end_line: ordinal as u32 + 1,
            },
            kind: ChunkKind::Function,
            name: Some(format!("f{ordinal}")),
            text: text.into(),
            context: None,
            token_estimate: text.len().div_ceil(4),
            text_hash: format!("hash-{text}"),
        }
    }

    fn store_with_model(dims: usize) -> IndexStore {
        let store = IndexStore::in_memory().unwrap();
        store.create_index("test-model", dims, false).unwrap();
        store
    }

    #[test]
    fn upsert_and_read_back() {
        let store = store_with_model(3);
        let chunks = vec![
            (chunk("src/a.rs", 0, "fn a() {}"), vec![1.0, 0.0, 0.0]),
            (chunk("src/a.rs", 1, "fn b() {}"), vec![0.0, 1.0, 0.0]),
        ];
        let record = store.upsert_file("src/a.rs", "fp1", "rust", &chunks).unwrap();
        assert_eq!(record.chunk_ids, vec!["src/a.rs#0", "src/a.rs#1"]);

        let stored = store.chunks_for_file("src/a.rs").unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0], chunks[0].0);

        let fetched = store.file_record("src/a.rs").unwrap().unwrap();
        assert_eq!(fetched, record);
        assert_eq!(store.file_fingerprints().unwrap()["src/a.rs"], "fp1");
        store.verify().unwrap();
    }

    #[test]
    fn upsert_replaces_previous_chunks() {
        let store = store_with_model(2);
        let old = vec![
            (chunk("a.py", 0, "one"), vec![1.0, 0.0]),
            (chunk("a.py", 1, "two"), vec![0.0, 1.0]),
        ];
        store.upsert_file("a.py", "fp1", "python", &old).unwrap();
        let new = vec![(chunk("a.py", 0, "three"), vec![1.0, 1.0])];
        store.upsert_file("a.py", "fp2", "python", &new).unwrap();

        let stored = store.chunks_for_file("a.py").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].text, "three");
        assert_eq!(store.status().unwrap().chunk_count, 1);
        store.verify().unwrap();
    }

    #[test]
    fn wrong_dimension_leaves_prior_state() {
        let store = store_with_model(2);
        let good = vec![(chunk("a.py", 0, "one"), vec![1.0, 0.0])];
        store.upsert_file("a.py", "fp1", "python", &good).unwrap();

        let bad = vec![(chunk("a.py", 0, "changed"), vec![1.0, 0.0, 0.0])];
        let err = store.upsert_file("a.py", "fp2", "python", &bad).unwrap_err();
        assert!(matches!(err, SeekError::Embedding(_)));

        assert_eq!(store.file_fingerprints().unwrap()["a.py"], "fp1");
        assert_eq!(store.chunks_for_file("a.py").unwrap()[0].text, "one");
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = store_with_model(1);
        let good = vec![(chunk("a.py", 0, "one"), vec![1.0])];
        store.upsert_file("a.py", "fp1", "python", &good).unwrap();
        store.upsert_file("b.py", "fpb", "python", &[(chunk("b.py", 0, "b"), vec![1.0])]).unwrap();

        // Reusing b.py's chunk id violates the primary key mid-transaction
        let mut clash = chunk("a.py", 1, "two");
        clash.id = "b.py#0".into();
        let replacement = vec![(chunk("a.py", 0, "new"), vec![1.0]), (clash, vec![1.0])];
        assert!(store.upsert_file("a.py", "fp2", "python", &replacement).is_err());

        let stored = store.chunks_for_file("a.py").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].text, "one");
        store.verify().unwrap();
    }

    #[test]
    fn remove_file_deletes_everything() {
        let store = store_with_model(1);
        store
            .upsert_file("a.py", "fp", "python", &[(chunk("a.py", 0, "x"), vec![1.0])])
            .unwrap();
        assert!(store.remove_file("a.py").unwrap());
        assert!(!store.remove_file("a.py").unwrap());
        assert!(store.chunks_for_file("a.py").unwrap().is_empty());
        assert!(store.file_record("a.py").unwrap().is_none());
    }

    #[test]
    fn create_index_conflicts_without_rebuild() {
        let store = store_with_model(3);
        store.create_index("test-model", 3, false).unwrap();

        let err = store.create_index("other", 5, false).unwrap_err();
        assert!(matches!(err, SeekError::ModelConflict { .. }));

        store
            .upsert_file("a.py", "fp", "python", &[(chunk("a.py", 0, "x"), vec![1.0, 0.0, 0.0])])
            .unwrap();
        store.create_index("other", 5, true).unwrap();
        let status = store.status().unwrap();
        assert_eq!(status.model_id.as_deref(), Some("other"));
        assert_eq!(status.dimensions, Some(5));
        assert_eq!(status.file_count, 0);
    }

    #[test]
    fn switch_model_drops_vectors() {
        let store = store_with_model(1);
        store
            .upsert_file("a.py", "fp", "python", &[(chunk("a.py", 0, "x"), vec![1.0])])
            .unwrap();
        store.switch_model("bigger", 4).unwrap();
        let status = store.status().unwrap();
        assert_eq!(status.chunk_count, 0);
        assert_eq!(status.model_id.as_deref(), Some("bigger"));
    }

    #[test]
    fn ensure_model_rejects_mismatch() {
        let store = store_with_model(384);
        let err = store.ensure_model("nomic-v1.5", 768).unwrap_err();
        match err {
            SeekError::DimensionMismatch {
                index_model,
                index_dims,
                query_model,
                query_dims,
            } => {
                assert_eq!(index_model, "test-model");
                assert_eq!(index_dims, 384);
                assert_eq!(query_model, "nomic-v1.5");
                assert_eq!(query_dims, 768);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Same width, different model is still rejected
        assert!(store.ensure_model("bge-small", 384).is_err());
    }

    #[test]
    fn vectors_found_by_text_hash() {
        let store = store_with_model(2);
        store
            .upsert_file("a.py", "fp", "python", &[(chunk("a.py", 0, "x"), vec![0.6, 0.8])])
            .unwrap();
        let found = store
            .vectors_for_text_hashes(&["hash-x".into(), "hash-missing".into()])
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["hash-x"], vec![0.6, 0.8]);
    }

    #[test]
    fn load_vectors_respects_scope() {
        let store = store_with_model(1);
        store
            .upsert_file("src/a.rs", "fp", "rust", &[(chunk("src/a.rs", 0, "a"), vec![1.0])])
            .unwrap();
        store
            .upsert_file("docs/b.md", "fp", "text", &[(chunk("docs/b.md", 0, "b"), vec![1.0])])
            .unwrap();

        assert_eq!(store.load_vectors(&[]).unwrap().len(), 2);
        let scoped = store.load_vectors(&["src".into()]).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].language, "rust");
    }

    #[test]
    fn verify_detects_orphans_and_bad_vectors() {
        let store = store_with_model(2);
        store
            .upsert_file("a.py", "fp", "python", &[(chunk("a.py", 0, "x"), vec![1.0, 0.0])])
            .unwrap();
        store.verify().unwrap();

        store.execute_raw("DELETE FROM files WHERE path = 'a.py'").unwrap();
        let err = store.verify().unwrap_err();
        assert!(matches!(err, SeekError::IndexCorruption(_)));

        let store = store_with_model(2);
        store
            .upsert_file("a.py", "fp", "python", &[(chunk("a.py", 0, "x"), vec![1.0, 0.0])])
            .unwrap();
        store.execute_raw("UPDATE chunks SET embedding = x'00000000'").unwrap();
        assert!(store.verify().unwrap_err().to_string().contains("vector"));
    }

    #[test]
    fn open_creates_and_clean_removes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!IndexStore::exists(dir.path()));
        {
            let store = IndexStore::open(dir.path()).unwrap();
            store.create_index("hash-384", 384, false).unwrap();
        }
        assert!(IndexStore::exists(dir.path()));
        assert!(IndexStore::clean(dir.path()).unwrap());
        assert!(!IndexStore::exists(dir.path()));
        assert!(!IndexStore::clean(dir.path()).unwrap());
    }

    #[test]
    fn garbage_database_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(IndexStore::index_dir(dir.path())).unwrap();
        std::fs::write(IndexStore::index_path(dir.path()), b"definitely not sqlite, just text padding it out").unwrap();
        let err = IndexStore::open(dir.path()).unwrap_err();
        assert!(matches!(err, SeekError::IndexCorruption(_)), "{err}");
    }

    #[test]
    fn floats_bytes_roundtrip() {
        let original = vec![1.0f32, -2.5, 0.0, 3.25];
        assert_eq!(bytes_to_floats(&floats_to_bytes(&original)), original);
    }

    #[test]
    fn cosine_similarity_correct() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
