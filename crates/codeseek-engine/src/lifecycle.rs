//! Index lifecycle: staleness detection, delta indexing, rebuilds.
//!
//! [`IndexManager`] drives the `Absent -> Building -> Ready`,
//! `Ready -> Updating -> Ready` and `Ready -> Rebuilding -> Ready`
//! transitions. Stale files are chunked and embedded by a bounded worker
//! pool and committed one file at a time; a cancelled run leaves every
//! uncommitted file stale for the next run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use codeseek_core::{
    ChunkingConfig, IndexState, IndexStatus, ModelSpec, SeekConfig, SeekError,
};
use codeseek_discover::{
    discover, discover_file, normalize_path, DiscoverOptions, DiscoveredFile,
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;

use crate::chunker::{chunk_file, Chunk, ChunkStrategy, ChunkerConfig};
use crate::embedding::{Embedder, EmbeddingGateway};
use crate::store::IndexStore;

/// Everything an operation needs to know about the repository and model.
///
/// Passed explicitly to the manager; there is no process-wide "current
/// index".
#[derive(Debug, Clone)]
pub struct EngineContext {
    /// Repository root.
    pub root: PathBuf,
    /// Active embedding model.
    pub model: ModelSpec,
    /// Chunk sizing before the model cap is applied.
    pub chunking: ChunkingConfig,
    /// Files processed concurrently.
    pub workers: usize,
    /// Texts per inference call.
    pub batch_size: usize,
    /// Vectors kept in the embedding cache.
    pub cache_capacity: u64,
    /// Walk settings used when indexing.
    pub discover: DiscoverOptions,
}

impl EngineContext {
    /// Context with default settings.
    pub fn new(root: impl Into<PathBuf>, model: ModelSpec) -> Self {
        Self::from_config(root, model, &SeekConfig::default())
    }

    /// Context using the settings in `config`.
    pub fn from_config(root: impl Into<PathBuf>, model: ModelSpec, config: &SeekConfig) -> Self {
        Self {
            root: root.into(),
            model,
            chunking: config.chunking.clone(),
            workers: config.index.workers.max(1),
            batch_size: config.embedding.batch_size.max(1),
            cache_capacity: config.embedding.cache_capacity.max(1),
            discover: DiscoverOptions::default(),
        }
    }

    /// Chunker settings capped by the active model's window.
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig::for_model(&self.model, &self.chunking)
    }
}

/// How much of the index to recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    /// Only new, modified and deleted files.
    Incremental,
    /// Discard the index and rebuild everything.
    Full,
}

/// Files whose stored state differs from the working tree.
#[derive(Debug, Default)]
pub struct StalePlan {
    /// Discovered but not indexed.
    pub added: Vec<DiscoveredFile>,
    /// Indexed with a different fingerprint.
    pub modified: Vec<DiscoveredFile>,
    /// Indexed but no longer discovered.
    pub removed: Vec<String>,
    /// Indexed and unchanged.
    pub unchanged: usize,
}

impl StalePlan {
    /// Number of files that need work.
    pub fn stale_count(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Whether the index already matches the working tree.
    pub fn is_empty(&self) -> bool {
        self.stale_count() == 0
    }
}

/// Outcome of an indexing run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    /// Files chunked, embedded and committed.
    pub files_indexed: usize,
    /// File records deleted.
    pub files_removed: usize,
    /// Files left untouched.
    pub files_unchanged: usize,
    /// Chunks written.
    pub chunks_written: usize,
    /// Vectors produced by the embedder.
    pub embeddings_computed: usize,
    /// Vectors served from the cache.
    pub cache_hits: usize,
    /// Files chunked with line windows after a parse failure.
    pub fallbacks: usize,
    /// Whether the run stopped early.
    pub cancelled: bool,
    /// Wall-clock time in milliseconds.
    pub elapsed_ms: u128,
}

/// Result of a single-file update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "outcome")]
pub enum FileUpdate {
    /// The file was (re)indexed.
    Indexed {
        /// Normalized path.
        path: String,
        /// Chunks written.
        chunks: usize,
    },
    /// The stored fingerprint already matched.
    Unchanged {
        /// Normalized path.
        path: String,
    },
    /// The file is gone (or no longer indexable) and was dropped.
    Removed {
        /// Normalized path.
        path: String,
    },
    /// The file is neither indexable nor indexed.
    Skipped {
        /// Normalized path.
        path: String,
    },
}

/// Progress notifications emitted while indexing.
#[derive(Debug, Clone)]
pub enum IndexEvent {
    /// Staleness was computed.
    Planned {
        /// Files to chunk and embed.
        stale: usize,
        /// Files to drop.
        removed: usize,
    },
    /// A file was committed.
    FileIndexed {
        /// Normalized path.
        path: String,
        /// Chunks written.
        chunks: usize,
    },
    /// A file record was deleted.
    FileRemoved {
        /// Normalized path.
        path: String,
    },
}

/// Callback receiving [`IndexEvent`]s.
pub type ProgressCallback = Arc<dyn Fn(&IndexEvent) + Send + Sync>;

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Per-path async locks. An entry lives only while a task holds or waits
/// on it.
#[derive(Clone, Default)]
struct PathLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl PathLocks {
    async fn acquire(&self, path: &str) -> PathGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            map.entry(path.to_string()).or_default().clone()
        };
        PathGuard {
            guard: Some(lock.lock_owned().await),
            locks: self.clone(),
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

struct PathGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: PathLocks,
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.inner.lock().unwrap_or_else(|p| p.into_inner());
        // Only the map's own handle left: nobody holds or waits on the lock
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

struct PreparedFile {
    file: DiscoveredFile,
    chunks: Vec<(Chunk, Vec<f32>)>,
    fallback: bool,
    _guard: PathGuard,
}

/// Owns the index of one repository and keeps it in sync with the tree.
pub struct IndexManager {
    ctx: EngineContext,
    store: Mutex<Option<Arc<IndexStore>>>,
    gateway: Arc<EmbeddingGateway>,
    state: Mutex<IndexState>,
    build_lock: tokio::sync::Mutex<()>,
    path_locks: PathLocks,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("root", &self.ctx.root)
            .field("model", &self.ctx.model.id)
            .finish_non_exhaustive()
    }
}

fn check_embedder(model: &ModelSpec, embedder: &dyn Embedder) -> Result<(), SeekError> {
    if embedder.model_id() != model.id || embedder.dimensions() != model.dimensions {
        return Err(SeekError::Config(format!(
            "embedder '{}' ({} dims) does not serve model '{}' ({} dims)",
            embedder.model_id(),
            embedder.dimensions(),
            model.id,
            model.dimensions
        )));
    }
    Ok(())
}

impl IndexManager {
    /// Attach to the repository in `ctx`, opening its index if one exists.
    ///
    /// # Errors
    ///
    /// - [`SeekError::Config`] if `embedder` does not serve `ctx.model`.
    /// - [`SeekError::IndexCorruption`] if an existing index is unreadable.
    pub fn open(ctx: EngineContext, embedder: Arc<dyn Embedder>) -> Result<Self, SeekError> {
        check_embedder(&ctx.model, embedder.as_ref())?;

        let (store, state) = if IndexStore::exists(&ctx.root) {
            let store = IndexStore::open(&ctx.root)?;
            let state = if store.model()?.is_some() {
                IndexState::Ready
            } else {
                IndexState::Absent
            };
            (Some(Arc::new(store)), state)
        } else {
            (None, IndexState::Absent)
        };

        Ok(Self {
            gateway: Arc::new(EmbeddingGateway::with_capacity(
                embedder,
                ctx.batch_size,
                ctx.cache_capacity,
            )),
            ctx,
            store: Mutex::new(store),
            state: Mutex::new(state),
            build_lock: tokio::sync::Mutex::new(()),
            path_locks: PathLocks::default(),
            progress: None,
        })
    }

    /// Report progress through `callback`.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Context this manager operates on.
    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Gateway used for document and query embeddings.
    pub fn gateway(&self) -> &Arc<EmbeddingGateway> {
        &self.gateway
    }

    /// Current lifecycle state.
    pub fn state(&self) -> IndexState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: IndexState) {
        let mut current = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *current != state {
            tracing::debug!(from = %*current, to = %state, "index state changed");
            *current = state;
        }
    }

    /// The open index, if one exists.
    pub fn store(&self) -> Option<Arc<IndexStore>> {
        self.store.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn open_or_create_store(&self) -> Result<Arc<IndexStore>, SeekError> {
        let mut slot = self.store.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(store) = slot.as_ref() {
            return Ok(store.clone());
        }
        let store = Arc::new(IndexStore::open(&self.ctx.root)?);
        *slot = Some(store.clone());
        Ok(store)
    }

    fn emit(&self, event: IndexEvent) {
        if let Some(progress) = &self.progress {
            progress(&event);
        }
    }

    /// Compare discovered files against the stored fingerprints.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Database`] if the stored records cannot be read.
    pub fn plan(&self, files: Vec<DiscoveredFile>) -> Result<StalePlan, SeekError> {
        let mut stored = match self.store() {
            Some(store) => store.file_fingerprints()?,
            None => HashMap::new(),
        };

        let mut plan = StalePlan::default();
        for file in files {
            match stored.remove(&file.path) {
                None => plan.added.push(file),
                Some(fp) if fp != file.fingerprint => plan.modified.push(file),
                Some(_) => plan.unchanged += 1,
            }
        }
        plan.removed = stored.into_keys().collect();
        plan.removed.sort();
        Ok(plan)
    }

    /// Bring the index up to date with the working tree.
    ///
    /// `Incremental` processes only stale files; `Full` discards the index
    /// first. Each file is committed on its own; when `cancel` fires the run
    /// stops between commits and reports `cancelled`.
    ///
    /// # Errors
    ///
    /// - [`SeekError::ModelConflict`] if the index belongs to another model
    ///   and the mode is `Incremental`.
    /// - [`SeekError::ModelUnavailable`] / [`SeekError::Embedding`] if the
    ///   inference capability fails; files committed before that stay valid.
    pub async fn index(
        &self,
        mode: IndexMode,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, SeekError> {
        let _build = self.build_lock.lock().await;
        let result = self.run_index(mode, cancel).await;
        self.settle_state();
        result
    }

    async fn run_index(
        &self,
        mode: IndexMode,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, SeekError> {
        let started = Instant::now();
        let model = &self.ctx.model;

        let store = match (mode, self.store()) {
            (IndexMode::Full, existing) => {
                self.set_state(if existing.is_some() {
                    IndexState::Rebuilding
                } else {
                    IndexState::Building
                });
                self.discard_store()?;
                let store = self.open_or_create_store()?;
                store.create_index(&model.id, model.dimensions, true)?;
                store
            }
            (IndexMode::Incremental, Some(store)) if store.model()?.is_some() => {
                store.create_index(&model.id, model.dimensions, false)?;
                self.set_state(IndexState::Updating);
                store
            }
            (IndexMode::Incremental, _) => {
                self.set_state(IndexState::Building);
                let store = self.open_or_create_store()?;
                store.create_index(&model.id, model.dimensions, false)?;
                store
            }
        };

        let files = discover(&self.ctx.root, &self.index_discover_options())?;
        let plan = self.plan(files)?;
        tracing::info!(
            added = plan.added.len(),
            modified = plan.modified.len(),
            removed = plan.removed.len(),
            unchanged = plan.unchanged,
            "planned index update"
        );
        self.emit(IndexEvent::Planned {
            stale: plan.added.len() + plan.modified.len(),
            removed: plan.removed.len(),
        });

        let before = self.gateway.stats();
        let mut report = IndexReport {
            files_unchanged: plan.unchanged,
            ..IndexReport::default()
        };

        for path in &plan.removed {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let _guard = self.path_locks.acquire(path).await;
            if store.remove_file(path)? {
                report.files_removed += 1;
                self.emit(IndexEvent::FileRemoved { path: path.clone() });
            }
        }

        if !report.cancelled {
            let stale: Vec<DiscoveredFile> =
                plan.added.into_iter().chain(plan.modified).collect();
            let store_ref: &IndexStore = &store;
            let mut pending = stream::iter(stale)
                .map(|file| async move {
                    let guard = self.path_locks.acquire(&file.path).await;
                    self.prepare_file(file, store_ref, guard).await
                })
                .buffer_unordered(self.ctx.workers);

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    next = pending.next() => next,
                };
                let Some(prepared) = next else { break };
                let prepared = prepared?;
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                let chunks = self.commit(&store, &prepared)?;
                report.files_indexed += 1;
                report.chunks_written += chunks;
                if prepared.fallback {
                    report.fallbacks += 1;
                }
            }
        }

        let after = self.gateway.stats();
        report.embeddings_computed = after.computed - before.computed;
        report.cache_hits = after.cache_hits - before.cache_hits;
        report.elapsed_ms = started.elapsed().as_millis();

        if report.cancelled {
            tracing::warn!(
                committed = report.files_indexed,
                "indexing cancelled; remaining files stay stale"
            );
        } else {
            tracing::info!(
                indexed = report.files_indexed,
                removed = report.files_removed,
                chunks = report.chunks_written,
                "index up to date"
            );
        }
        Ok(report)
    }

    fn index_discover_options(&self) -> DiscoverOptions {
        DiscoverOptions {
            scope: Vec::new(),
            ..self.ctx.discover.clone()
        }
    }

    async fn prepare_file(
        &self,
        file: DiscoveredFile,
        store: &IndexStore,
        guard: PathGuard,
    ) -> Result<PreparedFile, SeekError> {
        let config = self.ctx.chunker_config();
        let (file, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = chunk_file(&file.path, &file.content, file.language, &config);
            (file, outcome)
        })
        .await
        .map_err(|e| SeekError::Parse(format!("chunking task failed: {e}")))?;

        let hashes: Vec<String> = outcome.chunks.iter().map(|c| c.text_hash.clone()).collect();
        let known = store.vectors_for_text_hashes(&hashes)?;
        self.gateway.prime(&self.ctx.model.id, known);

        let texts: Vec<String> = outcome.chunks.iter().map(Chunk::embedding_text).collect();
        let vectors = self
            .gateway
            .embed(&texts, &self.ctx.model.id)
            .await
            .map_err(|e| match e {
                SeekError::Embedding(msg) => SeekError::Embedding(format!("{}: {msg}", file.path)),
                other => other,
            })?;

        Ok(PreparedFile {
            fallback: outcome.fallback_reason.is_some() && outcome.strategy == ChunkStrategy::Window,
            chunks: outcome.chunks.into_iter().zip(vectors).collect(),
            file,
            _guard: guard,
        })
    }

    fn commit(&self, store: &IndexStore, prepared: &PreparedFile) -> Result<usize, SeekError> {
        let file = &prepared.file;
        store.upsert_file(
            &file.path,
            &file.fingerprint,
            file.language.name(),
            &prepared.chunks,
        )?;
        self.emit(IndexEvent::FileIndexed {
            path: file.path.clone(),
            chunks: prepared.chunks.len(),
        });
        Ok(prepared.chunks.len())
    }

    /// Add, refresh or drop a single file.
    ///
    /// `path` may be absolute (inside the root) or relative to the root.
    /// The file goes through the same ignore, hidden-file and index
    /// directory filters as a full walk; a filtered file that was indexed
    /// before is removed. The path stays locked from read to commit.
    ///
    /// # Errors
    ///
    /// Same as [`IndexManager::index`].
    pub async fn update_file(&self, path: &Path) -> Result<FileUpdate, SeekError> {
        let relative = path.strip_prefix(&self.ctx.root).unwrap_or(path);
        let normalized = normalize_path(relative);
        let model = &self.ctx.model;

        let store = self.open_or_create_store()?;
        store.create_index(&model.id, model.dimensions, false)?;

        let guard = self.path_locks.acquire(&normalized).await;
        let options = self.index_discover_options();
        let update = match discover_file(&self.ctx.root, Path::new(&normalized), &options)? {
            Some(file) => {
                let stored = store.file_record(&file.path)?;
                if stored.is_some_and(|r| r.fingerprint == file.fingerprint) {
                    FileUpdate::Unchanged { path: normalized }
                } else {
                    let prepared = self.prepare_file(file, &store, guard).await?;
                    let chunks = self.commit(&store, &prepared)?;
                    FileUpdate::Indexed {
                        path: normalized,
                        chunks,
                    }
                }
            }
            None => {
                if store.remove_file(&normalized)? {
                    self.emit(IndexEvent::FileRemoved {
                        path: normalized.clone(),
                    });
                    FileUpdate::Removed { path: normalized }
                } else {
                    FileUpdate::Skipped { path: normalized }
                }
            }
        };

        self.settle_state();
        tracing::debug!(?update, "single-file update");
        Ok(update)
    }

    /// Re-tag the index for another model and rebuild every file with it.
    ///
    /// # Errors
    ///
    /// - [`SeekError::Config`] if `embedder` does not serve `model`.
    /// - Any error of [`IndexManager::index`].
    pub async fn switch_model(
        &mut self,
        model: ModelSpec,
        embedder: Arc<dyn Embedder>,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, SeekError> {
        check_embedder(&model, embedder.as_ref())?;

        if let Some(store) = self.store() {
            self.set_state(IndexState::Rebuilding);
            store.switch_model(&model.id, model.dimensions)?;
        }
        self.gateway = Arc::new(EmbeddingGateway::with_capacity(
            embedder,
            self.ctx.batch_size,
            self.ctx.cache_capacity,
        ));
        self.ctx.model = model;

        self.index(IndexMode::Incremental, cancel).await
    }

    /// Delete the persisted index. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Io`] if the directory cannot be removed.
    pub async fn clean(&self) -> Result<bool, SeekError> {
        let _build = self.build_lock.lock().await;
        let removed = self.discard_store()?;
        self.set_state(IndexState::Absent);
        Ok(removed)
    }

    fn discard_store(&self) -> Result<bool, SeekError> {
        self.store.lock().unwrap_or_else(|p| p.into_inner()).take();
        IndexStore::clean(&self.ctx.root)
    }

    /// Summary of the index with the current lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`SeekError::Database`] on query failure.
    pub fn status(&self) -> Result<IndexStatus, SeekError> {
        match self.store() {
            Some(store) => {
                let mut status = store.status()?;
                status.state = self.state();
                Ok(status)
            }
            None => Ok(IndexStatus::absent()),
        }
    }

    /// Make the index usable for a semantic query.
    ///
    /// Builds the index on first use and refreshes stale files otherwise.
    /// An index built with another model is rejected before any work.
    ///
    /// # Errors
    ///
    /// - [`SeekError::DimensionMismatch`] if the index belongs to another model.
    /// - Any error of [`IndexManager::index`].
    pub async fn ensure_ready(&self, cancel: &CancellationToken) -> Result<IndexReport, SeekError> {
        if let Some(store) = self.store() {
            store.ensure_model(&self.ctx.model.id, self.ctx.model.dimensions)?;
        }
        self.index(IndexMode::Incremental, cancel).await
    }

    fn settle_state(&self) {
        let ready = self
            .store()
            .and_then(|store| store.model().ok().flatten())
            .is_some();
        self.set_state(if ready {
            IndexState::Ready
        } else {
            IndexState::Absent
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use codeseek_core::ModelRegistry;

    fn manager(root: &Path) -> IndexManager {
        let model = ModelRegistry::default().resolve(Some("hash-256")).unwrap();
        let embedder = Arc::new(HashEmbedder::new(&model.id, model.dimensions));
        IndexManager::open(EngineContext::new(root, model), embedder).unwrap()
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn open_rejects_mismatched_embedder() {
        let dir = tempfile::tempdir().unwrap();
        let model = ModelRegistry::default().resolve(Some("hash-384")).unwrap();
        let embedder = Arc::new(HashEmbedder::new("hash-256", 256));
        let err = IndexManager::open(EngineContext::new(dir.path(), model), embedder).unwrap_err();
        assert!(matches!(err, SeekError::Config(_)));
    }

    #[tokio::test]
    async fn plan_classifies_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.py", "def keep():\n    return 'unchanged value'\n");
        write(dir.path(), "edit.py", "def edit():\n    return 'first version here'\n");
        write(dir.path(), "gone.py", "def gone():\n    return 'soon to be deleted'\n");

        let manager = manager(dir.path());
        manager
            .index(IndexMode::Incremental, &CancellationToken::new())
            .await
            .unwrap();

        write(dir.path(), "edit.py", "def edit():\n    return 'second version here'\n");
        write(dir.path(), "new.py", "def new():\n    return 'brand new file here'\n");
        std::fs::remove_file(dir.path().join("gone.py")).unwrap();

        let files = discover(dir.path(), &DiscoverOptions::default()).unwrap();
        let plan = manager.plan(files).unwrap();
        assert_eq!(plan.added.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(), vec!["new.py"]);
        assert_eq!(plan.modified.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(), vec!["edit.py"]);
        assert_eq!(plan.removed, vec!["gone.py".to_string()]);
        assert_eq!(plan.unchanged, 1);
        assert_eq!(plan.stale_count(), 3);
    }

    #[tokio::test]
    async fn states_follow_the_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "def a():\n    return 'some content here'\n");

        let manager = manager(dir.path());
        assert_eq!(manager.state(), IndexState::Absent);
        assert_eq!(manager.status().unwrap().state, IndexState::Absent);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let manager = {
            let seen = seen.clone();
            manager.with_progress(Arc::new(move |event: &IndexEvent| {
                seen.lock().unwrap().push(format!("{event:?}"));
            }))
        };

        let report = manager
            .index(IndexMode::Incremental, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.files_indexed, 1);
        assert_eq!(manager.state(), IndexState::Ready);
        assert!(seen.lock().unwrap().iter().any(|e| e.contains("FileIndexed")));

        assert!(manager.clean().await.unwrap());
        assert_eq!(manager.state(), IndexState::Absent);
        assert!(!IndexStore::exists(dir.path()));
    }

    #[tokio::test]
    async fn update_file_handles_add_change_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        write(dir.path(), "lib.rs", "pub fn answer() -> u32 {\n    42\n}\n");
        let update = manager.update_file(Path::new("lib.rs")).await.unwrap();
        assert!(matches!(update, FileUpdate::Indexed { chunks: 1, .. }));

        let again = manager.update_file(&dir.path().join("lib.rs")).await.unwrap();
        assert_eq!(again, FileUpdate::Unchanged { path: "lib.rs".into() });

        std::fs::remove_file(dir.path().join("lib.rs")).unwrap();
        let removed = manager.update_file(Path::new("lib.rs")).await.unwrap();
        assert_eq!(removed, FileUpdate::Removed { path: "lib.rs".into() });

        let skipped = manager.update_file(Path::new("missing.rs")).await.unwrap();
        assert_eq!(skipped, FileUpdate::Skipped { path: "missing.rs".into() });
    }

    #[tokio::test]
    async fn path_locks_are_released_after_commit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..8 {
            write(
                dir.path(),
                &format!("src/m{i}.py"),
                &format!("def f{i}():\n    return 'module number {i}'\n"),
            );
        }
        let manager = manager(dir.path());
        manager
            .index(IndexMode::Incremental, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(manager.path_locks.len(), 0);

        write(dir.path(), "src/m0.py", "def f0():\n    return 'edited module'\n");
        manager.update_file(Path::new("src/m0.py")).await.unwrap();
        manager.update_file(Path::new("src/absent.py")).await.unwrap();
        assert_eq!(manager.path_locks.len(), 0);
    }

    #[tokio::test]
    async fn waiting_task_keeps_the_lock_entry() {
        let locks = PathLocks::default();
        let first = locks.acquire("a.rs").await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire("a.rs").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(locks.len(), 1);

        drop(first);
        let second = waiter.await.unwrap();
        assert_eq!(locks.len(), 1);
        drop(second);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn update_file_honours_ignore_rules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        write(dir.path(), "build/gen.rs", "pub fn generated() -> u32 {\n    7\n}\n");
        write(dir.path(), ".codeseek/notes.md", "# not content\n");
        write(dir.path(), ".hidden.rs", "pub fn hidden() {}\n");

        let manager = manager(dir.path());
        let indexed = manager.update_file(Path::new("build/gen.rs")).await.unwrap();
        assert!(matches!(indexed, FileUpdate::Indexed { .. }));

        write(dir.path(), ".gitignore", "build/\n");
        let dropped = manager.update_file(Path::new("build/gen.rs")).await.unwrap();
        assert_eq!(dropped, FileUpdate::Removed { path: "build/gen.rs".into() });

        for path in ["build/gen.rs", ".codeseek/notes.md", ".hidden.rs"] {
            let update = manager.update_file(Path::new(path)).await.unwrap();
            assert_eq!(update, FileUpdate::Skipped { path: path.into() });
        }

        let store = manager.store().unwrap();
        assert!(store.file_fingerprints().unwrap().is_empty());
    }

    #[tokio::test]
    async fn incremental_with_other_model_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "def a():\n    return 'some content here'\n");
        manager(dir.path())
            .index(IndexMode::Incremental, &CancellationToken::new())
            .await
            .unwrap();

        let model = ModelRegistry::default().resolve(Some("hash-384")).unwrap();
        let embedder = Arc::new(HashEmbedder::new(&model.id, model.dimensions));
        let other = IndexManager::open(EngineContext::new(dir.path(), model), embedder).unwrap();

        let err = other
            .index(IndexMode::Incremental, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SeekError::ModelConflict { .. }));

        let err = other.ensure_ready(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SeekError::DimensionMismatch { .. }));

        // An explicit full rebuild adopts the new model
        other
            .index(IndexMode::Full, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(other.status().unwrap().model_id.as_deref(), Some("hash-384"));
    }
}
