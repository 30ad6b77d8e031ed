//! Integration tests: discover → chunk → embed → persist on a scratch repo.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use codeseek_core::{IndexState, ModelRegistry, SeekError};
use codeseek_discover::{discover, DiscoverOptions};
use codeseek_engine::embedding::{Embedder, HashEmbedder};
use codeseek_engine::lifecycle::{EngineContext, FileUpdate, IndexManager, IndexMode};
use codeseek_engine::store::{IndexStore, VectorRow};
use tokio_util::sync::CancellationToken;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn manager_for(root: &Path, alias: &str) -> IndexManager {
    let model = ModelRegistry::default().resolve(Some(alias)).unwrap();
    let embedder = Arc::new(HashEmbedder::new(&model.id, model.dimensions));
    IndexManager::open(EngineContext::new(root, model), embedder).unwrap()
}

fn sample_repo(root: &Path) {
    write(
        root,
        "src/config.py",
        "import os\n\n\ndef load_config(path):\n    with open(path) as fh:\n        return fh.read()\n\n\ndef config_dir():\n    return os.path.expanduser('~/.config')\n",
    );
    write(
        root,
        "src/auth.rs",
        "pub struct Session {\n    pub user: String,\n}\n\nimpl Session {\n    pub fn is_admin(&self) -> bool {\n        self.user == \"root\"\n    }\n}\n\npub fn verify_token(token: &str) -> bool {\n    token.len() == 32\n}\n",
    );
    write(
        root,
        "web/app.js",
        "function renderHeader(title) {\n  return `<h1>${title}</h1>`;\n}\n\nfunction renderFooter() {\n  return '<footer></footer>';\n}\n",
    );
    write(root, "README.md", "# Sample\n\nA tiny repository used by the tests.\n");
}

fn snapshot(store: &IndexStore) -> Vec<(String, Vec<f32>)> {
    store
        .load_vectors(&[])
        .unwrap()
        .into_iter()
        .map(|VectorRow { chunk, vector, .. }| (serde_json::to_string(&chunk).unwrap(), vector))
        .collect()
}

#[tokio::test]
async fn reindexing_unchanged_tree_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let manager = manager_for(dir.path(), "hash-384");
    let cancel = CancellationToken::new();

    let first = manager.index(IndexMode::Incremental, &cancel).await.unwrap();
    assert_eq!(first.files_indexed, 4);
    assert!(first.chunks_written >= 4);
    assert!(!first.cancelled);
    let before = snapshot(&manager.store().unwrap());
    let status_before = manager.status().unwrap();

    let second = manager.index(IndexMode::Incremental, &cancel).await.unwrap();
    assert_eq!(second.files_indexed, 0);
    assert_eq!(second.files_removed, 0);
    assert_eq!(second.files_unchanged, 4);
    assert_eq!(second.embeddings_computed, 0);

    let after = snapshot(&manager.store().unwrap());
    assert_eq!(before, after);
    assert_eq!(status_before.last_update, manager.status().unwrap().last_update);
}

#[tokio::test]
async fn full_rebuild_reproduces_identical_index() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let manager = manager_for(dir.path(), "hash-384");
    let cancel = CancellationToken::new();

    manager.index(IndexMode::Incremental, &cancel).await.unwrap();
    let before = snapshot(&manager.store().unwrap());

    let rebuilt = manager.index(IndexMode::Full, &cancel).await.unwrap();
    assert_eq!(rebuilt.files_indexed, 4);
    assert_eq!(manager.state(), IndexState::Ready);
    assert_eq!(before, snapshot(&manager.store().unwrap()));
}

#[tokio::test]
async fn separate_indexes_of_the_same_tree_match() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    sample_repo(first.path());
    sample_repo(second.path());
    let cancel = CancellationToken::new();

    let a = manager_for(first.path(), "hash-256");
    let b = manager_for(second.path(), "hash-256");
    a.index(IndexMode::Incremental, &cancel).await.unwrap();
    b.index(IndexMode::Incremental, &cancel).await.unwrap();

    assert_eq!(snapshot(&a.store().unwrap()), snapshot(&b.store().unwrap()));
}

#[tokio::test]
async fn only_modified_files_are_reindexed() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", "def alpha():\n    return 'first file'\n");
    write(dir.path(), "b.py", "def beta():\n    return 'second file'\n");
    let manager = manager_for(dir.path(), "hash-384");
    let cancel = CancellationToken::new();

    manager.index(IndexMode::Incremental, &cancel).await.unwrap();
    let store = manager.store().unwrap();
    let a_before = store.file_record("a.py").unwrap().unwrap();
    let b_before = store.file_record("b.py").unwrap().unwrap();
    let updated_before = manager.status().unwrap().last_update;

    tokio::time::sleep(Duration::from_millis(20)).await;
    write(dir.path(), "b.py", "def beta():\n    return 'second file, edited'\n");

    let report = manager.index(IndexMode::Incremental, &cancel).await.unwrap();
    assert_eq!(report.files_indexed, 1);
    assert_eq!(report.files_unchanged, 1);

    let store = manager.store().unwrap();
    let a_after = store.file_record("a.py").unwrap().unwrap();
    let b_after = store.file_record("b.py").unwrap().unwrap();
    assert_eq!(a_before, a_after);
    assert_ne!(b_before.fingerprint, b_after.fingerprint);
    assert!(b_after.indexed_at > b_before.indexed_at);
    assert_ne!(b_before.chunk_ids, b_after.chunk_ids);
    assert!(manager.status().unwrap().last_update > updated_before);
}

#[tokio::test]
async fn deleted_files_leave_the_index() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let manager = manager_for(dir.path(), "hash-384");
    let cancel = CancellationToken::new();
    manager.index(IndexMode::Incremental, &cancel).await.unwrap();

    std::fs::remove_file(dir.path().join("web/app.js")).unwrap();
    let report = manager.index(IndexMode::Incremental, &cancel).await.unwrap();
    assert_eq!(report.files_removed, 1);

    let store = manager.store().unwrap();
    assert!(store.file_record("web/app.js").unwrap().is_none());
    assert!(store.chunks_for_file("web/app.js").unwrap().is_empty());
    assert_eq!(manager.status().unwrap().file_count, 3);
    store.verify().unwrap();
}

/// Hash embedder that goes down on any text containing `marker`.
struct FailingEmbedder {
    inner: HashEmbedder,
    marker: &'static str,
}

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SeekError> {
        if texts.iter().any(|t| t.contains(self.marker)) {
            return Err(SeekError::ModelUnavailable {
                model: self.model_id().to_string(),
                reason: "inference server went away".into(),
            });
        }
        self.inner.embed(texts).await
    }
}

#[tokio::test]
async fn failed_embedding_keeps_earlier_commits() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "a.py", "def alpha():\n    return 'first file'\n");
    write(root, "b.py", "def beta():\n    return 'second file'\n");
    write(root, "c.py", "def gamma():\n    return 'UNEMBEDDABLE third file'\n");
    write(root, "d.py", "def delta():\n    return 'fourth file'\n");

    let model = ModelRegistry::default().resolve(Some("hash-384")).unwrap();
    let embedder = Arc::new(FailingEmbedder {
        inner: HashEmbedder::new(&model.id, model.dimensions),
        marker: "UNEMBEDDABLE",
    });
    let mut ctx = EngineContext::new(root, model);
    ctx.workers = 1;
    let manager = IndexManager::open(ctx, embedder).unwrap();

    let err = manager
        .index(IndexMode::Incremental, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SeekError::ModelUnavailable { .. }), "{err}");
    assert_eq!(manager.state(), IndexState::Ready);

    let store = manager.store().unwrap();
    store.verify().unwrap();

    let files = discover(root, &DiscoverOptions::default()).unwrap();
    let stored = store.file_fingerprints().unwrap();
    for file in files.iter().filter(|f| f.path == "a.py" || f.path == "b.py") {
        assert_eq!(stored.get(&file.path), Some(&file.fingerprint), "{}", file.path);
    }
    assert!(!stored.contains_key("c.py"));

    let plan = manager.plan(files).unwrap();
    assert!(plan.stale_count() > 0);
    assert!(plan.added.iter().any(|f| f.path == "c.py"));
    assert!(plan.removed.is_empty());
}

#[tokio::test]
async fn concurrent_updates_of_one_file_agree() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let manager = manager_for(dir.path(), "hash-384");
    let absolute = dir.path().join("src/auth.rs");

    for round in 0..2 {
        if round == 1 {
            write(dir.path(), "src/auth.rs", "pub fn verify_token(token: &str) -> bool {\n    !token.is_empty()\n}\n");
        }

        let (first, second) = tokio::join!(
            manager.update_file(Path::new("src/auth.rs")),
            manager.update_file(&absolute),
        );
        let outcomes = [first.unwrap(), second.unwrap()];
        let indexed: Vec<usize> = outcomes
            .iter()
            .filter_map(|u| match u {
                FileUpdate::Indexed { chunks, .. } => Some(*chunks),
                _ => None,
            })
            .collect();
        assert_eq!(indexed.len(), 1, "round {round}: {outcomes:?}");
        assert!(outcomes.contains(&FileUpdate::Unchanged { path: "src/auth.rs".into() }));

        let store = manager.store().unwrap();
        store.verify().unwrap();
        let record = store.file_record("src/auth.rs").unwrap().unwrap();
        let on_disk = discover(dir.path(), &DiscoverOptions::default())
            .unwrap()
            .into_iter()
            .find(|f| f.path == "src/auth.rs")
            .unwrap();
        assert_eq!(record.fingerprint, on_disk.fingerprint);
        assert_eq!(record.chunk_ids.len(), indexed[0]);
    }
}

#[tokio::test]
async fn cancelled_run_leaves_files_stale() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let manager = manager_for(dir.path(), "hash-384");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = manager.index(IndexMode::Incremental, &cancel).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.files_indexed, 0);

    let files = discover(dir.path(), &DiscoverOptions::default()).unwrap();
    let plan = manager.plan(files).unwrap();
    assert_eq!(plan.stale_count(), 4);

    // A later run picks up everything that was left behind
    let resumed = manager
        .index(IndexMode::Incremental, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resumed.files_indexed, 4);
    manager.store().unwrap().verify().unwrap();
}

#[tokio::test]
async fn switching_models_rebuilds_under_the_new_model() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let mut manager = manager_for(dir.path(), "hash-384");
    let cancel = CancellationToken::new();
    manager.index(IndexMode::Incremental, &cancel).await.unwrap();

    let model = ModelRegistry::default().resolve(Some("hash-256")).unwrap();
    let embedder = Arc::new(HashEmbedder::new(&model.id, model.dimensions));
    let report = manager.switch_model(model, embedder, &cancel).await.unwrap();
    assert_eq!(report.files_indexed, 4);

    let status = manager.status().unwrap();
    assert_eq!(status.model_id.as_deref(), Some("hash-256"));
    assert_eq!(status.dimensions, Some(256));
    assert!(manager
        .store()
        .unwrap()
        .load_vectors(&[])
        .unwrap()
        .iter()
        .all(|row| row.vector.len() == 256));
}

#[tokio::test]
async fn clean_returns_to_absent() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let manager = manager_for(dir.path(), "hash-384");
    manager
        .index(IndexMode::Incremental, &CancellationToken::new())
        .await
        .unwrap();
    assert!(IndexStore::exists(dir.path()));

    assert!(manager.clean().await.unwrap());
    assert!(!IndexStore::exists(dir.path()));
    let status = manager.status().unwrap();
    assert_eq!(status.state, IndexState::Absent);
    assert_eq!(status.file_count, 0);

    // Cleaning twice is fine
    assert!(!manager.clean().await.unwrap());
}

#[test]
fn garbage_index_is_reported_as_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let index = IndexStore::index_path(dir.path());
    std::fs::create_dir_all(index.parent().unwrap()).unwrap();
    std::fs::write(&index, b"this is not a database, just some bytes on disk").unwrap();

    let model = ModelRegistry::default().resolve(None).unwrap();
    let embedder = Arc::new(HashEmbedder::new(&model.id, model.dimensions));
    let err = IndexManager::open(EngineContext::new(dir.path(), model), embedder).unwrap_err();
    assert!(matches!(err, SeekError::IndexCorruption(_)), "{err:?}");
    assert!(err.needs_rebuild());
}

#[tokio::test]
async fn index_directory_is_never_indexed() {
    let dir = tempfile::tempdir().unwrap();
    sample_repo(dir.path());
    let manager = manager_for(dir.path(), "hash-384");
    let cancel = CancellationToken::new();
    manager.index(IndexMode::Incremental, &cancel).await.unwrap();
    manager.index(IndexMode::Incremental, &cancel).await.unwrap();

    let fingerprints = manager.store().unwrap().file_fingerprints().unwrap();
    assert!(fingerprints.keys().all(|p| !p.starts_with(".codeseek")));
}
