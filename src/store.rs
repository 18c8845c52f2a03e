//! Persistent per-namespace vector stores.
//!
//! Each [`NamespaceStore`] owns one [`FlatIndex`] plus the list of sources
//! ingested into it, and mirrors both to disk:
//!
//! ```text
//! <data_dir>/<namespace>/
//!   index.bin   "DCVI" | version u32 | dim u32 | count u64 | count × dim f32 (LE)
//!   meta.json   { dim, next_row, chunks: [...], sources: [...] }
//! ```
//!
//! Both files are staged under temporary names and only renamed into place
//! once both are written. Ingestion holds a per-namespace async mutex
//! across add and persist; if persisting fails the in-memory add is rolled
//! back (and the disk rewritten if `index.bin` was already replaced), so a
//! batch is either fully stored or not stored at all.

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use docchat_core::embedding::{blob_to_vec, vec_to_blob};
use docchat_core::index::{FlatIndex, IndexSnapshot, VectorIndex};
use docchat_core::models::{IndexEntry, IndexedChunk};
use docchat_core::{Namespace, RagError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const MAGIC: &[u8; 4] = b"DCVI";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;
const INDEX_FILE: &str = "index.bin";
const META_FILE: &str = "meta.json";

/// A document registered in a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub added_at: DateTime<Utc>,
    pub chunks: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct MetaFile {
    dim: usize,
    next_row: u64,
    chunks: Vec<IndexedChunk>,
    #[serde(default)]
    sources: Vec<SourceRecord>,
}

/// Point-in-time summary of a namespace.
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceStatus {
    pub namespace: Namespace,
    pub chunks: usize,
    pub dimension: Option<usize>,
    pub files_present: bool,
    pub sources: Vec<SourceRecord>,
}

/// How [`NamespaceStore::ingest_with`] treats an already registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplicates {
    Keep,
    Skip,
}

struct PersistFailure {
    error: RagError,
    /// `index.bin` was replaced but `meta.json` was not.
    disk_changed: bool,
}

impl PersistFailure {
    fn untouched(error: RagError) -> Self {
        Self {
            error,
            disk_changed: false,
        }
    }
}

pub struct NamespaceStore {
    namespace: Namespace,
    dir: PathBuf,
    index: FlatIndex,
    sources: RwLock<Vec<SourceRecord>>,
    write_lock: Mutex<()>,
}

impl NamespaceStore {
    /// Open the store under `data_dir`, loading any persisted state.
    pub fn open(data_dir: &Path, namespace: Namespace) -> Result<Self> {
        let dir = data_dir.join(namespace.as_str());
        let (index, sources) = load(&dir)?;
        tracing::info!(
            namespace = %namespace,
            chunks = index.len(),
            sources = sources.len(),
            "opened namespace store"
        );
        Ok(Self {
            namespace,
            dir,
            index,
            sources: RwLock::new(sources),
            write_lock: Mutex::new(()),
        })
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Add a batch for one source and persist it, all or nothing.
    ///
    /// Returns the number of chunks stored.
    pub async fn ingest(&self, entries: Vec<IndexEntry>, source: SourceRecord) -> Result<usize> {
        self.ingest_with(entries, source, Duplicates::Keep).await
    }

    /// Like [`ingest`](Self::ingest), but with `Duplicates::Skip` a source
    /// already registered when the write lock is taken stores nothing and
    /// returns 0.
    pub async fn ingest_with(
        &self,
        entries: Vec<IndexEntry>,
        source: SourceRecord,
        duplicates: Duplicates,
    ) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        if duplicates == Duplicates::Skip && self.contains_source(&source.source_id) {
            tracing::debug!(namespace = %self.namespace, source = %source.source_id, "already indexed");
            return Ok(0);
        }

        let before = self.index.len();
        let added = self.index.add(entries)?.len();
        self.sources_mut().push(source);

        if let Err(failure) = self.persist_locked().await {
            self.index.truncate(before);
            self.sources_mut().pop();
            if failure.disk_changed {
                self.restore_locked().await;
            }
            tracing::error!(namespace = %self.namespace, error = %failure.error, "persist failed, batch rolled back");
            return Err(failure.error);
        }

        Ok(added)
    }

    pub fn contains_source(&self, source_id: &str) -> bool {
        self.sources().iter().any(|s| s.source_id == source_id)
    }

    pub fn status(&self) -> NamespaceStatus {
        NamespaceStatus {
            namespace: self.namespace,
            chunks: self.index.len(),
            dimension: self.index.dimension(),
            files_present: self.dir.join(INDEX_FILE).exists() && self.dir.join(META_FILE).exists(),
            sources: self.sources().clone(),
        }
    }

    /// Drop every entry and delete the namespace's files.
    ///
    /// An empty state is written first, so a failure part-way leaves either
    /// the old contents or an empty namespace on disk, never a mix.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let index_path = self.dir.join(INDEX_FILE);
        let meta_path = self.dir.join(META_FILE);
        if index_path.exists() || meta_path.exists() {
            if let Err(failure) = self.write_state(&IndexSnapshot::default(), &[]).await {
                if failure.disk_changed {
                    self.restore_locked().await;
                }
                return Err(failure.error);
            }
        }

        self.index.clear();
        self.sources_mut().clear();

        for path in [&index_path, &meta_path] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(persistence(path, e)),
            }
        }
        tracing::info!(namespace = %self.namespace, "namespace cleared");
        Ok(())
    }

    /// Write the current state to disk.
    pub async fn persist(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.persist_locked().await.map_err(|f| f.error)
    }

    async fn persist_locked(&self) -> std::result::Result<(), PersistFailure> {
        let snapshot = self.index.snapshot();
        let sources = self.sources().clone();
        self.write_state(&snapshot, &sources).await
    }

    /// Rewrite the in-memory state after a write that got half way.
    async fn restore_locked(&self) {
        match self.persist_locked().await {
            Ok(()) => tracing::info!(namespace = %self.namespace, "on-disk state restored"),
            Err(failure) => tracing::error!(
                namespace = %self.namespace,
                error = %failure.error,
                "could not restore on-disk state"
            ),
        }
    }

    /// Stage both files next to their targets, then rename them into place.
    ///
    /// Nothing on disk changes until both temporary files are written.
    async fn write_state(
        &self,
        snapshot: &IndexSnapshot,
        sources: &[SourceRecord],
    ) -> std::result::Result<(), PersistFailure> {
        let meta = MetaFile {
            dim: snapshot.dimension.unwrap_or(0),
            next_row: snapshot.chunks.len() as u64,
            chunks: snapshot.chunks.clone(),
            sources: sources.to_vec(),
        };
        let index_bytes = encode_index(snapshot).map_err(PersistFailure::untouched)?;
        let meta_bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|e| PersistFailure::untouched(RagError::from(e)))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| PersistFailure::untouched(persistence(&self.dir, e)))?;

        let index_path = self.dir.join(INDEX_FILE);
        let meta_path = self.dir.join(META_FILE);
        let index_tmp = index_path.with_extension("tmp");
        let meta_tmp = meta_path.with_extension("tmp");

        let staged = match write_file(&index_tmp, &index_bytes).await {
            Ok(()) => write_file(&meta_tmp, &meta_bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = staged {
            discard(&[index_tmp.as_path(), meta_tmp.as_path()]).await;
            return Err(PersistFailure::untouched(e));
        }

        if let Err(e) = tokio::fs::rename(&index_tmp, &index_path).await {
            discard(&[index_tmp.as_path(), meta_tmp.as_path()]).await;
            return Err(PersistFailure::untouched(persistence(&index_path, e)));
        }
        tokio::fs::rename(&meta_tmp, &meta_path)
            .await
            .map_err(|e| PersistFailure {
                error: persistence(&meta_path, e),
                disk_changed: true,
            })
    }

    fn sources(&self) -> RwLockReadGuard<'_, Vec<SourceRecord>> {
        self.sources.read().unwrap_or_else(|p| p.into_inner())
    }

    fn sources_mut(&self) -> RwLockWriteGuard<'_, Vec<SourceRecord>> {
        self.sources.write().unwrap_or_else(|p| p.into_inner())
    }
}

/// One store per namespace, opened under a shared data directory.
pub struct NamespaceSet {
    documents: NamespaceStore,
    web: NamespaceStore,
    confluence: NamespaceStore,
    octane: NamespaceStore,
}

impl NamespaceSet {
    pub fn open(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            documents: NamespaceStore::open(data_dir, Namespace::Documents)?,
            web: NamespaceStore::open(data_dir, Namespace::Web)?,
            confluence: NamespaceStore::open(data_dir, Namespace::Confluence)?,
            octane: NamespaceStore::open(data_dir, Namespace::Octane)?,
        })
    }

    pub fn get(&self, namespace: Namespace) -> &NamespaceStore {
        match namespace {
            Namespace::Documents => &self.documents,
            Namespace::Web => &self.web,
            Namespace::Confluence => &self.confluence,
            Namespace::Octane => &self.octane,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamespaceStore> {
        Namespace::ALL.into_iter().map(move |ns| self.get(ns))
    }
}

fn load(dir: &Path) -> Result<(FlatIndex, Vec<SourceRecord>)> {
    let index_path = dir.join(INDEX_FILE);
    let meta_path = dir.join(META_FILE);

    match (index_path.exists(), meta_path.exists()) {
        (false, false) => return Ok((FlatIndex::new(), Vec::new())),
        (true, true) => {}
        // A clear interrupted between the two deletes leaves one empty file.
        (true, false) if lone_index_is_empty(&index_path)? => {
            return Ok((FlatIndex::new(), Vec::new()))
        }
        (false, true) if lone_meta_is_empty(&meta_path)? => {
            return Ok((FlatIndex::new(), Vec::new()))
        }
        _ => {
            return Err(RagError::Persistence(format!(
                "{} holds only one of {} and {}",
                dir.display(),
                INDEX_FILE,
                META_FILE
            )))
        }
    }

    let bytes = std::fs::read(&index_path).map_err(|e| persistence(&index_path, e))?;
    let meta_raw = std::fs::read(&meta_path).map_err(|e| persistence(&meta_path, e))?;
    let meta: MetaFile = serde_json::from_slice(&meta_raw).map_err(|e| {
        RagError::Persistence(format!("invalid {}: {}", meta_path.display(), e))
    })?;

    let (dim, vectors) = decode_index(&bytes)?;
    if vectors.len() != meta.chunks.len() {
        return Err(RagError::Persistence(format!(
            "{} holds {} vectors but {} lists {} chunks",
            index_path.display(),
            vectors.len(),
            META_FILE,
            meta.chunks.len()
        )));
    }
    if meta.next_row < meta.chunks.len() as u64 {
        return Err(RagError::Persistence(format!(
            "{} next_row {} is behind its {} chunks",
            META_FILE,
            meta.next_row,
            meta.chunks.len()
        )));
    }
    if !vectors.is_empty() && meta.dim != dim {
        return Err(RagError::Persistence(format!(
            "dimension disagreement: index.bin says {}, meta.json says {}",
            dim, meta.dim
        )));
    }

    let index = FlatIndex::from_snapshot(IndexSnapshot {
        dimension: (!vectors.is_empty()).then_some(dim),
        vectors,
        chunks: meta.chunks,
    })?;
    Ok((index, meta.sources))
}

fn lone_index_is_empty(path: &Path) -> Result<bool> {
    let bytes = std::fs::read(path).map_err(|e| persistence(path, e))?;
    Ok(decode_index(&bytes)?.1.is_empty())
}

fn lone_meta_is_empty(path: &Path) -> Result<bool> {
    let raw = std::fs::read(path).map_err(|e| persistence(path, e))?;
    let meta: MetaFile = serde_json::from_slice(&raw)
        .map_err(|e| RagError::Persistence(format!("invalid {}: {}", path.display(), e)))?;
    Ok(meta.chunks.is_empty())
}

fn encode_index(snapshot: &IndexSnapshot) -> Result<Vec<u8>> {
    let dim = snapshot.dimension.unwrap_or(0);
    let dim32 = u32::try_from(dim)
        .map_err(|_| RagError::Persistence(format!("dimension {} too large", dim)))?;

    let mut out = Vec::with_capacity(HEADER_LEN + snapshot.vectors.len() * dim * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&dim32.to_le_bytes());
    out.extend_from_slice(&(snapshot.vectors.len() as u64).to_le_bytes());
    for v in &snapshot.vectors {
        out.extend_from_slice(&vec_to_blob(v));
    }
    Ok(out)
}

fn decode_index(bytes: &[u8]) -> Result<(usize, Vec<Vec<f32>>)> {
    if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
        return Err(RagError::Persistence("index.bin has a bad header".into()));
    }
    let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

    let version = word(4);
    if version != FORMAT_VERSION {
        return Err(RagError::Persistence(format!(
            "unsupported index.bin version {}",
            version
        )));
    }
    let dim = word(8) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let body = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| RagError::Persistence("index.bin header overflows".into()))?;
    if body.len() != expected {
        return Err(RagError::Persistence(format!(
            "index.bin body is {} bytes, header implies {}",
            body.len(),
            expected
        )));
    }
    if count > 0 && dim == 0 {
        return Err(RagError::Persistence("index.bin rows have zero dimension".into()));
    }

    let vectors = if count == 0 {
        Vec::new()
    } else {
        body.chunks_exact(dim * 4).map(blob_to_vec).collect()
    };
    Ok((dim, vectors))
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| persistence(path, e))
}

async fn discard(paths: &[&Path]) {
    for path in paths {
        let _ = tokio::fs::remove_file(path).await;
    }
}

fn persistence(path: &Path, err: std::io::Error) -> RagError {
    RagError::Persistence(format!("{}: {}", path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_core::models::ChunkMetadata;

    fn entry(text: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk_id: format!("id-{}", text),
            vector,
            metadata: ChunkMetadata {
                source_id: "notes.txt".into(),
                title: Some("Notes".into()),
                locator: None,
                ordinal: 0,
                text: text.into(),
            },
        }
    }

    fn record(id: &str, chunks: usize) -> SourceRecord {
        SourceRecord {
            source_id: id.into(),
            title: None,
            added_at: Utc::now(),
            chunks,
        }
    }

    #[tokio::test]
    async fn missing_directory_opens_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(tmp.path(), Namespace::Web).unwrap();
        assert!(store.index().is_empty());
        assert!(!store.status().files_present);
    }

    #[tokio::test]
    async fn persisted_state_reloads_identically() {
        let tmp = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(tmp.path(), Namespace::Documents).unwrap();
        store
            .ingest(
                vec![entry("alpha", vec![1.0, 0.0, 0.0]), entry("beta", vec![0.0, 1.0, 0.0])],
                record("notes.txt", 2),
            )
            .await
            .unwrap();

        let reopened = NamespaceStore::open(tmp.path(), Namespace::Documents).unwrap();
        let query = [0.9, 0.1, 0.0];
        assert_eq!(
            store.index().search(&query, 2).unwrap(),
            reopened.index().search(&query, 2).unwrap()
        );
        assert!(reopened.contains_source("notes.txt"));
        assert_eq!(reopened.status().dimension, Some(3));
    }

    #[tokio::test]
    async fn count_mismatch_is_persistence_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(tmp.path(), Namespace::Documents).unwrap();
        store
            .ingest(vec![entry("alpha", vec![1.0, 0.0])], record("notes.txt", 1))
            .await
            .unwrap();

        let meta_path = store.dir().join(META_FILE);
        let mut meta: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&meta_path).unwrap()).unwrap();
        meta["chunks"] = serde_json::json!([]);
        std::fs::write(&meta_path, serde_json::to_vec(&meta).unwrap()).unwrap();

        assert!(matches!(
            NamespaceStore::open(tmp.path(), Namespace::Documents),
            Err(RagError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn bad_magic_is_persistence_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("web");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(INDEX_FILE), b"NOPE0000000000000000").unwrap();
        std::fs::write(dir.join(META_FILE), br#"{"dim":0,"next_row":0,"chunks":[]}"#).unwrap();

        assert!(matches!(
            NamespaceStore::open(tmp.path(), Namespace::Web),
            Err(RagError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn failed_persist_rolls_back() {
        let tmp = tempfile::tempdir().unwrap();
        // A regular file where the namespace directory should be.
        std::fs::write(tmp.path().join("octane"), b"not a directory").unwrap();

        let store = NamespaceStore::open(tmp.path(), Namespace::Octane).unwrap();
        let result = store
            .ingest(vec![entry("alpha", vec![1.0, 0.0])], record("octane:1", 1))
            .await;

        assert!(matches!(result, Err(RagError::Persistence(_))));
        assert!(store.index().is_empty());
        assert!(!store.contains_source("octane:1"));
    }

    #[tokio::test]
    async fn dimension_mismatch_leaves_store_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(tmp.path(), Namespace::Documents).unwrap();
        store
            .ingest(vec![entry("alpha", vec![1.0, 0.0])], record("a", 1))
            .await
            .unwrap();

        let err = store
            .ingest(vec![entry("beta", vec![1.0, 0.0, 0.0])], record("b", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
        assert_eq!(store.index().len(), 1);
        assert!(!store.contains_source("b"));
    }

    #[tokio::test]
    async fn clear_removes_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(tmp.path(), Namespace::Confluence).unwrap();
        store
            .ingest(vec![entry("alpha", vec![1.0, 0.0])], record("page-1", 1))
            .await
            .unwrap();
        assert!(store.status().files_present);

        store.clear().await.unwrap();
        assert!(store.index().is_empty());
        assert!(!store.status().files_present);
        assert!(store.status().sources.is_empty());

        // Clearing twice is fine.
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn failed_meta_write_keeps_disk_consistent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(tmp.path(), Namespace::Documents).unwrap();
        store
            .ingest(vec![entry("alpha", vec![1.0, 0.0])], record("a", 1))
            .await
            .unwrap();

        // A directory in the way of the staged meta file.
        let blocker = store.dir().join("meta.tmp");
        std::fs::create_dir(&blocker).unwrap();

        let err = store
            .ingest(vec![entry("beta", vec![0.0, 1.0])], record("b", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Persistence(_)));
        assert_eq!(store.index().len(), 1);
        assert!(!store.dir().join("index.tmp").exists());

        let reopened = NamespaceStore::open(tmp.path(), Namespace::Documents).unwrap();
        assert_eq!(reopened.index().len(), 1);
        assert!(reopened.contains_source("a"));
        assert!(!reopened.contains_source("b"));

        std::fs::remove_dir(&blocker).unwrap();
        store
            .ingest(vec![entry("beta", vec![0.0, 1.0])], record("b", 1))
            .await
            .unwrap();
        let reopened = NamespaceStore::open(tmp.path(), Namespace::Documents).unwrap();
        assert_eq!(reopened.index().len(), 2);
    }

    #[tokio::test]
    async fn skip_duplicates_checks_under_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(tmp.path(), Namespace::Web).unwrap();

        let (first, second) = tokio::join!(
            store.ingest_with(
                vec![entry("alpha", vec![1.0, 0.0])],
                record("https://example.com/a", 1),
                Duplicates::Skip,
            ),
            store.ingest_with(
                vec![entry("alpha", vec![1.0, 0.0])],
                record("https://example.com/a", 1),
                Duplicates::Skip,
            ),
        );
        let mut added = [first.unwrap(), second.unwrap()];
        added.sort();
        assert_eq!(added, [0, 1]);
        assert_eq!(store.index().len(), 1);
        assert_eq!(store.status().sources.len(), 1);

        // Uploads keep duplicates.
        store
            .ingest(vec![entry("alpha", vec![1.0, 0.0])], record("https://example.com/a", 1))
            .await
            .unwrap();
        assert_eq!(store.index().len(), 2);
    }

    #[tokio::test]
    async fn lone_empty_file_opens_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("documents");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(META_FILE), br#"{"dim":0,"next_row":0,"chunks":[]}"#).unwrap();

        let store = NamespaceStore::open(tmp.path(), Namespace::Documents).unwrap();
        assert!(store.index().is_empty());
    }

    #[tokio::test]
    async fn lone_populated_file_is_persistence_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(tmp.path(), Namespace::Documents).unwrap();
        store
            .ingest(vec![entry("alpha", vec![1.0, 0.0])], record("a", 1))
            .await
            .unwrap();
        std::fs::remove_file(store.dir().join(META_FILE)).unwrap();

        assert!(matches!(
            NamespaceStore::open(tmp.path(), Namespace::Documents),
            Err(RagError::Persistence(_))
        ));
    }

    #[tokio::test]
    async fn failed_clear_keeps_data() {
        let tmp = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(tmp.path(), Namespace::Confluence).unwrap();
        store
            .ingest(vec![entry("alpha", vec![1.0, 0.0])], record("page-1", 1))
            .await
            .unwrap();

        let blocker = store.dir().join("index.tmp");
        std::fs::create_dir(&blocker).unwrap();
        assert!(store.clear().await.is_err());
        assert_eq!(store.index().len(), 1);

        let reopened = NamespaceStore::open(tmp.path(), Namespace::Confluence).unwrap();
        assert_eq!(reopened.index().len(), 1);
        assert!(reopened.contains_source("page-1"));
    }

    #[tokio::test]
    async fn persist_writes_an_openable_pair() {
        let tmp = tempfile::tempdir().unwrap();
        let store = NamespaceStore::open(tmp.path(), Namespace::Web).unwrap();
        store.persist().await.unwrap();
        assert!(store.status().files_present);
        assert!(NamespaceStore::open(tmp.path(), Namespace::Web).unwrap().index().is_empty());
    }

    #[test]
    fn set_routes_by_namespace() {
        let tmp = tempfile::tempdir().unwrap();
        let set = NamespaceSet::open(tmp.path()).unwrap();
        for ns in Namespace::ALL {
            assert_eq!(set.get(ns).namespace(), ns);
        }
        assert_eq!(set.iter().count(), 4);
    }
}
