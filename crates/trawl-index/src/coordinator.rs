//! The coordinator owns the three stores and keeps them consistent.
//!
//! Writes are serialized by an async writer gate. Each commit takes the
//! write locks of the vector index, the lexical index and the metadata store
//! in that order, so a search never observes a file half replaced. Searches
//! only take read locks, one at a time, and never while awaiting.
//!
//! Embedding always happens before the gate is taken. A slow or failing
//! embedder therefore leaves the previous version of a file queryable, and
//! a file re-indexed while its older request is still embedding wins: the
//! older commit notices that its hash is no longer the latest requested one
//! and is discarded.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use glob::Pattern;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use trawl_core::{
    Chunk, ChunkId, SearchHit, SearchRequest, SearchResponse, SourceFile, TrawlConfig, TrawlError,
};

use crate::chunker::chunk_file;
use crate::embedding::{EmbedKind, Embedder, EmbeddingWorker};
use crate::fusion::{fuse, paginate, ranked};
use crate::lexical::LexicalIndex;
use crate::store::{FileDiff, MetadataStore};
use crate::vector::{HnswIndex, HnswStats, VectorIndex};

/// File name of the serialized vector index inside the index directory.
pub const VECTORS_FILE: &str = "vectors.bin";
/// File name of the metadata snapshot inside the index directory.
pub const METADATA_FILE: &str = "metadata.db";

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// The file's chunks were committed.
    Indexed {
        /// Number of chunks now stored for the file.
        chunks: usize,
    },
    /// The stored hash already matched.
    Unchanged,
    /// A newer version was requested while this one was embedding.
    Superseded,
}

/// Summary of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Files committed.
    pub indexed: usize,
    /// Files skipped because their hash matched.
    pub unchanged: usize,
    /// Files discarded in favour of a newer request.
    pub superseded: usize,
    /// Files dropped because they are no longer present.
    pub removed: usize,
    /// Files that failed, with the reason. Their previous state is intact.
    pub failed: Vec<(PathBuf, TrawlError)>,
}

impl BatchReport {
    fn record(&mut self, path: &Path, outcome: Result<IndexOutcome, TrawlError>) {
        match outcome {
            Ok(IndexOutcome::Indexed { .. }) => self.indexed += 1,
            Ok(IndexOutcome::Unchanged) => self.unchanged += 1,
            Ok(IndexOutcome::Superseded) => self.superseded += 1,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to index file");
                self.failed.push((path.to_path_buf(), e));
            }
        }
    }
}

/// Result of [`IndexCoordinator::repair`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    /// Index entries that belonged to no file record.
    pub orphans_removed: usize,
    /// File records dropped because an index lost some of their chunks.
    pub records_dropped: usize,
}

/// Counters for `trawl status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorStats {
    /// Indexed files.
    pub files: usize,
    /// Chunks in the metadata store.
    pub chunks: usize,
    /// Vectors in the vector index.
    pub vectors: usize,
    /// Documents in the lexical index.
    pub lexical_documents: usize,
    /// Distinct lexical terms.
    pub vocabulary: usize,
    /// Vector dimension, once known.
    pub dimension: Option<usize>,
    /// Proximity graph shape, when the vector index keeps one.
    pub graph: Option<HnswStats>,
    /// Embedding model name.
    pub model: String,
    /// Embeddings currently cached.
    pub cached_embeddings: u64,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn join_error(e: tokio::task::JoinError) -> TrawlError {
    TrawlError::Io(std::io::Error::other(e))
}

/// Owner of the vector index, the lexical index and the metadata store.
///
/// Construct with [`IndexCoordinator::open`] for an on-disk index or
/// [`IndexCoordinator::in_memory`]; both must be called inside a tokio
/// runtime because they start the embedding worker.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use trawl_core::{SearchRequest, SourceFile, TrawlConfig};
/// use trawl_index::coordinator::IndexCoordinator;
/// use trawl_index::embedding::HashEmbedder;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let coordinator = IndexCoordinator::in_memory(Arc::new(HashEmbedder::new(64)), TrawlConfig::default());
/// coordinator
///     .index_file(&SourceFile::new("src/config.rs", "fn parse_config() {}"))
///     .await
///     .unwrap();
///
/// let response = coordinator.search(&SearchRequest::new("parse config")).await.unwrap();
/// assert_eq!(response.hits[0].chunk.file_path.to_str(), Some("src/config.rs"));
/// coordinator.close().await.unwrap();
/// # }
/// ```
pub struct IndexCoordinator<V: VectorIndex + 'static = HnswIndex> {
    vectors: Arc<RwLock<V>>,
    lexical: Arc<RwLock<LexicalIndex>>,
    store: Arc<RwLock<MetadataStore>>,
    writer: tokio::sync::Mutex<()>,
    latest: Mutex<HashMap<PathBuf, String>>,
    dirty: AtomicBool,
    worker: EmbeddingWorker,
    config: TrawlConfig,
    dir: Option<PathBuf>,
}

impl IndexCoordinator<HnswIndex> {
    /// An empty coordinator that never touches disk.
    pub fn in_memory(embedder: Arc<dyn Embedder>, config: TrawlConfig) -> Self {
        let index = HnswIndex::with_config(&config.index);
        Self::with_index(index, embedder, config)
    }

    /// Open the index stored in `dir`, creating the directory if needed.
    ///
    /// An unreadable metadata snapshot is discarded with a warning and the
    /// next scan reindexes everything.
    ///
    /// # Errors
    ///
    /// [`TrawlError::CorruptIndex`] if `vectors.bin` exists but cannot be
    /// decoded, [`TrawlError::Io`] if the directory is unusable.
    pub fn open(dir: &Path, embedder: Arc<dyn Embedder>, config: TrawlConfig) -> Result<Self, TrawlError> {
        Self::open_dir(dir, embedder, config, false)
    }

    /// Like [`IndexCoordinator::open`], but a corrupt vector index is
    /// replaced by an empty one (and the metadata dropped with it).
    ///
    /// # Errors
    ///
    /// [`TrawlError::Io`] if the directory is unusable.
    pub fn open_or_rebuild(
        dir: &Path,
        embedder: Arc<dyn Embedder>,
        config: TrawlConfig,
    ) -> Result<Self, TrawlError> {
        Self::open_dir(dir, embedder, config, true)
    }
}

impl<V: VectorIndex + 'static> IndexCoordinator<V> {
    /// An in-memory coordinator around a caller-supplied vector index.
    pub fn with_index(index: V, embedder: Arc<dyn Embedder>, config: TrawlConfig) -> Self {
        Self::assemble(index, MetadataStore::new(), embedder, config, None)
    }

    /// Open `dir` with vector index type `V`.
    ///
    /// # Errors
    ///
    /// See [`IndexCoordinator::open`].
    pub fn open_dir(
        dir: &Path,
        embedder: Arc<dyn Embedder>,
        config: TrawlConfig,
        rebuild_corrupt: bool,
    ) -> Result<Self, TrawlError> {
        std::fs::create_dir_all(dir)?;
        let vectors_path = dir.join(VECTORS_FILE);
        let store = MetadataStore::open(&dir.join(METADATA_FILE));

        let mut rebuilt = false;
        let (index, store) = if vectors_path.exists() {
            let bytes = std::fs::read(&vectors_path)?;
            match V::load(&bytes) {
                Ok(index) => (index, store),
                Err(e @ TrawlError::CorruptIndex(_)) if rebuild_corrupt => {
                    warn!(path = %vectors_path.display(), error = %e, "rebuilding corrupt vector index");
                    rebuilt = true;
                    (V::with_config(&config.index), MetadataStore::new())
                }
                Err(e) => return Err(e),
            }
        } else {
            (V::with_config(&config.index), store)
        };

        info!(
            dir = %dir.display(),
            files = store.file_count(),
            vectors = index.len(),
            "opened index"
        );
        let coordinator = Self::assemble(index, store, embedder, config, Some(dir.to_path_buf()));
        coordinator.dirty.store(rebuilt, Ordering::SeqCst);
        Ok(coordinator)
    }

    fn assemble(
        index: V,
        store: MetadataStore,
        embedder: Arc<dyn Embedder>,
        config: TrawlConfig,
        dir: Option<PathBuf>,
    ) -> Self {
        let mut lexical = LexicalIndex::new();
        for chunk in store.chunks() {
            lexical.add(chunk.id, &chunk.content);
        }
        let worker = EmbeddingWorker::spawn(embedder, &config.embedding);
        Self {
            vectors: Arc::new(RwLock::new(index)),
            lexical: Arc::new(RwLock::new(lexical)),
            store: Arc::new(RwLock::new(store)),
            writer: tokio::sync::Mutex::new(()),
            latest: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            worker,
            config,
            dir,
        }
    }

    /// The configuration the coordinator was built with.
    pub fn config(&self) -> &TrawlConfig {
        &self.config
    }

    /// Directory the coordinator persists to, if any.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Run `f` against the vector index under a read lock.
    pub fn with_vector_index<R>(&self, f: impl FnOnce(&V) -> R) -> R {
        f(&read(&self.vectors))
    }

    /// Run `f` against the lexical index under a read lock.
    pub fn with_lexical_index<R>(&self, f: impl FnOnce(&LexicalIndex) -> R) -> R {
        f(&read(&self.lexical))
    }

    /// Run `f` against the metadata store under a read lock.
    pub fn with_store<R>(&self, f: impl FnOnce(&MetadataStore) -> R) -> R {
        f(&read(&self.store))
    }

    fn set_latest(&self, path: &Path, hash: &str) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), hash.to_string());
    }

    fn is_latest(&self, path: &Path, hash: &str) -> bool {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .is_some_and(|h| h == hash)
    }

    /// Index one file, replacing whatever was stored for its path.
    ///
    /// # Errors
    ///
    /// Embedder faults ([`TrawlError::EmbedderTimeout`],
    /// [`TrawlError::EmbedderUnavailable`]) and insert failures such as
    /// [`TrawlError::DimensionMismatch`]. In every error case the file's
    /// previous chunks remain indexed.
    #[instrument(skip_all, fields(path = %file.path.display()))]
    pub async fn index_file(&self, file: &SourceFile) -> Result<IndexOutcome, TrawlError> {
        self.set_latest(&file.path, &file.content_hash);
        let diff = read(&self.store).diff(&file.path, &file.content_hash);
        if diff == FileDiff::Unchanged {
            debug!("unchanged");
            return Ok(IndexOutcome::Unchanged);
        }

        let chunks = chunk_file(&file.path, &file.content, &self.config.chunking);
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.worker.embed(&texts, EmbedKind::Document).await?;

        let _gate = self.writer.lock().await;
        if !self.is_latest(&file.path, &file.content_hash) {
            debug!("superseded by a newer request");
            return Ok(IndexOutcome::Superseded);
        }
        if read(&self.store).diff(&file.path, &file.content_hash) == FileDiff::Unchanged {
            return Ok(IndexOutcome::Unchanged);
        }

        let count = chunks.len();
        self.commit(file, chunks, embeddings)?;
        debug!(chunks = count, "indexed");
        Ok(IndexOutcome::Indexed { chunks: count })
    }

    /// Swap the file's chunks in all three stores, restoring the old ones on failure.
    fn commit(
        &self,
        file: &SourceFile,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<(), TrawlError> {
        let mut vectors = write(&self.vectors);
        let mut lexical = write(&self.lexical);
        let mut store = write(&self.store);

        let old: Vec<(Chunk, Option<Vec<f32>>)> = store
            .chunks_for_file(&file.path)
            .into_iter()
            .map(|chunk| (chunk.clone(), vectors.vector(chunk.id).map(<[f32]>::to_vec)))
            .collect();
        for (chunk, _) in &old {
            vectors.delete(chunk.id);
            lexical.delete(chunk.id);
        }

        let mut inserted: Vec<ChunkId> = Vec::with_capacity(chunks.len());
        let mut failure = None;
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            if let Err(e) = vectors.insert(chunk.id, embedding) {
                failure = Some(e);
                break;
            }
            lexical.add(chunk.id, &chunk.content);
            inserted.push(chunk.id);
        }
        let failure = match failure {
            Some(e) => Some(e),
            None => store
                .replace_file(&file.path, chunks, &file.content_hash)
                .err(),
        };

        let Some(error) = failure else {
            self.dirty.store(true, Ordering::SeqCst);
            return Ok(());
        };
        for id in inserted {
            vectors.delete(id);
            lexical.delete(id);
        }
        for (chunk, vector) in old {
            if let Some(vector) = vector {
                if let Err(e) = vectors.insert(chunk.id, vector) {
                    warn!(id = %chunk.id, error = %e, "failed to restore vector");
                }
            }
            lexical.add(chunk.id, &chunk.content);
        }
        Err(error)
    }

    /// Forget `path` in all three stores. Returns `false` if it was not indexed.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn remove_file(&self, path: &Path) -> bool {
        let _gate = self.writer.lock().await;
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        self.remove_locked(path)
    }

    fn remove_locked(&self, path: &Path) -> bool {
        let mut vectors = write(&self.vectors);
        let mut lexical = write(&self.lexical);
        let mut store = write(&self.store);
        let Some(record) = store.remove_file(path) else {
            return false;
        };
        for id in &record.chunk_ids {
            vectors.delete(*id);
            lexical.delete(*id);
        }
        self.dirty.store(true, Ordering::SeqCst);
        debug!(chunks = record.chunk_ids.len(), "removed");
        true
    }

    /// Index every file, collecting per-file failures, then flush.
    ///
    /// # Errors
    ///
    /// Only a failed flush is returned as an error.
    pub async fn index_batch(&self, files: &[SourceFile]) -> Result<BatchReport, TrawlError> {
        self.index_batch_with_progress(files, |_| {}).await
    }

    /// [`IndexCoordinator::index_batch`], calling `on_file` after each file.
    ///
    /// # Errors
    ///
    /// Only a failed flush is returned as an error.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn index_batch_with_progress(
        &self,
        files: &[SourceFile],
        on_file: impl FnMut(&SourceFile),
    ) -> Result<BatchReport, TrawlError> {
        let mut report = BatchReport::default();
        self.index_all(files, on_file, &mut report).await;
        self.flush().await?;
        Ok(report)
    }

    async fn index_all(
        &self,
        files: &[SourceFile],
        mut on_file: impl FnMut(&SourceFile),
        report: &mut BatchReport,
    ) {
        for file in files {
            let outcome = self.index_file(file).await;
            report.record(&file.path, outcome);
            on_file(file);
        }
    }

    /// Bring the index in line with a full listing of the tree.
    ///
    /// Repairs inconsistencies first, indexes `files`, then removes every
    /// indexed path missing from `files`.
    ///
    /// # Errors
    ///
    /// Only a failed flush is returned as an error.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn sync(
        &self,
        files: &[SourceFile],
        on_file: impl FnMut(&SourceFile),
    ) -> Result<BatchReport, TrawlError> {
        let repaired = self.repair().await;
        if repaired != RepairReport::default() {
            info!(
                orphans = repaired.orphans_removed,
                records = repaired.records_dropped,
                "repaired index"
            );
        }

        let mut report = BatchReport::default();
        self.index_all(files, on_file, &mut report).await;

        let present: HashSet<&Path> = files.iter().map(|f| f.path.as_path()).collect();
        let vanished: Vec<PathBuf> = read(&self.store)
            .files()
            .map(|r| r.file_path.clone())
            .filter(|p| !present.contains(p.as_path()))
            .collect();
        for path in vanished {
            if self.remove_file(&path).await {
                report.removed += 1;
            }
        }

        self.flush().await?;
        Ok(report)
    }

    /// Drop index entries no file record owns, and records whose chunks an
    /// index has lost so the next scan reindexes them.
    pub async fn repair(&self) -> RepairReport {
        let _gate = self.writer.lock().await;
        let mut vectors = write(&self.vectors);
        let mut lexical = write(&self.lexical);
        let mut store = write(&self.store);
        let mut report = RepairReport::default();

        let owned: HashSet<ChunkId> = store.all_chunk_ids().into_iter().collect();
        for id in vectors.ids() {
            if !owned.contains(&id) && vectors.delete(id) {
                report.orphans_removed += 1;
            }
        }
        for id in lexical.ids() {
            if !owned.contains(&id) && lexical.delete(id) {
                report.orphans_removed += 1;
            }
        }

        let broken: Vec<PathBuf> = store
            .files()
            .filter(|r| {
                r.chunk_ids
                    .iter()
                    .any(|id| !vectors.contains(*id) || !lexical.contains(*id))
            })
            .map(|r| r.file_path.clone())
            .collect();
        for path in broken {
            if let Some(record) = store.remove_file(&path) {
                for id in &record.chunk_ids {
                    vectors.delete(*id);
                    lexical.delete(*id);
                }
                warn!(path = %path.display(), "dropping incomplete file record");
                report.records_dropped += 1;
            }
        }
        if report != RepairReport::default() {
            self.dirty.store(true, Ordering::SeqCst);
        }
        report
    }

    /// Run a hybrid query.
    ///
    /// An empty query or an empty index gives an empty response. When the
    /// embedder is down or slow the query degrades to lexical-only results.
    ///
    /// # Errors
    ///
    /// [`TrawlError::InvalidArgument`] for `alpha` outside `[0, 1]` or a
    /// malformed file pattern, [`TrawlError::DimensionMismatch`] if the
    /// embedder's dimension differs from the index.
    #[instrument(skip_all, fields(query = %request.query, alpha = request.alpha))]
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, TrawlError> {
        let alpha = request.alpha;
        if !(0.0..=1.0).contains(&alpha) {
            return Err(TrawlError::InvalidArgument(format!(
                "alpha must be within [0, 1], got {alpha}"
            )));
        }
        let patterns = request
            .file_patterns
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| TrawlError::InvalidArgument(format!("bad file pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut response = SearchResponse {
            hits: Vec::new(),
            total: 0,
            offset: request.offset,
            top_k: request.top_k,
        };
        if request.query.trim().is_empty() {
            return Ok(response);
        }

        // Neither side's depth may depend on offset or top_k, or consecutive
        // pages would be cut from different fused orders.
        let (has_vectors, pool) = {
            let index = read(&self.vectors);
            (!index.is_empty(), index.len().min(self.config.search.vector_candidates))
        };
        let query_vector = if alpha > 0.0 && has_vectors {
            match self.worker.embed_query(&request.query).await {
                Ok(v) => Some(v),
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "query embedding failed, using lexical results only");
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let vector_task = query_vector.map(|query| {
            let vectors = Arc::clone(&self.vectors);
            let ef_search = self.config.index.ef_search;
            tokio::task::spawn_blocking(move || {
                let index = read(&vectors);
                index.search(&query, pool, ef_search)
            })
        });
        let lexical_task = (alpha < 1.0).then(|| {
            let lexical = Arc::clone(&self.lexical);
            let query = request.query.clone();
            tokio::task::spawn_blocking(move || {
                let index = read(&lexical);
                index.search(&query)
            })
        });

        let vector_hits = match vector_task {
            Some(task) => match task.await.map_err(join_error)? {
                Ok(hits) => hits,
                Err(TrawlError::EmptyIndex) => Vec::new(),
                Err(e) => return Err(e),
            },
            None => Vec::new(),
        };
        let lexical_hits = match lexical_task {
            Some(task) => task.await.map_err(join_error)?,
            None => Vec::new(),
        };

        let store = read(&self.store);
        let keep = |id: &ChunkId| {
            store.chunk(*id).is_some_and(|chunk| {
                patterns.is_empty() || patterns.iter().any(|p| p.matches_path(&chunk.file_path))
            })
        };
        let vector_ranked = ranked(
            vector_hits
                .into_iter()
                .filter(|n| keep(&n.id))
                .map(|n| (n.id, f64::from(n.similarity))),
        );
        let lexical_ranked = ranked(lexical_hits.into_iter().filter(|(id, _)| keep(id)));

        let fused = fuse(&vector_ranked, &lexical_ranked, alpha, self.config.search.rrf_k)?;
        response.total = fused.len();
        response.hits = paginate(&fused, request.offset, request.top_k)
            .iter()
            .filter_map(|hit| {
                store.chunk(hit.id).map(|chunk| SearchHit {
                    chunk: chunk.clone(),
                    fused_score: hit.score,
                    vector_score: hit.vector_score.map(|s| s as f32),
                    lexical_score: hit.lexical_score,
                })
            })
            .collect();
        debug!(
            vector = vector_ranked.len(),
            lexical = lexical_ranked.len(),
            total = response.total,
            "search complete"
        );
        Ok(response)
    }

    /// Write `vectors.bin` and `metadata.db` if anything changed since the
    /// last flush. A no-op for in-memory coordinators.
    ///
    /// # Errors
    ///
    /// [`TrawlError::Io`] or [`TrawlError::Database`] if a snapshot cannot be written.
    pub async fn flush(&self) -> Result<(), TrawlError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let _gate = self.writer.lock().await;
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.write_snapshots(dir).inspect_err(|_| {
            self.dirty.store(true, Ordering::SeqCst);
        })
    }

    fn write_snapshots(&self, dir: &Path) -> Result<(), TrawlError> {
        let bytes = read(&self.vectors).save();
        let path = dir.join(VECTORS_FILE);
        let staging = dir.join(format!("{VECTORS_FILE}.tmp"));
        std::fs::write(&staging, &bytes)?;
        std::fs::rename(&staging, &path)?;

        write(&self.store).snapshot(&dir.join(METADATA_FILE))?;
        debug!(dir = %dir.display(), bytes = bytes.len(), "flushed index");
        Ok(())
    }

    /// Flush and stop the embedding worker.
    ///
    /// # Errors
    ///
    /// See [`IndexCoordinator::flush`]. The worker is stopped either way.
    pub async fn close(self) -> Result<(), TrawlError> {
        let flushed = self.flush().await;
        self.worker.shutdown().await;
        flushed
    }

    /// Current counters.
    pub fn stats(&self) -> CoordinatorStats {
        let (vectors, dimension, graph) = {
            let index = read(&self.vectors);
            (index.len(), index.dimension(), index.graph_stats())
        };
        let (lexical_documents, vocabulary) = {
            let lexical = read(&self.lexical);
            (lexical.len(), lexical.vocabulary_size())
        };
        let stats = read(&self.store).stats();
        CoordinatorStats {
            files: stats.total_files,
            chunks: stats.total_chunks,
            vectors,
            lexical_documents,
            vocabulary,
            dimension,
            graph,
            model: self.worker.model().to_string(),
            cached_embeddings: self.worker.cache().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::vector::FlatIndex;

    fn coordinator() -> IndexCoordinator {
        IndexCoordinator::in_memory(Arc::new(HashEmbedder::new(64)), TrawlConfig::default())
    }

    #[tokio::test]
    async fn second_index_of_same_content_is_unchanged() {
        let c = coordinator();
        let file = SourceFile::new("a.rs", "fn alpha() {}\nfn beta() {}\n");
        assert_eq!(
            c.index_file(&file).await.unwrap(),
            IndexOutcome::Indexed { chunks: 1 }
        );
        assert_eq!(c.index_file(&file).await.unwrap(), IndexOutcome::Unchanged);
    }

    #[tokio::test]
    async fn empty_query_and_empty_index_give_empty_responses() {
        let c = coordinator();
        let response = c.search(&SearchRequest::new("anything")).await.unwrap();
        assert!(response.hits.is_empty());
        assert_eq!(response.total, 0);

        c.index_file(&SourceFile::new("a.rs", "fn alpha() {}")).await.unwrap();
        let response = c.search(&SearchRequest::new("   ")).await.unwrap();
        assert!(response.hits.is_empty());
    }

    #[tokio::test]
    async fn alpha_out_of_range_is_rejected() {
        let c = coordinator();
        let err = c
            .search(&SearchRequest::new("x").with_alpha(1.5))
            .await
            .unwrap_err();
        assert!(matches!(err, TrawlError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn bad_glob_is_rejected() {
        let c = coordinator();
        let err = c
            .search(&SearchRequest::new("x").with_file_patterns(vec!["[".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, TrawlError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn file_patterns_filter_results() {
        let c = coordinator();
        c.index_file(&SourceFile::new("src/open.rs", "fn open_file() {}")).await.unwrap();
        c.index_file(&SourceFile::new("tests/open.rs", "fn open_file_test() {}")).await.unwrap();

        let request = SearchRequest::new("open file").with_file_patterns(vec!["src/**".into()]);
        let response = c.search(&request).await.unwrap();
        assert_eq!(response.total, 1);
        assert_eq!(response.hits[0].chunk.file_path, PathBuf::from("src/open.rs"));
    }

    #[tokio::test]
    async fn lexical_only_search_has_no_vector_scores() {
        let c = coordinator();
        c.index_file(&SourceFile::new("a.rs", "fn render_page() {}")).await.unwrap();
        let response = c
            .search(&SearchRequest::new("render").with_alpha(0.0))
            .await
            .unwrap();
        assert_eq!(response.hits.len(), 1);
        assert!(response.hits[0].vector_score.is_none());
        assert!(response.hits[0].lexical_score.is_some());
    }

    #[tokio::test]
    async fn works_with_flat_index() {
        let c = IndexCoordinator::with_index(
            FlatIndex::default(),
            Arc::new(HashEmbedder::new(32)),
            TrawlConfig::default(),
        );
        c.index_file(&SourceFile::new("a.rs", "fn load_store() {}")).await.unwrap();
        let response = c
            .search(&SearchRequest::new("load store").with_alpha(1.0))
            .await
            .unwrap();
        assert_eq!(response.hits.len(), 1);
        assert!(response.hits[0].lexical_score.is_none());
        assert!(c.stats().graph.is_none());
    }

    #[tokio::test]
    async fn stats_track_all_stores() {
        let c = coordinator();
        c.index_file(&SourceFile::new("a.rs", "fn alpha() {}")).await.unwrap();
        let stats = c.stats();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.vectors, 1);
        assert_eq!(stats.lexical_documents, 1);
        assert_eq!(stats.dimension, Some(64));
        assert_eq!(stats.model, "feature-hash-64");
        let graph = stats.graph.unwrap();
        assert_eq!(graph.nodes, 1);
        assert_eq!(graph.layers, 1);
    }

    #[tokio::test]
    async fn remove_absent_file_is_false() {
        let c = coordinator();
        assert!(!c.remove_file(Path::new("nope.rs")).await);
    }
}
