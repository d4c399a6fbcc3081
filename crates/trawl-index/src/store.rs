//! File and chunk metadata, with SQLite snapshots.
//!
//! The in-memory maps are authoritative while the process runs. A snapshot
//! is written to `metadata.db` after each batch; on startup an unreadable
//! snapshot yields an empty store (and a full reindex) instead of an error.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::{debug, warn};
use trawl_core::{Chunk, ChunkId, FileRecord, TrawlError};

const SCHEMA_VERSION: i64 = 1;

/// Outcome of comparing a file's new content hash with the stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileDiff {
    /// Stored hash equals the new hash.
    Unchanged,
    /// The file is known under another hash; carries its current chunk ids.
    Changed(Vec<ChunkId>),
    /// No record for this path.
    New,
}

/// Index statistics.
///
/// # Examples
///
/// ```
/// use trawl_index::store::MetadataStore;
///
/// let stats = MetadataStore::new().stats();
/// assert_eq!(stats.total_files, 0);
/// assert_eq!(stats.total_chunks, 0);
/// ```
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Number of file records.
    pub total_files: usize,
    /// Number of chunks across all records.
    pub total_chunks: usize,
}

/// Authoritative map of files to chunks.
///
/// # Examples
///
/// ```
/// use std::path::{Path, PathBuf};
/// use trawl_core::Chunk;
/// use trawl_index::store::{FileDiff, MetadataStore};
///
/// let mut store = MetadataStore::new();
/// let path = Path::new("src/lib.rs");
/// assert_eq!(store.diff(path, "h1"), FileDiff::New);
///
/// let chunk = Chunk::new(PathBuf::from("src/lib.rs"), 1, 2, "rust", "pub fn a() {}");
/// store.replace_file(path, vec![chunk], "h1").unwrap();
/// assert_eq!(store.diff(path, "h1"), FileDiff::Unchanged);
/// ```
#[derive(Debug, Default)]
pub struct MetadataStore {
    files: BTreeMap<PathBuf, FileRecord>,
    chunks: HashMap<ChunkId, Chunk>,
    dirty: bool,
}

impl MetadataStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `content_hash` with the stored hash for `path`.
    pub fn diff(&self, path: &Path, content_hash: &str) -> FileDiff {
        match self.files.get(path) {
            None => FileDiff::New,
            Some(record) if record.content_hash == content_hash => FileDiff::Unchanged,
            Some(record) => FileDiff::Changed(record.chunk_ids.clone()),
        }
    }

    /// Install `chunks` as the complete contents of `path`.
    ///
    /// The new chunks are validated before anything changes, so on error the
    /// previous record and its chunks are untouched. On success the old chunk
    /// ids are forgotten and the new record replaces the old one in one step.
    /// Returns the superseded record, if any.
    ///
    /// # Errors
    ///
    /// Returns [`TrawlError::InvalidArgument`] if a chunk belongs to another
    /// path or chunk ids repeat.
    pub fn replace_file(
        &mut self,
        path: &Path,
        chunks: Vec<Chunk>,
        content_hash: &str,
    ) -> Result<Option<FileRecord>, TrawlError> {
        let mut seen = HashSet::with_capacity(chunks.len());
        for chunk in &chunks {
            if chunk.file_path != path {
                return Err(TrawlError::InvalidArgument(format!(
                    "chunk {} belongs to {}, not {}",
                    chunk.id,
                    chunk.file_path.display(),
                    path.display()
                )));
            }
            if !seen.insert(chunk.id) {
                return Err(TrawlError::InvalidArgument(format!(
                    "duplicate chunk id {} in {}",
                    chunk.id,
                    path.display()
                )));
            }
            if let Some(existing) = self.chunks.get(&chunk.id) {
                if existing.file_path != path {
                    return Err(TrawlError::InvalidArgument(format!(
                        "chunk id {} already owned by {}",
                        chunk.id,
                        existing.file_path.display()
                    )));
                }
            }
        }

        let old = self.remove_file(path);
        let record = FileRecord {
            file_path: path.to_path_buf(),
            content_hash: content_hash.to_string(),
            chunk_ids: chunks.iter().map(|c| c.id).collect(),
            indexed_at: Utc::now(),
        };
        for chunk in chunks {
            self.chunks.insert(chunk.id, chunk);
        }
        self.files.insert(path.to_path_buf(), record);
        self.dirty = true;
        Ok(old)
    }

    /// Forget `path` and its chunks. Returns the removed record.
    pub fn remove_file(&mut self, path: &Path) -> Option<FileRecord> {
        let record = self.files.remove(path)?;
        for id in &record.chunk_ids {
            self.chunks.remove(id);
        }
        self.dirty = true;
        Some(record)
    }

    /// The record for `path`.
    pub fn get_file(&self, path: &Path) -> Option<&FileRecord> {
        self.files.get(path)
    }

    /// The chunk stored under `id`.
    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks.get(&id)
    }

    /// Chunks of `path` in file order.
    pub fn chunks_for_file(&self, path: &Path) -> Vec<&Chunk> {
        self.files
            .get(path)
            .map(|record| {
                record
                    .chunk_ids
                    .iter()
                    .filter_map(|id| self.chunks.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every record, ordered by path.
    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    /// Every stored chunk, in no particular order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    /// Number of file records.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Number of chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// All chunk ids, ascending.
    pub fn all_chunk_ids(&self) -> Vec<ChunkId> {
        let mut ids: Vec<ChunkId> = self.chunks.keys().copied().collect();
        ids.sort();
        ids
    }

    /// File and chunk counts.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_files: self.files.len(),
            total_chunks: self.chunks.len(),
        }
    }

    /// Whether anything changed since the last snapshot or load.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Write the store to a SQLite database at `path`.
    ///
    /// The database is built next to `path` and renamed over it once the
    /// transaction commits, so an interrupted write leaves the previous
    /// snapshot in place.
    ///
    /// # Errors
    ///
    /// Returns [`TrawlError::Database`] if the database cannot be written.
    pub fn snapshot(&mut self, path: &Path) -> Result<(), TrawlError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let staging = path.with_extension("db.tmp");
        if staging.exists() {
            std::fs::remove_file(&staging)?;
        }
        let mut conn = Connection::open(&staging)
            .map_err(|e| TrawlError::Database(format!("failed to open snapshot: {e}")))?;
        init_schema(&conn)?;

        let tx = conn
            .transaction()
            .map_err(|e| TrawlError::Database(format!("failed to begin transaction: {e}")))?;
        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('version', ?1)",
            params![SCHEMA_VERSION],
        )
        .map_err(|e| TrawlError::Database(format!("failed to write version: {e}")))?;

        {
            let mut insert_file = tx
                .prepare(
                    "INSERT INTO files (path, content_hash, chunk_ids, indexed_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(|e| TrawlError::Database(format!("failed to prepare insert: {e}")))?;
            for record in self.files.values() {
                let chunk_ids = serde_json::to_string(&record.chunk_ids)?;
                insert_file
                    .execute(params![
                        record.file_path.to_string_lossy().to_string(),
                        record.content_hash,
                        chunk_ids,
                        record.indexed_at.to_rfc3339(),
                    ])
                    .map_err(|e| TrawlError::Database(format!("failed to insert file: {e}")))?;
            }

            let mut insert_chunk = tx
                .prepare(
                    "INSERT INTO chunks
                     (id, file_path, start_line, end_line, language, content, content_hash)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(|e| TrawlError::Database(format!("failed to prepare insert: {e}")))?;
            for chunk in self.chunks.values() {
                insert_chunk
                    .execute(params![
                        chunk.id.as_u64() as i64,
                        chunk.file_path.to_string_lossy().to_string(),
                        chunk.start_line,
                        chunk.end_line,
                        chunk.language,
                        chunk.content,
                        chunk.content_hash,
                    ])
                    .map_err(|e| TrawlError::Database(format!("failed to insert chunk: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| TrawlError::Database(format!("failed to commit snapshot: {e}")))?;
        conn.close()
            .map_err(|(_, e)| TrawlError::Database(format!("failed to close snapshot: {e}")))?;
        std::fs::rename(&staging, path)?;
        self.dirty = false;
        debug!(
            path = %path.display(),
            files = self.files.len(),
            chunks = self.chunks.len(),
            "metadata snapshot written"
        );
        Ok(())
    }

    /// Load a snapshot, treating any failure as an empty store.
    ///
    /// A missing file is silently empty; an unreadable or inconsistent one is
    /// logged as a warning.
    pub fn open(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }
        match Self::load(path) {
            Ok(store) => store,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "discarding metadata snapshot");
                Self::new()
            }
        }
    }

    /// Load a snapshot strictly.
    ///
    /// # Errors
    ///
    /// Returns [`TrawlError::StoreCorrupt`] if the database cannot be read,
    /// has an unsupported version, or its records reference missing chunks.
    pub fn load(path: &Path) -> Result<Self, TrawlError> {
        let corrupt = |what: &str, e: rusqlite::Error| {
            TrawlError::StoreCorrupt(format!("{what}: {e}"))
        };
        let conn = Connection::open(path).map_err(|e| corrupt("failed to open", e))?;

        let version: i64 = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                row.get(0)
            })
            .map_err(|e| corrupt("failed to read version", e))?;
        if version != SCHEMA_VERSION {
            return Err(TrawlError::StoreCorrupt(format!(
                "unsupported snapshot version {version}"
            )));
        }

        let mut chunks = HashMap::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT id, file_path, start_line, end_line, language, content, content_hash
                     FROM chunks",
                )
                .map_err(|e| corrupt("failed to read chunks", e))?;
            let rows = stmt
                .query_map([], |row| {
                    let raw: i64 = row.get(0)?;
                    let path: String = row.get(1)?;
                    Ok(Chunk {
                        id: ChunkId::from_raw(raw as u64),
                        file_path: PathBuf::from(path),
                        start_line: row.get(2)?,
                        end_line: row.get(3)?,
                        language: row.get(4)?,
                        content: row.get(5)?,
                        content_hash: row.get(6)?,
                    })
                })
                .map_err(|e| corrupt("failed to read chunks", e))?;
            for chunk in rows {
                let chunk = chunk.map_err(|e| corrupt("bad chunk row", e))?;
                chunks.insert(chunk.id, chunk);
            }
        }

        let mut files = BTreeMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT path, content_hash, chunk_ids, indexed_at FROM files")
                .map_err(|e| corrupt("failed to read files", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(|e| corrupt("failed to read files", e))?;
            for row in rows {
                let (path, content_hash, chunk_ids, indexed_at) =
                    row.map_err(|e| corrupt("bad file row", e))?;
                let chunk_ids: Vec<ChunkId> = serde_json::from_str(&chunk_ids).map_err(|e| {
                    TrawlError::StoreCorrupt(format!("bad chunk list for {path}: {e}"))
                })?;
                let indexed_at = DateTime::parse_from_rfc3339(&indexed_at)
                    .map_err(|e| {
                        TrawlError::StoreCorrupt(format!("bad timestamp for {path}: {e}"))
                    })?
                    .with_timezone(&Utc);
                let file_path = PathBuf::from(path);
                files.insert(
                    file_path.clone(),
                    FileRecord {
                        file_path,
                        content_hash,
                        chunk_ids,
                        indexed_at,
                    },
                );
            }
        }

        let store = Self {
            files,
            chunks,
            dirty: false,
        };
        store.check_consistency()?;
        Ok(store)
    }

    /// Every record's chunks exist and point back at it; no chunk is unowned.
    fn check_consistency(&self) -> Result<(), TrawlError> {
        let mut owned = 0usize;
        for record in self.files.values() {
            for id in &record.chunk_ids {
                match self.chunks.get(id) {
                    Some(chunk) if chunk.file_path == record.file_path => owned += 1,
                    _ => {
                        return Err(TrawlError::StoreCorrupt(format!(
                            "{} references missing chunk {id}",
                            record.file_path.display()
                        )))
                    }
                }
            }
        }
        if owned != self.chunks.len() {
            return Err(TrawlError::StoreCorrupt(format!(
                "{} chunks belong to no file",
                self.chunks.len().saturating_sub(owned)
            )));
        }
        Ok(())
    }
}

fn init_schema(conn: &Connection) -> Result<(), TrawlError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS files (
            path TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            chunk_ids TEXT NOT NULL,
            indexed_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunks (
            id INTEGER PRIMARY KEY,
            file_path TEXT NOT NULL,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            language TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL
        );
        ",
    )
    .map_err(|e| TrawlError::Database(format!("failed to create schema: {e}")))
}
