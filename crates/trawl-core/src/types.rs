use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identifier of a chunk.
///
/// Derived from `(file_path, start_line, end_line)` so an unchanged line range
/// keeps its id across re-indexing. Ids order numerically; every ranking in
/// the engine breaks ties by ascending id.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use trawl_core::ChunkId;
///
/// let a = ChunkId::derive(Path::new("src/lib.rs"), 1, 40);
/// let b = ChunkId::derive(Path::new("src/lib.rs"), 1, 40);
/// assert_eq!(a, b);
/// assert_ne!(a, ChunkId::derive(Path::new("src/lib.rs"), 36, 75));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(u64);

impl ChunkId {
    /// Derive the id for a line range of a file.
    pub fn derive(file_path: &Path, start_line: u32, end_line: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(file_path.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(format!("{start_line}:{end_line}").as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(bytes))
    }

    /// Wrap a raw id (tests, deserialization).
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// SHA-256 of `text`, hex encoded.
///
/// Used for file content hashes, chunk content hashes and embedding cache keys.
///
/// # Examples
///
/// ```
/// use trawl_core::fingerprint;
///
/// assert_eq!(fingerprint("abc"), fingerprint("abc"));
/// assert_eq!(fingerprint("").len(), 64);
/// ```
pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A contiguous line range of one source file, the unit of retrieval.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use trawl_core::Chunk;
///
/// let chunk = Chunk::new(PathBuf::from("src/main.rs"), 1, 3, "rust", "fn main() {\n}\n");
/// assert_eq!(chunk.start_line, 1);
/// assert_eq!(chunk.content_hash.len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Stable id derived from path and line range.
    pub id: ChunkId,
    /// Path to the source file (relative to the indexed root).
    pub file_path: PathBuf,
    /// Raw chunk text.
    pub content: String,
    /// First line (1-indexed, inclusive).
    pub start_line: u32,
    /// Last line (1-indexed, inclusive).
    pub end_line: u32,
    /// Language detected from the file extension.
    pub language: String,
    /// SHA-256 of `content`.
    pub content_hash: String,
}

impl Chunk {
    /// Build a chunk, deriving its id and content hash.
    pub fn new(
        file_path: PathBuf,
        start_line: u32,
        end_line: u32,
        language: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            id: ChunkId::derive(&file_path, start_line, end_line),
            content_hash: fingerprint(&content),
            file_path,
            content,
            start_line,
            end_line,
            language: language.into(),
        }
    }
}

/// Indexed state of one file.
///
/// Superseded wholesale when the file changes; never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Path of the file.
    pub file_path: PathBuf,
    /// SHA-256 of the file content the record was built from.
    pub content_hash: String,
    /// Chunk ids in file order.
    pub chunk_ids: Vec<ChunkId>,
    /// When the record was committed.
    pub indexed_at: DateTime<Utc>,
}

/// A `(path, content, hash)` triple handed to the coordinator by whatever
/// enumerates files.
///
/// # Examples
///
/// ```
/// use trawl_core::SourceFile;
///
/// let file = SourceFile::new("src/lib.rs", "pub fn add() {}");
/// assert_eq!(file.content_hash, trawl_core::fingerprint("pub fn add() {}"));
/// ```
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the indexed root.
    pub path: PathBuf,
    /// Full file content.
    pub content: String,
    /// SHA-256 of `content`.
    pub content_hash: String,
}

impl SourceFile {
    /// Build a source file, hashing its content.
    pub fn new(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            content_hash: fingerprint(&content),
            content,
        }
    }
}

/// Parameters of a hybrid query.
///
/// # Examples
///
/// ```
/// use trawl_core::SearchRequest;
///
/// let req = SearchRequest::new("parse config").with_page(10, 2).with_alpha(0.7);
/// assert_eq!(req.offset, 10);
/// assert_eq!(req.top_k, 2);
/// assert_eq!(req.alpha, 0.7);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// Natural-language or keyword query.
    pub query: String,
    /// Page size.
    pub top_k: usize,
    /// Number of fused results to skip.
    pub offset: usize,
    /// Weight of the vector ranking in `[0, 1]`; lexical gets `1 - alpha`.
    pub alpha: f64,
    /// Optional glob patterns; when non-empty, only matching files are returned.
    #[serde(default)]
    pub file_patterns: Vec<String>,
}

impl SearchRequest {
    /// A first-page request with balanced weighting.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            top_k: 10,
            offset: 0,
            alpha: 0.5,
            file_patterns: Vec::new(),
        }
    }

    /// Set `offset` and `top_k`.
    pub fn with_page(mut self, offset: usize, top_k: usize) -> Self {
        self.offset = offset;
        self.top_k = top_k;
        self
    }

    /// Set the vector weight.
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Restrict results to files matching any of `patterns`.
    pub fn with_file_patterns(mut self, patterns: Vec<String>) -> Self {
        self.file_patterns = patterns;
        self
    }
}

/// One fused result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// The matched chunk.
    pub chunk: Chunk,
    /// Weighted reciprocal-rank score.
    pub fused_score: f64,
    /// Cosine similarity, if the chunk came back from the vector index.
    pub vector_score: Option<f32>,
    /// BM25 score, if the chunk came back from the lexical index.
    pub lexical_score: Option<f64>,
}

/// A page of fused results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    /// Hits in fused order.
    pub hits: Vec<SearchHit>,
    /// Size of the full fused list before pagination.
    pub total: usize,
    /// Offset the page starts at.
    pub offset: usize,
    /// Requested page size.
    pub top_k: usize,
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use trawl_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_depends_on_path_and_range() {
        let base = ChunkId::derive(Path::new("a.rs"), 1, 10);
        assert_ne!(base, ChunkId::derive(Path::new("b.rs"), 1, 10));
        assert_ne!(base, ChunkId::derive(Path::new("a.rs"), 1, 11));
        assert_ne!(base, ChunkId::derive(Path::new("a.rs"), 2, 10));
    }

    #[test]
    fn chunk_id_ignores_content() {
        let a = Chunk::new(PathBuf::from("a.rs"), 1, 2, "rust", "fn a() {}");
        let b = Chunk::new(PathBuf::from("a.rs"), 1, 2, "rust", "fn b() {}");
        assert_eq!(a.id, b.id);
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn chunk_id_displays_as_fixed_width_hex() {
        assert_eq!(ChunkId::from_raw(255).to_string(), "00000000000000ff");
    }

    #[test]
    fn chunk_id_serializes_as_number() {
        let json = serde_json::to_string(&ChunkId::from_raw(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn search_hit_uses_camel_case() {
        let hit = SearchHit {
            chunk: Chunk::new(PathBuf::from("a.rs"), 1, 1, "rust", "x"),
            fused_score: 0.5,
            vector_score: Some(0.9),
            lexical_score: None,
        };
        let json = serde_json::to_value(&hit).unwrap();
        assert!(json.get("fusedScore").is_some());
        assert!(json["chunk"].get("startLine").is_some());
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "md".parse::<OutputFormat>().unwrap(),
            OutputFormat::Markdown
        );
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn output_format_display() {
        assert_eq!(OutputFormat::Text.to_string(), "text");
        assert_eq!(OutputFormat::Markdown.to_string(), "markdown");
    }
}
