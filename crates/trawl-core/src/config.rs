use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TrawlError;

/// Top-level configuration loaded from `.trawl.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
///
/// # Examples
///
/// ```
/// use trawl_core::TrawlConfig;
///
/// let config = TrawlConfig::default();
/// assert_eq!(config.index.m, 16);
/// assert_eq!(config.search.rrf_k, 60);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrawlConfig {
    /// Proximity graph parameters and index location.
    #[serde(default)]
    pub index: IndexConfig,
    /// Query-time settings.
    #[serde(default)]
    pub search: SearchConfig,
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// How files are cut into chunks.
    #[serde(default)]
    pub chunking: ChunkingConfig,
}

impl TrawlConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`TrawlError::Io`] if the file cannot be read,
    /// [`TrawlError::Toml`] if the content is not valid TOML, or
    /// [`TrawlError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use trawl_core::TrawlConfig;
    /// use std::path::Path;
    ///
    /// let config = TrawlConfig::from_file(Path::new(".trawl.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, TrawlError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`TrawlError::Toml`] if parsing fails or
    /// [`TrawlError::Config`] if validation fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use trawl_core::TrawlConfig;
    ///
    /// let toml = r#"
    /// [search]
    /// alpha = 0.8
    /// "#;
    /// let config = TrawlConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.search.alpha, 0.8);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, TrawlError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`TrawlError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<(), TrawlError> {
        if self.index.m < 2 {
            return Err(TrawlError::Config("index.m must be at least 2".into()));
        }
        if self.index.ef_construction < self.index.m {
            return Err(TrawlError::Config(
                "index.ef_construction must be at least index.m".into(),
            ));
        }
        if self.index.ef_search == 0 {
            return Err(TrawlError::Config("index.ef_search must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.search.alpha) {
            return Err(TrawlError::Config(format!(
                "search.alpha must be within [0, 1], got {}",
                self.search.alpha
            )));
        }
        if self.search.vector_candidates == 0 {
            return Err(TrawlError::Config(
                "search.vector_candidates must be positive".into(),
            ));
        }
        if self.chunking.max_lines == 0 || self.chunking.overlap >= self.chunking.max_lines {
            return Err(TrawlError::Config(
                "chunking.overlap must be smaller than chunking.max_lines".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(TrawlError::Config(
                "embedding.batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Proximity graph (HNSW) parameters.
///
/// # Examples
///
/// ```
/// use trawl_core::IndexConfig;
///
/// let config = IndexConfig::default();
/// assert_eq!(config.ef_construction, 200);
/// assert_eq!(config.ef_search, 64);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory holding `vectors.bin` and `metadata.db` (default: `.trawl`).
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    /// Max neighbors per node on layers >= 1; layer 0 allows twice as many.
    #[serde(default = "default_m")]
    pub m: usize,
    /// Candidate list size while inserting.
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    /// Candidate list size while searching (raised to `k` when smaller).
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    /// Seed for layer assignment.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_index_dir() -> PathBuf {
    PathBuf::from(".trawl")
}

fn default_m() -> usize {
    16
}

fn default_ef_construction() -> usize {
    200
}

fn default_ef_search() -> usize {
    64
}

fn default_seed() -> u64 {
    0x7472_6177_6c5f_6873
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            seed: default_seed(),
        }
    }
}

/// Query-time settings.
///
/// # Examples
///
/// ```
/// use trawl_core::SearchConfig;
///
/// let config = SearchConfig::default();
/// assert_eq!(config.alpha, 0.5);
/// assert_eq!(config.top_k, 10);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default weight of the vector ranking.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Default page size.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Reciprocal rank smoothing constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: usize,
    /// Nearest neighbours fetched from the vector index per query. Every
    /// page of a query is cut from the same fused list, so this also bounds
    /// how deep vector-only matches can be paged.
    #[serde(default = "default_vector_candidates")]
    pub vector_candidates: usize,
}

fn default_alpha() -> f64 {
    0.5
}

fn default_top_k() -> usize {
    10
}

fn default_rrf_k() -> usize {
    60
}

fn default_vector_candidates() -> usize {
    1000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            top_k: default_top_k(),
            rrf_k: default_rrf_k(),
            vector_candidates: default_vector_candidates(),
        }
    }
}

/// Configuration for embedding providers.
///
/// # Examples
///
/// ```
/// use trawl_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.provider, "voyage");
/// assert_eq!(config.model, "voyage-code-3");
/// assert_eq!(config.cache_capacity, 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// `"voyage"`, `"openai"`, or `"hash"` (offline feature hashing).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Override for the provider's base URL.
    pub base_url: Option<String>,
    /// Model name (default: `"voyage-code-3"`).
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Embedding dimensions (default: 1024).
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// Upper bound on a single embed call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Entries kept in the in-memory embedding cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    /// Texts per provider request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_embedding_provider() -> String {
    "voyage".into()
}

fn default_embedding_model() -> String {
    "voyage-code-3".into()
}

fn default_embedding_dimensions() -> usize {
    1024
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_cache_capacity() -> u64 {
    100
}

fn default_batch_size() -> usize {
    64
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            base_url: None,
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            timeout_secs: default_timeout_secs(),
            cache_capacity: default_cache_capacity(),
            batch_size: default_batch_size(),
        }
    }
}

/// Line-window chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Lines per chunk.
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    /// Lines shared by consecutive chunks.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

fn default_max_lines() -> usize {
    40
}

fn default_overlap() -> usize {
    5
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            overlap: default_overlap(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = TrawlConfig::default();
        assert_eq!(config.index.dir, PathBuf::from(".trawl"));
        assert_eq!(config.index.m, 16);
        assert_eq!(config.index.ef_construction, 200);
        assert_eq!(config.index.ef_search, 64);
        assert_eq!(config.search.alpha, 0.5);
        assert_eq!(config.search.rrf_k, 60);
        assert_eq!(config.embedding.timeout_secs, 30);
        assert_eq!(config.embedding.cache_capacity, 100);
        assert_eq!(config.chunking.max_lines, 40);
        assert_eq!(config.chunking.overlap, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[index]
dir = "/tmp/idx"
m = 8
ef_construction = 100
ef_search = 32

[search]
alpha = 0.25
top_k = 5

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dimensions = 1536
timeout_secs = 10

[chunking]
max_lines = 60
overlap = 10
"#;
        let config = TrawlConfig::from_toml(toml).unwrap();
        assert_eq!(config.index.dir, PathBuf::from("/tmp/idx"));
        assert_eq!(config.index.m, 8);
        assert_eq!(config.search.alpha, 0.25);
        assert_eq!(config.search.top_k, 5);
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.chunking.overlap, 10);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = TrawlConfig::from_toml("").unwrap();
        assert_eq!(config.index.m, 16);
        assert_eq!(config.embedding.model, "voyage-code-3");
    }

    #[test]
    fn invalid_toml_returns_error() {
        assert!(TrawlConfig::from_toml("{{invalid}}").is_err());
    }

    #[test]
    fn alpha_out_of_range_is_rejected() {
        let err = TrawlConfig::from_toml("[search]\nalpha = 1.5\n").unwrap_err();
        assert!(err.to_string().contains("search.alpha"));
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let err = TrawlConfig::from_toml("[chunking]\nmax_lines = 10\noverlap = 10\n").unwrap_err();
        assert!(matches!(err, TrawlError::Config(_)));
    }

    #[test]
    fn tiny_m_is_rejected() {
        assert!(TrawlConfig::from_toml("[index]\nm = 1\n").is_err());
    }
}
