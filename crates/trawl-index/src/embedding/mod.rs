//! Text embedding: the [`Embedder`] capability, its implementations, and the
//! cached worker the coordinator talks to.
//!
//! - [`HttpEmbedder`]: OpenAI/Voyage compatible `/embeddings` endpoint
//! - [`HashEmbedder`]: deterministic feature hashing, no network
//! - [`EmbeddingWorker`]: request queue + response channels, cache, timeout

mod cache;
mod hash;
mod http;
mod worker;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use trawl_core::{EmbeddingConfig, TrawlError};

pub use cache::EmbeddingCache;
pub use hash::HashEmbedder;
pub use http::HttpEmbedder;
pub use worker::EmbeddingWorker;

/// Whether a text is indexed content or a search query.
///
/// Retrieval models such as Voyage embed the two sides differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedKind {
    /// Chunk text being indexed.
    Document,
    /// A user query.
    Query,
}

impl EmbedKind {
    /// Wire name used by the embedding APIs.
    pub fn as_str(self) -> &'static str {
        match self {
            EmbedKind::Document => "document",
            EmbedKind::Query => "query",
        }
    }
}

impl fmt::Display for EmbedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turns text into vectors.
///
/// Implementations return exactly one vector per input, in input order, and
/// must be deterministic for identical input so cached vectors stay valid.
///
/// # Examples
///
/// ```
/// use trawl_index::embedding::{EmbedKind, Embedder, HashEmbedder};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let embedder = HashEmbedder::new(64);
/// let vectors = embedder
///     .embed(&["fn main() {}".to_string()], EmbedKind::Document)
///     .await
///     .unwrap();
/// assert_eq!(vectors[0].len(), 64);
/// # }
/// ```
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `texts`, one vector per text.
    ///
    /// # Errors
    ///
    /// Returns [`TrawlError::EmbedderUnavailable`] if the backend fails.
    async fn embed(&self, texts: &[String], kind: EmbedKind)
        -> Result<Vec<Vec<f32>>, TrawlError>;

    /// Model identifier, for logs and `trawl status`.
    fn model(&self) -> &str;
}

/// Build the embedder named by `config.provider`.
///
/// # Errors
///
/// Returns [`TrawlError::Config`] for an unknown provider or a missing API key.
///
/// # Examples
///
/// ```
/// use trawl_core::EmbeddingConfig;
/// use trawl_index::embedding::from_config;
///
/// let config = EmbeddingConfig { provider: "hash".into(), dimensions: 32, ..Default::default() };
/// let embedder = from_config(&config).unwrap();
/// assert_eq!(embedder.model(), "feature-hash-32");
/// ```
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, TrawlError> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimensions))),
        "voyage" | "openai" => Ok(Arc::new(HttpEmbedder::with_config(config)?)),
        other => Err(TrawlError::Config(format!(
            "unknown embedding provider '{other}' (expected voyage, openai or hash)"
        ))),
    }
}

/// Check an embedder response against the request.
pub(crate) fn check_batch(
    vectors: Vec<Vec<f32>>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, TrawlError> {
    if vectors.len() != expected {
        return Err(TrawlError::EmbedderUnavailable(format!(
            "embedder returned {} vectors for {expected} texts",
            vectors.len()
        )));
    }
    Ok(vectors)
}
