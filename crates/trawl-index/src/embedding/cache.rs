//! Bounded in-memory embedding cache using moka.

use moka::sync::Cache;
use trawl_core::fingerprint;

use super::EmbedKind;

/// Embedding vectors keyed by the SHA-256 fingerprint of their text.
///
/// Documents and queries are cached separately because providers embed them
/// differently.
///
/// # Examples
///
/// ```
/// use trawl_index::embedding::{EmbedKind, EmbeddingCache};
///
/// let cache = EmbeddingCache::new(100);
/// cache.insert(EmbedKind::Document, "fn a() {}", vec![1.0, 0.0]);
/// assert_eq!(cache.get(EmbedKind::Document, "fn a() {}"), Some(vec![1.0, 0.0]));
/// assert_eq!(cache.get(EmbedKind::Query, "fn a() {}"), None);
/// ```
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Cache<String, Vec<f32>>,
}

impl EmbeddingCache {
    /// Create a cache holding at most `max_entries` vectors.
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    fn key(kind: EmbedKind, text: &str) -> String {
        format!("{}:{}", kind.as_str(), fingerprint(text))
    }

    /// Cached vector for `text`.
    pub fn get(&self, kind: EmbedKind, text: &str) -> Option<Vec<f32>> {
        self.cache.get(&Self::key(kind, text))
    }

    /// Remember the vector for `text`.
    pub fn insert(&self, kind: EmbedKind, text: &str, vector: Vec<f32>) {
        self.cache.insert(Self::key(kind, text), vector);
    }

    /// Approximate number of cached vectors.
    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    /// Whether the cache holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
