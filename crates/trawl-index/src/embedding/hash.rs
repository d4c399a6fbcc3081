//! Feature-hashing embedder.
//!
//! Each token of the lexical tokenizer is hashed into one of `dimensions`
//! buckets with a hash-derived sign, and the result is L2-normalized. Texts
//! that share identifiers land close together, which is enough for offline
//! use and for exercising the engine in tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use trawl_core::TrawlError;

use super::{EmbedKind, Embedder};
use crate::lexical::tokenize;

/// Deterministic embedder with no external dependencies.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
    model: String,
}

impl HashEmbedder {
    /// Create an embedder producing `dimensions`-long vectors (at least 1).
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model: format!("feature-hash-{dimensions}"),
        }
    }

    /// Embed one text synchronously.
    ///
    /// # Examples
    ///
    /// ```
    /// use trawl_index::embedding::HashEmbedder;
    /// use trawl_index::vector::cosine_similarity;
    ///
    /// let embedder = HashEmbedder::new(256);
    /// let a = embedder.embed_one("parse config file");
    /// let b = embedder.embed_one("parseConfigFile");
    /// assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    /// ```
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(raw);
            let bucket = (h % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        _kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, TrawlError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic() {
        let embedder = HashEmbedder::new(64);
        assert_eq!(embedder.embed_one("fn main"), embedder.embed_one("fn main"));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(8);
        assert_eq!(embedder.embed_one("  "), vec![0.0; 8]);
    }

    #[test]
    fn output_is_unit_length() {
        let v = HashEmbedder::new(128).embed_one("struct Store { files: Vec<File> }");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let embedder = HashEmbedder::new(32);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let out = embedder.embed(&texts, EmbedKind::Document).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], embedder.embed_one("alpha"));
        assert_eq!(out[1], embedder.embed_one("beta"));
    }
}
