//! Approximate nearest-neighbor search over chunk embeddings.
//!
//! [`VectorIndex`] is the capability the coordinator is written against.
//! [`HnswIndex`] is the production implementation; [`FlatIndex`] scans every
//! vector and serves as an exact oracle in tests.
//!
//! Similarity is cosine on the raw vectors. Neither index normalizes on
//! insert; callers that want dot-product equivalence normalize first.

mod codec;
mod hnsw;

use std::cmp::Ordering;
use std::collections::BTreeMap;

use trawl_core::{ChunkId, IndexConfig, TrawlError};

use codec::{ByteReader, ByteWriter};
pub use hnsw::{HnswIndex, HnswStats};

/// A search result: chunk id and cosine similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Matched chunk.
    pub id: ChunkId,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity: f32,
}

/// Result order shared by every index: similarity descending, then ascending id.
pub fn rank_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.id.cmp(&b.id))
}

/// A store of fixed-dimension vectors answering k-nearest-neighbor queries.
///
/// The dimension is fixed by the first insertion; later vectors of another
/// length fail with [`TrawlError::DimensionMismatch`].
pub trait VectorIndex: Send + Sync {
    /// Build an empty index using the graph parameters in `config`.
    fn with_config(config: &IndexConfig) -> Self
    where
        Self: Sized;

    /// Insert or replace the vector stored under `id`.
    ///
    /// # Errors
    ///
    /// [`TrawlError::DimensionMismatch`] if the length differs from the
    /// index dimension, [`TrawlError::InvalidArgument`] for an empty vector.
    fn insert(&mut self, id: ChunkId, vector: Vec<f32>) -> Result<(), TrawlError>;

    /// Return up to `k` nearest ids, most similar first, ties by ascending id.
    ///
    /// # Errors
    ///
    /// [`TrawlError::EmptyIndex`] when no vectors are stored,
    /// [`TrawlError::DimensionMismatch`] for a query of the wrong length.
    fn search(&self, query: &[f32], k: usize, ef_search: usize)
        -> Result<Vec<Neighbor>, TrawlError>;

    /// Remove `id` and every reference to it. Returns `false` if it was absent.
    fn delete(&mut self, id: ChunkId) -> bool;

    /// Whether `id` is stored.
    fn contains(&self, id: ChunkId) -> bool;

    /// The stored vector for `id`.
    fn vector(&self, id: ChunkId) -> Option<&[f32]>;

    /// All stored ids in ascending order.
    fn ids(&self) -> Vec<ChunkId>;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    /// Whether no vectors are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fixed dimension, once known.
    fn dimension(&self) -> Option<usize>;

    /// Graph shape, for indices that keep a proximity graph.
    fn graph_stats(&self) -> Option<HnswStats> {
        None
    }

    /// Serialize the whole index to an opaque, versioned byte blob.
    fn save(&self) -> Vec<u8>;

    /// Rebuild an index from [`VectorIndex::save`] output.
    ///
    /// # Errors
    ///
    /// [`TrawlError::CorruptIndex`] on truncated or inconsistent input.
    fn load(bytes: &[u8]) -> Result<Self, TrawlError>
    where
        Self: Sized;
}

/// Euclidean norm, accumulated in f64.
pub(crate) fn norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity given precomputed norms.
///
/// Accumulates in f64 and clamps to `[-1, 1]` so a vector compared with
/// itself scores exactly `1.0`. Zero vectors score `0.0` against everything.
pub(crate) fn cosine(a: &[f32], norm_a: f64, b: &[f32], norm_b: f64) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0) as f32
}

/// Cosine similarity between two vectors.
///
/// # Examples
///
/// ```
/// use trawl_index::vector::cosine_similarity;
///
/// assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
/// assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
/// assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine(a, norm(a), b, norm(b))
}

pub(crate) fn check_dimension(expected: Option<usize>, actual: usize) -> Result<(), TrawlError> {
    if actual == 0 {
        return Err(TrawlError::InvalidArgument("empty vector".into()));
    }
    match expected {
        Some(expected) if expected != actual => {
            Err(TrawlError::DimensionMismatch { expected, actual })
        }
        _ => Ok(()),
    }
}

const FLAT_MAGIC: &[u8; 8] = b"TRWLFLAT";
const FLAT_VERSION: u32 = 1;

/// Exact index that compares the query against every stored vector.
///
/// # Examples
///
/// ```
/// use trawl_core::ChunkId;
/// use trawl_index::vector::{FlatIndex, VectorIndex};
///
/// let mut index = FlatIndex::default();
/// index.insert(ChunkId::from_raw(1), vec![1.0, 0.0]).unwrap();
/// index.insert(ChunkId::from_raw(2), vec![0.0, 1.0]).unwrap();
/// let hits = index.search(&[0.9, 0.1], 1, 1).unwrap();
/// assert_eq!(hits[0].id, ChunkId::from_raw(1));
/// ```
#[derive(Debug, Default, Clone)]
pub struct FlatIndex {
    dimension: Option<usize>,
    vectors: BTreeMap<ChunkId, (Vec<f32>, f64)>,
}

impl VectorIndex for FlatIndex {
    fn with_config(_config: &IndexConfig) -> Self {
        Self::default()
    }

    fn insert(&mut self, id: ChunkId, vector: Vec<f32>) -> Result<(), TrawlError> {
        check_dimension(self.dimension, vector.len())?;
        self.dimension = Some(vector.len());
        let n = norm(&vector);
        self.vectors.insert(id, (vector, n));
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        _ef_search: usize,
    ) -> Result<Vec<Neighbor>, TrawlError> {
        if self.vectors.is_empty() {
            return Err(TrawlError::EmptyIndex);
        }
        check_dimension(self.dimension, query.len())?;
        let query_norm = norm(query);
        let mut hits: Vec<Neighbor> = self
            .vectors
            .iter()
            .map(|(&id, (v, n))| Neighbor {
                id,
                similarity: cosine(query, query_norm, v, *n),
            })
            .collect();
        hits.sort_by(rank_order);
        hits.truncate(k);
        Ok(hits)
    }

    fn delete(&mut self, id: ChunkId) -> bool {
        self.vectors.remove(&id).is_some()
    }

    fn contains(&self, id: ChunkId) -> bool {
        self.vectors.contains_key(&id)
    }

    fn vector(&self, id: ChunkId) -> Option<&[f32]> {
        self.vectors.get(&id).map(|(v, _)| v.as_slice())
    }

    fn ids(&self) -> Vec<ChunkId> {
        self.vectors.keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn save(&self) -> Vec<u8> {
        let mut w = ByteWriter::new(FLAT_MAGIC, FLAT_VERSION);
        w.put_len(self.dimension.unwrap_or(0));
        w.put_len(self.vectors.len());
        for (id, (vector, _)) in &self.vectors {
            w.put_u64(id.as_u64());
            w.put_f32s(vector);
        }
        w.finish()
    }

    fn load(bytes: &[u8]) -> Result<Self, TrawlError> {
        let mut r = ByteReader::open(bytes, FLAT_MAGIC, FLAT_VERSION)?;
        let dimension = r.len()?;
        let count = r.len()?;
        if count > 0 && dimension == 0 {
            return Err(TrawlError::CorruptIndex("vectors without a dimension".into()));
        }
        let mut vectors = BTreeMap::new();
        for _ in 0..count {
            let id = ChunkId::from_raw(r.u64()?);
            let vector = r.f32s(dimension)?;
            let n = norm(&vector);
            if vectors.insert(id, (vector, n)).is_some() {
                return Err(TrawlError::CorruptIndex(format!("duplicate id {id}")));
            }
        }
        r.finish()?;
        Ok(Self {
            dimension: (dimension > 0).then_some(dimension),
            vectors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ChunkId {
        ChunkId::from_raw(n)
    }

    #[test]
    fn self_similarity_is_exactly_one() {
        let v = [0.3_f32, -1.7, 2.2, 0.01, 9.5];
        assert_eq!(cosine_similarity(&v, &v), 1.0);
    }

    #[test]
    fn rank_order_breaks_ties_by_id() {
        let mut hits = vec![
            Neighbor { id: id(9), similarity: 0.5 },
            Neighbor { id: id(3), similarity: 0.5 },
            Neighbor { id: id(5), similarity: 0.9 },
        ];
        hits.sort_by(rank_order);
        let order: Vec<u64> = hits.iter().map(|h| h.id.as_u64()).collect();
        assert_eq!(order, vec![5, 3, 9]);
    }

    #[test]
    fn flat_rejects_dimension_mismatch() {
        let mut index = FlatIndex::default();
        index.insert(id(1), vec![1.0, 2.0]).unwrap();
        let err = index.insert(id(2), vec![1.0]).unwrap_err();
        assert!(matches!(
            err,
            TrawlError::DimensionMismatch { expected: 2, actual: 1 }
        ));
        assert!(index.search(&[1.0, 2.0, 3.0], 1, 1).is_err());
    }

    #[test]
    fn flat_empty_search_is_empty_index() {
        let index = FlatIndex::default();
        assert!(matches!(
            index.search(&[1.0], 3, 3),
            Err(TrawlError::EmptyIndex)
        ));
    }

    #[test]
    fn flat_delete_absent_is_noop() {
        let mut index = FlatIndex::default();
        assert!(!index.delete(id(4)));
        index.insert(id(4), vec![1.0]).unwrap();
        assert!(index.delete(id(4)));
        assert!(index.is_empty());
    }

    #[test]
    fn flat_roundtrip_keeps_vectors() {
        let mut index = FlatIndex::default();
        index.insert(id(1), vec![1.0, 0.5]).unwrap();
        index.insert(id(2), vec![-1.0, 0.25]).unwrap();
        let loaded = FlatIndex::load(&index.save()).unwrap();
        assert_eq!(loaded.ids(), index.ids());
        assert_eq!(loaded.vector(id(2)), Some(&[-1.0, 0.25][..]));
        assert_eq!(loaded.dimension(), Some(2));
    }
}
