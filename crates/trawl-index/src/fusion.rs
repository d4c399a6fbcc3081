//! Weighted Reciprocal Rank Fusion.
//!
//! Each source contributes `weight / (k + rank)` for every id it returned.
//! Ranks are 1-based positions in the source list; an id missing from a
//! source gets nothing from it, and a source whose weight is zero is skipped
//! entirely, so `alpha = 1.0` and `alpha = 0.0` reproduce the vector and
//! lexical orders exactly.

use std::collections::HashMap;

use trawl_core::{ChunkId, TrawlError};

/// Default smoothing constant.
pub const DEFAULT_RRF_K: usize = 60;

/// An entry of one source ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedHit {
    /// Ranked chunk.
    pub id: ChunkId,
    /// The source's own score (cosine similarity or BM25).
    pub raw_score: f64,
    /// 1-based position in the source list.
    pub rank: usize,
}

/// Attach 1-based ranks to an already sorted `(id, score)` list.
///
/// # Examples
///
/// ```
/// use trawl_core::ChunkId;
/// use trawl_index::fusion::ranked;
///
/// let hits = ranked([(ChunkId::from_raw(7), 0.9), (ChunkId::from_raw(3), 0.4)]);
/// assert_eq!(hits[0].rank, 1);
/// assert_eq!(hits[1].id, ChunkId::from_raw(3));
/// ```
pub fn ranked(hits: impl IntoIterator<Item = (ChunkId, f64)>) -> Vec<RankedHit> {
    hits.into_iter()
        .enumerate()
        .map(|(i, (id, raw_score))| RankedHit {
            id,
            raw_score,
            rank: i + 1,
        })
        .collect()
}

/// One fused result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusedHit {
    /// Chunk id.
    pub id: ChunkId,
    /// Weighted reciprocal-rank score.
    pub score: f64,
    /// Raw vector score, if the vector list contained the id.
    pub vector_score: Option<f64>,
    /// Raw lexical score, if the lexical list contained the id.
    pub lexical_score: Option<f64>,
}

#[derive(Default)]
struct Accumulator {
    score: f64,
    vector_score: Option<f64>,
    lexical_score: Option<f64>,
}

/// Merge two rankings. `alpha` weighs the vector list, `1 - alpha` the lexical one.
///
/// Output is sorted by descending fused score, ties by ascending id.
///
/// # Errors
///
/// Returns [`TrawlError::InvalidArgument`] if `alpha` is outside `[0, 1]`.
///
/// # Examples
///
/// ```
/// use trawl_core::ChunkId;
/// use trawl_index::fusion::{fuse, ranked};
///
/// let a = ChunkId::from_raw(1);
/// let b = ChunkId::from_raw(2);
/// let vector = ranked([(a, 0.9), (b, 0.8)]);
/// let lexical = ranked([(b, 3.2)]);
///
/// let fused = fuse(&vector, &lexical, 0.5, 60).unwrap();
/// assert_eq!(fused[0].id, b);
/// assert!(fuse(&[], &[], 0.5, 60).unwrap().is_empty());
/// ```
pub fn fuse(
    vector: &[RankedHit],
    lexical: &[RankedHit],
    alpha: f64,
    k: usize,
) -> Result<Vec<FusedHit>, TrawlError> {
    if !(0.0..=1.0).contains(&alpha) {
        return Err(TrawlError::InvalidArgument(format!(
            "alpha must be within [0, 1], got {alpha}"
        )));
    }
    let k = k as f64;
    let mut scores: HashMap<ChunkId, Accumulator> = HashMap::new();

    if alpha > 0.0 {
        for hit in vector {
            let entry = scores.entry(hit.id).or_default();
            entry.score += alpha / (k + hit.rank as f64);
            entry.vector_score = Some(hit.raw_score);
        }
    }
    if alpha < 1.0 {
        let weight = 1.0 - alpha;
        for hit in lexical {
            let entry = scores.entry(hit.id).or_default();
            entry.score += weight / (k + hit.rank as f64);
            entry.lexical_score = Some(hit.raw_score);
        }
    }

    let mut fused: Vec<FusedHit> = scores
        .into_iter()
        .map(|(id, acc)| FusedHit {
            id,
            score: acc.score,
            vector_score: acc.vector_score,
            lexical_score: acc.lexical_score,
        })
        .collect();
    fused.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    Ok(fused)
}

/// The `[offset, offset + limit)` window of a fused list.
pub fn paginate(fused: &[FusedHit], offset: usize, limit: usize) -> &[FusedHit] {
    let start = offset.min(fused.len());
    let end = start.saturating_add(limit).min(fused.len());
    &fused[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ChunkId {
        ChunkId::from_raw(n)
    }

    fn ids(hits: &[FusedHit]) -> Vec<u64> {
        hits.iter().map(|h| h.id.as_u64()).collect()
    }

    fn lists() -> (Vec<RankedHit>, Vec<RankedHit>) {
        let vector = ranked([(id(5), 0.95), (id(2), 0.9), (id(8), 0.7), (id(1), 0.1)]);
        let lexical = ranked([(id(1), 7.0), (id(3), 5.5), (id(5), 2.0)]);
        (vector, lexical)
    }

    #[test]
    fn shared_results_rank_higher() {
        let vector = ranked([(id(10), 0.9), (id(20), 0.8)]);
        let lexical = ranked([(id(30), 4.0), (id(20), 3.0)]);
        let fused = fuse(&vector, &lexical, 0.5, DEFAULT_RRF_K).unwrap();
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].id, id(20));
        assert_eq!(fused[0].vector_score, Some(0.8));
        assert_eq!(fused[0].lexical_score, Some(3.0));
    }

    #[test]
    fn alpha_one_reproduces_vector_order() {
        let (vector, lexical) = lists();
        let fused = fuse(&vector, &lexical, 1.0, DEFAULT_RRF_K).unwrap();
        assert_eq!(ids(&fused), vec![5, 2, 8, 1]);
        assert!(fused.iter().all(|h| h.lexical_score.is_none()));
    }

    #[test]
    fn alpha_zero_reproduces_lexical_order() {
        let (vector, lexical) = lists();
        let fused = fuse(&vector, &lexical, 0.0, DEFAULT_RRF_K).unwrap();
        assert_eq!(ids(&fused), vec![1, 3, 5]);
    }

    #[test]
    fn equal_scores_break_ties_by_id() {
        let vector = ranked([(id(9), 0.9)]);
        let lexical = ranked([(id(4), 1.0)]);
        let fused = fuse(&vector, &lexical, 0.5, DEFAULT_RRF_K).unwrap();
        assert_eq!(ids(&fused), vec![4, 9]);
        assert_eq!(fused[0].score, fused[1].score);
    }

    #[test]
    fn score_matches_formula() {
        let (vector, lexical) = lists();
        let fused = fuse(&vector, &lexical, 0.3, 60).unwrap();
        let five = fused.iter().find(|h| h.id == id(5)).unwrap();
        let expected = 0.3 / 61.0 + 0.7 / 63.0;
        assert!((five.score - expected).abs() < 1e-12);
    }

    #[test]
    fn alpha_out_of_range_is_rejected() {
        assert!(fuse(&[], &[], 1.5, 60).is_err());
        assert!(fuse(&[], &[], -0.1, 60).is_err());
        assert!(fuse(&[], &[], f64::NAN, 60).is_err());
    }

    #[test]
    fn pages_are_disjoint_and_contiguous() {
        let vector = ranked((1..=5).map(|n| (id(n), 1.0 - n as f64 / 10.0)));
        let fused = fuse(&vector, &[], 0.5, 60).unwrap();
        let first = paginate(&fused, 0, 2);
        let second = paginate(&fused, 2, 2);
        assert_eq!(ids(first), vec![1, 2]);
        assert_eq!(ids(second), vec![3, 4]);
        assert_eq!(ids(paginate(&fused, 4, 10)), vec![5]);
        assert!(paginate(&fused, 9, 2).is_empty());
    }
}
