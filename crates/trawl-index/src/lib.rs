//! Hybrid retrieval over source code.
//!
//! Files are cut into line-window chunks, embedded, and indexed twice: in an
//! HNSW proximity graph for semantic similarity and in a BM25 inverted index
//! for exact terms. Queries run against both and the rankings are merged
//! with weighted Reciprocal Rank Fusion. [`IndexCoordinator`] owns all of it.

pub mod chunker;
pub mod coordinator;
pub mod embedding;
pub mod fusion;
pub mod lexical;
pub mod store;
pub mod vector;

pub use coordinator::{BatchReport, CoordinatorStats, IndexCoordinator, IndexOutcome, RepairReport};
pub use lexical::LexicalIndex;
pub use store::MetadataStore;
pub use vector::{FlatIndex, HnswIndex, VectorIndex};
