//! Core types, configuration, and error handling for trawl.
//!
//! This crate provides the shared foundation used by the index crate and the CLI:
//! - [`TrawlError`]: unified error type using `thiserror`
//! - [`TrawlConfig`]: configuration loaded from `.trawl.toml`
//! - Shared types: [`Chunk`], [`ChunkId`], [`FileRecord`], [`SourceFile`],
//!   [`SearchRequest`], [`SearchResponse`], [`SearchHit`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{ChunkingConfig, EmbeddingConfig, IndexConfig, SearchConfig, TrawlConfig};
pub use error::TrawlError;
pub use types::{
    fingerprint, Chunk, ChunkId, FileRecord, OutputFormat, SearchHit, SearchRequest,
    SearchResponse, SourceFile,
};

/// A convenience `Result` type for trawl operations.
pub type Result<T> = std::result::Result<T, TrawlError>;
