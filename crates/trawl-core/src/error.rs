/// Errors that can occur across the trawl engine.
///
/// Index-local faults (a single file or chunk) are reported per file by the
/// coordinator; only snapshot corruption and dimension mismatches are meant to
/// reach the caller as hard errors. The binary crate converts to
/// `miette::Report` at the boundary.
///
/// # Examples
///
/// ```
/// use trawl_core::TrawlError;
///
/// let err = TrawlError::DimensionMismatch { expected: 3, actual: 4 };
/// assert!(err.to_string().contains("expected 3"));
/// assert!(!err.is_recoverable());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum TrawlError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A vector's length differs from the dimension fixed by the index.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension fixed at first insertion.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// A search was issued against an index holding no vectors.
    #[error("vector index is empty")]
    EmptyIndex,

    /// A serialized vector index could not be decoded.
    #[error("corrupt vector index: {0}")]
    CorruptIndex(String),

    /// The embedder failed or returned an unusable response.
    #[error("embedder unavailable: {0}")]
    EmbedderUnavailable(String),

    /// The embedder did not answer within the configured bound.
    #[error("embedding request timed out after {secs}s")]
    EmbedderTimeout {
        /// The timeout that expired, in seconds.
        secs: u64,
    },

    /// The metadata snapshot is unreadable.
    #[error("metadata store corrupt: {0}")]
    StoreCorrupt(String),

    /// Writing the metadata snapshot failed.
    #[error("database error: {0}")]
    Database(String),

    /// A caller-supplied argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TrawlError {
    /// Whether the fault leaves prior indexed state intact and may be retried.
    ///
    /// # Examples
    ///
    /// ```
    /// use trawl_core::TrawlError;
    ///
    /// assert!(TrawlError::EmbedderTimeout { secs: 30 }.is_recoverable());
    /// assert!(!TrawlError::CorruptIndex("bad magic".into()).is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TrawlError::EmbedderUnavailable(_)
                | TrawlError::EmbedderTimeout { .. }
                | TrawlError::StoreCorrupt(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TrawlError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn config_error_displays_message() {
        let err = TrawlError::Config("bad value".into());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn timeout_shows_seconds() {
        let err = TrawlError::EmbedderTimeout { secs: 5 };
        assert_eq!(err.to_string(), "embedding request timed out after 5s");
    }

    #[test]
    fn only_embedder_and_store_faults_are_recoverable() {
        assert!(TrawlError::EmbedderUnavailable("down".into()).is_recoverable());
        assert!(TrawlError::StoreCorrupt("truncated".into()).is_recoverable());
        assert!(!TrawlError::EmptyIndex.is_recoverable());
        assert!(!TrawlError::DimensionMismatch {
            expected: 2,
            actual: 3
        }
        .is_recoverable());
    }
}
