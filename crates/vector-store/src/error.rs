use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorStoreError>;

#[derive(Error, Debug)]
pub enum VectorStoreError {
    /// The embedding backend could not be reached or failed to produce vectors.
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding call timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// An anchor set was requested that was never precomputed.
    #[error("Unknown anchor set '{0}'")]
    UnknownAnchorSet(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Precomputed anchors do not match this configuration: {0}")]
    CacheMismatch(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl VectorStoreError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable(msg.into())
    }

    /// Provider-side failures (including timeouts) as opposed to configuration mistakes.
    #[must_use]
    pub const fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable(_) | Self::Timeout { .. } | Self::InvalidDimension { .. }
        )
    }
}
