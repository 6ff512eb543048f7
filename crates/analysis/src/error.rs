use prompt_segmenter::SegmenterError;
use prompt_vector_store::VectorStoreError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Embedding backend failure or anchor lookup problem.
    #[error(transparent)]
    Embedding(#[from] VectorStoreError),

    /// Empty or too-short input document.
    #[error("Malformed input: {0}")]
    Input(#[from] SegmenterError),

    #[error("Anchor configuration error: {0}")]
    AnchorConfig(String),

    #[error("Entity provider failed: {0}")]
    Entity(String),

    #[error("{0}")]
    Other(String),
}

impl AnalysisError {
    /// Flatten an `anyhow` chain from configuration parsing.
    pub fn anchor_config(err: &anyhow::Error) -> Self {
        Self::AnchorConfig(format!("{err:#}"))
    }

    pub fn entity(msg: impl Into<String>) -> Self {
        Self::Entity(msg.into())
    }

    /// Stable machine-readable code for error envelopes.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Embedding(VectorStoreError::Timeout { .. }) => "timeout",
            Self::Embedding(
                VectorStoreError::UnknownAnchorSet(_) | VectorStoreError::CacheMismatch(_),
            )
            | Self::AnchorConfig(_) => "anchor_config",
            Self::Embedding(_) => "embedding_unavailable",
            Self::Input(SegmenterError::InvalidConfig(_)) => "invalid_config",
            Self::Input(_) => "malformed_input",
            Self::Entity(_) => "entity_unavailable",
            Self::Other(_) => "internal",
        }
    }

    #[must_use]
    pub const fn is_provider_failure(&self) -> bool {
        match self {
            Self::Embedding(err) => err.is_provider_failure(),
            Self::Entity(_) => true,
            _ => false,
        }
    }
}
