use thiserror::Error;

/// Result type for segmentation
pub type Result<T> = std::result::Result<T, SegmenterError>;

/// Errors raised before any classification work starts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmenterError {
    /// Document is empty or whitespace only
    #[error("Empty content provided")]
    EmptyContent,

    /// Document has too little text to analyse
    #[error("Content too short: {chars} characters (minimum {min})")]
    TooShort { chars: usize, min: usize },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SegmenterError {
    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Both input variants are caller mistakes rather than configuration problems.
    #[must_use]
    pub const fn is_malformed_input(&self) -> bool {
        matches!(self, Self::EmptyContent | Self::TooShort { .. })
    }
}
