use serde::{Deserialize, Serialize};

/// Configuration for directive segmentation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Minimum characters a cleaned line or sentence needs to be considered
    pub min_chars: usize,

    /// Minimum words a directive candidate needs
    pub min_words: usize,

    /// Minimum non-whitespace characters for a whole document
    pub min_document_chars: usize,

    /// Split lines further on `.`, `!` and `;`
    pub split_sentences: bool,

    /// Keep only candidates containing a directive indicator
    pub require_indicator: bool,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_chars: 10,
            min_words: 2,
            min_document_chars: 10,
            split_sentences: true,
            require_indicator: true,
        }
    }
}

impl SegmenterConfig {
    /// Every sufficiently long statement, directive vocabulary or not
    pub fn statements() -> Self {
        Self {
            require_indicator: false,
            ..Default::default()
        }
    }

    /// Whole lines only, no sentence splitting
    pub fn whole_lines() -> Self {
        Self {
            split_sentences: false,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.min_words == 0 {
            return Err("min_words must be > 0".to_string());
        }

        if self.min_document_chars == 0 {
            return Err("min_document_chars must be > 0".to_string());
        }

        if self.min_chars > 200 {
            return Err(format!(
                "min_chars ({}) would discard nearly every directive",
                self.min_chars
            ));
        }

        Ok(())
    }
}
