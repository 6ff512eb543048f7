//! # Prompt Segmenter
//!
//! Splits instruction documents into atomic directive units.
//!
//! ## Pipeline
//!
//! ```text
//! Document
//!     │
//!     ├──> Lines (blank / separator / header / content, list markers stripped)
//!     │
//!     ├──> Sentences (split on `.`, `!`, `;` followed by whitespace)
//!     │
//!     └──> Directive filter
//!          ├─> minimum length and word count
//!          └─> directive vocabulary (modals, prohibitions, imperative openers)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use prompt_segmenter::{strip_negations, DirectiveSegmenter};
//!
//! let segmenter = DirectiveSegmenter::default();
//! let units = segmenter
//!     .segment("RULES:\n- Always verify user credentials\n- Never verify user credentials")
//!     .unwrap();
//! assert_eq!(units.len(), 2);
//! assert_eq!(units[1].line, 3);
//! assert_eq!(strip_negations(&units[1].text), "verify user credentials");
//! ```

mod config;
mod error;
mod lexicon;
mod segmenter;
mod types;

pub use config::SegmenterConfig;
pub use error::{Result, SegmenterError};
pub use lexicon::{
    contains_absolute, contains_negation, fold, has_directive_indicator, has_hard_modal,
    has_soft_modal, strip_negations, ABSOLUTE_MODIFIERS, HARD_MODALS, NEGATION_TOKENS,
    SOFT_MODALS,
};
pub use segmenter::{document_lines, DirectiveSegmenter};
pub use types::{DirectiveUnit, DocumentLine, LineKind};
