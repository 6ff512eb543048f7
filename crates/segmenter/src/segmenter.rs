use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::SegmenterConfig;
use crate::error::{Result, SegmenterError};
use crate::lexicon::has_directive_indicator;
use crate::types::{DirectiveUnit, DocumentLine, LineKind};

static LIST_MARKER_RE: Lazy<Regex> = Lazy::new(|| compile(r"^(?:(?:[-*+•]|\d+[.)]\s)\s*)+"));
static SENTENCE_RE: Lazy<Regex> = Lazy::new(|| compile(r"[.!;]\s+"));

const SEPARATOR_CHARS: &[char] = &['-', '=', '*', '_', '~', '#', '.', '+'];
const MAX_LABEL_WORDS: usize = 6;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid segmenter pattern: {e}"))
}

/// Split `text` into numbered lines and classify each one.
#[must_use]
pub fn document_lines(text: &str) -> Vec<DocumentLine> {
    text.lines()
        .enumerate()
        .map(|(idx, raw)| {
            let (kind, content) = classify_line(raw);
            DocumentLine {
                number: idx + 1,
                kind,
                content,
            }
        })
        .collect()
}

fn classify_line(raw: &str) -> (LineKind, String) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return (LineKind::Blank, String::new());
    }
    if trimmed.chars().all(|c| SEPARATOR_CHARS.contains(&c)) {
        return (LineKind::Separator, String::new());
    }
    if trimmed.starts_with('#') || trimmed.starts_with('=') {
        let label = trimmed.trim_matches(|c: char| c == '#' || c == '=' || c.is_whitespace());
        return (LineKind::Header, label.to_string());
    }

    let content = LIST_MARKER_RE.replace(trimmed, "").trim().to_string();
    if content.is_empty() {
        return (LineKind::Separator, content);
    }
    if content.ends_with(':') || is_caps_label(&content) {
        return (LineKind::Header, content);
    }
    (LineKind::Content, content)
}

fn is_caps_label(text: &str) -> bool {
    let mut has_letter = false;
    for c in text.chars() {
        if c.is_lowercase() {
            return false;
        }
        has_letter |= c.is_alphabetic();
    }
    has_letter && text.unicode_words().count() <= MAX_LABEL_WORDS
}

/// Splits documents into directive units
#[derive(Debug, Clone, Default)]
pub struct DirectiveSegmenter {
    config: SegmenterConfig,
}

impl DirectiveSegmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        config.validate().map_err(SegmenterError::invalid_config)?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Reject empty or near-empty documents before any classification work.
    pub fn validate_document(&self, text: &str) -> Result<()> {
        let chars = text.chars().filter(|c| !c.is_whitespace()).count();
        if chars == 0 {
            return Err(SegmenterError::EmptyContent);
        }
        if chars < self.config.min_document_chars {
            return Err(SegmenterError::TooShort {
                chars,
                min: self.config.min_document_chars,
            });
        }
        Ok(())
    }

    /// Directive units of `text` in source order.
    pub fn segment(&self, text: &str) -> Result<Vec<DirectiveUnit>> {
        self.validate_document(text)?;
        let lines = document_lines(text);
        let units = self.segment_lines(&lines);
        log::debug!(
            "Segmented {} directive units from {} lines",
            units.len(),
            lines.len()
        );
        Ok(units)
    }

    /// Directive units from already classified lines. Headers and separators never
    /// produce units.
    #[must_use]
    pub fn segment_lines(&self, lines: &[DocumentLine]) -> Vec<DirectiveUnit> {
        let mut units = Vec::new();
        for line in lines.iter().filter(|l| l.is_content()) {
            if line.content.chars().count() < self.config.min_chars {
                continue;
            }
            let sentences: Vec<&str> = if self.config.split_sentences {
                SENTENCE_RE.split(&line.content).collect()
            } else {
                vec![line.content.as_str()]
            };
            let multi = sentences.len() > 1;
            for (idx, sentence) in sentences.into_iter().enumerate() {
                let sentence = sentence.trim();
                if !self.accepts(sentence) {
                    continue;
                }
                let text = sentence.trim_end_matches(['.', '!', ';']).trim_end();
                units.push(DirectiveUnit {
                    text: text.to_string(),
                    line: line.number,
                    clause: multi.then_some(idx),
                });
            }
        }
        units
    }

    fn accepts(&self, sentence: &str) -> bool {
        if sentence.chars().count() < self.config.min_chars {
            return false;
        }
        if sentence.unicode_words().count() < self.config.min_words {
            return false;
        }
        !self.config.require_indicator || has_directive_indicator(sentence)
    }
}
