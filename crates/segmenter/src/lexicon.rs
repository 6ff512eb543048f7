//! Fixed word lists shared by segmentation, constraint polarity and negation checks.
//!
//! All matching is case-insensitive, on word boundaries, with typographic apostrophes
//! folded to `'`.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

/// Negation tokens. Alternations are built longest first, so "do not" wins over "not".
pub const NEGATION_TOKENS: &[&str] = &[
    "should not",
    "must not",
    "will not",
    "shouldn't",
    "forbidden",
    "prohibit",
    "mustn't",
    "neither",
    "refrain",
    "do not",
    "cannot",
    "don't",
    "won't",
    "can't",
    "never",
    "avoid",
    "none",
    "not",
    "nor",
    "no",
];

pub const ABSOLUTE_MODIFIERS: &[&str] = &[
    "under no circumstances",
    "at all times",
    "absolutely",
    "definitely",
    "mandatory",
    "essential",
    "certainly",
    "required",
    "critical",
    "always",
    "never",
    "every",
    "must",
    "all",
];

/// Modal and prohibition vocabulary that marks a hard constraint.
pub const HARD_MODALS: &[&str] = &[
    "under no circumstances",
    "absolutely",
    "mandatory",
    "necessary",
    "essential",
    "required",
    "critical",
    "strictly",
    "cannot",
    "always",
    "do not",
    "don't",
    "can't",
    "never",
    "must",
];

/// Modal vocabulary that marks a soft constraint.
pub const SOFT_MODALS: &[&str] = &[
    "recommend",
    "strive to",
    "attempt to",
    "ideally",
    "suggest",
    "should",
    "prefer",
    "try to",
    "aim to",
];

const IMPERATIVE_OPENERS: &[&str] = &[
    "be", "provide", "maintain", "use", "keep", "give", "include", "skip", "decline", "refuse",
    "verify", "admit", "express",
];

fn word_alternation(words: &[&str]) -> String {
    let mut sorted: Vec<&str> = words.to_vec();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    sorted
        .iter()
        .map(|w| regex::escape(w).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|")
}

fn bounded(words: &[&str]) -> Regex {
    Regex::new(&format!(r"\b(?:{})\b", word_alternation(words)))
        .unwrap_or_else(|e| panic!("invalid lexicon pattern: {e}"))
}

static NEGATION_RE: Lazy<Regex> = Lazy::new(|| bounded(NEGATION_TOKENS));
static ABSOLUTE_RE: Lazy<Regex> = Lazy::new(|| bounded(ABSOLUTE_MODIFIERS));
static HARD_RE: Lazy<Regex> = Lazy::new(|| bounded(HARD_MODALS));
static SOFT_RE: Lazy<Regex> = Lazy::new(|| bounded(SOFT_MODALS));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| compile(r"\s+"));

static DIRECTIVE_RE: Lazy<Regex> = Lazy::new(|| {
    let vocabulary = [
        "must",
        "should",
        "need to",
        "have to",
        "required to",
        "never",
        "always",
        "don't",
        "do not",
        "cannot",
        "ensure",
        "make sure",
        "remember to",
        "be sure to",
        "avoid",
        "refrain",
        "prevent",
        "prohibit",
        "prefer",
        "ideally",
        "recommend",
        "suggest",
    ];
    compile(&format!(
        r"\b(?:{})\b|^(?:{})\s",
        word_alternation(&vocabulary),
        word_alternation(IMPERATIVE_OPENERS)
    ))
});

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid lexicon pattern: {e}"))
}

/// Lowercase with typographic apostrophes folded.
#[must_use]
pub fn fold(text: &str) -> String {
    text.to_lowercase().replace('\u{2019}', "'")
}

#[must_use]
pub fn contains_negation(text: &str) -> bool {
    NEGATION_RE.is_match(&fold(text))
}

#[must_use]
pub fn contains_absolute(text: &str) -> bool {
    ABSOLUTE_RE.is_match(&fold(text))
}

#[must_use]
pub fn has_hard_modal(text: &str) -> bool {
    HARD_RE.is_match(&fold(text))
}

#[must_use]
pub fn has_soft_modal(text: &str) -> bool {
    SOFT_RE.is_match(&fold(text))
}

/// Directive indicator: modal or prohibition vocabulary anywhere, or an imperative opener.
#[must_use]
pub fn has_directive_indicator(text: &str) -> bool {
    DIRECTIVE_RE.is_match(fold(text).trim_start())
}

/// Remove every negation token. Text without negation tokens is returned unchanged and
/// unallocated; otherwise the result is lowercased with whitespace collapsed.
#[must_use]
pub fn strip_negations(text: &str) -> Cow<'_, str> {
    let folded = fold(text);
    if !NEGATION_RE.is_match(&folded) {
        return Cow::Borrowed(text);
    }
    let stripped = NEGATION_RE.replace_all(&folded, " ");
    Cow::Owned(WHITESPACE_RE.replace_all(stripped.trim(), " ").into_owned())
}
