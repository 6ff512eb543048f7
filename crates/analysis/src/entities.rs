//! Typed span extraction consumed by request value extraction.
//!
//! The [`EntityProvider`] trait is the boundary for any NER backend. [`PatternEntityProvider`]
//! is the built-in regex implementation; it only produces place, date, time, money and
//! number spans.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityLabel {
    Place,
    Date,
    Time,
    Money,
    Person,
    Organization,
    Number,
}

impl EntityLabel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Place => "place",
            Self::Date => "date",
            Self::Time => "time",
            Self::Money => "money",
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Number => "number",
        }
    }
}

/// A labelled span; offsets are byte offsets into the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    pub label: EntityLabel,
    pub start: usize,
    pub end: usize,
}

#[async_trait]
pub trait EntityProvider: Send + Sync {
    /// Spans in ascending `start` order, without overlaps.
    async fn extract_entities(&self, text: &str) -> Result<Vec<Entity>>;
}

const MONTHS: &str = "jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";
const WEEKDAYS: &str = "monday|tuesday|wednesday|thursday|friday|saturday|sunday";

pub(crate) static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)\b(?:today|tomorrow|tonight|next\s+(?:week|month|year|{WEEKDAYS})|this\s+(?:weekend|week|month|{WEEKDAYS})|on\s+(?:{WEEKDAYS})|\d{{4}}-\d{{2}}-\d{{2}}|\d{{1,2}}/\d{{1,2}}(?:/\d{{2,4}})?|(?:{MONTHS})\.?\s+\d{{1,2}}(?:st|nd|rd|th)?(?:,?\s+\d{{4}})?|\d{{1,2}}(?:st|nd|rd|th)?\s+(?:of\s+)?(?:{MONTHS})(?:,?\s+\d{{4}})?)\b"
    ))
});

pub(crate) static TIME_RE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b(?:\d{1,2}(?::\d{2})?\s*(?:am|pm)|\d{1,2}:\d{2}|noon|midnight|morning|afternoon|evening|night)\b",
    )
});

pub(crate) static MONEY_RE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)[$€£]\s?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?|\b(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?\s*(?:dollars|usd|euros?|eur|pounds|gbp)\b",
    )
});

static PLACE_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"\b(?:[Ff]rom|[Tt]o|[Ii]n|[Aa]t|[Vv]ia)\s+([A-Z][\w'-]*(?:\s+[A-Z][\w'-]*)*)")
});

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| compile(r"\b\d+(?:\.\d+)?\b"));

pub(crate) fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid entity pattern: {e}"))
}

/// Regex-backed provider. Earlier labels win when spans overlap: money, date, time,
/// place, then bare numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternEntityProvider;

impl PatternEntityProvider {
    #[must_use]
    pub fn extract(text: &str) -> Vec<Entity> {
        let mut spans: Vec<Entity> = Vec::new();

        let mut push = |label: EntityLabel, start: usize, end: usize| {
            if spans.iter().any(|e| start < e.end && e.start < end) {
                return;
            }
            spans.push(Entity {
                text: text[start..end].to_string(),
                label,
                start,
                end,
            });
        };

        for (label, re) in [
            (EntityLabel::Money, &*MONEY_RE),
            (EntityLabel::Date, &*DATE_RE),
            (EntityLabel::Time, &*TIME_RE),
        ] {
            for m in re.find_iter(text) {
                push(label, m.start(), m.end());
            }
        }
        for caps in PLACE_RE.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                push(EntityLabel::Place, m.start(), m.end());
            }
        }
        for m in NUMBER_RE.find_iter(text) {
            push(EntityLabel::Number, m.start(), m.end());
        }

        spans.sort_by_key(|e| e.start);
        spans
    }
}

#[async_trait]
impl EntityProvider for PatternEntityProvider {
    async fn extract_entities(&self, text: &str) -> Result<Vec<Entity>> {
        Ok(Self::extract(text))
    }
}
