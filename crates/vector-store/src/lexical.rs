//! Deterministic bag-of-words embedder used for offline runs and tests.
//!
//! Every distinct token gets its own dimension (first come, first served) until the space is
//! exhausted; after that tokens hash into the existing dimensions. Vectors are binary token
//! sets scaled to unit length, so similarity is the overlap ratio of the two token sets and
//! does not depend on the order in which tokens were first seen.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::Result;
use crate::provider::EmbeddingProvider;
use crate::similarity::normalize;

pub const LEXICAL_DIMENSION: usize = 4096;
pub const LEXICAL_MODEL_ID: &str = "lexical-stub";

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "to", "of", "and", "for", "with", "in", "on", "by", "it", "is", "are",
    "your", "you",
];

pub struct LexicalEmbedder {
    dimension: usize,
    vocabulary: Mutex<HashMap<String, usize>>,
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl LexicalEmbedder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_dimension(LEXICAL_DIMENSION)
    }

    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            vocabulary: Mutex::new(HashMap::new()),
        }
    }

    /// Lowercased content words of `text`, deduplicated in first-seen order.
    #[must_use]
    pub fn tokens(text: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for word in text.unicode_words() {
            let token = word
                .to_lowercase()
                .replace('\u{2019}', "'")
                .trim_matches('\'')
                .to_string();
            if token.is_empty() || STOP_WORDS.contains(&token.as_str()) {
                continue;
            }
            if !seen.contains(&token) {
                seen.push(token);
            }
        }
        seen
    }

    pub(crate) fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimension];
        let tokens = Self::tokens(text);
        if tokens.is_empty() {
            return vec;
        }
        let mut vocabulary = self
            .vocabulary
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for token in tokens {
            let next = vocabulary.len();
            let slot = match vocabulary.get(&token) {
                Some(slot) => *slot,
                None if next < self.dimension => {
                    vocabulary.insert(token, next);
                    next
                }
                None => (fnv1a_64(token.as_bytes()) % self.dimension as u64) as usize,
            };
            vec[slot] = 1.0;
        }
        drop(vocabulary);
        normalize(&mut vec);
        vec
    }
}

#[async_trait]
impl EmbeddingProvider for LexicalEmbedder {
    fn model_id(&self) -> &str {
        LEXICAL_MODEL_ID
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

pub(crate) fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::cosine_similarity;
    use pretty_assertions::assert_eq;

    #[test]
    fn tokens_drop_stop_words_and_keep_contractions() {
        assert_eq!(
            LexicalEmbedder::tokens("Don't share the user's card, ever!"),
            vec!["don't", "share", "user's", "card", "ever"]
        );
        assert_eq!(LexicalEmbedder::tokens("step-by-step"), vec!["step"]);
    }

    #[test]
    fn similarity_is_token_overlap() {
        let embedder = LexicalEmbedder::new();
        let a = embedder.embed_text("always verify user credentials");
        let b = embedder.embed_text("verify user credentials");
        let expected = 3.0 / (2.0 * 3f32.sqrt());
        assert!((cosine_similarity(&a, &b) - expected).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = LexicalEmbedder::with_dimension(8);
        assert!(embedder.embed_text("the a an").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn overflow_tokens_still_land_in_range() {
        let embedder = LexicalEmbedder::with_dimension(2);
        let vec = embedder.embed_text("alpha beta gamma delta");
        assert_eq!(vec.len(), 2);
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
