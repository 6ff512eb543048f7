use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// Text-to-vector backend consumed by [`crate::EmbeddingManager`].
///
/// Implementations may return unnormalised vectors; the manager normalises before caching.
/// A failing backend must return an error rather than placeholder vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts).await
    }
}
