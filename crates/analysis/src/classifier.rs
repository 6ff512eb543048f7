use std::sync::Arc;

use prompt_vector_store::{Embedding, EmbeddingManager};

use crate::config::AnchorConfig;
use crate::error::Result;

/// Best anchor set for a vector.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorMatch {
    pub set: String,
    pub score: f32,
}

/// Max-over-exemplars matching against named anchor sets.
///
/// A set's score for a vector is the highest similarity across its phrase vectors. Sets
/// must be precomputed through [`AnchorClassifier::prepare`] before they are queried; a
/// missing set is a configuration error, never a threshold miss.
#[derive(Clone)]
pub struct AnchorClassifier {
    manager: Arc<EmbeddingManager>,
}

impl AnchorClassifier {
    pub fn new(manager: Arc<EmbeddingManager>) -> Self {
        Self { manager }
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<EmbeddingManager> {
        &self.manager
    }

    /// Embed every anchor set and specificity centroid named by `config`.
    pub async fn prepare(&self, config: &AnchorConfig) -> Result<()> {
        let anchors = self.manager.precompute_anchors(config.anchor_table()).await?;
        let centroids = self
            .manager
            .precompute_centroids(config.centroid_table())
            .await?;
        log::info!(
            "Anchor sets ready: {anchors} new matrices, {centroids} new centroids (model {})",
            self.manager.model_id()
        );
        self.require_sets(config)
    }

    /// Fail when any set or centroid `config` needs has no vectors.
    pub fn require_sets(&self, config: &AnchorConfig) -> Result<()> {
        for (name, _) in config.anchor_table() {
            self.manager.anchor(&name)?;
        }
        for (name, _) in config.centroid_table() {
            self.manager.centroid(&name)?;
        }
        Ok(())
    }

    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.manager.encode(text).await?)
    }

    pub async fn embed_batch<S: AsRef<str> + Sync>(&self, texts: &[S]) -> Result<Vec<Embedding>> {
        Ok(self.manager.encode_batch(texts).await?)
    }

    #[must_use]
    pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
        EmbeddingManager::cosine_similarity(a, b)
    }

    /// Max similarity between `vector` and the phrases of `set`.
    pub fn score(&self, vector: &[f32], set: &str) -> Result<f32> {
        Ok(self.manager.anchor(set)?.max_similarity(vector))
    }

    /// Highest scoring set, accepted when its score reaches `threshold`. Ties keep the
    /// earlier set.
    pub fn best_match<S: AsRef<str>>(
        &self,
        vector: &[f32],
        sets: &[S],
        threshold: f32,
    ) -> Result<Option<AnchorMatch>> {
        let mut best: Option<AnchorMatch> = None;
        for set in sets {
            let set = set.as_ref();
            let score = self.score(vector, set)?;
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(AnchorMatch {
                    set: set.to_string(),
                    score,
                });
            }
        }
        Ok(best.filter(|b| b.score >= threshold))
    }

    /// Scores against two opposite sets, in the order given.
    pub fn polar_scores(&self, vector: &[f32], first: &str, second: &str) -> Result<[f32; 2]> {
        Ok([self.score(vector, first)?, self.score(vector, second)?])
    }

    /// Similarity to each named centroid, in order.
    pub fn centroid_similarities<S: AsRef<str>>(
        &self,
        vector: &[f32],
        names: &[S],
    ) -> Result<Vec<f32>> {
        names
            .iter()
            .map(|name| {
                let centroid = self.manager.centroid(name.as_ref())?;
                Ok(Self::similarity(vector, &centroid))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parameter_set;
    use prompt_vector_store::{LexicalEmbedder, VectorStoreError};

    use crate::error::AnalysisError;

    async fn prepared() -> AnchorClassifier {
        let manager = Arc::new(EmbeddingManager::new(Arc::new(LexicalEmbedder::new())));
        let classifier = AnchorClassifier::new(manager);
        classifier
            .prepare(&AnchorConfig::builtin().unwrap())
            .await
            .unwrap();
        classifier
    }

    #[tokio::test]
    async fn best_match_picks_highest_set_above_threshold() {
        let classifier = prepared().await;
        let vector = classifier.embed("Destination city").await.unwrap();
        let sets = [
            parameter_set("origin"),
            parameter_set("destination"),
            parameter_set("date"),
        ];

        let hit = classifier.best_match(&vector, &sets, 0.6).unwrap().unwrap();
        assert_eq!(hit.set, "param:destination");
        assert!((hit.score - 1.0).abs() < 1e-5);

        let vector = classifier.embed("Greet everyone warmly").await.unwrap();
        assert!(classifier.best_match(&vector, &sets, 0.6).unwrap().is_none());
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let classifier = prepared().await;
        let vector = classifier.embed("Destination city").await.unwrap();
        let sets = [parameter_set("destination")];
        assert!(classifier.best_match(&vector, &sets, 1.0 - 1e-6).unwrap().is_some());
    }

    #[tokio::test]
    async fn polar_scores_follow_pole_order() {
        let classifier = prepared().await;
        let vector = classifier.embed("Be brief").await.unwrap();
        let [concise, detailed] = classifier
            .polar_scores(&vector, "behavior:brevity:concise", "behavior:brevity:detailed")
            .unwrap();
        assert!(concise > 0.99, "{concise}");
        assert!(detailed < concise);
    }

    #[tokio::test]
    async fn unknown_set_is_a_configuration_error() {
        let classifier = prepared().await;
        let vector = classifier.embed("anything at all").await.unwrap();
        let err = classifier.score(&vector, "param:missing").unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Embedding(VectorStoreError::UnknownAnchorSet(_))
        ));
        assert_eq!(err.code(), "anchor_config");
    }

    #[tokio::test]
    async fn centroids_are_required_after_prepare() {
        let classifier = prepared().await;
        let vector = classifier.embed("tomorrow").await.unwrap();
        let sims = classifier
            .centroid_similarities(
                &vector,
                &["specificity:date:specific", "specificity:date:moderate"],
            )
            .unwrap();
        assert_eq!(sims.len(), 2);
        assert!(sims[1] > sims[0]);
    }
}
