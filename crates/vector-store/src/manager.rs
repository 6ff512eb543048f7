use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, VectorStoreError};
use crate::provider::EmbeddingProvider;
use crate::similarity::{centroid, cosine_similarity, cosine_similarity_batch, normalize};

/// Unit-length vector shared between the cache and its readers.
pub type Embedding = Arc<[f32]>;

pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(30);
const PRECOMPUTED_SCHEMA_VERSION: u32 = 1;

/// Precomputed vectors for one named anchor set, one row per phrase.
#[derive(Debug, Clone)]
pub struct AnchorMatrix {
    phrases: Vec<String>,
    matrix: Array2<f32>,
}

impl AnchorMatrix {
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    #[must_use]
    pub const fn matrix(&self) -> &Array2<f32> {
        &self.matrix
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    #[must_use]
    pub fn similarities(&self, query: &[f32]) -> Vec<f32> {
        cosine_similarity_batch(query, &self.matrix)
    }

    /// Best similarity of `query` against any phrase in the set.
    #[must_use]
    pub fn max_similarity(&self, query: &[f32]) -> f32 {
        self.similarities(query)
            .into_iter()
            .fold(f32::NEG_INFINITY, f32::max)
            .max(-1.0)
    }
}

#[derive(Debug, Clone)]
struct Centroid {
    phrases: Vec<String>,
    vector: Embedding,
}

/// Cache-backed front for an [`EmbeddingProvider`].
///
/// Owns the text cache, the anchor matrices and the specificity centroids. Reads never
/// block on each other; cache population is serialized so a text is sent to the provider
/// at most once while it stays cached.
pub struct EmbeddingManager {
    provider: Arc<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, Embedding>>,
    fill: tokio::sync::Mutex<()>,
    anchors: RwLock<HashMap<String, Arc<AnchorMatrix>>>,
    centroids: RwLock<HashMap<String, Centroid>>,
    timeout: Duration,
}

impl EmbeddingManager {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            cache: RwLock::new(HashMap::new()),
            fill: tokio::sync::Mutex::new(()),
            anchors: RwLock::new(HashMap::new()),
            centroids: RwLock::new(HashMap::new()),
            timeout: DEFAULT_EMBED_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub async fn encode(&self, text: &str) -> Result<Embedding> {
        let mut out = self.encode_batch(&[text]).await?;
        out.pop()
            .ok_or_else(|| VectorStoreError::unavailable("Empty embedding result"))
    }

    /// Encode `texts` in order, sending only uncached, distinct strings to the provider.
    pub async fn encode_batch<S: AsRef<str> + Sync>(&self, texts: &[S]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(hit) = self.lookup_all(texts) {
            return Ok(hit);
        }

        let _fill = self.fill.lock().await;
        let missing: Vec<String> = {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            let mut missing: Vec<String> = Vec::new();
            for text in texts {
                let text = text.as_ref();
                if !cache.contains_key(text) && !missing.iter().any(|m| m == text) {
                    missing.push(text.to_string());
                }
            }
            missing
        };

        let mut fresh: HashMap<String, Embedding> = HashMap::with_capacity(missing.len());
        if !missing.is_empty() {
            let vectors = self.call_provider(&missing).await?;
            log::debug!(
                "Embedded {} new texts ({} requested)",
                missing.len(),
                texts.len()
            );
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            for (text, vector) in missing.into_iter().zip(vectors) {
                cache.insert(text.clone(), vector.clone());
                fresh.insert(text, vector);
            }
        }

        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        texts
            .iter()
            .map(|text| {
                let text = text.as_ref();
                fresh
                    .get(text)
                    .or_else(|| cache.get(text))
                    .cloned()
                    .ok_or_else(|| {
                        VectorStoreError::Other(format!("Embedding for '{text}' was evicted"))
                    })
            })
            .collect()
    }

    fn lookup_all<S: AsRef<str>>(&self, texts: &[S]) -> Option<Vec<Embedding>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        texts
            .iter()
            .map(|text| cache.get(text.as_ref()).cloned())
            .collect()
    }

    async fn call_provider(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let raw = tokio::time::timeout(self.timeout, self.provider.embed_batch(texts))
            .await
            .map_err(|_| VectorStoreError::Timeout {
                millis: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })??;

        if raw.len() != texts.len() {
            return Err(VectorStoreError::unavailable(format!(
                "Provider returned {} vectors for {} texts",
                raw.len(),
                texts.len()
            )));
        }
        let expected = self.dimension();
        raw.into_iter()
            .map(|mut vector| {
                if vector.len() != expected {
                    return Err(VectorStoreError::InvalidDimension {
                        expected,
                        actual: vector.len(),
                    });
                }
                if vector.iter().any(|v| !v.is_finite()) {
                    return Err(VectorStoreError::unavailable(
                        "Provider returned a non-finite vector",
                    ));
                }
                normalize(&mut vector);
                Ok(Embedding::from(vector))
            })
            .collect()
    }

    /// Drop every cached text vector. Anchor matrices and centroids are kept.
    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Encode and store one matrix per named phrase list. Sets already present with the
    /// same phrases (for example loaded from disk) are not recomputed.
    pub async fn precompute_anchors<I>(&self, table: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let pending: Vec<(String, Vec<String>)> = {
            let anchors = self.anchors.read().unwrap_or_else(PoisonError::into_inner);
            table
                .into_iter()
                .filter(|(name, phrases)| {
                    anchors
                        .get(name)
                        .map_or(true, |existing| existing.phrases != *phrases)
                })
                .collect()
        };

        let mut built = Vec::with_capacity(pending.len());
        for (name, phrases) in pending {
            if phrases.is_empty() {
                return Err(VectorStoreError::Other(format!(
                    "Anchor set '{name}' has no phrases"
                )));
            }
            let vectors = self.encode_batch(&phrases).await?;
            let matrix = stack_rows(&vectors, self.dimension())?;
            built.push((name, Arc::new(AnchorMatrix { phrases, matrix })));
        }

        let count = built.len();
        let mut anchors = self.anchors.write().unwrap_or_else(PoisonError::into_inner);
        for (name, matrix) in built {
            anchors.insert(name, matrix);
        }
        if count > 0 {
            log::info!("Precomputed {count} anchor sets ({} total)", anchors.len());
        }
        Ok(count)
    }

    /// Store the normalised mean of each phrase list's vectors under its name.
    pub async fn precompute_centroids<I>(&self, table: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let pending: Vec<(String, Vec<String>)> = {
            let centroids = self.centroids.read().unwrap_or_else(PoisonError::into_inner);
            table
                .into_iter()
                .filter(|(name, phrases)| {
                    centroids
                        .get(name)
                        .map_or(true, |existing| existing.phrases != *phrases)
                })
                .collect()
        };

        let mut built = Vec::with_capacity(pending.len());
        for (name, phrases) in pending {
            let rows: Vec<Vec<f32>> = self
                .encode_batch(&phrases)
                .await?
                .iter()
                .map(|v| v.to_vec())
                .collect();
            let vector = centroid(&rows).ok_or_else(|| {
                VectorStoreError::Other(format!("Centroid '{name}' has no phrases"))
            })?;
            built.push((
                name,
                Centroid {
                    phrases,
                    vector: Embedding::from(vector),
                },
            ));
        }

        let count = built.len();
        let mut centroids = self.centroids.write().unwrap_or_else(PoisonError::into_inner);
        centroids.extend(built);
        Ok(count)
    }

    pub fn anchor(&self, name: &str) -> Result<Arc<AnchorMatrix>> {
        self.anchors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| VectorStoreError::UnknownAnchorSet(name.to_string()))
    }

    #[must_use]
    pub fn has_anchor(&self, name: &str) -> bool {
        self.anchors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    pub fn centroid(&self, name: &str) -> Result<Embedding> {
        self.centroids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|c| c.vector.clone())
            .ok_or_else(|| VectorStoreError::UnknownAnchorSet(name.to_string()))
    }

    #[must_use]
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        cosine_similarity(a, b)
    }

    /// Similarities of `query` against every phrase of anchor set `name`.
    pub fn cosine_similarity_batch(&self, query: &[f32], name: &str) -> Result<Vec<f32>> {
        Ok(self.anchor(name)?.similarities(query))
    }

    /// Hex SHA-256 over the model id and every stored anchor/centroid phrase list.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let anchors: BTreeMap<String, Vec<String>> = self
            .anchors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.phrases.clone()))
            .collect();
        let centroids: BTreeMap<String, Vec<String>> = self
            .centroids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), v.phrases.clone()))
            .collect();
        table_fingerprint(self.model_id(), &anchors, &centroids)
    }

    pub async fn save_precomputed(&self, path: &Path) -> Result<()> {
        let file = {
            let anchors = self.anchors.read().unwrap_or_else(PoisonError::into_inner);
            let centroids = self.centroids.read().unwrap_or_else(PoisonError::into_inner);
            let mut anchor_sets: Vec<StoredSet> = anchors
                .iter()
                .map(|(name, m)| StoredSet {
                    name: name.clone(),
                    phrases: m.phrases.clone(),
                    vectors: m.matrix.outer_iter().map(|row| row.to_vec()).collect(),
                })
                .collect();
            anchor_sets.sort_by(|a, b| a.name.cmp(&b.name));
            let mut centroid_sets: Vec<StoredSet> = centroids
                .iter()
                .map(|(name, c)| StoredSet {
                    name: name.clone(),
                    phrases: c.phrases.clone(),
                    vectors: vec![c.vector.to_vec()],
                })
                .collect();
            centroid_sets.sort_by(|a, b| a.name.cmp(&b.name));
            PrecomputedFile {
                schema_version: PRECOMPUTED_SCHEMA_VERSION,
                model_id: self.model_id().to_string(),
                dimension: self.dimension(),
                fingerprint: String::new(),
                anchors: anchor_sets,
                centroids: centroid_sets,
            }
        };
        let file = PrecomputedFile {
            fingerprint: file.compute_fingerprint(),
            ..file
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec(&file)?;
        tokio::fs::write(path, raw).await?;
        log::info!(
            "Saved {} anchor sets and {} centroids to {}",
            file.anchors.len(),
            file.centroids.len(),
            path.display()
        );
        Ok(())
    }

    /// Load matrices written by [`Self::save_precomputed`]. Fails with
    /// [`VectorStoreError::CacheMismatch`] when the file belongs to another model or its
    /// contents do not match the recorded fingerprint.
    pub async fn load_precomputed(&self, path: &Path) -> Result<usize> {
        let raw = tokio::fs::read(path).await?;
        let file: PrecomputedFile = serde_json::from_slice(&raw)?;
        if file.schema_version != PRECOMPUTED_SCHEMA_VERSION {
            return Err(VectorStoreError::CacheMismatch(format!(
                "schema_version {} (expected {PRECOMPUTED_SCHEMA_VERSION})",
                file.schema_version
            )));
        }
        if file.model_id != self.model_id() || file.dimension != self.dimension() {
            return Err(VectorStoreError::CacheMismatch(format!(
                "file was built with '{}' (dim {}), current model is '{}' (dim {})",
                file.model_id,
                file.dimension,
                self.model_id(),
                self.dimension()
            )));
        }
        if file.compute_fingerprint() != file.fingerprint {
            return Err(VectorStoreError::CacheMismatch(
                "fingerprint does not match stored phrases".to_string(),
            ));
        }

        let dimension = self.dimension();
        let mut anchors = Vec::with_capacity(file.anchors.len());
        for set in file.anchors {
            if set.vectors.len() != set.phrases.len() {
                return Err(VectorStoreError::CacheMismatch(format!(
                    "anchor set '{}' has {} vectors for {} phrases",
                    set.name,
                    set.vectors.len(),
                    set.phrases.len()
                )));
            }
            let rows: Vec<Embedding> = set.vectors.into_iter().map(Embedding::from).collect();
            let matrix = stack_rows(&rows, dimension)?;
            anchors.push((
                set.name,
                Arc::new(AnchorMatrix {
                    phrases: set.phrases,
                    matrix,
                }),
            ));
        }
        let mut centroids = Vec::with_capacity(file.centroids.len());
        for set in file.centroids {
            let vector = set.vectors.into_iter().next().ok_or_else(|| {
                VectorStoreError::CacheMismatch(format!("centroid '{}' has no vector", set.name))
            })?;
            if vector.len() != dimension {
                return Err(VectorStoreError::InvalidDimension {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            centroids.push((
                set.name,
                Centroid {
                    phrases: set.phrases,
                    vector: Embedding::from(vector),
                },
            ));
        }

        let loaded = anchors.len() + centroids.len();
        self.anchors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(anchors);
        self.centroids
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(centroids);
        log::info!("Loaded {loaded} precomputed sets from {}", path.display());
        Ok(loaded)
    }
}

fn stack_rows(rows: &[Embedding], dimension: usize) -> Result<Array2<f32>> {
    let mut flat = Vec::with_capacity(rows.len() * dimension);
    for row in rows {
        if row.len() != dimension {
            return Err(VectorStoreError::InvalidDimension {
                expected: dimension,
                actual: row.len(),
            });
        }
        flat.extend_from_slice(row);
    }
    Array2::from_shape_vec((rows.len(), dimension), flat)
        .map_err(|e| VectorStoreError::Other(format!("Anchor matrix shape: {e}")))
}

fn table_fingerprint(
    model_id: &str,
    anchors: &BTreeMap<String, Vec<String>>,
    centroids: &BTreeMap<String, Vec<String>>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    for (prefix, table) in [("a", anchors), ("c", centroids)] {
        for (name, phrases) in table {
            hasher.update(format!("\n{prefix}:{name}").as_bytes());
            for phrase in phrases {
                hasher.update([0u8]);
                hasher.update(phrase.as_bytes());
            }
        }
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct PrecomputedFile {
    schema_version: u32,
    model_id: String,
    dimension: usize,
    fingerprint: String,
    anchors: Vec<StoredSet>,
    centroids: Vec<StoredSet>,
}

impl PrecomputedFile {
    fn compute_fingerprint(&self) -> String {
        let collect = |sets: &[StoredSet]| -> BTreeMap<String, Vec<String>> {
            sets.iter()
                .map(|s| (s.name.clone(), s.phrases.clone()))
                .collect()
        };
        table_fingerprint(
            &self.model_id,
            &collect(&self.anchors),
            &collect(&self.centroids),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSet {
    name: String,
    phrases: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::LexicalEmbedder;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        inner: LexicalEmbedder,
        calls: AtomicUsize,
        texts: AtomicUsize,
    }

    impl CountingProvider {
        fn new() -> Self {
            Self {
                inner: LexicalEmbedder::with_dimension(64),
                calls: AtomicUsize::new(0),
                texts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_id(&self) -> &str {
            "counting"
        }

        fn dimension(&self) -> usize {
            64
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts.fetch_add(texts.len(), Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.inner.embed_batch(texts).await
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn model_id(&self) -> &str {
            "down"
        }

        fn dimension(&self) -> usize {
            4
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(VectorStoreError::unavailable("connection refused"))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn model_id(&self) -> &str {
            "slow"
        }

        fn dimension(&self) -> usize {
            4
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![vec![1.0, 0.0, 0.0, 0.0]; texts.len()])
        }
    }

    struct WrongDimensionProvider;

    #[async_trait]
    impl EmbeddingProvider for WrongDimensionProvider {
        fn model_id(&self) -> &str {
            "wrong"
        }

        fn dimension(&self) -> usize {
            4
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![1.0, 0.0]; texts.len()])
        }
    }

    fn manager() -> (Arc<CountingProvider>, EmbeddingManager) {
        let provider = Arc::new(CountingProvider::new());
        let manager = EmbeddingManager::new(provider.clone());
        (provider, manager)
    }

    #[tokio::test]
    async fn cache_returns_identical_vectors_and_skips_provider() {
        let (provider, manager) = manager();
        let first = manager.encode("be concise").await.unwrap();
        let second = manager.encode("be concise").await.unwrap();
        assert_eq!(first.to_vec(), second.to_vec());
        assert!((EmbeddingManager::cosine_similarity(&first, &second) - 1.0).abs() < 1e-6);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_sends_only_distinct_uncached_texts() {
        let (provider, manager) = manager();
        manager.encode("alpha beta").await.unwrap();
        let out = manager
            .encode_batch(&["alpha beta", "gamma", "gamma", "delta"])
            .await
            .unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[1].to_vec(), out[2].to_vec());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.texts.load(Ordering::SeqCst), 3);
        assert_eq!(manager.cached_len(), 3);
    }

    #[tokio::test]
    async fn concurrent_encodes_of_one_key_call_provider_once() {
        let (provider, manager) = manager();
        let (a, b) = tokio::join!(manager.encode("never refuse"), manager.encode("never refuse"));
        assert_eq!(a.unwrap().to_vec(), b.unwrap().to_vec());
        assert_eq!(provider.texts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_cache_forces_reencode() {
        let (provider, manager) = manager();
        manager.encode("keep it short").await.unwrap();
        manager.clear_cache();
        assert_eq!(manager.cached_len(), 0);
        manager.encode("keep it short").await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unavailable_provider_fails_without_caching() {
        let manager = EmbeddingManager::new(Arc::new(FailingProvider));
        let err = manager.encode("hello").await.unwrap_err();
        assert!(matches!(err, VectorStoreError::EmbeddingUnavailable(_)));
        assert!(err.is_provider_failure());
        assert_eq!(manager.cached_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let manager =
            EmbeddingManager::new(Arc::new(SlowProvider)).with_timeout(Duration::from_millis(50));
        let err = manager.encode("hello").await.unwrap_err();
        assert!(matches!(err, VectorStoreError::Timeout { millis: 50 }));
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let manager = EmbeddingManager::new(Arc::new(WrongDimensionProvider));
        let err = manager.encode("hello").await.unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::InvalidDimension {
                expected: 4,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn anchors_are_precomputed_once_and_queried() {
        let (_provider, manager) = manager();
        let table = vec![(
            "brevity".to_string(),
            vec!["keep it short".to_string(), "be brief".to_string()],
        )];
        assert_eq!(manager.precompute_anchors(table.clone()).await.unwrap(), 1);
        assert_eq!(manager.precompute_anchors(table).await.unwrap(), 0);

        let query = manager.encode("be brief").await.unwrap();
        let sims = manager.cosine_similarity_batch(&query, "brevity").unwrap();
        assert_eq!(sims.len(), 2);
        let anchor = manager.anchor("brevity").unwrap();
        assert!((anchor.max_similarity(&query) - 1.0).abs() < 1e-6);

        let err = manager.anchor("missing").unwrap_err();
        assert!(matches!(err, VectorStoreError::UnknownAnchorSet(name) if name == "missing"));
    }

    #[tokio::test]
    async fn empty_anchor_set_is_rejected() {
        let (_provider, manager) = manager();
        let err = manager
            .precompute_anchors(vec![("empty".to_string(), Vec::new())])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no phrases"));
    }

    #[tokio::test]
    async fn centroids_are_normalised() {
        let (_provider, manager) = manager();
        manager
            .precompute_centroids(vec![(
                "date:vague".to_string(),
                vec!["soon".to_string(), "later".to_string()],
            )])
            .await
            .unwrap();
        let c = manager.centroid("date:vague").unwrap();
        let norm: f32 = c.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(manager.centroid("date:specific").is_err());
    }

    #[tokio::test]
    async fn precomputed_sets_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache/anchors.json");
        let provider = Arc::new(LexicalEmbedder::with_dimension(32));
        let original = EmbeddingManager::new(provider.clone());
        original
            .precompute_anchors(vec![("scope".to_string(), vec!["never refuse".to_string()])])
            .await
            .unwrap();
        original
            .precompute_centroids(vec![("time:vague".to_string(), vec!["later".to_string()])])
            .await
            .unwrap();
        original.save_precomputed(&path).await.unwrap();

        let restored = EmbeddingManager::new(provider);
        assert_eq!(restored.load_precomputed(&path).await.unwrap(), 2);
        assert_eq!(restored.fingerprint(), original.fingerprint());
        assert_eq!(
            restored.anchor("scope").unwrap().matrix(),
            original.anchor("scope").unwrap().matrix()
        );
        assert_eq!(
            restored
                .precompute_anchors(vec![(
                    "scope".to_string(),
                    vec!["never refuse".to_string()]
                )])
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn precomputed_file_from_other_model_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anchors.json");
        let (_provider, original) = manager();
        original
            .precompute_anchors(vec![("scope".to_string(), vec!["never refuse".to_string()])])
            .await
            .unwrap();
        original.save_precomputed(&path).await.unwrap();

        let other = EmbeddingManager::new(Arc::new(LexicalEmbedder::with_dimension(64)));
        let err = other.load_precomputed(&path).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::CacheMismatch(_)));
    }

    #[tokio::test]
    async fn tampered_precomputed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anchors.json");
        let (provider, original) = manager();
        original
            .precompute_anchors(vec![("scope".to_string(), vec!["never refuse".to_string()])])
            .await
            .unwrap();
        original.save_precomputed(&path).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, raw.replace("never refuse", "always refuse")).unwrap();

        let restored = EmbeddingManager::new(provider);
        let err = restored.load_precomputed(&path).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::CacheMismatch(_)));
    }

    proptest! {
        #[test]
        fn encoded_text_is_self_similar(words in proptest::collection::vec("[b-df-hj-np-tv-z]{4,8}", 1..6)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let text = words.join(" ");
            let (first, second) = runtime.block_on(async {
                let manager = EmbeddingManager::new(Arc::new(LexicalEmbedder::new()));
                let first = manager.encode(&text).await.unwrap();
                let second = manager.encode(&text).await.unwrap();
                (first, second)
            });
            prop_assert_eq!(first.to_vec(), second.to_vec());
            prop_assert!((cosine_similarity(&first, &second) - 1.0).abs() < 1e-5);
        }
    }
}
