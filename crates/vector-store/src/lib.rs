//! # Prompt Vector Store
//!
//! Embedding backends and the cache-backed [`EmbeddingManager`] used by the analysis layer.
//!
//! ## Architecture
//!
//! ```text
//! text / anchor phrases
//!     │
//!     ├──> EmbeddingManager
//!     │      ├─> text cache (hit: no provider call)
//!     │      ├─> anchor matrices [phrases x dim]
//!     │      └─> specificity centroids
//!     │
//!     └──> EmbeddingProvider
//!            ├─> ONNX model (PROMPT_EMBEDDING_MODE=fast)
//!            └─> lexical stub (PROMPT_EMBEDDING_MODE=stub)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prompt_vector_store::{EmbeddingManager, EmbeddingModel};
//!
//! #[tokio::main]
//! async fn main() -> prompt_vector_store::Result<()> {
//!     let manager = EmbeddingManager::new(Arc::new(EmbeddingModel::from_env()?));
//!     manager
//!         .precompute_anchors(vec![(
//!             "brevity".to_string(),
//!             vec!["keep responses brief".to_string()],
//!         )])
//!         .await?;
//!     let query = manager.encode("Be concise.").await?;
//!     let best = manager.anchor("brevity")?.max_similarity(&query);
//!     println!("brevity: {best:.3}");
//!     Ok(())
//! }
//! ```

mod embeddings;
mod error;
mod lexical;
mod manager;
mod provider;
mod similarity;

pub use embeddings::{model_dir, EmbeddingMode, EmbeddingModel};
pub use error::{Result, VectorStoreError};
pub use lexical::{LexicalEmbedder, LEXICAL_DIMENSION, LEXICAL_MODEL_ID};
pub use manager::{AnchorMatrix, Embedding, EmbeddingManager, DEFAULT_EMBED_TIMEOUT};
pub use provider::EmbeddingProvider;
pub use similarity::{centroid, cosine_similarity, cosine_similarity_batch, normalize, softmax};
