//! # Prompt Analysis
//!
//! Anchor-based classification of a system prompt and, optionally, the user request it has
//! to serve.
//!
//! ## Architecture
//!
//! ```text
//! system prompt ──> DirectiveSegmenter ──> directive units ──> ContradictionDetector
//!       │                                                            │
//!       └──> RequirementExtractor ──> RequirementSet                 │
//!                                         │                          │
//! user request ──> AlignmentChecker <─────┘                          │
//!                        │  (values, misalignments)                  │
//!                        └──> VaguenessEngine (penalty, follow-ups)  │
//!                                         │                          │
//!                                         └──────> PromptAnalyzer <──┘
//!                                                       │
//!                                          optional RiskReviewer
//! ```
//!
//! Every classifier shares one [`AnchorClassifier`] over one
//! [`prompt_vector_store::EmbeddingManager`]; anchor sets come from an immutable
//! [`AnchorConfig`].
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prompt_analysis::{AnchorConfig, PromptAnalyzer};
//! use prompt_vector_store::{EmbeddingManager, EmbeddingModel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = Arc::new(EmbeddingManager::new(Arc::new(EmbeddingModel::from_env()?)));
//!     let analyzer = PromptAnalyzer::new(manager, AnchorConfig::builtin()?).await?;
//!     let report = analyzer
//!         .analyze(
//!             "Always verify user credentials.\nNever verify user credentials.",
//!             None,
//!         )
//!         .await?;
//!     println!("{} findings, overall {:.1}", report.findings.len(), report.scores.overall);
//!     Ok(())
//! }
//! ```

mod alignment;
mod analyzer;
mod classifier;
mod config;
mod contradictions;
mod entities;
mod error;
mod requirements;
mod vagueness;

pub use alignment::{
    AlignmentChecker, AlignmentReport, AlignmentScores, ExtractedValue, RequestIntent,
    ValueSource, FULFILLABLE_MIN_SCORE,
};
pub use analyzer::{
    blend_risk, PromptAnalyzer, RiskReviewRequest, RiskReviewer, DEFAULT_REVIEW_TIMEOUT,
};
pub use classifier::{AnchorClassifier, AnchorMatch};
pub use config::{
    conflict_set, parameter_set, pole_set, specificity_set, AnchorConfig, ConflictSide,
    ConstraintConflict, DomainKeywords, ObjectiveIntent, OppositePair, ParameterAnchor,
    SeverityCutPoints, SpecificityExemplars, SpecificityLevel, Thresholds,
    ANCHOR_SCHEMA_VERSION,
};
pub use contradictions::{
    consistency_score, ContradictionDetector, ContradictionReport, PERFECT_CONSISTENCY,
};
pub use entities::{Entity, EntityLabel, EntityProvider, PatternEntityProvider};
pub use error::{AnalysisError, Result};
pub use requirements::RequirementExtractor;
pub use vagueness::{
    completeness_penalty, critical_penalty, ParameterSpecificity, VaguenessEngine,
    VaguenessLevel, VaguenessReport,
};
