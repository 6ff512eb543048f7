use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prompt_protocol::{
    clamp_score, clamp_unit, AnalysisReport, ConstraintStrength, Contradiction, ContradictionKind,
    DeepPassStatus, Finding, FindingCategory, Misalignment, MisalignmentKind, QualityRating,
    RequirementSet, RiskAssessment, RiskType, Scores, Severity, REPORT_SCHEMA_VERSION,
};
use prompt_segmenter::{document_lines, DirectiveSegmenter, SegmenterConfig};
use prompt_vector_store::EmbeddingManager;

use crate::alignment::{AlignmentChecker, AlignmentReport};
use crate::classifier::AnchorClassifier;
use crate::config::AnchorConfig;
use crate::contradictions::ContradictionDetector;
use crate::entities::{EntityProvider, PatternEntityProvider};
use crate::error::Result;
use crate::requirements::RequirementExtractor;
use crate::vagueness::{VaguenessEngine, VaguenessReport};

pub const DEFAULT_REVIEW_TIMEOUT: Duration = Duration::from_secs(60);

const ALIGNMENT_WEIGHT: f32 = 0.375;
const CONSISTENCY_WEIGHT: f32 = 0.3125;
const CLARITY_WEIGHT: f32 = 0.3125;

const SEMANTIC_BASELINE_SHARE: f32 = 0.3;
const SEMANTIC_REVIEW_SHARE: f32 = 0.7;
const POSSIBLE_BONUS: f32 = 0.5;

/// Input handed to a [`RiskReviewer`].
#[derive(Debug, Clone, Copy)]
pub struct RiskReviewRequest<'a> {
    pub system_text: &'a str,
    pub user_text: &'a str,
    /// Embedding-based findings, most severe first.
    pub prior_findings: &'a [Finding],
}

/// Optional second opinion on a prompt pair, typically backed by a hosted model.
///
/// Its output is treated as untrusted: numbers are clamped and any failure only skips the
/// deep pass.
#[async_trait]
pub trait RiskReviewer: Send + Sync {
    async fn review(&self, request: RiskReviewRequest<'_>) -> anyhow::Result<RiskAssessment>;
}

/// Final score after a completed review, plus the severity of the finding it adds (none
/// when the reviewer considers the request possible).
#[must_use]
pub fn blend_risk(baseline: f32, assessment: &RiskAssessment) -> (f32, Option<Severity>) {
    if !assessment.is_impossible {
        return (clamp_score(baseline + POSSIBLE_BONUS), None);
    }
    let score = assessment.score;
    match assessment.risk_type {
        RiskType::Safety => {
            let severity = if score >= 9.0 {
                Severity::Critical
            } else if score >= 7.0 {
                Severity::High
            } else {
                Severity::Moderate
            };
            (clamp_score(10.0 - score), Some(severity))
        }
        RiskType::Security => {
            let severity = if score >= 8.0 {
                Severity::Critical
            } else if score >= 6.0 {
                Severity::High
            } else {
                Severity::Moderate
            };
            (clamp_score(10.0 - score), Some(severity))
        }
        RiskType::Semantic | RiskType::None => {
            let severity = if score >= 7.0 {
                Severity::High
            } else {
                Severity::Moderate
            };
            let blended =
                SEMANTIC_BASELINE_SHARE * baseline + SEMANTIC_REVIEW_SHARE * (10.0 - score);
            (clamp_score(blended), Some(severity))
        }
    }
}

/// Runs every classifier over a system prompt and an optional user request and folds the
/// results into one [`AnalysisReport`].
pub struct PromptAnalyzer {
    config: Arc<AnchorConfig>,
    classifier: AnchorClassifier,
    segmenter: DirectiveSegmenter,
    extractor: RequirementExtractor,
    detector: ContradictionDetector,
    alignment: AlignmentChecker,
    vagueness: VaguenessEngine,
    reviewer: Option<Arc<dyn RiskReviewer>>,
    reviewer_timeout: Duration,
}

impl PromptAnalyzer {
    /// Precomputes every anchor set and centroid; an incomplete anchor table fails here
    /// rather than on the first request.
    pub async fn new(manager: Arc<EmbeddingManager>, config: AnchorConfig) -> Result<Self> {
        let config = Arc::new(config);
        let classifier = AnchorClassifier::new(manager);
        classifier.prepare(&config).await?;

        Ok(Self {
            segmenter: DirectiveSegmenter::new(SegmenterConfig::default())?,
            extractor: RequirementExtractor::new(classifier.clone(), config.clone())?,
            detector: ContradictionDetector::new(classifier.clone(), config.clone()),
            alignment: AlignmentChecker::new(
                classifier.clone(),
                config.clone(),
                Arc::new(PatternEntityProvider),
            ),
            vagueness: VaguenessEngine::new(classifier.clone(), config.clone()),
            classifier,
            config,
            reviewer: None,
            reviewer_timeout: DEFAULT_REVIEW_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_entity_provider(mut self, entities: Arc<dyn EntityProvider>) -> Self {
        self.alignment =
            AlignmentChecker::new(self.classifier.clone(), self.config.clone(), entities);
        self
    }

    pub fn with_segmenter(mut self, config: SegmenterConfig) -> Result<Self> {
        self.segmenter = DirectiveSegmenter::new(config)?;
        Ok(self)
    }

    #[must_use]
    pub fn with_reviewer(mut self, reviewer: Arc<dyn RiskReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    #[must_use]
    pub const fn with_reviewer_timeout(mut self, timeout: Duration) -> Self {
        self.reviewer_timeout = timeout;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AnchorConfig {
        &self.config
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<EmbeddingManager> {
        self.classifier.manager()
    }

    /// Analyze `system` alone, or together with the request it has to serve. A blank
    /// request is treated as absent.
    pub async fn analyze(&self, system: &str, user: Option<&str>) -> Result<AnalysisReport> {
        self.segmenter.validate_document(system)?;
        let user = user.filter(|u| !u.trim().is_empty());

        let lines = document_lines(system);
        let requirements = self.extractor.extract_lines(&lines).await?;
        let units = self.segmenter.segment_lines(&lines);
        let consistency = self.detector.detect(&units).await?;

        let request = match user {
            Some(text) => {
                let alignment = self.alignment.check(&requirements, text).await?;
                let vagueness = self.vagueness.assess(&requirements, &alignment.values).await?;
                Some((alignment, vagueness))
            }
            None => None,
        };

        let mut findings: Vec<Finding> = consistency
            .contradictions
            .iter()
            .map(contradiction_finding)
            .collect();
        if let Some((alignment, vagueness)) = &request {
            findings.extend(
                alignment
                    .misalignments
                    .iter()
                    .map(|m| self.misalignment_finding(m)),
            );
            findings.extend(vagueness_findings(&requirements, vagueness));
        }
        sort_findings(&mut findings);

        let baseline = match &request {
            Some((alignment, vagueness)) => clamp_score(
                ALIGNMENT_WEIGHT * alignment.scores.overall
                    + CONSISTENCY_WEIGHT * consistency.consistency_score
                    + CLARITY_WEIGHT * (10.0 - vagueness.score),
            ),
            None => consistency.consistency_score,
        };

        let mut overall = baseline;
        let mut notes = Vec::new();
        let deep_pass = self.deep_pass(system, user, &findings).await;
        match &deep_pass {
            DeepPassStatus::Completed { assessment } => {
                let (blended, severity) = blend_risk(baseline, assessment);
                overall = blended;
                if let Some(severity) = severity {
                    findings.push(risk_finding(assessment, severity));
                    sort_findings(&mut findings);
                }
            }
            DeepPassStatus::Skipped { reason } => {
                notes.push(format!("Deep risk pass skipped: {reason}"));
            }
            DeepPassStatus::NotConfigured => {}
        }

        log::debug!(
            "Analysis done: {} directives, {} findings, overall {overall:.2}",
            units.len(),
            findings.len()
        );

        let (misalignments, followups, alignment_score, vagueness_score, fulfillable) =
            match request {
                Some((alignment, vagueness)) => {
                    let fulfillable = alignment.is_fulfillable();
                    let AlignmentReport {
                        misalignments,
                        scores,
                        ..
                    } = alignment;
                    (
                        misalignments,
                        vagueness.followups,
                        Some(scores.overall),
                        Some(vagueness.score),
                        Some(fulfillable),
                    )
                }
                None => (Vec::new(), Vec::new(), None, None, None),
            };

        Ok(AnalysisReport {
            schema_version: REPORT_SCHEMA_VERSION,
            requirements,
            directive_count: units.len(),
            contradictions: consistency.contradictions,
            misalignments,
            findings,
            followups,
            scores: Scores {
                consistency: consistency.consistency_score,
                alignment: alignment_score,
                vagueness: vagueness_score,
                baseline,
                overall,
            },
            rating: QualityRating::from_score(overall),
            fulfillable,
            deep_pass,
            notes,
        })
    }

    async fn deep_pass(
        &self,
        system: &str,
        user: Option<&str>,
        findings: &[Finding],
    ) -> DeepPassStatus {
        let Some(reviewer) = &self.reviewer else {
            return DeepPassStatus::NotConfigured;
        };
        let Some(user) = user else {
            return DeepPassStatus::Skipped {
                reason: "no user prompt to review".to_string(),
            };
        };

        let request = RiskReviewRequest {
            system_text: system,
            user_text: user,
            prior_findings: findings,
        };
        let review = tokio::time::timeout(self.reviewer_timeout, reviewer.review(request));
        let reason = match review.await {
            Ok(Ok(assessment)) => {
                return DeepPassStatus::Completed {
                    assessment: assessment.sanitized(),
                }
            }
            Ok(Err(err)) => format!("{err:#}"),
            Err(_) => format!(
                "reviewer timed out after {} ms",
                self.reviewer_timeout.as_millis()
            ),
        };
        log::warn!("Deep risk pass skipped: {reason}");
        DeepPassStatus::Skipped { reason }
    }

    fn misalignment_finding(&self, misalignment: &Misalignment) -> Finding {
        let (category, title, recommendation) = match &misalignment.kind {
            MisalignmentKind::MissingParam { parameter } => {
                let question = self.config.parameter(parameter).map_or_else(
                    || format!("What is the {}?", parameter.replace('_', " ")),
                    |anchor| anchor.question.clone(),
                );
                (
                    FindingCategory::ParameterGap,
                    format!("Missing required parameter '{parameter}'"),
                    format!("Ask the user for {parameter}: {question}"),
                )
            }
            MisalignmentKind::ConstraintViolation { strength } => (
                FindingCategory::Misalignment,
                format!("Request conflicts with a {} constraint", strength_label(*strength)),
                "Rephrase the request so it stays within the system constraint.".to_string(),
            ),
            MisalignmentKind::OutOfScope => (
                FindingCategory::Misalignment,
                "Request falls outside the assistant's scope".to_string(),
                "Redirect the request to something the system is allowed to do.".to_string(),
            ),
            MisalignmentKind::ConflictingObjective { intent } => (
                FindingCategory::Misalignment,
                format!("Request intent '{intent}' does not match the assistant's objective"),
                "Confirm the user's goal matches what the system is built for.".to_string(),
            ),
            MisalignmentKind::UnsafeRequest => (
                FindingCategory::Misalignment,
                "Request touches a safety guideline".to_string(),
                "Decline or rephrase the request to comply with the safety guideline."
                    .to_string(),
            ),
        };
        Finding {
            category,
            severity: misalignment.severity,
            title,
            description: format!(
                "System: \"{}\". Request: \"{}\".",
                misalignment.system_text, misalignment.user_text
            ),
            recommendation,
            confidence: misalignment.confidence,
            line: misalignment.line,
        }
    }
}

const fn strength_label(strength: ConstraintStrength) -> &'static str {
    match strength {
        ConstraintStrength::Hard => "hard",
        ConstraintStrength::Soft => "soft",
    }
}

const fn risk_label(risk: RiskType) -> &'static str {
    match risk {
        RiskType::Semantic => "semantic",
        RiskType::Safety => "safety",
        RiskType::Security => "security",
        RiskType::None => "unspecified",
    }
}

fn contradiction_finding(contradiction: &Contradiction) -> Finding {
    let (title, recommendation) = match &contradiction.kind {
        ContradictionKind::DirectNegation => (
            "Directly contradicting directives".to_string(),
            "Remove one of the two statements or state which one takes precedence.".to_string(),
        ),
        ContradictionKind::BehavioralConflict {
            category,
            first_pole,
            second_pole,
        } => (
            format!("Conflicting '{category}' behavior"),
            format!(
                "Pick one '{category}' style ({first_pole} or {second_pole}) and apply it consistently."
            ),
        ),
        ContradictionKind::ConstraintMismatch { category } => (
            format!("Conflicting '{category}' constraints"),
            format!(
                "Reconcile the '{category}' constraints or state which one wins when they collide."
            ),
        ),
    };
    Finding {
        category: FindingCategory::Contradiction,
        severity: contradiction.severity,
        title,
        description: format!(
            "Line {}: \"{}\" vs line {}: \"{}\". {}",
            contradiction.first.line,
            contradiction.first.text,
            contradiction.second.line,
            contradiction.second.text,
            contradiction.explanation
        ),
        recommendation,
        confidence: contradiction.confidence,
        line: Some(contradiction.first.line),
    }
}

fn vagueness_findings<'a>(
    requirements: &'a RequirementSet,
    vagueness: &'a VaguenessReport,
) -> impl Iterator<Item = Finding> + 'a {
    vagueness.vague_values().map(move |value| {
        let recommendation = vagueness
            .followups
            .iter()
            .find(|f| f.parameter == value.parameter)
            .map_or_else(
                || format!("Ask for a more specific {}.", value.parameter.replace('_', " ")),
                |f| f.question.clone(),
            );
        Finding {
            category: FindingCategory::Vagueness,
            severity: Severity::Moderate,
            title: format!("Vague value for '{}'", value.parameter),
            description: format!(
                "'{}' is not specific enough (specificity {:.2}).",
                value.value, value.specificity
            ),
            recommendation,
            confidence: clamp_unit(1.0 - value.specificity),
            line: requirements.parameter(&value.parameter).map(|p| p.line),
        }
    })
}

fn risk_finding(assessment: &RiskAssessment, severity: Severity) -> Finding {
    Finding {
        category: FindingCategory::DeepRisk,
        severity,
        title: format!(
            "Deep review flags a {} risk ({:.1}/10)",
            risk_label(assessment.risk_type),
            assessment.score
        ),
        description: assessment.explanation.clone(),
        recommendation: assessment.recommendation.clone(),
        confidence: assessment.confidence,
        line: None,
    }
}

/// Most severe first; within a severity, by line with line-less findings last.
fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| (a.line.is_none(), a.line).cmp(&(b.line.is_none(), b.line)))
    });
}
