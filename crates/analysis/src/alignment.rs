use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use prompt_protocol::{
    clamp_score, clamp_unit, ConstraintStrength, Misalignment, MisalignmentKind, Polarity,
    RequirementSet, Severity,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::classifier::AnchorClassifier;
use crate::config::AnchorConfig;
use crate::entities::{compile, Entity, EntityProvider, DATE_RE, MONEY_RE, TIME_RE};
use crate::error::{AnalysisError, Result};

const PATTERN_CONFIDENCE: f32 = 0.9;
const ENTITY_CONFIDENCE: f32 = 0.8;
const MENTIONED_CONFIDENCE: f32 = 0.5;
const MENTIONED_VALUE: &str = "mentioned";

const MISSING_CONFIDENCE: f32 = 0.95;
const OBJECTIVE_CONFIDENCE: f32 = 0.70;
const NOT_PROVIDED: &str = "Not provided";

const COMPLETENESS_WEIGHT: f32 = 0.35;
const CONSTRAINT_WEIGHT: f32 = 0.25;
const SCOPE_WEIGHT: f32 = 0.20;
const SAFETY_WEIGHT: f32 = 0.20;
pub const FULFILLABLE_MIN_SCORE: f32 = 5.0;

const PLACE_STOP: &str = r"(?:\s+(?:to|from|on|for|at|in|by|tomorrow|today|tonight|next|this)\b|[,.!?;]|$)";

static ORIGIN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        compile(r"\b[Ff]rom\s+([A-Z][\w'-]*(?:\s+[A-Z][\w'-]*)*)"),
        compile(&format!(r"(?i)\bfrom\s+([a-z][a-z ]*?){PLACE_STOP}")),
        compile(&format!(
            r"(?i)\b(?:depart(?:ing)?|leaving)\s+(?:from\s+)?([a-z][a-z ]*?){PLACE_STOP}"
        )),
    ]
});

static DESTINATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        compile(r"\b[Tt]o\s+([A-Z][\w'-]*(?:\s+[A-Z][\w'-]*)*)"),
        compile(&format!(
            r"(?i)\b(?:going|flying|travel(?:l?ing)?|fly|go|headed|heading)\s+to\s+([a-z][a-z ]*?){PLACE_STOP}"
        )),
        compile(&format!(r"(?i)\barriv(?:e|ing)\s+(?:at|in)\s+([a-z][a-z ]*?){PLACE_STOP}")),
    ]
});

static AGE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        compile(r"(?i)\b\d{1,3}\s*-?\s*(?:years?|yrs?)(?:\s*-?\s*old)?\b"),
        compile(r"(?i)\baged?\s+\d{1,3}\b"),
    ]
});

static BUDGET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![compile(&format!(
        r"(?i)(?:\b(?:under|below|less\s+than|up\s+to|around|about|at\s+most|max(?:imum)?)\s+)?(?:{})",
        MONEY_RE.as_str().trim_start_matches("(?i)")
    ))]
});

static QUANTITY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![compile(
        r"(?i)\b(?:\d+|one|two|three|four|five|six|seven|eight|nine|ten)\s+(?:people|persons|passengers|adults|children|kids|tickets|seats|rooms|guests|items|servings|portions)\b",
    )]
});

static DATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| vec![DATE_RE.clone()]);
static TIME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| vec![TIME_RE.clone()]);

static BOOKING_RE: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\b(?:book|reserve|schedule|plan)\b"));
static INQUIRY_RE: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\b(?:find|search|show|what|which)\b"));
static MODIFICATION_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b(?:change|modify|update|cancel)\b"));
static HELP_RE: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\b(?:help|how|can\s+you)\b"));

fn patterns_for(parameter: &str) -> &'static [Regex] {
    match parameter {
        "origin" => ORIGIN_PATTERNS.as_slice(),
        "destination" => DESTINATION_PATTERNS.as_slice(),
        "date" => DATE_PATTERNS.as_slice(),
        "time" => TIME_PATTERNS.as_slice(),
        "age" => AGE_PATTERNS.as_slice(),
        "budget" => BUDGET_PATTERNS.as_slice(),
        "quantity" => QUANTITY_PATTERNS.as_slice(),
        _ => &[],
    }
}

/// What the request is trying to do, classified lexically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestIntent {
    Booking,
    Inquiry,
    Modification,
    HelpRequest,
    General,
}

impl RequestIntent {
    pub const ALL: [Self; 5] = [
        Self::Booking,
        Self::Inquiry,
        Self::Modification,
        Self::HelpRequest,
        Self::General,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Booking => "booking",
            Self::Inquiry => "inquiry",
            Self::Modification => "modification",
            Self::HelpRequest => "help_request",
            Self::General => "general",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.as_str() == name.trim())
    }

    /// First matching cue wins: booking, inquiry, modification, help.
    #[must_use]
    pub fn classify(request: &str) -> Self {
        if BOOKING_RE.is_match(request) {
            Self::Booking
        } else if INQUIRY_RE.is_match(request) {
            Self::Inquiry
        } else if MODIFICATION_RE.is_match(request) {
            Self::Modification
        } else if HELP_RE.is_match(request) {
            Self::HelpRequest
        } else {
            Self::General
        }
    }
}

impl fmt::Display for RequestIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Pattern,
    Entity,
    /// The parameter name appears in the request but no value was recognised.
    Mentioned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedValue {
    pub parameter: String,
    pub value: String,
    pub source: ValueSource,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentScores {
    pub completeness: f32,
    pub constraint_adherence: f32,
    pub scope_match: f32,
    pub safety_compliance: f32,
    pub overall: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentReport {
    pub values: Vec<ExtractedValue>,
    pub intent: RequestIntent,
    pub misalignments: Vec<Misalignment>,
    pub scores: AlignmentScores,
}

impl AlignmentReport {
    #[must_use]
    pub fn critical_count(&self) -> usize {
        self.misalignments
            .iter()
            .filter(|m| m.severity == Severity::Critical)
            .count()
    }

    /// No critical misalignment and an overall score of at least 5.
    #[must_use]
    pub fn is_fulfillable(&self) -> bool {
        self.critical_count() == 0 && self.scores.overall >= FULFILLABLE_MIN_SCORE
    }

    #[must_use]
    pub fn value(&self, parameter: &str) -> Option<&ExtractedValue> {
        self.values.iter().find(|v| v.parameter == parameter)
    }
}

/// Checks a user request against the requirements of a system prompt.
///
/// Only negative-polarity constraints are compared with the request. Positive constraints
/// describe what the assistant must do and are not checked for under-fulfillment.
pub struct AlignmentChecker {
    classifier: AnchorClassifier,
    config: Arc<AnchorConfig>,
    entities: Arc<dyn EntityProvider>,
}

impl AlignmentChecker {
    pub fn new(
        classifier: AnchorClassifier,
        config: Arc<AnchorConfig>,
        entities: Arc<dyn EntityProvider>,
    ) -> Self {
        Self {
            classifier,
            config,
            entities,
        }
    }

    /// A value for every parameter the request supplies, in requirement order.
    pub async fn extract_values(
        &self,
        requirements: &RequirementSet,
        request: &str,
    ) -> Result<Vec<ExtractedValue>> {
        let mut entities: Option<Vec<Entity>> = None;
        let mut values = Vec::new();
        for param in &requirements.parameters {
            if let Some(value) = pattern_value(&param.name, request) {
                values.push(ExtractedValue {
                    parameter: param.name.clone(),
                    value,
                    source: ValueSource::Pattern,
                    confidence: PATTERN_CONFIDENCE,
                });
                continue;
            }

            if let Some(label) = self.config.parameter(&param.name).and_then(|a| a.entity) {
                if entities.is_none() {
                    entities = Some(self.entities.extract_entities(request).await?);
                }
                let found = entities
                    .as_deref()
                    .and_then(|spans| spans.iter().find(|e| e.label == label));
                if let Some(entity) = found {
                    values.push(ExtractedValue {
                        parameter: param.name.clone(),
                        value: entity.text.clone(),
                        source: ValueSource::Entity,
                        confidence: ENTITY_CONFIDENCE,
                    });
                    continue;
                }
            }

            if mentions(&param.name, request) {
                values.push(ExtractedValue {
                    parameter: param.name.clone(),
                    value: MENTIONED_VALUE.to_string(),
                    source: ValueSource::Mentioned,
                    confidence: MENTIONED_CONFIDENCE,
                });
            }
        }
        Ok(values)
    }

    pub async fn check(
        &self,
        requirements: &RequirementSet,
        request: &str,
    ) -> Result<AlignmentReport> {
        let values = self.extract_values(requirements, request).await?;
        let intent = RequestIntent::classify(request);
        let thresholds = self.config.thresholds();
        let mut misalignments = Vec::new();

        for param in requirements.required_parameters() {
            if values.iter().any(|v| v.parameter == param.name) {
                continue;
            }
            misalignments.push(Misalignment {
                kind: MisalignmentKind::MissingParam {
                    parameter: param.name.clone(),
                },
                severity: Severity::Critical,
                system_text: param.description.clone(),
                user_text: NOT_PROVIDED.to_string(),
                confidence: MISSING_CONFIDENCE,
                line: Some(param.line),
            });
        }

        // Every system statement compared with the request, embedded in one batch.
        let negative: Vec<_> = requirements
            .constraints
            .iter()
            .filter(|c| c.polarity == Polarity::Negative)
            .collect();
        let restrictive: Vec<_> = requirements.scope.iter().filter(|s| s.restrictive).collect();
        let prohibitive: Vec<_> = requirements.safety.iter().filter(|s| s.prohibitive).collect();

        let mut texts: Vec<&str> = vec![request];
        texts.extend(negative.iter().map(|c| c.content.as_str()));
        texts.extend(restrictive.iter().map(|s| s.text.as_str()));
        texts.extend(prohibitive.iter().map(|s| s.text.as_str()));
        let vectors = self.classifier.embed_batch(&texts).await?;
        let Some((request_vector, rest)) = vectors.split_first() else {
            return Err(AnalysisError::Other("embedding batch came back empty".into()));
        };
        let (constraint_vectors, rest) = rest.split_at(negative.len().min(rest.len()));
        let (scope_vectors, safety_vectors) = rest.split_at(restrictive.len().min(rest.len()));

        for (constraint, vector) in negative.iter().zip(constraint_vectors) {
            let similarity = AnchorClassifier::similarity(request_vector, vector);
            let (threshold, severity) = match constraint.strength {
                ConstraintStrength::Hard => (thresholds.hard_violation, Severity::High),
                ConstraintStrength::Soft => (thresholds.soft_violation, Severity::Moderate),
            };
            if similarity > threshold {
                misalignments.push(Misalignment {
                    kind: MisalignmentKind::ConstraintViolation {
                        strength: constraint.strength,
                    },
                    severity,
                    system_text: constraint.content.clone(),
                    user_text: request.to_string(),
                    confidence: clamp_unit(similarity),
                    line: Some(constraint.line),
                });
            }
        }

        for (scope, vector) in restrictive.iter().zip(scope_vectors) {
            let similarity = AnchorClassifier::similarity(request_vector, vector);
            if similarity > thresholds.scope {
                misalignments.push(Misalignment {
                    kind: MisalignmentKind::OutOfScope,
                    severity: Severity::High,
                    system_text: scope.text.clone(),
                    user_text: request.to_string(),
                    confidence: clamp_unit(similarity),
                    line: Some(scope.line),
                });
            }
        }

        if let Some(conflict) = self.objective_conflict(requirements, intent, request) {
            misalignments.push(conflict);
        }

        for (guideline, vector) in prohibitive.iter().zip(safety_vectors) {
            let similarity = AnchorClassifier::similarity(request_vector, vector);
            if similarity > thresholds.safety {
                misalignments.push(Misalignment {
                    kind: MisalignmentKind::UnsafeRequest,
                    severity: Severity::High,
                    system_text: guideline.text.clone(),
                    user_text: request.to_string(),
                    confidence: clamp_unit(similarity),
                    line: Some(guideline.line),
                });
            }
        }

        let scores = alignment_scores(requirements, &values, &misalignments);
        log::debug!(
            "Alignment {:.2}: {} values, {} misalignments, intent {intent}",
            scores.overall,
            values.len(),
            misalignments.len()
        );
        Ok(AlignmentReport {
            values,
            intent,
            misalignments,
            scores,
        })
    }

    /// The first objective keyword found decides; an intent outside its allowed list
    /// conflicts.
    fn objective_conflict(
        &self,
        requirements: &RequirementSet,
        intent: RequestIntent,
        request: &str,
    ) -> Option<Misalignment> {
        let objective = requirements.primary_objective.to_lowercase();
        let rule = self
            .config
            .objective_intents()
            .iter()
            .find(|rule| objective.contains(&rule.keyword))?;
        if rule.allowed.contains(&intent) {
            return None;
        }
        Some(Misalignment {
            kind: MisalignmentKind::ConflictingObjective {
                intent: intent.as_str().to_string(),
            },
            severity: Severity::Moderate,
            system_text: requirements.primary_objective.clone(),
            user_text: request.to_string(),
            confidence: OBJECTIVE_CONFIDENCE,
            line: None,
        })
    }
}

fn pattern_value(parameter: &str, request: &str) -> Option<String> {
    patterns_for(parameter).iter().find_map(|re| {
        let caps = re.captures(request)?;
        let m = caps.get(1).or_else(|| caps.get(0))?;
        let value = m.as_str().trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn mentions(parameter: &str, request: &str) -> bool {
    let phrase = regex::escape(&parameter.replace('_', " "));
    Regex::new(&format!(r"(?i)\b{phrase}\b")).map_or(false, |re| re.is_match(request))
}

fn alignment_scores(
    requirements: &RequirementSet,
    values: &[ExtractedValue],
    misalignments: &[Misalignment],
) -> AlignmentScores {
    let count = |pred: fn(&MisalignmentKind) -> bool| {
        misalignments.iter().filter(|m| pred(&m.kind)).count() as f32
    };

    let required: Vec<_> = requirements.required_parameters().collect();
    let completeness = if required.is_empty() {
        10.0
    } else {
        let provided = required
            .iter()
            .filter(|p| values.iter().any(|v| v.parameter == p.name))
            .count();
        provided as f32 / required.len() as f32 * 10.0
    };

    let violations = count(|k| matches!(k, MisalignmentKind::ConstraintViolation { .. }));
    let constraint_adherence = if requirements.constraints.is_empty() {
        10.0
    } else {
        clamp_score(10.0 - 2.0 * violations)
    };

    let scope_hits = count(|k| {
        matches!(
            k,
            MisalignmentKind::OutOfScope | MisalignmentKind::ConflictingObjective { .. }
        )
    });
    let scope_match = clamp_score(10.0 - 3.0 * scope_hits);

    let unsafe_hits = count(|k| matches!(k, MisalignmentKind::UnsafeRequest));
    let safety_compliance = clamp_score(10.0 - 4.0 * unsafe_hits);

    let overall = clamp_score(
        COMPLETENESS_WEIGHT * completeness
            + CONSTRAINT_WEIGHT * constraint_adherence
            + SCOPE_WEIGHT * scope_match
            + SAFETY_WEIGHT * safety_compliance,
    );
    AlignmentScores {
        completeness,
        constraint_adherence,
        scope_match,
        safety_compliance,
        overall,
    }
}
