use std::sync::Arc;

use prompt_protocol::{clamp_score, clamp_unit, FollowUpQuestion, RequirementSet};
use prompt_vector_store::softmax;
use serde::{Deserialize, Serialize};

use crate::alignment::{ExtractedValue, ValueSource};
use crate::classifier::AnchorClassifier;
use crate::config::{specificity_set, AnchorConfig, SpecificityLevel};
use crate::error::Result;

const PENALTY_EXPONENT: f32 = 0.7;
const SOFTMAX_TEMPERATURE: f32 = 0.5;

const BOTH_PLACES_MISSING: f32 = 2.0;
const ONE_PLACE_MISSING: f32 = 1.0;
const DATE_MISSING: f32 = 0.5;

const COMPLETENESS_SHARE: f32 = 0.5;
const SPECIFICITY_SHARE: f32 = 0.3;

const CONFIDENT_VALUE: f32 = 0.85;
const UNCERTAIN_VALUE: f32 = 0.6;
const CONFIDENT_ABOVE: f32 = 0.7;
const VAGUE_BELOW: f32 = 0.5;

/// `10 * ratio^0.7`, zero for a non-positive ratio.
#[must_use]
pub fn completeness_penalty(missing_ratio: f32) -> f32 {
    if missing_ratio.is_nan() || missing_ratio <= 0.0 {
        return 0.0;
    }
    10.0 * missing_ratio.min(1.0).powf(PENALTY_EXPONENT)
}

/// Fixed add-ons for the parameters a travel request cannot do without.
#[must_use]
pub fn critical_penalty(missing: &[String]) -> f32 {
    let is_missing = |name: &str| missing.iter().any(|m| m == name);
    let places = usize::from(is_missing("origin")) + usize::from(is_missing("destination"));
    let mut penalty = match places {
        2 => BOTH_PLACES_MISSING,
        1 => ONE_PLACE_MISSING,
        _ => 0.0,
    };
    if is_missing("date") {
        penalty += DATE_MISSING;
    }
    penalty
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaguenessLevel {
    VerySpecific,
    MostlySpecific,
    ModeratelyVague,
    Vague,
    VeryVague,
}

impl VaguenessLevel {
    #[must_use]
    pub fn from_score(score: f32) -> Self {
        if score <= 1.5 {
            Self::VerySpecific
        } else if score <= 3.5 {
            Self::MostlySpecific
        } else if score <= 5.5 {
            Self::ModeratelyVague
        } else if score <= 7.5 {
            Self::Vague
        } else {
            Self::VeryVague
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::VerySpecific => "Request is complete and specific",
            Self::MostlySpecific => "Request is mostly specific with minor gaps",
            Self::ModeratelyVague => "Request is missing some details",
            Self::Vague => "Request lacks several important details",
            Self::VeryVague => "Request is too vague to act on",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpecificity {
    pub parameter: String,
    pub value: String,
    /// 0 (vague) to 1 (specific).
    pub specificity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaguenessReport {
    /// 0 (specific) to 10 (very vague).
    pub score: f32,
    pub level: VaguenessLevel,
    pub completeness_penalty: f32,
    pub specificity_score: f32,
    /// Required parameters the request did not supply, in requirement order.
    pub missing: Vec<String>,
    pub specificity: Vec<ParameterSpecificity>,
    pub followups: Vec<FollowUpQuestion>,
}

impl VaguenessReport {
    pub fn vague_values(&self) -> impl Iterator<Item = &ParameterSpecificity> {
        self.specificity
            .iter()
            .filter(|s| s.specificity < VAGUE_BELOW)
    }
}

/// Scores how much a request leaves unsaid and turns the gaps into questions.
pub struct VaguenessEngine {
    classifier: AnchorClassifier,
    config: Arc<AnchorConfig>,
}

impl VaguenessEngine {
    pub fn new(classifier: AnchorClassifier, config: Arc<AnchorConfig>) -> Self {
        Self { classifier, config }
    }

    /// Softmax blend over the specific, moderate and vague centroids of `parameter`:
    /// `0.5 + 0.5 * (p_specific - p_vague)`. `None` when the parameter has no centroids.
    pub async fn specificity(&self, parameter: &str, value: &str) -> Result<Option<f32>> {
        if self.config.specificity_for(parameter).is_none() {
            return Ok(None);
        }
        let names: Vec<String> = SpecificityLevel::ALL
            .iter()
            .map(|level| specificity_set(parameter, *level))
            .collect();
        let vector = self.classifier.embed(value).await?;
        let sims = self.classifier.centroid_similarities(&vector, &names)?;
        let probs = softmax(&sims, SOFTMAX_TEMPERATURE);
        let [specific, _, vague] = probs.as_slice() else {
            return Ok(None);
        };
        Ok(Some(clamp_unit(0.5 + 0.5 * (specific - vague))))
    }

    async fn value_specificity(&self, value: &ExtractedValue) -> Result<f32> {
        if value.source != ValueSource::Mentioned {
            if let Some(score) = self.specificity(&value.parameter, &value.value).await? {
                return Ok(score);
            }
        }
        Ok(
            if value.source != ValueSource::Mentioned && value.confidence > CONFIDENT_ABOVE {
                CONFIDENT_VALUE
            } else {
                UNCERTAIN_VALUE
            },
        )
    }

    pub async fn assess(
        &self,
        requirements: &RequirementSet,
        values: &[ExtractedValue],
    ) -> Result<VaguenessReport> {
        let required: Vec<_> = requirements.required_parameters().collect();
        let missing: Vec<String> = required
            .iter()
            .filter(|p| !values.iter().any(|v| v.parameter == p.name))
            .map(|p| p.name.clone())
            .collect();
        let ratio = if required.is_empty() {
            0.0
        } else {
            missing.len() as f32 / required.len() as f32
        };
        let completeness = completeness_penalty(ratio);
        let critical = critical_penalty(&missing);

        let mut specificity = Vec::with_capacity(values.len());
        for value in values {
            specificity.push(ParameterSpecificity {
                parameter: value.parameter.clone(),
                value: value.value.clone(),
                specificity: self.value_specificity(value).await?,
            });
        }
        let specificity_score = if specificity.is_empty() {
            0.0
        } else {
            let mean =
                specificity.iter().map(|s| s.specificity).sum::<f32>() / specificity.len() as f32;
            10.0 * (1.0 - mean)
        };

        let score = clamp_score(
            COMPLETENESS_SHARE * completeness + SPECIFICITY_SHARE * specificity_score + critical,
        );

        let mut followups: Vec<FollowUpQuestion> = missing
            .iter()
            .map(|name| FollowUpQuestion {
                parameter: name.clone(),
                question: self.missing_question(name),
            })
            .collect();
        followups.extend(
            specificity
                .iter()
                .filter(|s| s.specificity < VAGUE_BELOW)
                .map(|s| FollowUpQuestion {
                    parameter: s.parameter.clone(),
                    question: self.vague_question(&s.parameter, &s.value),
                }),
        );

        let level = VaguenessLevel::from_score(score);
        log::debug!(
            "Vagueness {score:.2} ({level:?}): {} missing, specificity {specificity_score:.2}",
            missing.len()
        );
        Ok(VaguenessReport {
            score,
            level,
            completeness_penalty: completeness,
            specificity_score,
            missing,
            specificity,
            followups,
        })
    }

    fn missing_question(&self, parameter: &str) -> String {
        self.config.parameter(parameter).map_or_else(
            || format!("Could you provide the {}?", parameter.replace('_', " ")),
            |anchor| anchor.question.clone(),
        )
    }

    fn vague_question(&self, parameter: &str, value: &str) -> String {
        self.config
            .parameter(parameter)
            .and_then(|anchor| anchor.vague_question_for(value))
            .unwrap_or_else(|| {
                format!(
                    "Could you be more specific about the {} than '{value}'?",
                    parameter.replace('_', " ")
                )
            })
    }
}
