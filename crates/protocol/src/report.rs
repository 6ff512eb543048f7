use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::records::{Contradiction, Misalignment, RequirementSet};
use crate::{clamp_score, clamp_unit, Severity};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Contradiction,
    Misalignment,
    ParameterGap,
    Vagueness,
    DeepRisk,
}

/// Flat, presentation-ready record produced from every typed result.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Finding {
    pub category: FindingCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct FollowUpQuestion {
    pub parameter: String,
    pub question: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Scores {
    pub consistency: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vagueness: Option<f32>,
    /// Embedding-only score before any deep pass adjustment.
    pub baseline: f32,
    pub overall: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QualityRating {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl QualityRating {
    #[must_use]
    pub fn from_score(score: f32) -> Self {
        if score >= 9.0 {
            Self::Excellent
        } else if score >= 7.0 {
            Self::Good
        } else if score >= 5.0 {
            Self::Fair
        } else if score >= 3.0 {
            Self::Poor
        } else {
            Self::Critical
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskType {
    Semantic,
    Safety,
    Security,
    None,
}

/// Verdict returned by an optional deep review of the prompt pair.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct RiskAssessment {
    pub is_impossible: bool,
    /// 0 (harmless) to 10 (certainly unfulfillable or harmful).
    pub score: f32,
    pub risk_type: RiskType,
    pub explanation: String,
    pub recommendation: String,
    pub confidence: f32,
}

impl RiskAssessment {
    /// Reviewer output is untrusted; pull every number back into its range.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.score = clamp_score(self.score);
        self.confidence = clamp_unit(self.confidence);
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeepPassStatus {
    NotConfigured,
    Completed { assessment: RiskAssessment },
    Skipped { reason: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct AnalysisReport {
    pub schema_version: u32,
    pub requirements: RequirementSet,
    pub directive_count: usize,
    pub contradictions: Vec<Contradiction>,
    pub misalignments: Vec<Misalignment>,
    pub findings: Vec<Finding>,
    pub followups: Vec<FollowUpQuestion>,
    pub scores: Scores,
    pub rating: QualityRating,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillable: Option<bool>,
    pub deep_pass: DeepPassStatus,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl AnalysisReport {
    pub fn findings_at_least(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity >= severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_ladder_boundaries() {
        assert_eq!(QualityRating::from_score(10.0), QualityRating::Excellent);
        assert_eq!(QualityRating::from_score(9.0), QualityRating::Excellent);
        assert_eq!(QualityRating::from_score(8.99), QualityRating::Good);
        assert_eq!(QualityRating::from_score(5.0), QualityRating::Fair);
        assert_eq!(QualityRating::from_score(3.0), QualityRating::Poor);
        assert_eq!(QualityRating::from_score(2.9), QualityRating::Critical);
    }

    #[test]
    fn risk_assessment_is_sanitized() {
        let raw = RiskAssessment {
            is_impossible: true,
            score: 42.0,
            risk_type: RiskType::Safety,
            explanation: String::new(),
            recommendation: String::new(),
            confidence: -1.0,
        };
        let clean = raw.sanitized();
        assert!((clean.score - 10.0).abs() < f32::EPSILON);
        assert!(clean.confidence.abs() < f32::EPSILON);
    }

    #[test]
    fn deep_pass_status_is_tagged() {
        let status = DeepPassStatus::Skipped {
            reason: "timeout".to_string(),
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["status"], "skipped");
        assert_eq!(value["reason"], "timeout");
    }
}
