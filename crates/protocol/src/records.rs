use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Severity;

/// A parameter the system prompt expects the user to supply.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct ParameterRequirement {
    pub name: String,
    /// Source line text the parameter was detected on.
    pub description: String,
    pub required: bool,
    /// Max similarity against the parameter's anchor set.
    pub confidence: f32,
    pub line: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintStrength {
    Hard,
    Soft,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Constraint {
    pub content: String,
    pub polarity: Polarity,
    pub strength: ConstraintStrength,
    pub line: usize,
    pub confidence: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct ScopeStatement {
    pub text: String,
    pub line: usize,
    /// Contains "cannot"/"can't", i.e. it fences something off.
    pub restrictive: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct OutputFormatStatement {
    pub text: String,
    pub line: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct SafetyGuideline {
    pub text: String,
    pub line: usize,
    /// Uses prohibition vocabulary (cannot, never, avoid, don't ...).
    pub prohibitive: bool,
}

/// Everything extracted from one system prompt.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default, JsonSchema)]
pub struct RequirementSet {
    pub parameters: Vec<ParameterRequirement>,
    pub constraints: Vec<Constraint>,
    pub scope: Vec<ScopeStatement>,
    pub output_format: Vec<OutputFormatStatement>,
    pub safety: Vec<SafetyGuideline>,
    pub domain: String,
    pub primary_objective: String,
}

impl RequirementSet {
    pub fn required_parameters(&self) -> impl Iterator<Item = &ParameterRequirement> {
        self.parameters.iter().filter(|p| p.required)
    }

    pub fn constraints_of(
        &self,
        strength: ConstraintStrength,
    ) -> impl Iterator<Item = &Constraint> {
        self.constraints
            .iter()
            .filter(move |c| c.strength == strength)
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterRequirement> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// A directive as it appeared in the source document.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
pub struct StatementRef {
    pub text: String,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clause: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContradictionKind {
    DirectNegation,
    BehavioralConflict {
        category: String,
        first_pole: String,
        second_pole: String,
    },
    ConstraintMismatch {
        category: String,
    },
}

impl ContradictionKind {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::DirectNegation => "direct-negation",
            Self::BehavioralConflict { .. } => "behavioral-conflict",
            Self::ConstraintMismatch { .. } => "constraint-mismatch",
        }
    }

    #[must_use]
    pub fn category(&self) -> Option<&str> {
        match self {
            Self::DirectNegation => None,
            Self::BehavioralConflict { category, .. } | Self::ConstraintMismatch { category } => {
                Some(category)
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Contradiction {
    pub kind: ContradictionKind,
    pub severity: Severity,
    pub first: StatementRef,
    pub second: StatementRef,
    pub confidence: f32,
    pub explanation: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MisalignmentKind {
    MissingParam { parameter: String },
    ConstraintViolation { strength: ConstraintStrength },
    OutOfScope,
    ConflictingObjective { intent: String },
    UnsafeRequest,
}

impl MisalignmentKind {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::MissingParam { .. } => "missing-param",
            Self::ConstraintViolation { .. } => "constraint-violation",
            Self::OutOfScope => "out-of-scope",
            Self::ConflictingObjective { .. } => "conflicting-objective",
            Self::UnsafeRequest => "unsafe-request",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, JsonSchema)]
pub struct Misalignment {
    pub kind: MisalignmentKind,
    pub severity: Severity,
    pub system_text: String,
    pub user_text: String,
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}
