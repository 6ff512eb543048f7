use std::sync::Arc;

use once_cell::sync::Lazy;
use prompt_protocol::{
    clamp_unit, Constraint, ConstraintStrength, OutputFormatStatement, ParameterRequirement,
    Polarity, RequirementSet, SafetyGuideline, ScopeStatement,
};
use prompt_segmenter::{
    contains_negation, document_lines, fold, has_hard_modal, has_soft_modal, DocumentLine,
    LineKind,
};
use regex::Regex;

use crate::classifier::AnchorClassifier;
use crate::config::{parameter_set, AnchorConfig};
use crate::entities::compile;
use crate::error::{AnalysisError, Result};

pub const DEFAULT_OBJECTIVE: &str = "general assistant";
pub const DEFAULT_DOMAIN: &str = "general";

const HARD_CONFIDENCE: f32 = 0.85;
const SOFT_CONFIDENCE: f32 = 0.75;
const MIN_CONSTRAINT_CHARS: usize = 10;
const OBJECTIVE_SCAN_LINES: usize = 10;

static REQUIRED_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"\b(?:required|must\s+provide|needed|necessary)\b"));
static OPTIONAL_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"\b(?:optional|may\s+provide|can\s+provide)\b"));

static SCOPE_RE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"\b(?:you\s+are|you're|your\s+role\s+is|your\s+purpose\s+is|you\s+can|you\s+cannot|you\s+can't|you\s+may|you\s+may\s+not|your\s+responsibility|you\s+will|you\s+won't)\b",
    )
});
static RESTRICTIVE_RE: Lazy<Regex> = Lazy::new(|| compile(r"\b(?:cannot|can't)\b"));

static FORMAT_RE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"\b(?:format|structure|respond|reply|answer|json|xml|markdown|list|table)\b|\bunder\s+\d+\s+words\b|\bwithin\s+\d+\s+characters\b",
    )
});
static FORMAT_EXCLUDE_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"\b(?:user|input|provide|give\s+me)\b"));

static SAFETY_RE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"\b(?:safety|safe|unsafe|harm|harmful|privacy|private|confidential|personal|security|secure|protect|sensitive|ethical|ethics|appropriate|inappropriate|(?:medical|legal|financial)\s+advice)\b",
    )
});
static PROHIBITIVE_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"\b(?:cannot|never|avoid|don't|do\s+not)\b"));

static ROLE_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\byou\s+are\s+(?:a\s+|an\s+)?(.*?)(?:assistant|bot|agent|system)"));
static PURPOSE_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\byour\s+(?:role|purpose)\s+is\s+to\s+(.*)"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SectionMode {
    Unmarked,
    Required,
    Optional,
}

impl SectionMode {
    fn from_header(label: &str) -> Self {
        let folded = fold(label);
        if REQUIRED_HEADER_RE.is_match(&folded) {
            Self::Required
        } else if OPTIONAL_HEADER_RE.is_match(&folded) {
            Self::Optional
        } else {
            Self::Unmarked
        }
    }
}

/// Turns a system prompt into a [`RequirementSet`].
///
/// Parameters come from anchor matching; constraints, scope, output format and safety
/// statements from lexical cues on each content line.
pub struct RequirementExtractor {
    classifier: AnchorClassifier,
    config: Arc<AnchorConfig>,
    parameter_sets: Vec<String>,
    domains: Vec<(String, Vec<Regex>)>,
}

impl RequirementExtractor {
    pub fn new(classifier: AnchorClassifier, config: Arc<AnchorConfig>) -> Result<Self> {
        let parameter_sets = config
            .parameters()
            .iter()
            .map(|p| parameter_set(&p.name))
            .collect();
        let domains = config
            .domains()
            .iter()
            .map(|domain| {
                let patterns = domain
                    .keywords
                    .iter()
                    .map(|keyword| {
                        Regex::new(&format!(r"\b{}\b", regex::escape(keyword))).map_err(|err| {
                            AnalysisError::AnchorConfig(format!(
                                "domains.{}: bad keyword '{keyword}': {err}",
                                domain.name
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((domain.name.clone(), patterns))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            classifier,
            config,
            parameter_sets,
            domains,
        })
    }

    pub async fn extract(&self, text: &str) -> Result<RequirementSet> {
        self.extract_lines(&document_lines(text)).await
    }

    pub async fn extract_lines(&self, lines: &[DocumentLine]) -> Result<RequirementSet> {
        let content: Vec<&str> = lines
            .iter()
            .filter(|l| l.is_content())
            .map(|l| l.content.as_str())
            .collect();
        let vectors = if content.is_empty() {
            Vec::new()
        } else {
            self.classifier.embed_batch(&content).await?
        };

        let mut set = RequirementSet::default();
        let mut mode = SectionMode::Unmarked;
        let mut vectors = vectors.into_iter();
        for line in lines {
            match line.kind {
                LineKind::Header => {
                    mode = SectionMode::from_header(&line.content);
                    continue;
                }
                LineKind::Content => {}
                LineKind::Blank | LineKind::Separator => continue,
            }
            let Some(vector) = vectors.next() else {
                break;
            };

            if let Some(hit) = self.classifier.best_match(
                &vector,
                &self.parameter_sets,
                self.config.thresholds().parameter,
            )? {
                let name = hit.set.trim_start_matches("param:").to_string();
                log::debug!(
                    "line {}: parameter '{name}' ({:.3}, {mode:?})",
                    line.number,
                    hit.score
                );
                push_parameter(
                    &mut set.parameters,
                    ParameterRequirement {
                        name,
                        description: line.content.clone(),
                        required: mode == SectionMode::Required,
                        confidence: clamp_unit(hit.score),
                        line: line.number,
                    },
                );
            }

            classify_statement(line, &mut set);
        }

        set.primary_objective = primary_objective(lines);
        set.domain = self.domain_of(lines);
        log::debug!(
            "Extracted {} parameters, {} constraints, {} scope statements (domain {})",
            set.parameters.len(),
            set.constraints.len(),
            set.scope.len(),
            set.domain
        );
        Ok(set)
    }

    /// Domain with the most distinct keywords present; ties keep table order.
    fn domain_of(&self, lines: &[DocumentLine]) -> String {
        let text = fold(
            &lines
                .iter()
                .map(|l| l.content.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        );
        let mut best: Option<(&str, usize)> = None;
        for (name, patterns) in &self.domains {
            let hits = patterns.iter().filter(|re| re.is_match(&text)).count();
            if hits > 0 && best.map_or(true, |(_, top)| hits > top) {
                best = Some((name.as_str(), hits));
            }
        }
        best.map_or_else(|| DEFAULT_DOMAIN.to_string(), |(name, _)| name.to_string())
    }
}

fn classify_statement(line: &DocumentLine, set: &mut RequirementSet) {
    let text = &line.content;
    let folded = fold(text);

    if text.chars().count() >= MIN_CONSTRAINT_CHARS {
        let strength = if has_hard_modal(text) {
            Some((ConstraintStrength::Hard, HARD_CONFIDENCE))
        } else if has_soft_modal(text) {
            Some((ConstraintStrength::Soft, SOFT_CONFIDENCE))
        } else {
            None
        };
        if let Some((strength, confidence)) = strength {
            set.constraints.push(Constraint {
                content: text.clone(),
                polarity: if contains_negation(text) {
                    Polarity::Negative
                } else {
                    Polarity::Positive
                },
                strength,
                line: line.number,
                confidence,
            });
        }
    }

    if SCOPE_RE.is_match(&folded) {
        set.scope.push(ScopeStatement {
            text: text.clone(),
            line: line.number,
            restrictive: RESTRICTIVE_RE.is_match(&folded),
        });
    }

    if FORMAT_RE.is_match(&folded) && !FORMAT_EXCLUDE_RE.is_match(&folded) {
        set.output_format.push(OutputFormatStatement {
            text: text.clone(),
            line: line.number,
        });
    }

    if SAFETY_RE.is_match(&folded) {
        set.safety.push(SafetyGuideline {
            text: text.clone(),
            line: line.number,
            prohibitive: PROHIBITIVE_RE.is_match(&folded),
        });
    }
}

/// One entry per parameter name: first line wins, confidence is the max, required if any
/// mention was required.
fn push_parameter(parameters: &mut Vec<ParameterRequirement>, param: ParameterRequirement) {
    match parameters.iter_mut().find(|p| p.name == param.name) {
        Some(existing) => {
            existing.confidence = existing.confidence.max(param.confidence);
            existing.required |= param.required;
        }
        None => parameters.push(param),
    }
}

fn primary_objective(lines: &[DocumentLine]) -> String {
    for line in lines
        .iter()
        .filter(|l| l.number <= OBJECTIVE_SCAN_LINES && !l.content.is_empty())
    {
        let captured = ROLE_RE
            .captures(&line.content)
            .or_else(|| PURPOSE_RE.captures(&line.content))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().trim_end_matches(['.', '!', ',', ';']).trim());
        if let Some(objective) = captured {
            let objective = if objective.is_empty() { DEFAULT_OBJECTIVE } else { objective };
            return objective.to_string();
        }
    }
    DEFAULT_OBJECTIVE.to_string()
}
