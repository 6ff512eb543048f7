use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::alignment::RequestIntent;
use crate::entities::EntityLabel;

const BUILTIN_ANCHORS: &str = include_str!("../../../anchors/default.json");

pub const ANCHOR_SCHEMA_VERSION: u32 = 1;

/// Similarity thresholds, one per call site.
#[derive(Clone, Debug, PartialEq)]
pub struct Thresholds {
    /// Parameter detection, inclusive.
    pub parameter: f32,
    /// Behavioral and constraint-mismatch matching, exclusive.
    pub conflict: f32,
    /// Negation-stripped similarity, inclusive.
    pub negation: f32,
    pub hard_violation: f32,
    pub soft_violation: f32,
    pub scope: f32,
    pub safety: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            parameter: 0.60,
            conflict: 0.65,
            negation: 0.65,
            hard_violation: 0.65,
            soft_violation: 0.70,
            scope: 0.60,
            safety: 0.65,
        }
    }
}

impl Thresholds {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("parameter", self.parameter),
            ("conflict", self.conflict),
            ("negation", self.negation),
            ("hard_violation", self.hard_violation),
            ("soft_violation", self.soft_violation),
            ("scope", self.scope),
            ("safety", self.safety),
        ] {
            validate_unit(&format!("thresholds.{name}"), value)?;
        }
        Ok(())
    }
}

/// Average-confidence cut points for contradiction severities.
#[derive(Clone, Debug, PartialEq)]
pub struct SeverityCutPoints {
    pub behavioral_high: f32,
    pub behavioral_moderate: f32,
    /// HIGH cut point for categories flagged `elevated`.
    pub elevated_high: f32,
    pub constraint_high: f32,
}

impl Default for SeverityCutPoints {
    fn default() -> Self {
        Self {
            behavioral_high: 0.80,
            behavioral_moderate: 0.70,
            elevated_high: 0.70,
            constraint_high: 0.70,
        }
    }
}

impl SeverityCutPoints {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("behavioral_high", self.behavioral_high),
            ("behavioral_moderate", self.behavioral_moderate),
            ("elevated_high", self.elevated_high),
            ("constraint_high", self.constraint_high),
        ] {
            validate_unit(&format!("severity.{name}"), value)?;
        }
        if self.behavioral_moderate > self.behavioral_high {
            return Err(anyhow!(
                "severity.behavioral_moderate ({}) must not exceed severity.behavioral_high ({})",
                self.behavioral_moderate,
                self.behavioral_high
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterAnchor {
    pub name: String,
    pub description: String,
    pub phrases: Vec<String>,
    /// Follow-up asked when the parameter is missing from a request.
    pub question: String,
    /// Follow-up for a vague value; `{value}` is replaced with the extracted text.
    pub vague_question: Option<String>,
    /// Entity label used when no pattern extracts a value.
    pub entity: Option<EntityLabel>,
}

impl ParameterAnchor {
    #[must_use]
    pub fn vague_question_for(&self, value: &str) -> Option<String> {
        self.vague_question
            .as_deref()
            .map(|template| template.replace("{value}", value))
    }
}

/// Two opposite behavioral poles, each represented by its own exemplars.
#[derive(Clone, Debug, PartialEq)]
pub struct OppositePair {
    pub name: String,
    pub poles: [String; 2],
    pub first: Vec<String>,
    pub second: Vec<String>,
    pub elevated: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintConflict {
    pub name: String,
    pub first: Vec<String>,
    pub second: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecificityLevel {
    Specific,
    Moderate,
    Vague,
}

impl SpecificityLevel {
    pub const ALL: [Self; 3] = [Self::Specific, Self::Moderate, Self::Vague];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Specific => "specific",
            Self::Moderate => "moderate",
            Self::Vague => "vague",
        }
    }
}

impl fmt::Display for SpecificityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exemplar values at three specificity levels for one parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct SpecificityExemplars {
    pub parameter: String,
    pub specific: Vec<String>,
    pub moderate: Vec<String>,
    pub vague: Vec<String>,
}

impl SpecificityExemplars {
    #[must_use]
    pub fn phrases(&self, level: SpecificityLevel) -> &[String] {
        match level {
            SpecificityLevel::Specific => &self.specific,
            SpecificityLevel::Moderate => &self.moderate,
            SpecificityLevel::Vague => &self.vague,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DomainKeywords {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Intents a request may carry when the primary objective mentions `keyword`.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectiveIntent {
    pub keyword: String,
    pub allowed: Vec<RequestIntent>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConflictSide {
    First,
    Second,
}

impl ConflictSide {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Second => "second",
        }
    }
}

#[must_use]
pub fn parameter_set(name: &str) -> String {
    format!("param:{name}")
}

#[must_use]
pub fn pole_set(category: &str, pole: &str) -> String {
    format!("behavior:{category}:{pole}")
}

#[must_use]
pub fn conflict_set(category: &str, side: ConflictSide) -> String {
    format!("conflict:{category}:{}", side.as_str())
}

#[must_use]
pub fn specificity_set(parameter: &str, level: SpecificityLevel) -> String {
    format!("specificity:{parameter}:{level}")
}

/// Immutable anchor tables and thresholds shared by every classifier.
///
/// The bundled `anchors/default.json` is always the base layer. An overlay (JSON, or TOML
/// when JSON parsing fails) overrides scalars field by field; named entries replace the
/// entry with the same name and new names are appended.
#[derive(Clone, Debug)]
pub struct AnchorConfig {
    thresholds: Thresholds,
    severity: SeverityCutPoints,
    parameters: Vec<ParameterAnchor>,
    behavioral: Vec<OppositePair>,
    conflicts: Vec<ConstraintConflict>,
    specificity: Vec<SpecificityExemplars>,
    domains: Vec<DomainKeywords>,
    objective_intents: Vec<ObjectiveIntent>,
}

impl AnchorConfig {
    pub fn builtin() -> Result<Self> {
        let raw = parse_raw(BUILTIN_ANCHORS.as_bytes()).context("Invalid builtin anchors")?;
        Self::from_raw(raw)
    }

    /// Builtin anchors with `bytes` merged over them.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let base = parse_raw(BUILTIN_ANCHORS.as_bytes()).context("Invalid builtin anchors")?;
        let overlay = parse_raw(bytes)?;
        Self::from_raw(merge_raw(base, overlay))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read anchor config {}", path.display()))?;
        Self::from_bytes(&bytes)
            .with_context(|| format!("Invalid anchor config {}", path.display()))
    }

    /// Replace thresholds, keeping every table.
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Result<Self> {
        thresholds.validate()?;
        self.thresholds = thresholds;
        Ok(self)
    }

    #[must_use]
    pub const fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    #[must_use]
    pub const fn severity(&self) -> &SeverityCutPoints {
        &self.severity
    }

    #[must_use]
    pub fn parameters(&self) -> &[ParameterAnchor] {
        &self.parameters
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&ParameterAnchor> {
        self.parameters.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn behavioral_opposites(&self) -> &[OppositePair] {
        &self.behavioral
    }

    #[must_use]
    pub fn constraint_conflicts(&self) -> &[ConstraintConflict] {
        &self.conflicts
    }

    #[must_use]
    pub fn specificity(&self) -> &[SpecificityExemplars] {
        &self.specificity
    }

    #[must_use]
    pub fn specificity_for(&self, parameter: &str) -> Option<&SpecificityExemplars> {
        self.specificity.iter().find(|s| s.parameter == parameter)
    }

    #[must_use]
    pub fn domains(&self) -> &[DomainKeywords] {
        &self.domains
    }

    #[must_use]
    pub fn objective_intents(&self) -> &[ObjectiveIntent] {
        &self.objective_intents
    }

    /// Anchor set name to phrases, for every parameter, pole and conflict side.
    #[must_use]
    pub fn anchor_table(&self) -> Vec<(String, Vec<String>)> {
        let mut table = Vec::new();
        for param in &self.parameters {
            table.push((parameter_set(&param.name), param.phrases.clone()));
        }
        for pair in &self.behavioral {
            table.push((pole_set(&pair.name, &pair.poles[0]), pair.first.clone()));
            table.push((pole_set(&pair.name, &pair.poles[1]), pair.second.clone()));
        }
        for conflict in &self.conflicts {
            table.push((
                conflict_set(&conflict.name, ConflictSide::First),
                conflict.first.clone(),
            ));
            table.push((
                conflict_set(&conflict.name, ConflictSide::Second),
                conflict.second.clone(),
            ));
        }
        table
    }

    /// Centroid name to exemplar values, one per parameter and specificity level.
    #[must_use]
    pub fn centroid_table(&self) -> Vec<(String, Vec<String>)> {
        self.specificity
            .iter()
            .flat_map(|entry| {
                SpecificityLevel::ALL.into_iter().map(move |level| {
                    (
                        specificity_set(&entry.parameter, level),
                        entry.phrases(level).to_vec(),
                    )
                })
            })
            .collect()
    }

    fn from_raw(raw: RawAnchorConfig) -> Result<Self> {
        if let Some(version) = raw.schema_version {
            if version != ANCHOR_SCHEMA_VERSION {
                return Err(anyhow!(
                    "anchors.schema_version {version} is not supported (expected {ANCHOR_SCHEMA_VERSION})"
                ));
            }
        }

        let thresholds = merge_thresholds(raw.thresholds);
        thresholds.validate()?;
        let severity = merge_severity(raw.severity);
        severity.validate()?;

        let parameters = raw
            .parameters
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(idx, p)| p.finish(&format!("parameters[{idx}]")))
            .collect::<Result<Vec<_>>>()?;
        unique_names("parameters", parameters.iter().map(|p| p.name.as_str()))?;

        let behavioral = raw
            .behavioral_opposites
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(idx, p)| p.finish(&format!("behavioral_opposites[{idx}]")))
            .collect::<Result<Vec<_>>>()?;
        unique_names(
            "behavioral_opposites",
            behavioral.iter().map(|p| p.name.as_str()),
        )?;

        let conflicts = raw
            .constraint_conflicts
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(idx, c)| c.finish(&format!("constraint_conflicts[{idx}]")))
            .collect::<Result<Vec<_>>>()?;
        unique_names(
            "constraint_conflicts",
            conflicts.iter().map(|c| c.name.as_str()),
        )?;

        let specificity = raw
            .specificity
            .unwrap_or_default()
            .into_iter()
            .map(|(parameter, levels)| levels.finish(parameter))
            .collect::<Result<Vec<_>>>()?;

        let domains = raw
            .domains
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(idx, d)| d.finish(&format!("domains[{idx}]")))
            .collect::<Result<Vec<_>>>()?;
        unique_names("domains", domains.iter().map(|d| d.name.as_str()))?;

        let objective_intents = raw
            .objective_intents
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(idx, o)| o.finish(&format!("objective_intents[{idx}]")))
            .collect::<Result<Vec<_>>>()?;
        unique_names(
            "objective_intents",
            objective_intents.iter().map(|o| o.keyword.as_str()),
        )?;

        Ok(Self {
            thresholds,
            severity,
            parameters,
            behavioral,
            conflicts,
            specificity,
            domains,
            objective_intents,
        })
    }
}

fn validate_unit(path: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{path} must lie in [0, 1], got {value}"));
    }
    Ok(())
}

fn unique_names<'a>(section: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(anyhow!("{section}: duplicate name '{name}'"));
        }
    }
    Ok(())
}

fn required<T>(value: Option<T>, path: &str) -> Result<T> {
    value.ok_or_else(|| anyhow!("{path} is required"))
}

fn phrase_list(value: Option<Vec<String>>, path: &str) -> Result<Vec<String>> {
    let phrases: Vec<String> = required(value, path)?
        .into_iter()
        .map(|p| p.trim().to_string())
        .collect();
    if phrases.is_empty() {
        return Err(anyhow!("{path} must not be empty"));
    }
    if let Some(idx) = phrases.iter().position(String::is_empty) {
        return Err(anyhow!("{path}[{idx}] must not be blank"));
    }
    Ok(phrases)
}

fn entry_name(name: String, path: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("{path}.name must not be empty"));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Default, Deserialize)]
struct RawAnchorConfig {
    schema_version: Option<u32>,
    thresholds: Option<RawThresholds>,
    severity: Option<RawSeverity>,
    parameters: Option<Vec<RawParameter>>,
    behavioral_opposites: Option<Vec<RawOpposite>>,
    constraint_conflicts: Option<Vec<RawConflict>>,
    specificity: Option<BTreeMap<String, RawSpecificity>>,
    domains: Option<Vec<RawDomain>>,
    objective_intents: Option<Vec<RawObjectiveIntent>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawThresholds {
    parameter: Option<f32>,
    conflict: Option<f32>,
    negation: Option<f32>,
    hard_violation: Option<f32>,
    soft_violation: Option<f32>,
    scope: Option<f32>,
    safety: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSeverity {
    behavioral_high: Option<f32>,
    behavioral_moderate: Option<f32>,
    elevated_high: Option<f32>,
    constraint_high: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
struct RawParameter {
    name: String,
    description: Option<String>,
    phrases: Option<Vec<String>>,
    question: Option<String>,
    vague_question: Option<String>,
    entity: Option<EntityLabel>,
}

impl RawParameter {
    fn finish(self, path: &str) -> Result<ParameterAnchor> {
        let name = entry_name(self.name, path)?;
        Ok(ParameterAnchor {
            description: self.description.unwrap_or_else(|| name.replace('_', " ")),
            phrases: phrase_list(self.phrases, &format!("{path}.phrases"))?,
            question: required(self.question, &format!("{path}.question"))?,
            vague_question: self.vague_question,
            entity: self.entity,
            name,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawOpposite {
    name: String,
    poles: Option<Vec<String>>,
    first: Option<Vec<String>>,
    second: Option<Vec<String>>,
    elevated: Option<bool>,
}

impl RawOpposite {
    fn finish(self, path: &str) -> Result<OppositePair> {
        let name = entry_name(self.name, path)?;
        let poles = required(self.poles, &format!("{path}.poles"))?;
        let [first_pole, second_pole]: [String; 2] = poles.try_into().map_err(|poles: Vec<String>| {
            anyhow!("{path}.poles must name exactly two poles, got {}", poles.len())
        })?;
        if first_pole == second_pole {
            return Err(anyhow!("{path}.poles must differ"));
        }
        Ok(OppositePair {
            poles: [first_pole, second_pole],
            first: phrase_list(self.first, &format!("{path}.first"))?,
            second: phrase_list(self.second, &format!("{path}.second"))?,
            elevated: self.elevated.unwrap_or(false),
            name,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConflict {
    name: String,
    first: Option<Vec<String>>,
    second: Option<Vec<String>>,
}

impl RawConflict {
    fn finish(self, path: &str) -> Result<ConstraintConflict> {
        Ok(ConstraintConflict {
            name: entry_name(self.name, path)?,
            first: phrase_list(self.first, &format!("{path}.first"))?,
            second: phrase_list(self.second, &format!("{path}.second"))?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawSpecificity {
    specific: Option<Vec<String>>,
    moderate: Option<Vec<String>>,
    vague: Option<Vec<String>>,
}

impl RawSpecificity {
    fn finish(self, parameter: String) -> Result<SpecificityExemplars> {
        let path = format!("specificity.{parameter}");
        Ok(SpecificityExemplars {
            specific: phrase_list(self.specific, &format!("{path}.specific"))?,
            moderate: phrase_list(self.moderate, &format!("{path}.moderate"))?,
            vague: phrase_list(self.vague, &format!("{path}.vague"))?,
            parameter,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawDomain {
    name: String,
    keywords: Option<Vec<String>>,
}

impl RawDomain {
    fn finish(self, path: &str) -> Result<DomainKeywords> {
        let keywords = phrase_list(self.keywords, &format!("{path}.keywords"))?
            .into_iter()
            .map(|k| k.to_lowercase())
            .collect();
        Ok(DomainKeywords {
            name: entry_name(self.name, path)?,
            keywords,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawObjectiveIntent {
    keyword: String,
    allowed: Option<Vec<String>>,
}

impl RawObjectiveIntent {
    fn finish(self, path: &str) -> Result<ObjectiveIntent> {
        let keyword = self.keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return Err(anyhow!("{path}.keyword must not be empty"));
        }
        let allowed = required(self.allowed, &format!("{path}.allowed"))?
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                RequestIntent::from_name(name)
                    .ok_or_else(|| anyhow!("{path}.allowed[{idx}]: unknown intent '{name}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ObjectiveIntent { keyword, allowed })
    }
}

/// Entries keyed by name inside a list section.
trait NamedRaw: Default {
    fn key(&self) -> &str;
    fn merge(self, overlay: Self) -> Self;
}

impl NamedRaw for RawParameter {
    fn key(&self) -> &str {
        &self.name
    }

    fn merge(mut self, overlay: Self) -> Self {
        self.description = overlay.description.or(self.description);
        self.phrases = overlay.phrases.or(self.phrases);
        self.question = overlay.question.or(self.question);
        self.vague_question = overlay.vague_question.or(self.vague_question);
        self.entity = overlay.entity.or(self.entity);
        self
    }
}

impl NamedRaw for RawOpposite {
    fn key(&self) -> &str {
        &self.name
    }

    fn merge(mut self, overlay: Self) -> Self {
        self.poles = overlay.poles.or(self.poles);
        self.first = overlay.first.or(self.first);
        self.second = overlay.second.or(self.second);
        self.elevated = overlay.elevated.or(self.elevated);
        self
    }
}

impl NamedRaw for RawConflict {
    fn key(&self) -> &str {
        &self.name
    }

    fn merge(mut self, overlay: Self) -> Self {
        self.first = overlay.first.or(self.first);
        self.second = overlay.second.or(self.second);
        self
    }
}

impl NamedRaw for RawDomain {
    fn key(&self) -> &str {
        &self.name
    }

    fn merge(mut self, overlay: Self) -> Self {
        self.keywords = overlay.keywords.or(self.keywords);
        self
    }
}

impl NamedRaw for RawObjectiveIntent {
    fn key(&self) -> &str {
        &self.keyword
    }

    fn merge(mut self, overlay: Self) -> Self {
        self.allowed = overlay.allowed.or(self.allowed);
        self
    }
}

fn merge_named<T: NamedRaw>(base: Option<Vec<T>>, overlay: Option<Vec<T>>) -> Option<Vec<T>> {
    match (base, overlay) {
        (Some(mut base), Some(overlay)) => {
            for entry in overlay {
                match base.iter().position(|b| b.key() == entry.key()) {
                    Some(pos) => {
                        let existing = std::mem::take(&mut base[pos]);
                        base[pos] = existing.merge(entry);
                    }
                    None => base.push(entry),
                }
            }
            Some(base)
        }
        (base, overlay) => overlay.or(base),
    }
}

fn merge_raw(base: RawAnchorConfig, overlay: RawAnchorConfig) -> RawAnchorConfig {
    RawAnchorConfig {
        schema_version: overlay.schema_version.or(base.schema_version),
        thresholds: Some(merge_thresholds_raw(base.thresholds, overlay.thresholds)),
        severity: Some(merge_severity_raw(base.severity, overlay.severity)),
        parameters: merge_named(base.parameters, overlay.parameters),
        behavioral_opposites: merge_named(base.behavioral_opposites, overlay.behavioral_opposites),
        constraint_conflicts: merge_named(base.constraint_conflicts, overlay.constraint_conflicts),
        specificity: merge_specificity_raw(base.specificity, overlay.specificity),
        domains: merge_named(base.domains, overlay.domains),
        objective_intents: merge_named(base.objective_intents, overlay.objective_intents),
    }
}

fn merge_thresholds_raw(
    base: Option<RawThresholds>,
    overlay: Option<RawThresholds>,
) -> RawThresholds {
    let base = base.unwrap_or_default();
    let overlay = overlay.unwrap_or_default();
    RawThresholds {
        parameter: overlay.parameter.or(base.parameter),
        conflict: overlay.conflict.or(base.conflict),
        negation: overlay.negation.or(base.negation),
        hard_violation: overlay.hard_violation.or(base.hard_violation),
        soft_violation: overlay.soft_violation.or(base.soft_violation),
        scope: overlay.scope.or(base.scope),
        safety: overlay.safety.or(base.safety),
    }
}

fn merge_severity_raw(base: Option<RawSeverity>, overlay: Option<RawSeverity>) -> RawSeverity {
    let base = base.unwrap_or_default();
    let overlay = overlay.unwrap_or_default();
    RawSeverity {
        behavioral_high: overlay.behavioral_high.or(base.behavioral_high),
        behavioral_moderate: overlay.behavioral_moderate.or(base.behavioral_moderate),
        elevated_high: overlay.elevated_high.or(base.elevated_high),
        constraint_high: overlay.constraint_high.or(base.constraint_high),
    }
}

fn merge_specificity_raw(
    base: Option<BTreeMap<String, RawSpecificity>>,
    overlay: Option<BTreeMap<String, RawSpecificity>>,
) -> Option<BTreeMap<String, RawSpecificity>> {
    match (base, overlay) {
        (Some(mut base), Some(overlay)) => {
            for (parameter, levels) in overlay {
                let existing = base.remove(&parameter).unwrap_or_default();
                base.insert(
                    parameter,
                    RawSpecificity {
                        specific: levels.specific.or(existing.specific),
                        moderate: levels.moderate.or(existing.moderate),
                        vague: levels.vague.or(existing.vague),
                    },
                );
            }
            Some(base)
        }
        (base, overlay) => overlay.or(base),
    }
}

fn merge_thresholds(raw: Option<RawThresholds>) -> Thresholds {
    let defaults = Thresholds::default();
    let raw = raw.unwrap_or_default();
    Thresholds {
        parameter: raw.parameter.unwrap_or(defaults.parameter),
        conflict: raw.conflict.unwrap_or(defaults.conflict),
        negation: raw.negation.unwrap_or(defaults.negation),
        hard_violation: raw.hard_violation.unwrap_or(defaults.hard_violation),
        soft_violation: raw.soft_violation.unwrap_or(defaults.soft_violation),
        scope: raw.scope.unwrap_or(defaults.scope),
        safety: raw.safety.unwrap_or(defaults.safety),
    }
}

fn merge_severity(raw: Option<RawSeverity>) -> SeverityCutPoints {
    let defaults = SeverityCutPoints::default();
    let raw = raw.unwrap_or_default();
    SeverityCutPoints {
        behavioral_high: raw.behavioral_high.unwrap_or(defaults.behavioral_high),
        behavioral_moderate: raw.behavioral_moderate.unwrap_or(defaults.behavioral_moderate),
        elevated_high: raw.elevated_high.unwrap_or(defaults.elevated_high),
        constraint_high: raw.constraint_high.unwrap_or(defaults.constraint_high),
    }
}

fn parse_raw(bytes: &[u8]) -> Result<RawAnchorConfig> {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(json_err) => {
            let utf8 = std::str::from_utf8(bytes).map_err(|err| anyhow!("{json_err}; {err}"))?;
            let toml_value: toml::Value = toml::from_str(utf8).map_err(|toml_err| {
                anyhow!(
                    "Anchor config is not valid JSON or TOML ({json_err}); TOML parse error: {toml_err}"
                )
            })?;
            serde_json::to_value(toml_value)
                .map_err(|err| anyhow!("Failed to convert TOML anchor config to JSON: {err}"))?
        }
    };

    validate_anchor_value(&value)?;
    serde_json::from_value(value).map_err(|err| anyhow!("Anchor config parse error: {err}"))
}

fn validate_anchor_value(value: &serde_json::Value) -> Result<()> {
    fn push_unknown(unknown: &mut Vec<String>, base: &str, key: &str) {
        if base.is_empty() {
            unknown.push(key.to_string());
        } else {
            unknown.push(format!("{base}.{key}"));
        }
    }

    fn validate_object_keys(
        unknown: &mut Vec<String>,
        obj: &serde_json::Map<String, serde_json::Value>,
        base: &str,
        allowed: &[&str],
    ) {
        for key in obj.keys() {
            if !allowed.iter().any(|a| a == &key.as_str()) {
                push_unknown(unknown, base, key);
            }
        }
    }

    const fn object_at(
        value: &serde_json::Value,
    ) -> Option<&serde_json::Map<String, serde_json::Value>> {
        match value {
            serde_json::Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    const fn array_at(value: &serde_json::Value) -> Option<&[serde_json::Value]> {
        match value {
            serde_json::Value::Array(arr) => Some(arr.as_slice()),
            _ => None,
        }
    }

    let serde_json::Value::Object(root) = value else {
        return Err(anyhow!("Anchor config must be a JSON object"));
    };

    let mut unknown = Vec::new();

    validate_object_keys(
        &mut unknown,
        root,
        "",
        &[
            "schema_version",
            "thresholds",
            "severity",
            "parameters",
            "behavioral_opposites",
            "constraint_conflicts",
            "specificity",
            "domains",
            "objective_intents",
        ],
    );

    if let Some(thresholds) = root.get("thresholds").and_then(object_at) {
        validate_object_keys(
            &mut unknown,
            thresholds,
            "thresholds",
            &[
                "parameter",
                "conflict",
                "negation",
                "hard_violation",
                "soft_violation",
                "scope",
                "safety",
            ],
        );
    }

    if let Some(severity) = root.get("severity").and_then(object_at) {
        validate_object_keys(
            &mut unknown,
            severity,
            "severity",
            &[
                "behavioral_high",
                "behavioral_moderate",
                "elevated_high",
                "constraint_high",
            ],
        );
    }

    for (section, allowed) in [
        (
            "parameters",
            &[
                "name",
                "description",
                "phrases",
                "question",
                "vague_question",
                "entity",
            ][..],
        ),
        (
            "behavioral_opposites",
            &["name", "poles", "first", "second", "elevated"][..],
        ),
        ("constraint_conflicts", &["name", "first", "second"][..]),
        ("domains", &["name", "keywords"][..]),
        ("objective_intents", &["keyword", "allowed"][..]),
    ] {
        if let Some(arr) = root.get(section).and_then(array_at) {
            for (idx, item) in arr.iter().enumerate() {
                if let Some(obj) = object_at(item) {
                    validate_object_keys(
                        &mut unknown,
                        obj,
                        &format!("{section}[{idx}]"),
                        allowed,
                    );
                }
            }
        }
    }

    // specificity.<parameter>.*
    if let Some(specificity) = root.get("specificity").and_then(object_at) {
        for (parameter, levels) in specificity {
            if let Some(obj) = object_at(levels) {
                validate_object_keys(
                    &mut unknown,
                    obj,
                    &format!("specificity.{parameter}"),
                    &["specific", "moderate", "vague"],
                );
            }
        }
    }

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "Anchor config has unknown fields: {}",
            unknown.join(", ")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn parses_builtin_tables() {
        let config = AnchorConfig::builtin().unwrap();
        assert_eq!(config.thresholds(), &Thresholds::default());
        assert_eq!(config.parameters().len(), 10);
        assert_eq!(config.behavioral_opposites().len(), 5);
        assert_eq!(config.constraint_conflicts().len(), 5);
        assert_eq!(config.domains()[0].name, "flight_booking");

        let date = config.parameter("date").unwrap();
        assert_eq!(date.entity, Some(EntityLabel::Date));
        assert_eq!(
            date.vague_question_for("soon").as_deref(),
            Some("Can you provide a specific date instead of 'soon'?")
        );

        let formality = &config.behavioral_opposites()[0];
        assert!(formality.elevated);
        assert_eq!(formality.poles, ["formal".to_string(), "casual".to_string()]);

        let specificity: Vec<&str> = config
            .specificity()
            .iter()
            .map(|s| s.parameter.as_str())
            .collect();
        assert_eq!(specificity, vec!["budget", "date", "time"]);
    }

    #[test]
    fn anchor_tables_name_every_set() {
        let config = AnchorConfig::builtin().unwrap();
        let anchors = config.anchor_table();
        assert_eq!(anchors.len(), 10 + 5 * 2 + 5 * 2);
        let names: Vec<&str> = anchors.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"param:origin"));
        assert!(names.contains(&"behavior:brevity:detailed"));
        assert!(names.contains(&"conflict:length:first"));

        let centroids = config.centroid_table();
        assert_eq!(centroids.len(), 9);
        assert_eq!(centroids[0].0, "specificity:budget:specific");
    }

    #[test]
    fn overlay_overrides_scalars_and_named_entries() {
        let config = AnchorConfig::from_bytes(
            br#"{
                "thresholds": {"parameter": 0.55},
                "parameters": [
                    {"name": "origin", "question": "Which airport are you leaving from?"},
                    {"name": "seat", "phrases": ["seat class"], "question": "Which seat class?"}
                ],
                "behavioral_opposites": [{"name": "brevity", "elevated": true}]
            }"#,
        )
        .unwrap();

        assert!((config.thresholds().parameter - 0.55).abs() < f32::EPSILON);
        assert!((config.thresholds().conflict - 0.65).abs() < f32::EPSILON);

        let origin = config.parameter("origin").unwrap();
        assert_eq!(origin.question, "Which airport are you leaving from?");
        assert_eq!(origin.phrases[0], "origin city");
        assert_eq!(config.parameters().len(), 11);
        assert_eq!(config.parameters()[10].name, "seat");
        assert_eq!(config.parameters()[10].description, "seat");

        let brevity = &config.behavioral_opposites()[1];
        assert!(brevity.elevated);
        assert_eq!(brevity.first[0], "be brief");
    }

    #[test]
    fn toml_overlay_is_accepted() {
        let config = AnchorConfig::from_bytes(
            br#"
            [thresholds]
            negation = 0.7

            [[domains]]
            name = "legal"
            keywords = ["contract", "Lawyer"]
            "#,
        )
        .unwrap();
        assert!((config.thresholds().negation - 0.7).abs() < f32::EPSILON);
        let legal = config.domains().last().unwrap();
        assert_eq!(legal.keywords, vec!["contract", "lawyer"]);
    }

    #[test]
    fn rejects_unknown_fields_with_paths() {
        let err = AnchorConfig::from_bytes(
            br#"{
                "thresholds": {"paramter": 0.5},
                "parameters": [{"name": "origin", "bogus": 1}],
                "specificity": {"date": {"exact": ["today"]}},
                "extra": true
            }"#,
        )
        .unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("thresholds.paramter"), "{msg}");
        assert!(msg.contains("parameters[0].bogus"), "{msg}");
        assert!(msg.contains("specificity.date.exact"), "{msg}");
        assert!(msg.contains("extra"), "{msg}");
    }

    #[test]
    fn rejects_unsupported_schema_version() {
        let err = AnchorConfig::from_bytes(br#"{"schema_version": 7}"#).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("anchors.schema_version 7"), "{msg}");
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let err = AnchorConfig::from_bytes(br#"{"thresholds": {"scope": 1.5}}"#).unwrap_err();
        assert!(format!("{err:#}").contains("thresholds.scope must lie in [0, 1]"));

        let err = AnchorConfig::builtin()
            .unwrap()
            .with_thresholds(Thresholds {
                safety: -0.1,
                ..Thresholds::default()
            })
            .unwrap_err();
        assert!(format!("{err:#}").contains("thresholds.safety"));
    }

    #[test]
    fn rejects_bad_entries() {
        let err = AnchorConfig::from_bytes(
            br#"{"parameters": [{"name": "seat", "phrases": [], "question": "?"}]}"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("parameters[10].phrases must not be empty"));

        let err = AnchorConfig::from_bytes(
            br#"{"behavioral_opposites": [{"name": "tone", "poles": ["warm"], "first": ["a"], "second": ["b"]}]}"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("exactly two poles"));

        let err = AnchorConfig::from_bytes(
            br#"{"objective_intents": [{"keyword": "recipe", "allowed": ["cooking"]}]}"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("unknown intent 'cooking'"));

        let err = AnchorConfig::from_bytes(
            br#"{"parameters": [{"name": "seat", "phrases": ["seat"]}]}"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("parameters[10].question is required"));
    }

    #[test]
    fn loads_overlay_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"thresholds": {"safety": 0.5}}"#).unwrap();
        let config = AnchorConfig::from_file(file.path()).unwrap();
        assert!((config.thresholds().safety - 0.5).abs() < f32::EPSILON);

        let missing = file.path().with_extension("missing");
        let err = AnchorConfig::from_file(&missing).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read anchor config"));
    }
}
