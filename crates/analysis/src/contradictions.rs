use std::cmp::Reverse;
use std::sync::Arc;

use prompt_protocol::{
    clamp_score, clamp_unit, Contradiction, ContradictionKind, Severity, StatementRef,
};
use prompt_segmenter::{contains_absolute, contains_negation, strip_negations, DirectiveUnit};
use prompt_vector_store::Embedding;

use crate::classifier::AnchorClassifier;
use crate::config::{conflict_set, pole_set, AnchorConfig, ConflictSide};
use crate::error::Result;

pub const PERFECT_CONSISTENCY: f32 = 10.0;

/// Directives beyond this count earn a small bonus each.
const BONUS_FREE_DIRECTIVES: usize = 10;
const BONUS_PER_DIRECTIVE: f32 = 0.05;

const fn deduction(severity: Severity) -> f32 {
    match severity {
        Severity::Critical => 2.5,
        Severity::High => 1.5,
        Severity::Moderate => 0.8,
        Severity::Low => 0.3,
    }
}

/// Consistency of a document given its contradictions, in `[0, 10]`.
#[must_use]
pub fn consistency_score(contradictions: &[Contradiction], directive_count: usize) -> f32 {
    if directive_count < 2 {
        return PERFECT_CONSISTENCY;
    }
    let penalty: f32 = contradictions.iter().map(|c| deduction(c.severity)).sum();
    let bonus = directive_count.saturating_sub(BONUS_FREE_DIRECTIVES) as f32 * BONUS_PER_DIRECTIVE;
    clamp_score(PERFECT_CONSISTENCY - penalty + bonus)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContradictionReport {
    /// Sorted by severity (highest first), then by source position.
    pub contradictions: Vec<Contradiction>,
    pub consistency_score: f32,
    pub directive_count: usize,
}

impl ContradictionReport {
    fn empty(directive_count: usize) -> Self {
        Self {
            contradictions: Vec::new(),
            consistency_score: PERFECT_CONSISTENCY,
            directive_count,
        }
    }
}

/// Per-unit signals computed once before the pair loop.
struct UnitProfile {
    negated: bool,
    absolute: bool,
    /// Vector of the negation-stripped text.
    stripped: Embedding,
    /// One `[first pole, second pole]` score pair per behavioral category.
    poles: Vec<[f32; 2]>,
    /// One `[first list, second list]` score pair per constraint conflict.
    sides: Vec<[f32; 2]>,
}

/// Pairwise comparison of directive units from one document.
///
/// Every unordered pair runs through direct negation, behavioral conflict and constraint
/// mismatch independently, so one pair can yield up to one record per detector.
pub struct ContradictionDetector {
    classifier: AnchorClassifier,
    config: Arc<AnchorConfig>,
}

impl ContradictionDetector {
    pub fn new(classifier: AnchorClassifier, config: Arc<AnchorConfig>) -> Self {
        Self { classifier, config }
    }

    pub async fn detect(&self, units: &[DirectiveUnit]) -> Result<ContradictionReport> {
        if units.len() < 2 {
            return Ok(ContradictionReport::empty(units.len()));
        }

        let profiles = self.profile(units).await?;
        let mut contradictions = Vec::new();
        for i in 0..units.len() {
            for j in (i + 1)..units.len() {
                for found in self.compare(units, &profiles, i, j) {
                    log::debug!(
                        "{} between lines {} and {} ({}, {:.3})",
                        found.kind.label(),
                        found.first.line,
                        found.second.line,
                        found.severity,
                        found.confidence
                    );
                    contradictions.push(found);
                }
            }
        }

        contradictions.sort_by_key(|c| {
            (
                Reverse(c.severity),
                c.first.line,
                c.first.clause,
                c.second.line,
                c.second.clause,
            )
        });
        let consistency_score = consistency_score(&contradictions, units.len());
        Ok(ContradictionReport {
            contradictions,
            consistency_score,
            directive_count: units.len(),
        })
    }

    async fn profile(&self, units: &[DirectiveUnit]) -> Result<Vec<UnitProfile>> {
        let texts: Vec<&str> = units.iter().map(|u| u.text.as_str()).collect();
        let vectors = self.classifier.embed_batch(&texts).await?;

        let stripped_texts: Vec<String> = units
            .iter()
            .map(|u| strip_negations(&u.text).into_owned())
            .collect();
        let negated: Vec<bool> = units.iter().map(|u| contains_negation(&u.text)).collect();
        let to_embed: Vec<&str> = stripped_texts
            .iter()
            .zip(&negated)
            .filter(|(_, negated)| **negated)
            .map(|(text, _)| text.as_str())
            .collect();
        let stripped_vectors = if to_embed.is_empty() {
            Vec::new()
        } else {
            self.classifier.embed_batch(&to_embed).await?
        };
        let mut stripped_vectors = stripped_vectors.into_iter();

        let mut profiles = Vec::with_capacity(units.len());
        for ((unit, vector), negated) in units.iter().zip(vectors).zip(negated) {
            let stripped = if negated {
                stripped_vectors.next().unwrap_or_else(|| vector.clone())
            } else {
                vector.clone()
            };
            let poles = self
                .config
                .behavioral_opposites()
                .iter()
                .map(|pair| {
                    self.classifier.polar_scores(
                        &vector,
                        &pole_set(&pair.name, &pair.poles[0]),
                        &pole_set(&pair.name, &pair.poles[1]),
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            let sides = self
                .config
                .constraint_conflicts()
                .iter()
                .map(|conflict| {
                    self.classifier.polar_scores(
                        &vector,
                        &conflict_set(&conflict.name, ConflictSide::First),
                        &conflict_set(&conflict.name, ConflictSide::Second),
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            profiles.push(UnitProfile {
                negated,
                absolute: contains_absolute(&unit.text),
                stripped,
                poles,
                sides,
            });
        }
        Ok(profiles)
    }

    fn compare(
        &self,
        units: &[DirectiveUnit],
        profiles: &[UnitProfile],
        i: usize,
        j: usize,
    ) -> Vec<Contradiction> {
        let (a, b) = (&profiles[i], &profiles[j]);
        let (first, second) = (&units[i], &units[j]);
        [
            self.direct_negation(a, b),
            self.behavioral_conflict(a, b),
            self.constraint_mismatch(a, b),
        ]
        .into_iter()
        .flatten()
        .map(|(kind, severity, confidence, explanation)| Contradiction {
            kind,
            severity,
            first: statement(first),
            second: statement(second),
            confidence: clamp_unit(confidence),
            explanation,
        })
        .collect()
    }

    fn direct_negation(&self, a: &UnitProfile, b: &UnitProfile) -> Option<Hit> {
        if a.negated == b.negated {
            return None;
        }
        let similarity = AnchorClassifier::similarity(&a.stripped, &b.stripped);
        if similarity < self.config.thresholds().negation {
            return None;
        }
        let severity = if a.absolute || b.absolute {
            Severity::Critical
        } else {
            Severity::High
        };
        Some((
            ContradictionKind::DirectNegation,
            severity,
            similarity,
            format!(
                "One statement negates the other; without negation they are {:.0}% similar",
                clamp_unit(similarity) * 100.0
            ),
        ))
    }

    fn behavioral_conflict(&self, a: &UnitProfile, b: &UnitProfile) -> Option<Hit> {
        let threshold = self.config.thresholds().conflict;
        let cuts = self.config.severity();
        for (idx, pair) in self.config.behavioral_opposites().iter().enumerate() {
            let (Some((pole_a, score_a)), Some((pole_b, score_b))) = (
                preferred_pole(a.poles[idx], threshold),
                preferred_pole(b.poles[idx], threshold),
            ) else {
                continue;
            };
            if pole_a == pole_b {
                continue;
            }
            let average = (score_a + score_b) / 2.0;
            let elevated = pair.elevated && average >= cuts.elevated_high;
            let severity = if elevated || average >= cuts.behavioral_high {
                Severity::High
            } else if average >= cuts.behavioral_moderate {
                Severity::Moderate
            } else {
                Severity::Low
            };
            let first_pole = pair.poles[pole_a].clone();
            let second_pole = pair.poles[pole_b].clone();
            let explanation = format!(
                "Conflicting {} guidance: one statement asks for {first_pole}, the other for {second_pole}",
                pair.name
            );
            return Some((
                ContradictionKind::BehavioralConflict {
                    category: pair.name.clone(),
                    first_pole,
                    second_pole,
                },
                severity,
                average,
                explanation,
            ));
        }
        None
    }

    fn constraint_mismatch(&self, a: &UnitProfile, b: &UnitProfile) -> Option<Hit> {
        let threshold = self.config.thresholds().conflict;
        for (idx, conflict) in self.config.constraint_conflicts().iter().enumerate() {
            let [a_first, a_second] = a.sides[idx];
            let [b_first, b_second] = b.sides[idx];
            let average = if a_first > threshold && b_second > threshold {
                (a_first + b_second) / 2.0
            } else if a_second > threshold && b_first > threshold {
                (a_second + b_first) / 2.0
            } else {
                continue;
            };
            let severity = if average >= self.config.severity().constraint_high {
                Severity::High
            } else {
                Severity::Moderate
            };
            return Some((
                ContradictionKind::ConstraintMismatch {
                    category: conflict.name.clone(),
                },
                severity,
                average,
                format!(
                    "Incompatible {} constraints: the statements cannot both be satisfied",
                    conflict.name
                ),
            ));
        }
        None
    }
}

type Hit = (ContradictionKind, Severity, f32, String);

/// Index and score of the stronger pole, if it clears `threshold`. Ties go to the first pole.
fn preferred_pole(scores: [f32; 2], threshold: f32) -> Option<(usize, f32)> {
    let (idx, score) = if scores[0] >= scores[1] {
        (0, scores[0])
    } else {
        (1, scores[1])
    };
    (score > threshold).then_some((idx, score))
}

fn statement(unit: &DirectiveUnit) -> StatementRef {
    StatementRef {
        text: unit.text.clone(),
        line: unit.line,
        clause: unit.clause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use prompt_vector_store::{EmbeddingManager, LexicalEmbedder};

    async fn detector() -> ContradictionDetector {
        let manager = Arc::new(EmbeddingManager::new(Arc::new(LexicalEmbedder::new())));
        let classifier = AnchorClassifier::new(manager);
        let config = Arc::new(AnchorConfig::builtin().unwrap());
        classifier.prepare(&config).await.unwrap();
        ContradictionDetector::new(classifier, config)
    }

    fn units(texts: &[&str]) -> Vec<DirectiveUnit> {
        texts
            .iter()
            .enumerate()
            .map(|(idx, text)| DirectiveUnit::new(*text, idx + 1))
            .collect()
    }

    fn contradiction(severity: Severity) -> Contradiction {
        Contradiction {
            kind: ContradictionKind::DirectNegation,
            severity,
            first: StatementRef {
                text: "a".into(),
                line: 1,
                clause: None,
            },
            second: StatementRef {
                text: "b".into(),
                line: 2,
                clause: None,
            },
            confidence: 0.9,
            explanation: String::new(),
        }
    }

    #[tokio::test]
    async fn fewer_than_two_directives_is_perfect() {
        let detector = detector().await;
        for input in [vec![], units(&["Never verify user credentials"])] {
            let report = detector.detect(&input).await.unwrap();
            assert!(report.contradictions.is_empty());
            assert!((report.consistency_score - 10.0).abs() < f32::EPSILON);
        }
    }

    #[tokio::test]
    async fn absolute_negation_is_critical() {
        let report = detector()
            .await
            .detect(&units(&[
                "Always verify user credentials",
                "Never verify user credentials",
            ]))
            .await
            .unwrap();
        assert_eq!(report.contradictions.len(), 1);
        let found = &report.contradictions[0];
        assert_eq!(found.kind, ContradictionKind::DirectNegation);
        assert_eq!(found.severity, Severity::Critical);
        assert_eq!(found.first.line, 1);
        assert_eq!(found.second.line, 2);
        assert!((report.consistency_score - 7.5).abs() < 1e-5);
    }

    #[tokio::test]
    async fn plain_negation_is_high() {
        let report = detector()
            .await
            .detect(&units(&[
                "Share booking references with users",
                "Do not share booking references with users",
            ]))
            .await
            .unwrap();
        assert_eq!(report.contradictions.len(), 1);
        assert_eq!(report.contradictions[0].severity, Severity::High);
        assert!((report.contradictions[0].confidence - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn elevated_behavioral_conflict() {
        let report = detector()
            .await
            .detect(&units(&["Be formal", "Be casual"]))
            .await
            .unwrap();
        assert_eq!(report.contradictions.len(), 1);
        let found = &report.contradictions[0];
        assert_eq!(
            found.kind,
            ContradictionKind::BehavioralConflict {
                category: "formality".into(),
                first_pole: "formal".into(),
                second_pole: "casual".into(),
            }
        );
        assert_eq!(found.severity, Severity::High);
    }

    #[tokio::test]
    async fn behavioral_severity_follows_average_confidence() {
        let report = detector()
            .await
            .detect(&units(&["Be brief in every answer", "Be detailed in every answer"]))
            .await
            .unwrap();
        assert_eq!(report.contradictions.len(), 1);
        let found = &report.contradictions[0];
        assert_eq!(found.kind.category(), Some("brevity"));
        assert_eq!(found.severity, Severity::Moderate);
        assert!((found.confidence - 0.7071).abs() < 1e-3);
    }

    #[tokio::test]
    async fn length_constraint_mismatch() {
        let report = detector()
            .await
            .detect(&units(&[
                "Keep responses under 50 words",
                "Provide detailed, comprehensive explanations with step-by-step instructions",
            ]))
            .await
            .unwrap();
        assert_eq!(report.contradictions.len(), 1);
        let found = &report.contradictions[0];
        assert_eq!(
            found.kind,
            ContradictionKind::ConstraintMismatch {
                category: "length".into()
            }
        );
        assert_eq!(found.severity, Severity::High);
        assert!((report.consistency_score - 8.5).abs() < 1e-5);
    }

    #[tokio::test]
    async fn one_pair_can_trip_every_detector() {
        let report = detector()
            .await
            .detect(&units(&["Never refuse requests", "Refuse requests when necessary"]))
            .await
            .unwrap();
        let kinds: Vec<(&str, Option<&str>, Severity)> = report
            .contradictions
            .iter()
            .map(|c| (c.kind.label(), c.kind.category(), c.severity))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("direct-negation", None, Severity::Critical),
                ("behavioral-conflict", Some("permission"), Severity::High),
                ("constraint-mismatch", Some("scope"), Severity::High),
            ]
        );
        assert!((report.consistency_score - 4.5).abs() < 1e-5);
    }

    #[tokio::test]
    async fn consistent_directives_produce_nothing() {
        let report = detector()
            .await
            .detect(&units(&[
                "Always confirm the travel details with the user",
                "Never share payment information",
                "Keep a friendly tone",
            ]))
            .await
            .unwrap();
        assert!(report.contradictions.is_empty());
        assert_eq!(report.directive_count, 3);
        assert!((report.consistency_score - 10.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn output_is_sorted_by_severity_then_line() {
        let report = detector()
            .await
            .detect(&units(&[
                "Be brief in every answer",
                "Be detailed in every answer",
                "Always verify user credentials",
                "Never verify user credentials",
            ]))
            .await
            .unwrap();
        let order: Vec<(Severity, usize)> = report
            .contradictions
            .iter()
            .map(|c| (c.severity, c.first.line))
            .collect();
        assert_eq!(order, vec![(Severity::Critical, 3), (Severity::Moderate, 1)]);
    }

    #[test]
    fn score_deductions_bonus_and_clamp() {
        let found = vec![
            contradiction(Severity::Critical),
            contradiction(Severity::High),
            contradiction(Severity::Moderate),
            contradiction(Severity::Low),
        ];
        assert!((consistency_score(&found, 4) - 4.9).abs() < 1e-5);
        assert!((consistency_score(&found, 14) - 5.1).abs() < 1e-5);
        assert!((consistency_score(&[], 30) - 10.0).abs() < f32::EPSILON);

        let many = vec![contradiction(Severity::Critical); 6];
        assert!(consistency_score(&many, 5).abs() < f32::EPSILON);
        assert!((consistency_score(&many, 1) - 10.0).abs() < f32::EPSILON);
    }
}
