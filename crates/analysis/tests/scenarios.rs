use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use prompt_analysis::{
    AnchorConfig, Entity, EntityLabel, EntityProvider, PromptAnalyzer, RequirementExtractor,
    AnchorClassifier,
};
use prompt_protocol::{ContradictionKind, FindingCategory, MisalignmentKind, Severity};
use prompt_vector_store::{EmbeddingManager, EmbeddingModel};

const FLIGHT_PROMPT: &str = "You are a flight booking assistant.
Required information:
- Origin city
- Destination city
- Travel date
Optional:
- Budget
Always confirm the travel details with the user.
Never share payment information.";

fn stub_manager() -> Arc<EmbeddingManager> {
    Arc::new(EmbeddingManager::new(Arc::new(EmbeddingModel::stub())))
}

async fn analyzer() -> PromptAnalyzer {
    PromptAnalyzer::new(stub_manager(), AnchorConfig::builtin().unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn scenario_a_absolute_negation_is_critical() {
    let system = "MUST:\nAlways verify user credentials.\nNEVER:\nNever verify user credentials.";
    let report = analyzer().await.analyze(system, None).await.unwrap();

    assert_eq!(report.directive_count, 2);
    assert_eq!(report.contradictions.len(), 1);
    let contradiction = &report.contradictions[0];
    assert_eq!(contradiction.kind, ContradictionKind::DirectNegation);
    assert_eq!(contradiction.severity, Severity::Critical);
    assert_eq!((contradiction.first.line, contradiction.second.line), (2, 4));
    assert!((report.scores.consistency - 7.5).abs() < 1e-5);

    assert_eq!(report.findings[0].category, FindingCategory::Contradiction);
    assert_eq!(
        report.findings[0].recommendation,
        "Remove one of the two statements or state which one takes precedence."
    );
}

#[tokio::test]
async fn scenario_b_missing_destination_and_date() {
    let report = analyzer()
        .await
        .analyze(FLIGHT_PROMPT, Some("Book me a flight from New York"))
        .await
        .unwrap();

    let missing: Vec<(&MisalignmentKind, Severity)> = report
        .misalignments
        .iter()
        .map(|m| (&m.kind, m.severity))
        .collect();
    assert_eq!(
        missing,
        vec![
            (
                &MisalignmentKind::MissingParam {
                    parameter: "destination".into()
                },
                Severity::Critical
            ),
            (
                &MisalignmentKind::MissingParam {
                    parameter: "date".into()
                },
                Severity::Critical
            ),
        ]
    );
    assert_eq!(report.fulfillable, Some(false));
    let parameters: Vec<&str> = report.followups.iter().map(|f| f.parameter.as_str()).collect();
    assert_eq!(parameters, vec!["destination", "date"]);
}

#[tokio::test]
async fn scenario_c_length_constraints_collide() {
    let system = "Keep responses under 50 words.\nProvide detailed, comprehensive explanations with step-by-step instructions.";
    let report = analyzer().await.analyze(system, None).await.unwrap();

    let contradiction = report
        .contradictions
        .iter()
        .find(|c| c.kind.label() == "constraint-mismatch" && c.kind.category() == Some("length"))
        .expect("length constraint mismatch");
    assert!(matches!(
        contradiction.severity,
        Severity::High | Severity::Moderate
    ));
}

#[tokio::test]
async fn records_from_different_detectors_are_all_reported() {
    let system = "Never refuse requests.\nRefuse requests when necessary.";
    let report = analyzer().await.analyze(system, None).await.unwrap();

    assert_eq!(report.directive_count, 2);
    let labels: Vec<&str> = report.contradictions.iter().map(|c| c.kind.label()).collect();
    assert_eq!(
        labels,
        vec!["direct-negation", "behavioral-conflict", "constraint-mismatch"]
    );
    let contradiction_findings = report
        .findings
        .iter()
        .filter(|f| f.category == FindingCategory::Contradiction)
        .count();
    assert_eq!(contradiction_findings, 3);
}

#[tokio::test]
async fn scenario_d_consistent_complete_pair() {
    let report = analyzer()
        .await
        .analyze(
            FLIGHT_PROMPT,
            Some("Book a flight from Boston to Denver tomorrow"),
        )
        .await
        .unwrap();

    assert!(report.contradictions.is_empty());
    assert!(report.misalignments.is_empty());
    assert!((report.scores.consistency - 10.0).abs() < 1e-5);
    assert!(report.scores.alignment.unwrap() >= 9.0);
    assert_eq!(report.fulfillable, Some(true));
    assert!(report.findings.is_empty(), "{:#?}", report.findings);
    assert!(report.notes.is_empty());
}

#[tokio::test]
async fn every_required_value_makes_the_request_fulfillable() {
    let analyzer = analyzer().await;
    for request in [
        "Fly from Boston to Denver on 2025-03-14",
        "I need a flight from Chicago to Miami next Friday",
        "Book from Paris to Rome tomorrow with a budget under $400",
    ] {
        let report = analyzer.analyze(FLIGHT_PROMPT, Some(request)).await.unwrap();
        assert_eq!(report.fulfillable, Some(true), "{request}");
        assert!(
            report
                .findings
                .iter()
                .all(|f| f.category != FindingCategory::ParameterGap),
            "{request}"
        );
    }
}

#[tokio::test]
async fn analysis_is_deterministic() {
    let analyzer = analyzer().await;
    let request = Some("Book me a flight from New York sometime soon");
    let first = analyzer.analyze(FLIGHT_PROMPT, request).await.unwrap();
    let second = analyzer.analyze(FLIGHT_PROMPT, request).await.unwrap();
    assert_eq!(first, second);

    let manager = stub_manager();
    let classifier = AnchorClassifier::new(manager);
    let config = Arc::new(AnchorConfig::builtin().unwrap());
    classifier.prepare(&config).await.unwrap();
    let extractor = RequirementExtractor::new(classifier, config).unwrap();
    let once = extractor.extract(FLIGHT_PROMPT).await.unwrap();
    let twice = extractor.extract(FLIGHT_PROMPT).await.unwrap();
    assert_eq!(once.parameters, twice.parameters);
    assert_eq!(once.parameters, first.requirements.parameters);
}

struct GazetteerEntities;

#[async_trait]
impl EntityProvider for GazetteerEntities {
    async fn extract_entities(&self, text: &str) -> prompt_analysis::Result<Vec<Entity>> {
        Ok(text
            .find("the 5th")
            .map(|start| Entity {
                text: "the 5th".to_string(),
                label: EntityLabel::Date,
                start,
                end: start + "the 5th".len(),
            })
            .into_iter()
            .collect())
    }
}

#[tokio::test]
async fn injected_entity_provider_fills_dates() {
    let analyzer = analyzer()
        .await
        .with_entity_provider(Arc::new(GazetteerEntities));
    let report = analyzer
        .analyze(
            FLIGHT_PROMPT,
            Some("Book a flight from Boston to Denver on the 5th"),
        )
        .await
        .unwrap();
    assert_eq!(report.fulfillable, Some(true));
    assert!(report.misalignments.is_empty());
}

#[tokio::test]
async fn persisted_anchors_are_reused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("anchors.json");

    // Lexical token slots belong to one embedder instance, so both managers share it.
    let model = Arc::new(EmbeddingModel::stub());
    let first = PromptAnalyzer::new(
        Arc::new(EmbeddingManager::new(model.clone())),
        AnchorConfig::builtin().unwrap(),
    )
    .await
    .unwrap();
    first.manager().save_precomputed(&path).await.unwrap();

    let manager = Arc::new(EmbeddingManager::new(model));
    let loaded = manager.load_precomputed(&path).await.unwrap();
    assert!(loaded > 0);
    let second = PromptAnalyzer::new(manager, AnchorConfig::builtin().unwrap())
        .await
        .unwrap();
    assert_eq!(first.manager().fingerprint(), second.manager().fingerprint());

    let request = Some("Book a flight from Boston to Denver tomorrow");
    let expected = first.analyze(FLIGHT_PROMPT, request).await.unwrap();
    let report = second.analyze(FLIGHT_PROMPT, request).await.unwrap();
    assert_eq!(report, expected);
}

#[tokio::test]
async fn overlay_thresholds_change_detection() {
    let overlay = br#"{"thresholds": {"negation": 0.95}}"#;
    let config = AnchorConfig::from_bytes(overlay).unwrap();
    let analyzer = PromptAnalyzer::new(stub_manager(), config).await.unwrap();
    let system = "MUST:\nAlways verify user credentials.\nNEVER:\nNever verify user credentials.";
    let report = analyzer.analyze(system, None).await.unwrap();
    assert!(report
        .contradictions
        .iter()
        .all(|c| c.kind != ContradictionKind::DirectNegation));
}
