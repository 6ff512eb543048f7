use prompt_protocol::{AnalysisReport, DeepPassStatus, QualityRating};

/// Markdown summary of an analysis for terminals and CI logs.
pub fn render_markdown(source: &str, report: &AnalysisReport) -> String {
    let mut md = String::new();
    md.push_str("# Prompt check report\n\n");
    md.push_str(&format!("- Source: `{source}`\n"));
    md.push_str(&format!(
        "- Overall: `{:.1}/10` ({})\n",
        report.scores.overall,
        rating_label(report.rating)
    ));
    md.push_str(&format!(
        "- Consistency: `{:.1}` over `{}` directives\n",
        report.scores.consistency, report.directive_count
    ));
    if let Some(alignment) = report.scores.alignment {
        md.push_str(&format!("- Alignment: `{alignment:.1}`\n"));
    }
    if let Some(vagueness) = report.scores.vagueness {
        md.push_str(&format!("- Vagueness: `{vagueness:.1}`\n"));
    }
    if let Some(fulfillable) = report.fulfillable {
        md.push_str(&format!(
            "- Fulfillable: `{}`\n",
            if fulfillable { "yes" } else { "no" }
        ));
    }
    if let DeepPassStatus::Completed { .. } = report.deep_pass {
        md.push_str(&format!("- Baseline before deep pass: `{:.1}`\n", report.scores.baseline));
    }
    md.push('\n');

    md.push_str("## Requirements\n\n");
    md.push_str(&format!(
        "- Objective: `{}` (domain `{}`)\n",
        report.requirements.primary_objective, report.requirements.domain
    ));
    let params: Vec<String> = report
        .requirements
        .parameters
        .iter()
        .map(|p| {
            if p.required {
                format!("{}*", p.name)
            } else {
                p.name.clone()
            }
        })
        .collect();
    md.push_str(&format!(
        "- Parameters: {}\n",
        if params.is_empty() {
            "none".to_string()
        } else {
            params.join(", ")
        }
    ));
    md.push_str(&format!(
        "- Constraints: `{}`, scope statements: `{}`, safety guidelines: `{}`\n\n",
        report.requirements.constraints.len(),
        report.requirements.scope.len(),
        report.requirements.safety.len()
    ));

    md.push_str("## Findings\n\n");
    if report.findings.is_empty() {
        md.push_str("No findings.\n\n");
    } else {
        md.push_str("| severity | line | category | finding | recommendation |\n");
        md.push_str("|---|---:|---|---|---|\n");
        for finding in &report.findings {
            md.push_str(&format!(
                "| `{}` | {} | `{}` | {} | {} |\n",
                finding.severity,
                finding
                    .line
                    .map_or_else(|| "-".to_string(), |line| line.to_string()),
                category_label(finding.category),
                escape_cell(&truncate_one_line(&finding.title, 80)),
                escape_cell(&truncate_one_line(&finding.recommendation, 120)),
            ));
        }
        md.push('\n');
    }

    if !report.followups.is_empty() {
        md.push_str("## Follow-up questions\n\n");
        for followup in &report.followups {
            md.push_str(&format!("- `{}`: {}\n", followup.parameter, followup.question));
        }
        md.push('\n');
    }

    if !report.notes.is_empty() {
        md.push_str("## Notes\n\n");
        for note in &report.notes {
            md.push_str(&format!("- {note}\n"));
        }
        md.push('\n');
    }

    md
}

const fn rating_label(rating: QualityRating) -> &'static str {
    match rating {
        QualityRating::Excellent => "excellent",
        QualityRating::Good => "good",
        QualityRating::Fair => "fair",
        QualityRating::Poor => "poor",
        QualityRating::Critical => "critical",
    }
}

const fn category_label(category: prompt_protocol::FindingCategory) -> &'static str {
    use prompt_protocol::FindingCategory;
    match category {
        FindingCategory::Contradiction => "contradiction",
        FindingCategory::Misalignment => "misalignment",
        FindingCategory::ParameterGap => "parameter-gap",
        FindingCategory::Vagueness => "vagueness",
        FindingCategory::DeepRisk => "deep-risk",
    }
}

fn truncate_one_line(text: &str, max_chars: usize) -> String {
    let mut s = text.replace(['\n', '\r', '\t'], " ");
    s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if s.chars().count() <= max_chars {
        return s;
    }
    let truncated: String = s.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{truncated}…")
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}
