use prompt_segmenter::{contains_negation, DirectiveSegmenter, LineKind};

const SUPPORT_PROMPT: &str = r"# Customer Support Assistant

You are a customer support assistant for an online store.

## Rules
1. Always greet the customer by name.
2. Never promise refunds without a ticket number.
3. Keep replies under 120 words. Use a friendly tone!

=====
Optional details:
- Order number
- Preferred contact time
";

#[test]
fn support_prompt_yields_numbered_directives() {
    let segmenter = DirectiveSegmenter::default();
    let units = segmenter.segment(SUPPORT_PROMPT).expect("segmentation failed");

    let summary: Vec<(usize, Option<usize>, &str)> = units
        .iter()
        .map(|u| (u.line, u.clause, u.text.as_str()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (6, None, "Always greet the customer by name"),
            (7, None, "Never promise refunds without a ticket number"),
            (8, Some(0), "Keep replies under 120 words"),
            (8, Some(1), "Use a friendly tone"),
        ]
    );
    assert_eq!(
        units.iter().filter(|u| contains_negation(&u.text)).count(),
        1
    );
}

#[test]
fn header_lines_are_reported_for_section_tracking() {
    let lines = prompt_segmenter::document_lines(SUPPORT_PROMPT);
    let headers: Vec<&str> = lines
        .iter()
        .filter(|l| l.kind == LineKind::Header)
        .map(|l| l.content.as_str())
        .collect();
    assert_eq!(
        headers,
        vec!["Customer Support Assistant", "Rules", "Optional details:"]
    );
    assert!(lines
        .iter()
        .any(|l| l.kind == LineKind::Content && l.content == "Order number"));
}
