use assert_cmd::Command;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const FLIGHT_PROMPT: &str = "You are a flight booking assistant.
Required information:
- Origin city
- Destination city
- Travel date
Optional:
- Budget
Always confirm the travel details with the user.
Never share payment information.";

const CONFLICTING_PROMPT: &str =
    "MUST:\nAlways verify user credentials.\nNEVER:\nNever verify user credentials.";

#[allow(deprecated)]
fn prompt_check(workdir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("prompt-check").expect("binary");
    cmd.current_dir(workdir)
        .env("PROMPT_EMBEDDING_MODE", "stub")
        .env_remove("RUST_LOG");
    cmd
}

fn json_body(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("valid json")
}

#[test]
fn analyze_json_reports_missing_parameters() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("system.txt"), FLIGHT_PROMPT).unwrap();

    let output = prompt_check(temp.path())
        .args(["analyze", "system.txt", "--json"])
        .args(["--request", "Book me a flight from New York"])
        .output()
        .expect("command run");
    assert!(output.status.success());

    let body = json_body(&output);
    assert_eq!(body["fulfillable"], false);
    let missing: Vec<&str> = body["misalignments"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|m| m["kind"]["type"] == "missing_param")
        .filter_map(|m| m["kind"]["parameter"].as_str())
        .collect();
    assert_eq!(missing, vec!["destination", "date"]);
    assert_eq!(body["followups"][0]["parameter"], "destination");
    assert_eq!(body["deep_pass"]["status"], "not_configured");
}

#[test]
fn analyze_reads_the_request_from_a_file() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("system.txt"), FLIGHT_PROMPT).unwrap();
    fs::write(
        temp.path().join("request.txt"),
        "Book a flight from Boston to Denver tomorrow",
    )
    .unwrap();

    let output = prompt_check(temp.path())
        .args(["analyze", "system.txt", "--user", "request.txt", "--json"])
        .output()
        .expect("command run");
    assert!(output.status.success());

    let body = json_body(&output);
    assert_eq!(body["fulfillable"], true);
    assert_eq!(body["findings"].as_array().map(Vec::len), Some(0));
}

#[test]
fn analyze_prints_markdown_by_default() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("system.txt"), CONFLICTING_PROMPT).unwrap();

    prompt_check(temp.path())
        .args(["analyze", "system.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("# Prompt check report"))
        .stdout(predicate::str::contains("- Source: `system.txt`"))
        .stdout(predicate::str::contains("| `critical` | 2 | `contradiction` |"));
}

#[test]
fn analyze_reads_the_system_prompt_from_stdin() {
    let temp = tempdir().unwrap();

    let output = prompt_check(temp.path())
        .args(["analyze", "-", "--json"])
        .write_stdin(CONFLICTING_PROMPT)
        .output()
        .expect("command run");
    assert!(output.status.success());
    assert_eq!(json_body(&output)["directive_count"], 2);
}

#[test]
fn empty_system_prompt_is_malformed_input() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("empty.txt"), "   \n").unwrap();

    let output = prompt_check(temp.path())
        .args(["analyze", "empty.txt", "--json"])
        .output()
        .expect("command run");
    assert!(!output.status.success());

    let body = json_body(&output);
    assert_eq!(body["code"], "malformed_input");
    assert!(body["hint"].is_string());
}

#[test]
fn fail_on_exits_with_status_two() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("system.txt"), CONFLICTING_PROMPT).unwrap();

    let output = prompt_check(temp.path())
        .args(["analyze", "system.txt", "--json", "--fail-on", "critical"])
        .output()
        .expect("command run");
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(json_body(&output)["contradictions"][0]["severity"], "critical");

    prompt_check(temp.path())
        .args(["analyze", "system.txt", "--json", "--fail-on", "critical"])
        .args(["--anchors", "missing.json"])
        .assert()
        .code(1);
}

#[test]
fn request_and_user_file_conflict() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("system.txt"), FLIGHT_PROMPT).unwrap();

    prompt_check(temp.path())
        .args(["analyze", "system.txt", "--user", "a.txt", "--request", "hi"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn validate_anchors_accepts_overlay_and_rejects_typos() {
    let temp = tempdir().unwrap();
    fs::write(
        temp.path().join("good.toml"),
        "[thresholds]\nnegation = 0.7\n",
    )
    .unwrap();
    fs::write(
        temp.path().join("bad.json"),
        r#"{"thresholds": {"paramter": 0.5}}"#,
    )
    .unwrap();

    let output = prompt_check(temp.path())
        .args(["validate-anchors", "good.toml", "--json"])
        .output()
        .expect("command run");
    assert!(output.status.success());
    let body = json_body(&output);
    assert_eq!(body["schema_version"], 1);
    assert!(body["parameters"].as_u64().unwrap() > 0);

    let output = prompt_check(temp.path())
        .args(["validate-anchors", "bad.json", "--json"])
        .output()
        .expect("command run");
    assert_eq!(output.status.code(), Some(1));
    let body = json_body(&output);
    assert_eq!(body["code"], "anchor_config");
    let message = body["message"].as_str().unwrap_or_default();
    assert!(
        message.contains("thresholds.paramter"),
        "message did not name the unknown field: {message}"
    );
}

#[test]
fn precompute_writes_the_anchor_cache() {
    let temp = tempdir().unwrap();

    let output = prompt_check(temp.path())
        .args(["precompute", "--json"])
        .output()
        .expect("command run");
    assert!(output.status.success());

    let body = json_body(&output);
    assert_eq!(body["path"], ".prompt-check/anchors.json");
    assert!(!body["fingerprint"].as_str().unwrap_or_default().is_empty());

    let cache = temp.path().join(".prompt-check/anchors.json");
    let written: Value = serde_json::from_str(&fs::read_to_string(cache).unwrap()).unwrap();
    assert!(written.is_object());
}

#[test]
fn schema_describes_the_report() {
    let temp = tempdir().unwrap();
    let output = prompt_check(temp.path())
        .arg("schema")
        .output()
        .expect("command run");
    assert!(output.status.success());

    let schema = json_body(&output);
    assert_eq!(schema["title"], "AnalysisReport");
    for field in ["findings", "scores", "deep_pass", "requirements"] {
        assert!(
            schema["properties"][field].is_object(),
            "schema is missing {field}"
        );
    }
}
