//! CLI Functional Tests for amplify-cli
//!
//! These tests spawn the actual binary as a subprocess and check exit codes
//! and output for real command lines.

use serde::Deserialize;
use std::process::{Command, Output};

/// Run amplify-cli with the given arguments
fn run_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_amplify-cli"))
        .args(args)
        .output()
        .expect("Failed to execute amplify-cli")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[derive(Deserialize)]
struct CheckJson {
    task: String,
    questions: usize,
    mismatches: Vec<serde_json::Value>,
    max_rounds: usize,
}

#[derive(Deserialize)]
struct InjectJson {
    rows: usize,
    injected: usize,
    observed_rate: f64,
    shapes_preserved: bool,
    injected_changed: bool,
}

// ==========================================
// Help and Usage
// ==========================================

#[test]
fn test_help_lists_subcommands() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success());

    let text = stdout(&output);
    for command in ["explore", "check", "inject"] {
        assert!(text.contains(command), "help should mention {}", command);
    }
}

#[test]
fn test_missing_subcommand_fails() {
    let output = run_cli(&[]);
    assert!(!output.status.success());
}

#[test]
fn test_unknown_task_fails() {
    let output = run_cli(&["check", "--task", "hanoi"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Unknown task"));
}

// ==========================================
// Check Command
// ==========================================

#[test]
fn test_check_iterate_json() {
    let output = run_cli(&[
        "--format", "json", "check", "--task", "iterate", "--instances", "3", "--nqs", "10",
        "--seed", "4",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let response: CheckJson = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(response.task, "iterate");
    assert_eq!(response.questions, 30);
    assert!(response.mismatches.is_empty());
    assert!(response.max_rounds <= 3);
}

#[test]
fn test_check_sat_exhaustive_with_levels() {
    let output = run_cli(&[
        "--format",
        "json",
        "check",
        "--task",
        "sat",
        "--instances",
        "2",
        "--difficulty",
        "0",
        "--levels",
        "1",
        "--exhaustive",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let response: CheckJson = serde_json::from_str(&stdout(&output)).unwrap();
    // (nvalues + 1)^nvars patterns per environment
    assert_eq!(response.questions, 2 * 729);
    assert!(response.mismatches.is_empty());
}

#[test]
fn test_check_with_config_file() {
    let path = std::env::temp_dir().join(format!("amplify-cli-{}.json", std::process::id()));
    std::fs::write(&path, r#"{"name": "iter", "nchars": 3, "length": 1, "log_iters": 4}"#)
        .unwrap();

    let output = run_cli(&[
        "--format",
        "json",
        "check",
        "--config",
        path.to_str().unwrap(),
        "--instances",
        "1",
        "--exhaustive",
    ]);
    let _ = std::fs::remove_file(&path);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let response: CheckJson = serde_json::from_str(&stdout(&output)).unwrap();
    // three words, sixteen exponents each
    assert_eq!(response.questions, 3 * 16);
}

#[test]
fn test_invalid_config_is_reported() {
    let path = std::env::temp_dir().join(format!("amplify-cli-bad-{}.json", std::process::id()));
    std::fs::write(&path, r#"{"name": "iterate", "log_iters": 1}"#).unwrap();

    let output = run_cli(&["check", "--config", path.to_str().unwrap()]);
    let _ = std::fs::remove_file(&path);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("log_iters"));
}

// ==========================================
// Explore Command
// ==========================================

#[test]
fn test_explore_text_shows_interactions() {
    let output = run_cli(&["explore", "--task", "sat", "--nbatch", "1", "--nqs", "2"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let text = stdout(&output);
    assert!(text.contains("=== Instance 0 ==="));
    assert!(text.contains("Q: "));
    assert!(text.contains("A: "));
    assert!(text.contains("overall"));
}

#[test]
fn test_explore_json_has_traces() {
    let output = run_cli(&[
        "-f", "json", "explore", "--nbatch", "2", "--nqs", "3", "--levels", "2",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let value: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(value["instances"].as_array().unwrap().len(), 2);
    assert_eq!(value["run"]["traces"].as_array().unwrap().len(), 6);
    assert_eq!(value["accuracy"]["overall"]["correct"], 6);
}

// ==========================================
// Inject Command
// ==========================================

#[test]
fn test_inject_reports_rate() {
    let output = run_cli(&[
        "--format",
        "json",
        "inject",
        "--task",
        "iterate",
        "--nbatch",
        "1000",
        "--probability",
        "0.3",
        "--seed",
        "3",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let response: InjectJson = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(response.rows, 1000);
    assert!((response.observed_rate - 0.3).abs() <= 0.05);
    assert_eq!(response.observed_rate, response.injected as f64 / 1000.0);
    assert!(response.shapes_preserved);
    assert!(response.injected_changed);
}

#[test]
fn test_inject_rejects_bad_probability() {
    let output = run_cli(&["inject", "--probability", "1.5"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("probability"));
}

#[test]
fn test_metrics_flag_prints_prometheus() {
    let output = run_cli(&[
        "--metrics",
        "check",
        "--task",
        "sat",
        "--instances",
        "1",
        "--nqs",
        "5",
        "--difficulty",
        "0",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let err = stderr(&output);
    assert!(err.contains("amplify_runs_total"));
    assert!(err.contains("amplify_rounds_total"));
}

#[test]
fn test_run_completion_is_logged_once_per_run() {
    let output = run_cli(&[
        "-v",
        "check",
        "--task",
        "iterate",
        "--instances",
        "2",
        "--nqs",
        "4",
    ]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    // one runner.run per instance at level 0, logged by the observer only
    let err = stderr(&output);
    assert_eq!(err.matches("Run completed").count(), 2, "stderr: {}", err);
    assert!(!err.contains("Recursive run completed"));
}
