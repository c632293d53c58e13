use std::path::PathBuf;
use std::process::{Command, Output};

use serde_json::Value;

const LEAK: &str = "<demo.Log: void leak()>";
const RUN: &str = "<demo.Main: void run()>";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn unwind(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_unwind"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to execute unwind")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("unwind-cli-{}-{name}", std::process::id()))
}

#[test]
fn help_lists_every_subcommand() {
    let output = unwind(&["--help"]);
    assert!(output.status.success(), "--help should succeed");
    let text = stdout(&output);
    for command in ["verify", "visualize", "list"] {
        assert!(text.contains(command), "help should mention {command}");
    }
}

#[test]
fn verify_reports_safe_for_contradictory_guards() {
    let file = fixture("contradictory_guards.json");
    let output = unwind(&[
        "verify",
        file.to_str().unwrap(),
        "--error-method",
        LEAK,
    ]);
    assert!(output.status.success(), "{output:?}");
    assert!(stdout(&output).contains("RESULT: SAFE"));
}

#[test]
fn verify_json_carries_the_witness() {
    let file = fixture("guarded_leak.json");
    let policy = fixture("policy.json");
    let output = unwind(&[
        "verify",
        file.to_str().unwrap(),
        "--function",
        RUN,
        "--policy",
        policy.to_str().unwrap(),
        "--format",
        "json",
    ]);
    assert!(output.status.success(), "{output:?}");
    let report: Value = serde_json::from_str(&stdout(&output)).expect("json report");
    assert_eq!(report["verdict"]["result"], "unsafe");
    assert_eq!(report["function"], "run");
    let steps = report["verdict"]["witness"]["steps"]
        .as_array()
        .expect("witness steps");
    assert!(steps.iter().any(|s| s["error"] == true));
    assert_eq!(report["verdict"]["witness"]["final_state"]["x"], 5);
}

#[test]
fn verify_requires_function_when_program_is_ambiguous() {
    let file = fixture("guarded_leak.json");
    let output = unwind(&["verify", file.to_str().unwrap(), "--error-method", LEAK]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--function"), "{stderr}");
}

#[test]
fn verify_rejects_unknown_fast_forward_policy() {
    let file = fixture("contradictory_guards.json");
    let output = unwind(&[
        "verify",
        file.to_str().unwrap(),
        "--error-method",
        LEAK,
        "--fast-forward",
        "sometimes",
    ]);
    assert!(!output.status.success());
}

#[test]
fn verify_writes_dot_and_report_artifacts() {
    let file = fixture("contradictory_guards.json");
    let dot = temp_path("tree.dot");
    let report = temp_path("report.json");
    let output = unwind(&[
        "verify",
        file.to_str().unwrap(),
        "--error-method",
        LEAK,
        "--dot",
        dot.to_str().unwrap(),
        "--report-out",
        report.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{output:?}");

    let dot_text = std::fs::read_to_string(&dot).expect("dot written");
    assert!(dot_text.starts_with("digraph"));
    let report_json: Value =
        serde_json::from_str(&std::fs::read_to_string(&report).expect("report written"))
            .expect("report json");
    assert_eq!(report_json["verdict"]["result"], "safe");

    let _ = std::fs::remove_file(dot);
    let _ = std::fs::remove_file(report);
}

#[test]
fn visualize_prints_error_paths() {
    let file = fixture("guarded_leak.json");
    let output = unwind(&[
        "visualize",
        file.to_str().unwrap(),
        "--function",
        RUN,
        "--error-method",
        LEAK,
        "--errors-only",
    ]);
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    assert!(text.contains("error paths"));
    assert!(text.contains("color=red"));
}

#[test]
fn list_marks_procedures_with_error_units() {
    let file = fixture("guarded_leak.json");
    let output = unwind(&["list", file.to_str().unwrap(), "--error-method", LEAK]);
    assert!(output.status.success(), "{output:?}");
    let text = stdout(&output);
    let run_line = text.lines().find(|l| l.contains(RUN)).expect("run listed");
    assert!(run_line.starts_with("error"));
    let idle_line = text
        .lines()
        .find(|l| l.contains("void idle()"))
        .expect("idle listed");
    assert!(idle_line.starts_with('-'));
}
