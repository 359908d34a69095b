// End-to-end tests of the vxc binary on the fixture files.
//
// Exit codes: 0 on success, 1 on compile errors, 2 on I/O or load errors.

mod common;

use std::path::PathBuf;
use std::process::{Command, Output};

use common::fixture;

fn vxc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_vxc"))
}

fn run(args: &[&str]) -> Output {
    Command::new(vxc_binary())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run vxc")
}

fn path(name: &str) -> String {
    fixture(name).display().to_string()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn optimizes_fixture_graph() {
    let out = run(&[
        &path("graph.json"),
        "--modules",
        &path("modules.json"),
        "--rules",
        &path("rules.json"),
    ]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.starts_with("ProgramGraph (8 nodes, latency 8)"), "stdout: {text}");
    assert!(text.contains("sub@1 (o0, o1)"), "stdout: {text}");
    assert!(!text.contains("neg@1"), "stdout: {text}");
    assert!(!text.contains("mul@1"), "stdout: {text}");
    assert!(text.contains("meter@1 (o7)"), "side-effecting call must survive: {text}");
}

#[test]
fn no_optimize_keeps_the_loaded_graph() {
    let out = run(&[
        &path("graph.json"),
        "--modules",
        &path("modules.json"),
        "--rules",
        &path("rules.json"),
        "--no-optimize",
    ]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.starts_with("ProgramGraph (13 nodes, latency 8)"), "stdout: {text}");
    assert_eq!(text.matches("neg@1").count(), 3);
}

#[test]
fn emit_dot() {
    let out = run(&[
        &path("graph.json"),
        "--modules",
        &path("modules.json"),
        "--rules",
        &path("rules.json"),
        "--emit",
        "dot",
    ]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.starts_with("digraph program {"));
    assert!(text.contains("subgraph cluster_voice {"));
    assert!(text.contains("subgraph cluster_effect {"));
    assert!(text.contains("shape=box, peripheries=2"), "meter is side-effecting: {text}");
}

#[test]
fn emit_rules_and_depths_need_no_graph() {
    let out = run(&["--modules", &path("modules.json"), "--rules", &path("rules.json"), "--emit", "rules"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let rules: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    let names: Vec<&str> = rules
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["neg-neg", "add-neg", "mul-one"]);

    let out = run(&["--modules", &path("modules.json"), "--rules", &path("rules.json"), "--emit", "depths"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "add 0\nmul 0\nneg 1\n");
}

#[test]
fn build_info_is_reproducible() {
    let args = [
        path("graph.json"),
        "--modules".to_string(),
        path("modules.json"),
        "--rules".to_string(),
        path("rules.json"),
        "--emit".to_string(),
        "build-info".to_string(),
    ];
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let first = run(&args);
    let second = run(&args);
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    assert_eq!(stdout(&first), stdout(&second));

    let info: serde_json::Value = serde_json::from_str(&stdout(&first)).unwrap();
    for key in ["graph_hash", "registry_fingerprint", "rules_fingerprint"] {
        assert_eq!(info[key].as_str().unwrap().len(), 64, "{key}");
    }
    assert_eq!(info["compiler_version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn output_file_is_written() {
    let dir = std::env::temp_dir().join(format!("vxc-cli-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let target = dir.join("graph.txt");
    let out = run(&[
        &path("graph.json"),
        "--modules",
        &path("modules.json"),
        "-o",
        target.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert!(stdout(&out).is_empty());
    let written = std::fs::read_to_string(&target).unwrap();
    assert!(written.starts_with("ProgramGraph ("));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn build_error_exits_with_one() {
    let out = run(&[&path("bad_graph.json"), "--modules", &path("modules.json")]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("voice.vx:2:3: error[E0302]"), "stderr: {err}");
    assert!(err.contains("load_graph failed"), "stderr: {err}");
}

#[test]
fn rewrite_limit_exits_with_one() {
    let out = run(&[
        &path("graph.json"),
        "--modules",
        &path("modules.json"),
        "--rules",
        &path("loop_rules.json"),
        "--settings",
        &path("settings.json"),
    ]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("error[E0401]"), "stderr: {err}");
    assert!(err.contains("rewrite limit of 100"), "stderr: {err}");
}

#[test]
fn max_rewrites_flag_overrides_settings_file() {
    let out = run(&[
        &path("graph.json"),
        "--modules",
        &path("modules.json"),
        "--rules",
        &path("loop_rules.json"),
        "--settings",
        &path("settings.json"),
        "--max-rewrites",
        "7",
    ]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("rewrite limit of 7"), "stderr: {}", stderr(&out));
}

#[test]
fn load_errors_exit_with_two() {
    let out = run(&[&path("graph.json"), "--modules", &path("missing.json")]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).starts_with("vxc: error: "), "stderr: {}", stderr(&out));

    let out = run(&["--modules", &path("modules.json"), "--emit", "graph"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(stderr(&out).contains("graph description is required"));

    let out = run(&[&path("graph.json"), "--modules", &path("modules.json"), "--sample-rate", "0"]);
    assert_eq!(out.status.code(), Some(2));
}
