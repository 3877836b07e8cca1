// End-to-end tests of the `gsched` binary: emit targets, switches, exit codes.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn gsched_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_gsched"))
}

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn demo(name: &str) -> String {
    project_root()
        .join("demos")
        .join(name)
        .to_str()
        .unwrap()
        .to_string()
}

fn run(args: &[&str]) -> Output {
    Command::new(gsched_binary())
        .args(args)
        .env_remove("OCL_PRE_ALLOC_INSN_SCHEDULE")
        .env_remove("OCL_POST_ALLOC_INSN_SCHEDULE")
        .output()
        .expect("failed to run gsched")
}

fn run_ok(args: &[&str]) -> String {
    let output = run(args);
    assert!(
        output.status.success(),
        "gsched failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("non-UTF8 output")
}

fn temp_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("gsched-{}-{}", std::process::id(), name));
    std::fs::write(&path, contents).expect("write temp file");
    path
}

#[test]
fn default_emit_is_listing() {
    let out = run_ok(&[&demo("saxpy.gasm")]);
    assert!(out.starts_with("kernel saxpy simd 16 {"));
    assert!(out.contains("  alloc %0 = g2"));
    assert!(out.trim_end().ends_with('}'));
}

#[test]
fn emit_json() {
    let out = run_ok(&["--emit", "json", &demo("reduce.gasm")]);
    let value: serde_json::Value = serde_json::from_str(&out).expect("valid JSON");
    assert_eq!(value["kernels"][0]["kernel"]["name"], "reduce");
    assert_eq!(value["kernels"][0]["kernel"]["selection"]["blocks"].as_array().unwrap().len(), 3);
    assert!(value["kernels"][0]["pre_alloc"]["blocks"].is_array());
}

#[test]
fn emit_dag() {
    let out = run_ok(&["--emit", "dag", &demo("reduce.gasm")]);
    assert!(out.starts_with("digraph reduce {"));
    assert_eq!(out.matches("subgraph cluster_b").count(), 3);
}

#[test]
fn emit_timing() {
    let out = run_ok(&["--emit", "timing", &demo("saxpy.gasm")]);
    assert!(out.starts_with("gantt\n"));
    assert!(out.contains("section saxpy block 0 [post-alloc]"));
}

#[test]
fn emit_build_info() {
    let out = run_ok(&["--emit", "build-info", &demo("saxpy.gasm")]);
    let value: serde_json::Value = serde_json::from_str(&out).expect("valid JSON");
    assert_eq!(value["source_hash"].as_str().unwrap().len(), 64);
    assert_eq!(value["schedule_hash"].as_str().unwrap().len(), 64);
}

#[test]
fn verify_flag_passes_on_demos() {
    run_ok(&["--verify", &demo("saxpy.gasm")]);
    run_ok(&["--verify", &demo("reduce.gasm")]);
}

#[test]
fn missing_allocation_is_a_diagnostic() {
    let output = run(&[&demo("unallocated.gasm")]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[E0501]"), "stderr: {stderr}");
}

#[test]
fn no_post_alloc_skips_the_allocation_check() {
    let out = run_ok(&["--no-post-alloc", &demo("unallocated.gasm")]);
    assert!(out.starts_with("kernel needs_alloc simd 8 {"));
}

#[test]
fn passes_can_be_disabled_from_the_environment() {
    let output = Command::new(gsched_binary())
        .args(["--emit", "json", &demo("saxpy.gasm")])
        .env("OCL_PRE_ALLOC_INSN_SCHEDULE", "0")
        .env("OCL_POST_ALLOC_INSN_SCHEDULE", "off")
        .output()
        .expect("failed to run gsched");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert!(value["kernels"][0]["pre_alloc"].is_null());
    assert!(value["kernels"][0]["post_alloc"].is_null());
}

#[test]
fn disabled_passes_round_trip_the_listing() {
    let first = run_ok(&["--no-pre-alloc", "--no-post-alloc", &demo("reduce.gasm")]);
    let path = temp_file("roundtrip.gasm", &first);
    let second = run_ok(&["--no-pre-alloc", "--no-post-alloc", path.to_str().unwrap()]);
    assert_eq!(first, second);
    let _ = std::fs::remove_file(path);
}

#[test]
fn syntax_error_reports_location() {
    let path = temp_file("syntax.gasm", "kernel k simd 8 {\n  block { mov %1 = %0 ) }\n}\n");
    let output = run(&[path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[E0100]"), "stderr: {stderr}");
    assert!(stderr.contains("syntax.gasm:2:"), "stderr: {stderr}");
    let _ = std::fs::remove_file(path);
}

#[test]
fn unknown_opcode_is_reported() {
    let path = temp_file("opcode.gasm", "kernel k simd 8 { block { fma %1 = %0 } }\n");
    let output = run(&["--no-post-alloc", path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error[E0101]"));
    let _ = std::fs::remove_file(path);
}

#[test]
fn missing_source_exits_with_2() {
    let output = run(&["/nonexistent/listing.gasm"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn output_file() {
    let path = std::env::temp_dir().join(format!("gsched-{}-out.gasm", std::process::id()));
    run_ok(&["-o", path.to_str().unwrap(), &demo("saxpy.gasm")]);
    let written = std::fs::read_to_string(&path).expect("output written");
    assert!(written.starts_with("kernel saxpy"));
    let _ = std::fs::remove_file(path);
}
