//! CLI tests for specloop exit codes.
//!
//! Spawns the specloop binary and verifies exit codes match expected values
//! for complete, selectable, stuck and invalid spec states.

use std::path::Path;
use std::process::{Command, Output};

use specloop::exit_codes;
use specloop::io::config::{AgentConfig, LoopConfig, write_config};
use specloop::io::init::{InitOptions, ProjectPaths, init_project};
use specloop::io::spec_store::write_spec;
use specloop::spec::{Spec, TaskSize, TaskStatus};
use specloop::test_support::{spec_with, task};

fn project_with(spec: &Spec) -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
    write_spec(&paths.active_dir.join("feature.md"), spec).expect("write spec");
    temp
}

fn specloop(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_specloop"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("spawn specloop")
}

#[test]
fn select_complete_exits_with_complete_code() {
    let temp = project_with(&spec_with(vec![
        task("T001", TaskStatus::Passed, TaskSize::S),
        task("T002", TaskStatus::Failed, TaskSize::S),
    ]));

    let output = specloop(temp.path(), &["select"]);

    assert_eq!(output.status.code(), Some(exit_codes::COMPLETE));
}

#[test]
fn select_open_prints_task_ids() {
    let temp = project_with(&spec_with(vec![
        task("T001", TaskStatus::Passed, TaskSize::S),
        task("T002", TaskStatus::Pending, TaskSize::S),
        task("T003", TaskStatus::Pending, TaskSize::S),
    ]));

    let output = specloop(temp.path(), &["select", "--greedy", "--budget", "2"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "T002\nT003\n");
}

#[test]
fn select_over_budget_exits_with_stuck_code() {
    let temp = project_with(&spec_with(vec![task("T001", TaskStatus::Pending, TaskSize::L)]));

    let output = specloop(temp.path(), &["select", "--budget", "1"]);

    assert_eq!(output.status.code(), Some(exit_codes::STUCK));
}

#[test]
fn malformed_spec_exits_with_invalid_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
    std::fs::write(
        paths.active_dir.join("feature.md"),
        "## Tasks\n\n### T001: Missing title\n- Status: pending\n- Size: S\n",
    )
    .expect("write");

    let output = specloop(temp.path(), &["validate"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("title"));
}

#[test]
fn legacy_spec_exits_with_invalid_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    init_project(temp.path(), &InitOptions { force: false }).expect("init");
    std::fs::write(temp.path().join("SPEC.md"), "# Old\n").expect("write");

    let output = specloop(temp.path(), &["status"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("SPEC.md"));
}

#[test]
fn archive_incomplete_spec_exits_with_invalid_code() {
    let temp = project_with(&spec_with(vec![task("T001", TaskStatus::Pending, TaskSize::S)]));

    let output = specloop(temp.path(), &["archive"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(temp.path().join("specs/active/feature.md").exists());
}

#[cfg(unix)]
#[test]
fn run_stops_at_iteration_limit() {
    let temp = project_with(&spec_with(vec![task("T001", TaskStatus::Pending, TaskSize::S)]));
    let paths = ProjectPaths::new(temp.path());
    write_config(
        &paths.config_path,
        &LoopConfig {
            agent: AgentConfig {
                command: vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    r#"cat >/dev/null; echo '{"type":"complete","success":true}'"#.to_string(),
                ],
            },
            ..LoopConfig::default()
        },
    )
    .expect("config");

    let output = specloop(temp.path(), &["run", "--iterations", "1"]);

    assert_eq!(output.status.code(), Some(exit_codes::ITERATION_LIMIT));
    assert!(String::from_utf8_lossy(&output.stdout).contains("iter 1 [T001] ok"));
}

#[test]
fn run_to_completion_exits_ok() {
    let temp = project_with(&spec_with(vec![task("T001", TaskStatus::Passed, TaskSize::S)]));

    let output = specloop(temp.path(), &["run"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert!(
        std::fs::read_dir(temp.path().join("specs/completed"))
            .expect("completed dir")
            .next()
            .is_some()
    );
}
