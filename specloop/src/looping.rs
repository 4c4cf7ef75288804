//! Multi-iteration loop for `specloop run`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::archive::archive_active_spec;
use crate::core::progress::StuckDetector;
use crate::io::agent::Agent;
use crate::io::config::load_config;
use crate::io::init::ProjectPaths;
use crate::io::locator::locate_active_spec;
use crate::io::run_state::{RunState, write_run_state};
use crate::io::spec_store::load_spec;
use crate::io::status_history::StatusHistory;
use crate::select::{SelectOutcome, select_from_root};
use crate::step::{IterationOptions, IterationReport, NoTaskSelectedError, run_iteration};

/// Options for `run_loop`.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this many iterations. `None` runs until complete or stuck.
    pub iterations: Option<u32>,
    pub iteration: IterationOptions,
}

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// Every task is resolved and the spec was archived to `archived`.
    Complete { archived: PathBuf },
    /// Task statuses did not change for `iterations` consecutive iterations.
    Stuck { iterations: u32 },
    /// Unresolved tasks remain but none can be planned.
    NoProgressPossible { pending: usize, blocked: Vec<String> },
    /// The requested iteration count was reached.
    IterationLimit { limit: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub run_id: String,
    pub iterations_executed: u32,
    pub stop: LoopStop,
}

/// Run iterations until the active spec completes, the loop gets stuck, or
/// the iteration limit is reached.
///
/// Each call starts a new run. A completed spec with uncaptured learnings gets
/// one more iteration asking only for those records before it is archived.
/// Failed iterations (agent errors, timeouts)
/// do not stop the loop; any other error does.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn run_loop<A: Agent, F: FnMut(&IterationReport)>(
    root: &Path,
    agent: &A,
    options: &RunOptions,
    mut on_iteration: F,
) -> Result<LoopOutcome> {
    let paths = ProjectPaths::new(root);
    if !paths.loop_dir.is_dir() {
        return Err(anyhow!(
            "{} not found (run `specloop init` first)",
            paths.relative(&paths.loop_dir).display()
        ));
    }
    let cfg = load_config(&paths.config_path)?;

    let run_id = claim_run_id(&paths.iterations_dir, Utc::now())?;
    write_run_state(&paths.run_state_path, &RunState::begin(run_id.clone()))?;
    info!(run_id = %run_id, limit = ?options.iterations, "starting run");

    let baseline = load_spec(&locate_active_spec(root)?)?;
    let mut stuck = StuckDetector::with_baseline(cfg.stuck_threshold, &baseline);

    let mut iterations_executed = 0u32;
    let stop = loop {
        let (spec_path, selection) = select_from_root(
            root,
            options.iteration.budget_points,
            options.iteration.mode,
        )?;
        match selection {
            SelectOutcome::Complete => {
                let history = StatusHistory::load_for_spec(&paths.status_history_path, &spec_path);
                let uncaptured = history.uncaptured_learnings(&load_spec(&spec_path)?.tasks);
                if uncaptured.is_empty() {
                    let archived = archive_active_spec(&paths, &spec_path, Utc::now())?;
                    info!(archived = %archived.display(), "spec complete");
                    break LoopStop::Complete { archived };
                }
                info!(ids = ?uncaptured, "spec complete, capturing learnings before archiving");
            }
            SelectOutcome::NoProgressPossible {
                pending, blocked, ..
            } => break LoopStop::NoProgressPossible { pending, blocked },
            SelectOutcome::Selected(_) => {}
        }

        if let Some(limit) = options.iterations
            && iterations_executed >= limit
        {
            break LoopStop::IterationLimit { limit };
        }

        let report = match run_iteration(root, agent, &options.iteration) {
            Ok(report) => report,
            Err(err) => {
                if let Some(empty) = err.downcast_ref::<NoTaskSelectedError>() {
                    break LoopStop::NoProgressPossible {
                        pending: empty.pending,
                        blocked: empty.blocked.clone(),
                    };
                }
                return Err(err);
            }
        };
        iterations_executed += 1;
        on_iteration(&report);

        if !report.progress.completed && stuck.observe(&report.spec_after) {
            warn!(
                iterations = stuck.stale_iterations(),
                "no task status changed, stopping"
            );
            break LoopStop::Stuck {
                iterations: stuck.stale_iterations(),
            };
        }
    };

    Ok(LoopOutcome {
        run_id,
        iterations_executed,
        stop,
    })
}

/// Reserve a run id by creating its iteration directory.
///
/// Runs started within the same second get `-2`, `-3`, ... suffixes so no two
/// runs share iteration logs.
fn claim_run_id(iterations_dir: &Path, now: DateTime<Utc>) -> Result<String> {
    fs::create_dir_all(iterations_dir)
        .with_context(|| format!("create {}", iterations_dir.display()))?;
    let base = now.format("%Y%m%dT%H%M%SZ").to_string();
    let mut attempt = 1u32;
    loop {
        let run_id = if attempt == 1 {
            base.clone()
        } else {
            format!("{base}-{attempt}")
        };
        let dir = iterations_dir.join(&run_id);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok(run_id),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e).with_context(|| format!("create {}", dir.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::{LoopConfig, write_config};
    use crate::io::iteration_log::IterationPaths;
    use crate::spec::{TaskSize, TaskStatus};
    use crate::test_support::{ScriptedAgent, ScriptedStep, TestProject, spec_with, task};

    fn pass(id: &str) -> Vec<ScriptedStep> {
        vec![
            ScriptedStep::SetStatus(id.to_string(), TaskStatus::Passed),
            ScriptedStep::complete(true),
        ]
    }

    #[test]
    fn loop_requires_init() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = run_loop(
            temp.path(),
            &ScriptedAgent::new(Vec::new()),
            &RunOptions::default(),
            |_| {},
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("specloop init"));
    }

    #[test]
    fn loop_runs_until_complete_and_archives() {
        let project = TestProject::new().expect("project");
        project
            .write_spec(&spec_with(vec![
                task("T001", TaskStatus::Pending, TaskSize::S),
                task("T002", TaskStatus::Pending, TaskSize::S),
            ]))
            .expect("spec");
        let agent = ScriptedAgent::new(vec![pass("T001"), pass("T002")]);

        let mut seen = Vec::new();
        let outcome = run_loop(project.root(), &agent, &RunOptions::default(), |report| {
            seen.push(report.task_ids.clone());
        })
        .expect("loop");

        assert_eq!(outcome.iterations_executed, 2);
        assert_eq!(seen, vec![vec!["T001"], vec!["T002"]]);
        let LoopStop::Complete { archived } = &outcome.stop else {
            panic!("expected completion, got {:?}", outcome.stop);
        };
        assert!(archived.starts_with(&project.paths().completed_dir));
        assert!(!project.spec_path().exists());
    }

    #[test]
    fn loop_stops_at_iteration_limit() {
        let project = TestProject::new().expect("project");
        project
            .write_spec(&spec_with(vec![
                task("T001", TaskStatus::Pending, TaskSize::S),
                task("T002", TaskStatus::Pending, TaskSize::S),
            ]))
            .expect("spec");
        let agent = ScriptedAgent::new(vec![pass("T001"), pass("T002")]);

        let outcome = run_loop(
            project.root(),
            &agent,
            &RunOptions {
                iterations: Some(1),
                ..RunOptions::default()
            },
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.iterations_executed, 1);
        assert_eq!(outcome.stop, LoopStop::IterationLimit { limit: 1 });
        assert_eq!(agent.requests().len(), 1);
    }

    /// Verifies an agent that never changes a status stops the loop once the
    /// threshold of unchanged iterations is reached.
    #[test]
    fn loop_detects_stuck_agent() {
        let project = TestProject::new().expect("project");
        project
            .write_spec(&spec_with(vec![task("T001", TaskStatus::Pending, TaskSize::S)]))
            .expect("spec");
        write_config(
            &project.paths().config_path,
            &LoopConfig {
                stuck_threshold: 2,
                ..LoopConfig::default()
            },
        )
        .expect("config");
        let agent = ScriptedAgent::new(Vec::new());

        let outcome =
            run_loop(project.root(), &agent, &RunOptions::default(), |_| {}).expect("loop");

        // The first iteration moves T001 to in_progress; two more change nothing.
        assert_eq!(outcome.iterations_executed, 3);
        assert_eq!(outcome.stop, LoopStop::Stuck { iterations: 2 });
    }

    #[test]
    fn loop_reports_no_progress_when_budget_too_small() {
        let project = TestProject::new().expect("project");
        project
            .write_spec(&spec_with(vec![task("T001", TaskStatus::Pending, TaskSize::L)]))
            .expect("spec");

        let outcome = run_loop(
            project.root(),
            &ScriptedAgent::new(Vec::new()),
            &RunOptions {
                iterations: None,
                iteration: IterationOptions {
                    budget_points: Some(2),
                    ..IterationOptions::default()
                },
            },
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.iterations_executed, 0);
        assert_eq!(
            outcome.stop,
            LoopStop::NoProgressPossible {
                pending: 1,
                blocked: Vec::new(),
            }
        );
    }

    #[test]
    fn each_run_starts_a_new_run_id() {
        let project = TestProject::new().expect("project");
        project
            .write_spec(&spec_with(vec![task("T001", TaskStatus::Pending, TaskSize::S)]))
            .expect("spec");
        project.begin_run("old-run").expect("begin");

        let outcome = run_loop(
            project.root(),
            &ScriptedAgent::new(vec![pass("T001")]),
            &RunOptions::default(),
            |_| {},
        )
        .expect("loop");

        assert_ne!(outcome.run_id, "old-run");
        assert_eq!(
            project.run_state().expect("state").run_id.as_deref(),
            Some(outcome.run_id.as_str())
        );
    }

    #[test]
    fn run_ids_within_one_second_get_suffixes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("iterations");
        let now = DateTime::parse_from_rfc3339("2026-10-18T09:30:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let first = claim_run_id(&dir, now).expect("first");
        let second = claim_run_id(&dir, now).expect("second");
        let third = claim_run_id(&dir, now).expect("third");

        assert_eq!(first, "20261018T093000Z");
        assert_eq!(second, "20261018T093000Z-2");
        assert_eq!(third, "20261018T093000Z-3");
    }

    /// Verifies two runs started back to back keep separate iteration logs.
    #[test]
    fn back_to_back_runs_keep_separate_logs() {
        let project = TestProject::new().expect("project");
        project
            .write_spec(&spec_with(vec![
                task("T001", TaskStatus::Pending, TaskSize::S),
                task("T002", TaskStatus::Pending, TaskSize::S),
            ]))
            .expect("spec");
        let agent = ScriptedAgent::new(vec![pass("T001"), pass("T002")]);
        let once = RunOptions {
            iterations: Some(1),
            ..RunOptions::default()
        };

        let first = run_loop(project.root(), &agent, &once, |_| {}).expect("first run");
        let second = run_loop(project.root(), &agent, &once, |_| {}).expect("second run");

        assert_ne!(first.run_id, second.run_id);
        for (run_id, task_id) in [(&first.run_id, "T001"), (&second.run_id, "T002")] {
            let meta_path = IterationPaths::new(project.root(), run_id, 1).meta_path;
            let meta: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(meta_path).expect("meta"))
                    .expect("parse meta");
            assert_eq!(meta["run_id"], run_id.as_str());
            assert_eq!(meta["task_ids"], serde_json::json!([task_id]));
        }
    }
}
