//! Selection helpers for `specloop select` and `specloop run`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::budget::total_points;
use crate::core::progress::evaluate;
use crate::core::selector::{SelectionMode, plan_iteration};
use crate::io::config::load_config;
use crate::io::init::ProjectPaths;
use crate::io::locator::locate_active_spec;
use crate::io::spec_store::load_spec;
use crate::spec::Spec;

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Every task is resolved.
    Complete,
    /// Tasks the next iteration would work on.
    Selected(Selection),
    /// Unresolved tasks remain but none fits the budget or all are blocked.
    NoProgressPossible {
        pending: usize,
        in_progress: usize,
        blocked: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub task_ids: Vec<String>,
    pub points: u32,
    /// The tasks were left `in_progress` by an earlier iteration.
    pub resumed: bool,
}

/// Select the next tasks from an in-memory spec.
pub fn select_spec(spec: &Spec, budget_points: u32, mode: SelectionMode) -> SelectOutcome {
    let report = evaluate(spec);
    if report.completed {
        return SelectOutcome::Complete;
    }
    let plan = plan_iteration(spec, budget_points, mode);
    if plan.is_empty() {
        return SelectOutcome::NoProgressPossible {
            pending: report.counts.pending,
            in_progress: report.counts.in_progress,
            blocked: report.blocked,
        };
    }
    SelectOutcome::Selected(Selection {
        task_ids: plan.task_ids(),
        points: total_points(&plan.tasks),
        resumed: plan.resumed,
    })
}

/// Locate and load the active spec and select its next tasks.
///
/// `budget_points` falls back to the configured budget.
pub fn select_from_root(
    root: &Path,
    budget_points: Option<u32>,
    mode: SelectionMode,
) -> Result<(PathBuf, SelectOutcome)> {
    let paths = ProjectPaths::new(root);
    let budget = match budget_points {
        Some(points) => points,
        None => load_config(&paths.config_path)?.budget_points,
    };
    let spec_path = locate_active_spec(root)?;
    let spec = load_spec(&spec_path).context("load spec for selection")?;
    Ok((spec_path, select_spec(&spec, budget, mode)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{TaskSize, TaskStatus};
    use crate::test_support::{spec_with, task};

    #[test]
    fn select_returns_first_fitting_task() {
        let spec = spec_with(vec![
            task("T001", TaskStatus::Passed, TaskSize::S),
            task("T002", TaskStatus::Pending, TaskSize::M),
            task("T003", TaskStatus::Pending, TaskSize::S),
        ]);
        assert_eq!(
            select_spec(&spec, 3, SelectionMode::Standard),
            SelectOutcome::Selected(Selection {
                task_ids: vec!["T002".to_string()],
                points: 2,
                resumed: false,
            })
        );
        assert_eq!(
            select_spec(&spec, 3, SelectionMode::Greedy),
            SelectOutcome::Selected(Selection {
                task_ids: vec!["T002".to_string(), "T003".to_string()],
                points: 3,
                resumed: false,
            })
        );
    }

    #[test]
    fn select_returns_complete_when_all_resolved() {
        let spec = spec_with(vec![
            task("T001", TaskStatus::Passed, TaskSize::S),
            task("T002", TaskStatus::Failed, TaskSize::L),
        ]);
        assert_eq!(
            select_spec(&spec, 4, SelectionMode::Standard),
            SelectOutcome::Complete
        );
    }

    /// Verifies a budget below the smallest pending task is not completion.
    #[test]
    fn small_budget_means_no_progress_possible() {
        let spec = spec_with(vec![task("T001", TaskStatus::Pending, TaskSize::L)]);
        assert_eq!(
            select_spec(&spec, 2, SelectionMode::Standard),
            SelectOutcome::NoProgressPossible {
                pending: 1,
                in_progress: 0,
                blocked: Vec::new(),
            }
        );
    }

    #[test]
    fn select_from_root_uses_configured_budget() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        crate::io::spec_store::write_spec(
            &paths.active_dir.join("feature.md"),
            &spec_with(vec![
                task("T001", TaskStatus::Pending, TaskSize::L),
                task("T002", TaskStatus::Pending, TaskSize::S),
            ]),
        )
        .expect("write spec");

        let (_, outcome) =
            select_from_root(temp.path(), None, SelectionMode::Greedy).expect("select");
        let SelectOutcome::Selected(selection) = outcome else {
            panic!("expected selection, got {outcome:?}");
        };
        assert_eq!(selection.task_ids, vec!["T001"]);
    }
}
