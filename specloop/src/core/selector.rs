//! Deterministic per-iteration task planning.

use serde::{Deserialize, Serialize};

use crate::core::budget::select_tasks;
use crate::spec::{Spec, Task, TaskStatus};

/// How many selected tasks the agent is asked to attempt in one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// One task per iteration: the first task of the budget selection.
    #[default]
    Standard,
    /// Every task of the budget selection in a single iteration.
    Greedy,
}

/// Tasks chosen for one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationPlan<'a> {
    pub tasks: Vec<&'a Task>,
    /// True when the plan resumes tasks an earlier iteration left `in_progress`.
    pub resumed: bool,
}

impl IterationPlan<'_> {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }
}

/// Plan the next iteration.
///
/// Tasks still `in_progress` (an interrupted or unresolved earlier iteration)
/// are resumed before any new pending task is started. Resumed tasks share the
/// point budget first-fit like pending ones, except that the first is always
/// taken so an oversized started task cannot stall the loop. Otherwise the
/// budget selection decides.
pub fn plan_iteration(spec: &Spec, budget_points: u32, mode: SelectionMode) -> IterationPlan<'_> {
    let in_progress: Vec<&Task> = spec
        .tasks
        .iter()
        .filter(|t| t.status == TaskStatus::InProgress)
        .collect();
    if !in_progress.is_empty() {
        return IterationPlan {
            tasks: limit(fit_resumed(in_progress, budget_points), mode),
            resumed: true,
        };
    }
    IterationPlan {
        tasks: limit(select_tasks(spec, budget_points), mode),
        resumed: false,
    }
}

fn fit_resumed(tasks: Vec<&Task>, budget_points: u32) -> Vec<&Task> {
    let mut selected: Vec<&Task> = Vec::new();
    let mut total = 0u32;
    for task in tasks {
        let next = total.saturating_add(task.points());
        if !selected.is_empty() && next > budget_points {
            continue;
        }
        total = next;
        selected.push(task);
    }
    selected
}

fn limit(mut tasks: Vec<&Task>, mode: SelectionMode) -> Vec<&Task> {
    if mode == SelectionMode::Standard {
        tasks.truncate(1);
    }
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::TaskSize;
    use crate::test_support::{spec_with, task};

    fn spec() -> Spec {
        spec_with(vec![
            task("T001", TaskStatus::Pending, TaskSize::S),
            task("T002", TaskStatus::Pending, TaskSize::M),
            task("T003", TaskStatus::Pending, TaskSize::L),
        ])
    }

    #[test]
    fn standard_mode_takes_first_selected_task() {
        let spec = spec();
        let plan = plan_iteration(&spec, 3, SelectionMode::Standard);
        assert_eq!(plan.task_ids(), vec!["T001"]);
        assert!(!plan.resumed);
    }

    #[test]
    fn greedy_mode_takes_whole_selection() {
        let spec = spec();
        let plan = plan_iteration(&spec, 3, SelectionMode::Greedy);
        assert_eq!(plan.task_ids(), vec!["T001", "T002"]);
    }

    #[test]
    fn in_progress_tasks_are_resumed_first() {
        let mut spec = spec();
        spec.tasks[2].status = TaskStatus::InProgress;
        let plan = plan_iteration(&spec, 3, SelectionMode::Greedy);
        assert_eq!(plan.task_ids(), vec!["T003"]);
        assert!(plan.resumed);
    }

    #[test]
    fn greedy_resume_respects_budget() {
        let spec = spec_with(vec![
            task("T001", TaskStatus::InProgress, TaskSize::M),
            task("T002", TaskStatus::InProgress, TaskSize::M),
            task("T003", TaskStatus::InProgress, TaskSize::S),
        ]);
        let plan = plan_iteration(&spec, 3, SelectionMode::Greedy);
        assert_eq!(plan.task_ids(), vec!["T001", "T003"]);
        assert!(plan.resumed);
    }

    #[test]
    fn oversized_in_progress_task_is_still_resumed() {
        let spec = spec_with(vec![
            task("T001", TaskStatus::InProgress, TaskSize::L),
            task("T002", TaskStatus::InProgress, TaskSize::S),
        ]);
        let plan = plan_iteration(&spec, 1, SelectionMode::Greedy);
        assert_eq!(plan.task_ids(), vec!["T001"]);
    }

    #[test]
    fn empty_plan_when_budget_too_small() {
        let spec = spec_with(vec![task("T001", TaskStatus::Pending, TaskSize::L)]);
        assert!(plan_iteration(&spec, 2, SelectionMode::Standard).is_empty());
    }
}
