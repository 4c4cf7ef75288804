//! Point-budget task selection.
//!
//! Selection is greedy first-fit in declaration order: a task is taken when it
//! still fits the remaining budget, otherwise it is skipped and later tasks
//! are considered. Tasks are never reordered to pack the budget tighter.

use crate::spec::{Spec, Task, TaskStatus};

/// Select pending tasks whose cumulative points fit `budget_points`.
///
/// A task is only eligible once every task it depends on has `passed`.
/// An empty result means nothing fits (or everything is blocked); it does not
/// mean the spec is complete.
pub fn select_tasks(spec: &Spec, budget_points: u32) -> Vec<&Task> {
    let mut selected = Vec::new();
    let mut total = 0u32;
    for task in &spec.tasks {
        if task.status != TaskStatus::Pending || !dependencies_passed(spec, task) {
            continue;
        }
        let next = total.saturating_add(task.points());
        if next > budget_points {
            continue;
        }
        total = next;
        selected.push(task);
    }
    selected
}

/// Total points of a selection.
pub fn total_points(tasks: &[&Task]) -> u32 {
    tasks.iter().map(|task| task.points()).sum()
}

/// True when every dependency of `task` is `passed`.
pub fn dependencies_passed(spec: &Spec, task: &Task) -> bool {
    task.depends_on.iter().all(|dep| {
        spec.task(dep)
            .is_some_and(|dep_task| dep_task.status == TaskStatus::Passed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::TaskSize;
    use crate::test_support::{spec_with, task};

    fn ids<'a>(tasks: &[&'a Task]) -> Vec<&'a str> {
        tasks.iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn fills_budget_in_declaration_order() {
        let spec = spec_with(vec![
            task("T001", TaskStatus::Pending, TaskSize::S),
            task("T002", TaskStatus::Pending, TaskSize::M),
            task("T003", TaskStatus::Pending, TaskSize::L),
        ]);
        let selected = select_tasks(&spec, 3);
        assert_eq!(ids(&selected), vec!["T001", "T002"]);
        assert_eq!(total_points(&selected), 3);
    }

    #[test]
    fn skips_oversized_task_and_keeps_scanning() {
        let spec = spec_with(vec![
            task("T001", TaskStatus::Pending, TaskSize::L),
            task("T002", TaskStatus::Pending, TaskSize::S),
            task("T003", TaskStatus::Pending, TaskSize::M),
        ]);
        assert_eq!(ids(&select_tasks(&spec, 3)), vec!["T002", "T003"]);
    }

    #[test]
    fn ignores_non_pending_tasks() {
        let spec = spec_with(vec![
            task("T001", TaskStatus::Passed, TaskSize::S),
            task("T002", TaskStatus::Failed, TaskSize::S),
            task("T003", TaskStatus::InProgress, TaskSize::S),
            task("T004", TaskStatus::Pending, TaskSize::S),
        ]);
        assert_eq!(ids(&select_tasks(&spec, 10)), vec!["T004"]);
    }

    #[test]
    fn budget_below_smallest_task_selects_nothing() {
        let spec = spec_with(vec![task("T001", TaskStatus::Pending, TaskSize::M)]);
        assert!(select_tasks(&spec, 1).is_empty());
        assert!(select_tasks(&spec, 0).is_empty());
    }

    #[test]
    fn unmet_dependencies_block_selection() {
        let mut second = task("T002", TaskStatus::Pending, TaskSize::S);
        second.depends_on = vec!["T001".to_string()];
        let mut third = task("T003", TaskStatus::Pending, TaskSize::S);
        third.depends_on = vec!["T000".to_string()];
        let spec = spec_with(vec![
            task("T000", TaskStatus::Passed, TaskSize::S),
            task("T001", TaskStatus::Pending, TaskSize::S),
            second,
            third,
        ]);
        assert_eq!(ids(&select_tasks(&spec, 10)), vec!["T001", "T003"]);
    }

    #[test]
    fn selection_never_exceeds_budget_and_is_first_fit() {
        let sizes = [TaskSize::L, TaskSize::S, TaskSize::M, TaskSize::S, TaskSize::L, TaskSize::M];
        let spec = spec_with(
            sizes
                .iter()
                .enumerate()
                .map(|(i, size)| task(&format!("T{:03}", i + 1), TaskStatus::Pending, *size))
                .collect(),
        );
        for budget in 0..=16 {
            let selected = select_tasks(&spec, budget);
            assert!(total_points(&selected) <= budget, "budget {budget}");

            // Any skipped pending task must not have fit when it was reached.
            let mut running = 0;
            for task in &spec.tasks {
                let taken = selected.iter().any(|t| t.id == task.id);
                if taken {
                    running += task.points();
                } else {
                    assert!(running + task.points() > budget, "budget {budget} skipped {}", task.id);
                }
            }
        }
    }
}
