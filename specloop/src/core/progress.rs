//! Completion and stuck evaluation.
//!
//! Everything here is pure: the same spec always produces the same report.

use std::collections::HashSet;

use serde::Serialize;

use crate::spec::{Spec, TaskStatus};

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub passed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.passed + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressReport {
    /// True iff no task is `pending` or `in_progress`.
    pub completed: bool,
    pub counts: StatusCounts,
    /// Share of resolved (passed or failed) tasks, 0..=100.
    pub percentage: u8,
    /// Pending tasks that can never be selected because a dependency failed.
    pub blocked: Vec<String>,
}

pub fn evaluate(spec: &Spec) -> ProgressReport {
    let mut counts = StatusCounts::default();
    for task in &spec.tasks {
        match task.status {
            TaskStatus::Pending => counts.pending += 1,
            TaskStatus::InProgress => counts.in_progress += 1,
            TaskStatus::Passed => counts.passed += 1,
            TaskStatus::Failed => counts.failed += 1,
        }
    }
    let total = counts.total();
    let percentage = if total == 0 {
        100
    } else {
        ((counts.passed + counts.failed) * 100 + total / 2) / total
    };
    ProgressReport {
        completed: counts.pending == 0 && counts.in_progress == 0,
        counts,
        percentage: percentage as u8,
        blocked: blocked_tasks(spec),
    }
}

/// Pending tasks with a failed dependency, directly or through another
/// blocked task. Returned in declaration order.
pub fn blocked_tasks(spec: &Spec) -> Vec<String> {
    let mut blocked: HashSet<&str> = HashSet::new();
    loop {
        let before = blocked.len();
        for task in &spec.tasks {
            if task.status != TaskStatus::Pending || blocked.contains(task.id.as_str()) {
                continue;
            }
            let stuck_on_dep = task.depends_on.iter().any(|dep| {
                blocked.contains(dep.as_str())
                    || spec
                        .task(dep)
                        .is_some_and(|d| d.status == TaskStatus::Failed)
            });
            if stuck_on_dep {
                blocked.insert(task.id.as_str());
            }
        }
        if blocked.len() == before {
            break;
        }
    }
    spec.tasks
        .iter()
        .filter(|t| blocked.contains(t.id.as_str()))
        .map(|t| t.id.clone())
        .collect()
}

/// Ordered `(id, status)` pairs; equal fingerprints mean no status progress.
pub fn fingerprint(spec: &Spec) -> Vec<(String, TaskStatus)> {
    spec.tasks
        .iter()
        .map(|t| (t.id.clone(), t.status))
        .collect()
}

/// Tracks consecutive iterations that ended without any task status change.
#[derive(Debug, Clone)]
pub struct StuckDetector {
    threshold: u32,
    last: Option<Vec<(String, TaskStatus)>>,
    stale: u32,
}

impl StuckDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            last: None,
            stale: 0,
        }
    }

    /// Seed with the fingerprint seen before the first iteration.
    pub fn with_baseline(threshold: u32, spec: &Spec) -> Self {
        let mut detector = Self::new(threshold);
        detector.last = Some(fingerprint(spec));
        detector
    }

    /// Record the spec state after an iteration. Returns true once the run is stuck.
    pub fn observe(&mut self, spec: &Spec) -> bool {
        let current = fingerprint(spec);
        if self.last.as_ref() == Some(&current) {
            self.stale += 1;
        } else {
            self.stale = 0;
        }
        self.last = Some(current);
        self.is_stuck()
    }

    pub fn is_stuck(&self) -> bool {
        self.stale >= self.threshold
    }

    /// Consecutive iterations without status progress.
    pub fn stale_iterations(&self) -> u32 {
        self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::TaskSize;
    use crate::test_support::{spec_with, task};

    #[test]
    fn completed_iff_nothing_pending_or_in_progress() {
        let cases = [
            (vec![TaskStatus::Passed, TaskStatus::Failed], true),
            (vec![TaskStatus::Passed, TaskStatus::Pending], false),
            (vec![TaskStatus::InProgress, TaskStatus::Passed], false),
            (vec![TaskStatus::Failed, TaskStatus::Failed], true),
            (vec![], true),
        ];
        for (statuses, expected) in cases {
            let spec = spec_with(
                statuses
                    .iter()
                    .enumerate()
                    .map(|(i, s)| task(&format!("T{:03}", i + 1), *s, TaskSize::S))
                    .collect(),
            );
            assert_eq!(evaluate(&spec).completed, expected, "{statuses:?}");
        }
    }

    #[test]
    fn counts_and_percentage() {
        let spec = spec_with(vec![
            task("T001", TaskStatus::Passed, TaskSize::S),
            task("T002", TaskStatus::Failed, TaskSize::S),
            task("T003", TaskStatus::InProgress, TaskSize::S),
        ]);
        let report = evaluate(&spec);
        assert_eq!(
            report.counts,
            StatusCounts {
                pending: 0,
                in_progress: 1,
                passed: 1,
                failed: 1
            }
        );
        assert_eq!(report.percentage, 67);
        assert!(!report.completed);
    }

    #[test]
    fn blocked_follows_failed_dependencies_transitively() {
        let mut second = task("T002", TaskStatus::Pending, TaskSize::S);
        second.depends_on = vec!["T001".to_string()];
        let mut third = task("T003", TaskStatus::Pending, TaskSize::S);
        third.depends_on = vec!["T002".to_string()];
        let spec = spec_with(vec![
            task("T001", TaskStatus::Failed, TaskSize::S),
            second,
            third,
            task("T004", TaskStatus::Pending, TaskSize::S),
        ]);
        assert_eq!(blocked_tasks(&spec), vec!["T002", "T003"]);
    }

    #[test]
    fn stuck_after_threshold_unchanged_iterations() {
        let mut spec = spec_with(vec![task("T001", TaskStatus::Pending, TaskSize::S)]);
        let mut detector = StuckDetector::with_baseline(2, &spec);

        assert!(!detector.observe(&spec));
        assert!(detector.observe(&spec));

        spec.tasks[0].status = TaskStatus::InProgress;
        assert!(!detector.observe(&spec));
        assert_eq!(detector.stale_iterations(), 0);
    }
}
