//! Semantic invariants that the line parser cannot check on its own.

use std::collections::HashSet;

use crate::errors::MalformedSpecError;
use crate::spec::Spec;

/// Check spec-wide invariants:
/// - No duplicate task ids
/// - Every dependency names an existing task
/// - No task depends on itself
///
/// Errors are reported in task declaration order.
pub fn validate_invariants(spec: &Spec) -> Vec<MalformedSpecError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for task in &spec.tasks {
        if !seen.insert(task.id.as_str()) {
            errors.push(MalformedSpecError::DuplicateId {
                task_id: task.id.clone(),
            });
        }
    }

    let known: HashSet<&str> = spec.tasks.iter().map(|t| t.id.as_str()).collect();
    for task in &spec.tasks {
        for dep in &task.depends_on {
            if dep == &task.id {
                errors.push(MalformedSpecError::SelfDependency {
                    task_id: task.id.clone(),
                });
            } else if !known.contains(dep.as_str()) {
                errors.push(MalformedSpecError::UnknownDependency {
                    task_id: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{TaskSize, TaskStatus};
    use crate::test_support::{spec_with, task};

    #[test]
    fn reports_duplicates_and_bad_dependencies() {
        let mut dup = task("T001", TaskStatus::Pending, TaskSize::S);
        dup.depends_on = vec!["T009".to_string(), "T001".to_string()];
        let spec = spec_with(vec![
            task("T001", TaskStatus::Pending, TaskSize::S),
            dup,
        ]);

        let errors = validate_invariants(&spec);
        assert_eq!(
            errors,
            vec![
                MalformedSpecError::DuplicateId {
                    task_id: "T001".to_string()
                },
                MalformedSpecError::UnknownDependency {
                    task_id: "T001".to_string(),
                    dependency: "T009".to_string(),
                },
                MalformedSpecError::SelfDependency {
                    task_id: "T001".to_string()
                },
            ]
        );
    }

    #[test]
    fn valid_spec_has_no_errors() {
        let mut second = task("T002", TaskStatus::Pending, TaskSize::M);
        second.depends_on = vec!["T001".to_string()];
        let spec = spec_with(vec![
            task("T001", TaskStatus::Passed, TaskSize::S),
            second,
        ]);
        assert!(validate_invariants(&spec).is_empty());
    }
}
