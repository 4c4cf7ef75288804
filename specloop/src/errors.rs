//! Structural errors surfaced to callers.
//!
//! These never get repaired silently. Orchestration code returns them inside
//! `anyhow::Error`; callers that need to branch on them use `downcast_ref`.

use std::path::PathBuf;

use thiserror::Error;

/// The spec document is structurally invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedSpecError {
    #[error("missing spec title (expected a `# <title>` heading)")]
    MissingTitle,
    #[error("line {line}: task heading without an id: '{heading}'")]
    MissingTaskId { line: usize, heading: String },
    #[error("task {task_id} (line {line}): missing required field '{field}'")]
    MissingField {
        task_id: String,
        line: usize,
        field: &'static str,
    },
    #[error(
        "task {task_id} (line {line}): invalid status '{value}' (expected pending, in_progress, passed or failed)"
    )]
    InvalidStatus {
        task_id: String,
        line: usize,
        value: String,
    },
    #[error("task {task_id} (line {line}): invalid size '{value}' (expected S, M or L)")]
    InvalidSize {
        task_id: String,
        line: usize,
        value: String,
    },
    #[error("line {line}: invalid completion timestamp '{value}'")]
    InvalidTimestamp { line: usize, value: String },
    #[error("duplicate task id '{task_id}'")]
    DuplicateId { task_id: String },
    #[error("task {task_id}: depends on unknown task '{dependency}'")]
    UnknownDependency { task_id: String, dependency: String },
    #[error("task {task_id}: depends on itself")]
    SelfDependency { task_id: String },
}

/// The active spec could not be located unambiguously.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocateError {
    #[error("no active spec in {} (create one spec document there)", .dir.display())]
    NoActiveSpec { dir: PathBuf },
    #[error("{} active specs in {} (exactly one is allowed): {}", .candidates.len(), .dir.display(), display_paths(.candidates))]
    AmbiguousSpec {
        dir: PathBuf,
        candidates: Vec<PathBuf>,
    },
    #[error("found legacy spec {} (move it into {} to migrate)", .legacy.display(), .dir.display())]
    LegacySpecMigration { legacy: PathBuf, dir: PathBuf },
}

/// Archiving was requested for a spec with unresolved tasks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("spec {} is not complete ({pending} pending, {in_progress} in progress)", .path.display())]
pub struct SpecNotCompleteError {
    pub path: PathBuf,
    pub pending: usize,
    pub in_progress: usize,
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
