//! Read-only progress report for `specloop status`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::progress::{ProgressReport, evaluate};
use crate::io::init::ProjectPaths;
use crate::io::locator::locate_active_spec;
use crate::io::run_state::{RunState, load_run_state};
use crate::io::spec_store::load_spec;
use crate::io::status_history::StatusHistory;
use crate::spec::{TaskSize, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLine {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub size: TaskSize,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub spec_path: PathBuf,
    pub title: String,
    pub progress: ProgressReport,
    pub tasks: Vec<TaskLine>,
    /// `None` before `specloop init`.
    pub run_state: Option<RunState>,
    /// Failed-to-passed tasks waiting for a learning entry.
    pub pending_learnings: Vec<String>,
}

/// Summarize the active spec and the last run. Nothing is written.
pub fn status_report(root: &Path) -> Result<StatusReport> {
    let paths = ProjectPaths::new(root);
    let spec_path = locate_active_spec(root)?;
    let spec = load_spec(&spec_path)?;

    let run_state = if paths.run_state_path.is_file() {
        Some(load_run_state(&paths.run_state_path)?)
    } else {
        None
    };
    let history = StatusHistory::load_for_spec(&paths.status_history_path, &spec_path);
    let pending_learnings = history.uncaptured_learnings(&spec.tasks);

    Ok(StatusReport {
        progress: evaluate(&spec),
        title: spec.title.clone(),
        tasks: spec
            .tasks
            .into_iter()
            .map(|t| TaskLine {
                id: t.id,
                title: t.title,
                status: t.status,
                size: t.size,
            })
            .collect(),
        spec_path,
        run_state,
        pending_learnings,
    })
}
