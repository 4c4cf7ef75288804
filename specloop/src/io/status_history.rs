//! Task status history and failed-to-passed detection.
//!
//! The store lives in `.specloop/state/status_history.json` and is not part
//! of version-controlled project state. Its lifecycle is `load -> mutate ->
//! persist`, scoped to one orchestrator call.
//!
//! The store belongs to one spec document. A store written while another
//! spec was active is discarded on load, and archiving a spec clears it.
//!
//! Learning capture is best effort: an unreadable or corrupt store is logged
//! and treated as empty, never as an error.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::io::atomic::write_json_atomic;
use crate::spec::{Task, TaskStatus};

/// Last recorded status of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusEntry {
    pub task_id: String,
    pub status: TaskStatus,
    /// When the task was first seen with this status.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct HistoryFile {
    /// File name of the spec the entries belong to.
    spec: Option<String>,
    entries: Vec<TaskStatusEntry>,
    pending_learnings: Vec<String>,
}

#[derive(Debug)]
pub struct StatusHistory {
    path: PathBuf,
    spec: Option<String>,
    entries: BTreeMap<String, TaskStatusEntry>,
    pending_learnings: Vec<String>,
}

impl StatusHistory {
    /// An empty store that persists to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            spec: None,
            entries: BTreeMap::new(),
            pending_learnings: Vec::new(),
        }
    }

    /// Load the store, falling back to an empty one when the file is missing
    /// or unreadable.
    pub fn load(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no status history yet");
                return Self::empty(path);
            }
            Err(err) => {
                warn!(path = %path.display(), err = %err, "status history unreadable, starting empty");
                return Self::empty(path);
            }
        };
        match serde_json::from_str::<HistoryFile>(&contents) {
            Ok(file) => Self {
                path: path.to_path_buf(),
                spec: file.spec,
                entries: file
                    .entries
                    .into_iter()
                    .map(|entry| (entry.task_id.clone(), entry))
                    .collect(),
                pending_learnings: file.pending_learnings,
            },
            Err(err) => {
                warn!(path = %path.display(), err = %err, "status history corrupt, starting empty");
                Self::empty(path)
            }
        }
    }

    /// Load the store for the spec at `spec_path`, discarding one recorded
    /// for a different spec.
    pub fn load_for_spec(path: &Path, spec_path: &Path) -> Self {
        let mut history = Self::load(path);
        let spec = spec_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        history.scope_to(&spec);
        history
    }

    /// Bind the store to `spec`. Entries and queued learnings recorded for a
    /// different spec are dropped; returns true if that happened.
    pub fn scope_to(&mut self, spec: &str) -> bool {
        let foreign = self.spec.as_deref().is_some_and(|current| current != spec);
        if foreign {
            warn!(
                previous = ?self.spec,
                spec,
                dropped_learnings = ?self.pending_learnings,
                "status history belongs to another spec, starting empty"
            );
            self.entries.clear();
            self.pending_learnings.clear();
        }
        self.spec = Some(spec.to_string());
        foreign
    }

    pub fn entry(&self, task_id: &str) -> Option<&TaskStatusEntry> {
        self.entries.get(task_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of tasks recorded as `failed` that are now `passed`, in task order.
    ///
    /// Does not mutate the store; a transition keeps being reported until
    /// [`Self::record_statuses`] records the new status.
    pub fn detect_failed_to_passed(&self, tasks: &[Task]) -> Vec<String> {
        tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Passed)
            .filter(|task| {
                self.entries
                    .get(&task.id)
                    .is_some_and(|prev| prev.status == TaskStatus::Failed)
            })
            .map(|task| task.id.clone())
            .collect()
    }

    /// Append-or-update one entry per task. Timestamps move only when the
    /// status changes.
    pub fn record_statuses(&mut self, tasks: &[Task], now: DateTime<Utc>) {
        for task in tasks {
            match self.entries.get_mut(&task.id) {
                Some(entry) if entry.status == task.status => {}
                Some(entry) => {
                    entry.status = task.status;
                    entry.timestamp = now;
                }
                None => {
                    self.entries.insert(
                        task.id.clone(),
                        TaskStatusEntry {
                            task_id: task.id.clone(),
                            status: task.status,
                            timestamp: now,
                        },
                    );
                }
            }
        }
    }

    /// Detect failed-to-passed transitions, queue them for learning capture
    /// and record the new snapshot. Returns the newly detected ids.
    pub fn observe(&mut self, tasks: &[Task], now: DateTime<Utc>) -> Vec<String> {
        let detected = self.detect_failed_to_passed(tasks);
        for id in &detected {
            if !self.pending_learnings.contains(id) {
                self.pending_learnings.push(id.clone());
            }
        }
        self.record_statuses(tasks, now);
        if !detected.is_empty() {
            debug!(ids = ?detected, "failed-to-passed transitions detected");
        }
        detected
    }

    pub fn pending_learnings(&self) -> &[String] {
        &self.pending_learnings
    }

    /// Queued learnings plus transitions in `tasks` not yet observed, without
    /// mutating the store.
    pub fn uncaptured_learnings(&self, tasks: &[Task]) -> Vec<String> {
        let mut ids = self.pending_learnings.clone();
        for id in self.detect_failed_to_passed(tasks) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Drain the queued learning requests once they were rendered.
    pub fn take_pending_learnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_learnings)
    }

    pub fn persist(&self) -> Result<()> {
        let file = HistoryFile {
            spec: self.spec.clone(),
            entries: self.entries.values().cloned().collect(),
            pending_learnings: self.pending_learnings.clone(),
        };
        write_json_atomic(&self.path, &file)
    }
}
