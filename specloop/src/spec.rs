//! In-memory model of a spec document.
//!
//! A spec is an ordered list of tasks plus metadata. Task order is the
//! declaration order in the document and is never changed by the loop.
//! [`Spec::to_markdown`] renders the canonical document form that
//! [`crate::core::parser::parse`] reads back.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Passed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Passed => "passed",
            TaskStatus::Failed => "failed",
        }
    }

    /// Parse a status value, accepting `in-progress` / `in progress` spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "passed" => Some(TaskStatus::Passed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// `passed` and `failed` are terminal for completion purposes.
    pub fn is_resolved(self) -> bool {
        matches!(self, TaskStatus::Passed | TaskStatus::Failed)
    }

    /// Whether `self -> next` is an allowed transition.
    ///
    /// Statuses only move forward (`pending < in_progress < passed|failed`),
    /// except that a failed task may be retried (`in_progress`) or fixed
    /// (`passed`). Staying in place is always allowed.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::{Failed, InProgress, Passed, Pending};
        if self == next {
            return true;
        }
        match self {
            Pending => true,
            InProgress => matches!(next, Passed | Failed),
            Failed => matches!(next, InProgress | Passed),
            Passed => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relative task size. Each size maps to a fixed number of budget points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskSize {
    S,
    M,
    L,
}

impl TaskSize {
    pub fn points(self) -> u32 {
        match self {
            TaskSize::S => 1,
            TaskSize::M => 2,
            TaskSize::L => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskSize::S => "S",
            TaskSize::M => "M",
            TaskSize::L => "L",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "s" | "small" => Some(TaskSize::S),
            "m" | "medium" => Some(TaskSize::M),
            "l" | "large" => Some(TaskSize::L),
            _ => None,
        }
    }
}

impl fmt::Display for TaskSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub size: TaskSize,
    /// Ids of tasks that must be `passed` before this one can be selected.
    pub depends_on: Vec<String>,
    pub deliverables: Vec<String>,
    pub verify_command: Option<String>,
    pub notes: Option<String>,
}

impl Task {
    pub fn points(&self) -> u32 {
        self.size.points()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spec {
    pub title: String,
    pub context: Option<String>,
    pub tasks: Vec<Task>,
    pub acceptance_criteria: Vec<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Spec {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.id == id)
    }

    /// Render the canonical markdown form of the spec.
    pub fn to_markdown(&self) -> String {
        let mut buf = String::new();
        buf.push_str(&format!("# {}\n", self.title.trim()));
        if let Some(completed_at) = self.completed_at {
            buf.push_str(&format!(
                "\nCompleted: {}\n",
                completed_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
            ));
        }
        if let Some(context) = self.context.as_deref().map(str::trim)
            && !context.is_empty()
        {
            buf.push_str("\n## Context\n\n");
            buf.push_str(context);
            buf.push('\n');
        }

        buf.push_str("\n## Tasks\n");
        for task in &self.tasks {
            render_task(&mut buf, task);
        }

        if !self.acceptance_criteria.is_empty() {
            buf.push_str("\n## Acceptance Criteria\n\n");
            for item in &self.acceptance_criteria {
                buf.push_str(&format!("- {}\n", item.trim()));
            }
        }
        buf
    }
}

fn render_task(buf: &mut String, task: &Task) {
    buf.push_str(&format!("\n### {}: {}\n", task.id, task.title.trim()));
    buf.push_str(&format!("- Status: {}\n", task.status));
    buf.push_str(&format!("- Size: {}\n", task.size));
    if !task.depends_on.is_empty() {
        buf.push_str(&format!("- Depends: {}\n", task.depends_on.join(", ")));
    }
    buf.push_str("- Deliverables:\n");
    for item in &task.deliverables {
        buf.push_str(&format!("  - {}\n", item.trim()));
    }
    if let Some(verify) = task.verify_command.as_deref() {
        buf.push_str(&format!("- Verify: `{}`\n", verify.trim()));
    }
    if let Some(notes) = task.notes.as_deref() {
        let mut lines = notes.lines().map(str::trim).filter(|l| !l.is_empty());
        if let Some(first) = lines.next() {
            buf.push_str(&format!("- Notes: {first}\n"));
            for line in lines {
                buf.push_str(&format!("  {line}\n"));
            }
        }
    }
}
