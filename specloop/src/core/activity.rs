//! Per-iteration activity state machine.
//!
//! [`IterationMachine::apply`] is a synchronous reducer over
//! [`EventEnvelope`]s. It performs no I/O and never times out on its own;
//! timeouts are decided by the caller, which finalizes the machine with
//! [`IterationMachine::abort`].
//!
//! Tool calls of the same category that start back to back are coalesced
//! into one [`ToolGroup`] so the log shows "read 3 files" instead of three
//! near-identical rows. Groups keep every completed item for auditing.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::core::events::{AgentEvent, EventEnvelope, Usage};

const INPUT_SUMMARY_CHARS: usize = 80;

static COMMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[^\]\s]+(?: \(root-commit\))? ([0-9a-f]{7,40})\] ([^\n]+)").expect("commit regex")
});
static ONELINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([0-9a-f]{7,40}) ([^\n]+)$").expect("oneline regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Read,
    Write,
    Command,
    Meta,
}

impl ToolCategory {
    pub fn of(tool_name: &str) -> Self {
        match tool_name {
            "Read" | "Glob" | "Grep" | "LS" | "WebFetch" | "WebSearch" | "NotebookRead" => {
                ToolCategory::Read
            }
            "Edit" | "MultiEdit" | "Write" | "NotebookEdit" => ToolCategory::Write,
            "Bash" | "BashOutput" | "KillShell" => ToolCategory::Command,
            _ => ToolCategory::Meta,
        }
    }

    pub fn phase(self) -> Phase {
        match self {
            ToolCategory::Read => Phase::Reading,
            ToolCategory::Write => Phase::Editing,
            ToolCategory::Command => Phase::Running,
            ToolCategory::Meta => Phase::Thinking,
        }
    }

    fn plural_summary(self, count: usize) -> String {
        match self {
            ToolCategory::Read => format!("read {count} files"),
            ToolCategory::Write => format!("edited {count} files"),
            ToolCategory::Command => format!("ran {count} commands"),
            ToolCategory::Meta => format!("did {count} operations"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Reading,
    Editing,
    Running,
    Thinking,
    Done,
}

/// A tool call between its `tool_start` and matching `tool_end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTool {
    pub name: String,
    pub category: ToolCategory,
    pub input_summary: String,
    pub started_ms: u64,
    group: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedTool {
    pub name: String,
    pub input_summary: String,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// `tool_end` arrived without a matching start.
    pub synthetic: bool,
    /// The iteration ended before the tool finished.
    pub interrupted: bool,
}

/// A coalesced run of same-category tool calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolGroup {
    pub category: ToolCategory,
    pub items: Vec<CompletedTool>,
    pub in_flight: usize,
}

impl ToolGroup {
    fn new(category: ToolCategory) -> Self {
        Self {
            category,
            items: Vec::new(),
            in_flight: 0,
        }
    }

    /// True once every tool in the group has ended.
    pub fn is_resolved(&self) -> bool {
        self.in_flight == 0
    }

    pub fn len(&self) -> usize {
        self.items.len() + self.in_flight
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> String {
        match self.items.as_slice() {
            [single] if self.in_flight == 0 => {
                format!("{} {}", single.name, single.input_summary)
                    .trim_end()
                    .to_string()
            }
            _ => self.category.plural_summary(self.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Tools(ToolGroup),
    Thinking { text: String, at_ms: u64 },
    Message { text: String, at_ms: u64 },
    Error { message: String, at_ms: u64 },
}

/// Most recent commit seen in command output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRef {
    pub sha: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The agent emitted `complete`.
    Completed,
    IdleTimeout,
    IterationTimeout,
    /// The stream closed without a `complete` event.
    StreamClosed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationOutcome {
    pub success: bool,
    pub reason: EndReason,
    pub duration_ms: u64,
    pub cost: Option<f64>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToolCounts {
    pub read: usize,
    pub write: usize,
    pub command: usize,
    pub meta: usize,
}

impl ToolCounts {
    fn bump(&mut self, category: ToolCategory) {
        match category {
            ToolCategory::Read => self.read += 1,
            ToolCategory::Write => self.write += 1,
            ToolCategory::Command => self.command += 1,
            ToolCategory::Meta => self.meta += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.read + self.write + self.command + self.meta
    }
}

/// Serializable digest of an iteration for logs and callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivitySummary {
    pub tools: ToolCounts,
    pub errors: usize,
    pub unmatched_tool_ends: usize,
    pub last_commit: Option<CommitRef>,
    pub outcome: Option<IterationOutcome>,
}

#[derive(Debug, Default)]
pub struct IterationMachine {
    phase: Phase,
    active: Vec<ActiveTool>,
    log: Vec<LogEntry>,
    open_group: Option<usize>,
    counts: ToolCounts,
    errors: usize,
    unmatched_tool_ends: usize,
    last_commit: Option<CommitRef>,
    outcome: Option<IterationOutcome>,
    last_at_ms: u64,
}

impl IterationMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn active_tools(&self) -> &[ActiveTool] {
        &self.active
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn last_commit(&self) -> Option<&CommitRef> {
        self.last_commit.as_ref()
    }

    pub fn outcome(&self) -> Option<&IterationOutcome> {
        self.outcome.as_ref()
    }

    pub fn summary(&self) -> ActivitySummary {
        ActivitySummary {
            tools: self.counts,
            errors: self.errors,
            unmatched_tool_ends: self.unmatched_tool_ends,
            last_commit: self.last_commit.clone(),
            outcome: self.outcome.clone(),
        }
    }

    /// Apply one event. Returns false when the machine is already done and
    /// the event was ignored.
    pub fn apply(&mut self, envelope: &EventEnvelope) -> bool {
        if self.is_done() {
            return false;
        }
        let at_ms = envelope.at_ms;
        self.last_at_ms = self.last_at_ms.max(at_ms);

        match &envelope.event {
            AgentEvent::ToolStart { name, input } => self.start_tool(name, input, at_ms),
            AgentEvent::ToolEnd {
                name,
                output,
                error,
            } => self.end_tool(name, output.as_deref(), error.as_deref(), at_ms),
            AgentEvent::Thinking { text } => {
                self.open_group = None;
                self.push_thinking(text, at_ms);
                self.phase = Phase::Thinking;
            }
            AgentEvent::Message { text } => {
                self.open_group = None;
                self.log.push(LogEntry::Message {
                    text: text.clone(),
                    at_ms,
                });
                self.phase = Phase::Thinking;
            }
            AgentEvent::Error { message } => {
                self.open_group = None;
                self.errors += 1;
                self.log.push(LogEntry::Error {
                    message: message.clone(),
                    at_ms,
                });
            }
            AgentEvent::Complete {
                success,
                duration_ms,
                cost,
                usage,
            } => self.finish(IterationOutcome {
                success: *success,
                reason: EndReason::Completed,
                duration_ms: *duration_ms,
                cost: *cost,
                usage: usage.clone(),
            }),
        }
        true
    }

    /// Finalize the iteration as failed from outside the event stream
    /// (timeouts, cancellation, stream closed early). No-op once done.
    pub fn abort(&mut self, reason: EndReason, elapsed_ms: u64) {
        if self.is_done() {
            return;
        }
        self.finish(IterationOutcome {
            success: false,
            reason,
            duration_ms: elapsed_ms,
            cost: None,
            usage: None,
        });
    }

    fn start_tool(&mut self, name: &str, input: &Value, at_ms: u64) {
        let category = ToolCategory::of(name);
        let group = self.group_for(category);
        if let Some(LogEntry::Tools(g)) = self.log.get_mut(group) {
            g.in_flight += 1;
        }
        self.active.push(ActiveTool {
            name: name.to_string(),
            category,
            input_summary: summarize_input(input),
            started_ms: at_ms,
            group,
        });
        self.counts.bump(category);
        self.phase = category.phase();
    }

    fn end_tool(&mut self, name: &str, output: Option<&str>, error: Option<&str>, at_ms: u64) {
        let Some(idx) = self.active.iter().rposition(|tool| tool.name == name) else {
            self.record_unmatched_end(name, error);
            return;
        };
        let tool = self.active.remove(idx);
        if tool.category == ToolCategory::Command
            && let Some(output) = output
        {
            self.scan_for_commit(&tool.input_summary, output);
        }
        if error.is_some() {
            self.errors += 1;
        }
        let completed = CompletedTool {
            name: tool.name,
            input_summary: tool.input_summary,
            duration_ms: at_ms.saturating_sub(tool.started_ms),
            error: error.map(str::to_string),
            synthetic: false,
            interrupted: false,
        };
        self.resolve_in_group(tool.group, completed);
        self.phase = self.phase_after_tool();
    }

    fn record_unmatched_end(&mut self, name: &str, error: Option<&str>) {
        self.unmatched_tool_ends += 1;
        let category = ToolCategory::of(name);
        let group = self.group_for(category);
        if let Some(LogEntry::Tools(g)) = self.log.get_mut(group) {
            g.items.push(CompletedTool {
                name: name.to_string(),
                input_summary: String::new(),
                duration_ms: 0,
                error: error.map(str::to_string),
                synthetic: true,
                interrupted: false,
            });
        }
        self.phase = self.phase_after_tool();
    }

    fn resolve_in_group(&mut self, group: usize, completed: CompletedTool) {
        if let Some(LogEntry::Tools(g)) = self.log.get_mut(group) {
            g.in_flight = g.in_flight.saturating_sub(1);
            g.items.push(completed);
        }
    }

    /// Index of the open group for `category`, opening a new one on a
    /// category change.
    fn group_for(&mut self, category: ToolCategory) -> usize {
        if let Some(idx) = self.open_group
            && matches!(self.log.get(idx), Some(LogEntry::Tools(g)) if g.category == category)
        {
            return idx;
        }
        self.log.push(LogEntry::Tools(ToolGroup::new(category)));
        let idx = self.log.len() - 1;
        self.open_group = Some(idx);
        idx
    }

    fn phase_after_tool(&self) -> Phase {
        self.active
            .last()
            .map(|tool| tool.category.phase())
            .unwrap_or(Phase::Idle)
    }

    fn push_thinking(&mut self, text: &str, at_ms: u64) {
        if let Some(LogEntry::Thinking { text: prev, .. }) = self.log.last_mut() {
            prev.push('\n');
            prev.push_str(text);
            return;
        }
        self.log.push(LogEntry::Thinking {
            text: text.to_string(),
            at_ms,
        });
    }

    fn scan_for_commit(&mut self, command: &str, output: &str) {
        if let Some(caps) = COMMIT_RE.captures_iter(output).last() {
            self.last_commit = Some(CommitRef {
                sha: caps[1].to_string(),
                message: caps[2].trim().to_string(),
            });
            return;
        }
        if command.contains("git log")
            && let Some(caps) = ONELINE_RE.captures(output)
        {
            self.last_commit = Some(CommitRef {
                sha: caps[1].to_string(),
                message: caps[2].trim().to_string(),
            });
        }
    }

    fn finish(&mut self, outcome: IterationOutcome) {
        let at_ms = self.last_at_ms;
        for tool in std::mem::take(&mut self.active) {
            let completed = CompletedTool {
                name: tool.name,
                input_summary: tool.input_summary,
                duration_ms: at_ms.saturating_sub(tool.started_ms),
                error: None,
                synthetic: false,
                interrupted: true,
            };
            self.resolve_in_group(tool.group, completed);
        }
        self.open_group = None;
        self.outcome = Some(outcome);
        self.phase = Phase::Done;
    }
}

/// Short human-readable description of a tool input.
fn summarize_input(input: &Value) -> String {
    const KEYS: [&str; 7] = [
        "file_path",
        "path",
        "command",
        "pattern",
        "url",
        "query",
        "description",
    ];
    let text = KEYS
        .iter()
        .find_map(|key| input.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| match input {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    truncate_chars(text.lines().next().unwrap_or(""), INPUT_SUMMARY_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
