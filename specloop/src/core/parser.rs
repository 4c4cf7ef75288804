//! Markdown spec parser.
//!
//! Field lines are normalized before strict parsing: bullets, `**`/`__`
//! emphasis, label case and spacing around `:` are all accepted. Values are
//! then checked strictly (status and size enums, unique ids, known
//! dependencies).

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::core::invariants::validate_invariants;
use crate::errors::MalformedSpecError;
use crate::spec::{Spec, Task, TaskSize, TaskStatus};

static TASK_HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^###\s*([A-Za-z][A-Za-z0-9_-]*\d)\s*(?::|-|–|—)\s*(.*)$").expect("task heading regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Context,
    Tasks,
    Acceptance,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Status,
    Size,
    Depends,
    Deliverables,
    Verify,
    Notes,
}

impl Field {
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "status" => Some(Field::Status),
            "size" => Some(Field::Size),
            "depends" | "depends on" | "dependencies" => Some(Field::Depends),
            "deliverables" | "deliverable" => Some(Field::Deliverables),
            "verify" | "verify command" | "verification" => Some(Field::Verify),
            "notes" | "note" => Some(Field::Notes),
            _ => None,
        }
    }
}

/// Task under construction while its block is being read.
#[derive(Debug)]
struct TaskDraft {
    id: String,
    title: String,
    line: usize,
    status: Option<TaskStatus>,
    size: Option<TaskSize>,
    depends_on: Vec<String>,
    deliverables: Vec<String>,
    verify_command: Option<String>,
    notes: Vec<String>,
    open_field: Option<Field>,
}

impl TaskDraft {
    fn new(id: &str, title: &str, line: usize) -> Self {
        Self {
            id: id.to_string(),
            title: title.trim().to_string(),
            line,
            status: None,
            size: None,
            depends_on: Vec::new(),
            deliverables: Vec::new(),
            verify_command: None,
            notes: Vec::new(),
            open_field: None,
        }
    }

    fn finish(self) -> Result<Task, MalformedSpecError> {
        let status = self.status.ok_or_else(|| MalformedSpecError::MissingField {
            task_id: self.id.clone(),
            line: self.line,
            field: "status",
        })?;
        let size = self.size.ok_or_else(|| MalformedSpecError::MissingField {
            task_id: self.id.clone(),
            line: self.line,
            field: "size",
        })?;
        let notes = if self.notes.is_empty() {
            None
        } else {
            Some(self.notes.join("\n"))
        };
        Ok(Task {
            id: self.id,
            title: self.title,
            status,
            size,
            depends_on: self.depends_on,
            deliverables: self.deliverables,
            verify_command: self.verify_command,
            notes,
        })
    }

    fn apply_line(&mut self, raw: &str, line_no: usize) -> Result<(), MalformedSpecError> {
        if raw.trim().is_empty() {
            return Ok(());
        }
        // Indented sub-bullets under `Deliverables` are items even when their
        // text looks like a field label.
        if self.open_field == Some(Field::Deliverables)
            && raw.starts_with([' ', '\t'])
            && let Some(item) = strip_bullet(raw.trim_start())
        {
            push_nonempty(&mut self.deliverables, item);
            return Ok(());
        }
        if let Some((field, value)) = split_field(raw) {
            self.open_field = None;
            return self.apply_field(field, value, line_no);
        }
        match self.open_field {
            Some(Field::Deliverables) => {
                if let Some(item) = strip_bullet(raw.trim_start()) {
                    push_nonempty(&mut self.deliverables, item);
                }
            }
            Some(Field::Notes) => push_nonempty(&mut self.notes, raw),
            // Free text inside a task block carries no structure.
            _ => {}
        }
        Ok(())
    }

    fn apply_field(
        &mut self,
        field: Field,
        value: &str,
        line_no: usize,
    ) -> Result<(), MalformedSpecError> {
        match field {
            Field::Status => {
                let cleaned = strip_code(value);
                self.status = Some(TaskStatus::parse(cleaned).ok_or_else(|| {
                    MalformedSpecError::InvalidStatus {
                        task_id: self.id.clone(),
                        line: line_no,
                        value: cleaned.to_string(),
                    }
                })?);
            }
            Field::Size => {
                let cleaned = strip_code(value);
                self.size = Some(TaskSize::parse(cleaned).ok_or_else(|| {
                    MalformedSpecError::InvalidSize {
                        task_id: self.id.clone(),
                        line: line_no,
                        value: cleaned.to_string(),
                    }
                })?);
            }
            Field::Depends => {
                self.depends_on = value
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .map(|id| id.trim_matches('`').trim())
                    .filter(|id| !id.is_empty() && !id.eq_ignore_ascii_case("none") && *id != "-")
                    .map(str::to_string)
                    .collect();
            }
            Field::Deliverables => {
                for item in value.split(',') {
                    push_nonempty(&mut self.deliverables, item);
                }
                self.open_field = Some(Field::Deliverables);
            }
            Field::Verify => {
                let cleaned = strip_code(value);
                self.verify_command = (!cleaned.is_empty()).then(|| cleaned.to_string());
            }
            Field::Notes => {
                push_nonempty(&mut self.notes, value);
                self.open_field = Some(Field::Notes);
            }
        }
        Ok(())
    }
}

/// Parse a spec document.
///
/// Fails with [`MalformedSpecError`] on missing title, missing/invalid status
/// or size, duplicate ids, or unknown dependencies. Task order follows the
/// document.
pub fn parse(text: &str) -> Result<Spec, MalformedSpecError> {
    let mut title: Option<String> = None;
    let mut completed_at: Option<DateTime<Utc>> = None;
    let mut context_lines: Vec<&str> = Vec::new();
    let mut acceptance: Vec<String> = Vec::new();
    let mut tasks: Vec<Task> = Vec::new();
    let mut draft: Option<TaskDraft> = None;
    let mut section = Section::Preamble;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();

        if trimmed.starts_with("###") && !trimmed.starts_with("####") {
            if let Some(caps) = TASK_HEADING_RE.captures(trimmed) {
                if let Some(done) = draft.take() {
                    tasks.push(done.finish()?);
                }
                section = Section::Tasks;
                draft = Some(TaskDraft::new(&caps[1], &caps[2], line_no));
                continue;
            }
            if section == Section::Tasks {
                return Err(MalformedSpecError::MissingTaskId {
                    line: line_no,
                    heading: trimmed.to_string(),
                });
            }
        }

        if let Some(name) = heading(trimmed, "##") {
            if let Some(done) = draft.take() {
                tasks.push(done.finish()?);
            }
            section = section_for(name);
            continue;
        }

        if title.is_none()
            && let Some(name) = heading(trimmed, "#")
        {
            title = Some(name.to_string());
            continue;
        }

        match section {
            Section::Preamble => {
                if let Some((label, value)) = split_label(raw)
                    && (label == "completed" || label == "completed at")
                {
                    completed_at = Some(parse_timestamp(value, line_no)?);
                }
            }
            Section::Context => context_lines.push(raw),
            Section::Tasks => {
                if let Some(current) = draft.as_mut() {
                    current.apply_line(raw, line_no)?;
                }
            }
            Section::Acceptance => {
                if let Some(item) = strip_bullet(trimmed).or_else(|| strip_numbered(trimmed)) {
                    push_nonempty(&mut acceptance, strip_checkbox(item));
                }
            }
            Section::Other => {}
        }
    }

    if let Some(done) = draft.take() {
        tasks.push(done.finish()?);
    }

    let title = title
        .filter(|t| !t.is_empty())
        .ok_or(MalformedSpecError::MissingTitle)?;
    let context = context_lines.join("\n").trim().to_string();
    let spec = Spec {
        title,
        context: (!context.is_empty()).then_some(context),
        tasks,
        acceptance_criteria: acceptance,
        completed_at,
    };

    if let Some(err) = validate_invariants(&spec).into_iter().next() {
        return Err(err);
    }
    Ok(spec)
}

/// Serialize a spec to its canonical markdown form.
pub fn serialize(spec: &Spec) -> String {
    spec.to_markdown()
}

fn heading<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(marker)?;
    if rest.starts_with('#') {
        return None;
    }
    Some(rest.trim())
}

fn section_for(name: &str) -> Section {
    let name = name.trim_end_matches(':').trim().to_ascii_lowercase();
    match name.as_str() {
        "context" | "background" => Section::Context,
        "tasks" => Section::Tasks,
        "acceptance criteria" | "acceptance" => Section::Acceptance,
        _ => Section::Other,
    }
}

/// Split a `label: value` line into a lowercase label and its value.
///
/// Leading bullets and `**`/`__` emphasis around the label are dropped.
fn split_label(raw: &str) -> Option<(String, &str)> {
    let line = raw.trim();
    let line = strip_bullet(line).unwrap_or(line);
    let (label, value) = line.split_once(':')?;
    let label = label
        .trim_matches(|c: char| c == '*' || c == '_' || c.is_whitespace())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    if label.is_empty() {
        return None;
    }
    let value = value
        .trim()
        .trim_start_matches("**")
        .trim_start_matches("__")
        .trim();
    Some((label, value))
}

fn split_field(raw: &str) -> Option<(Field, &str)> {
    let (label, value) = split_label(raw)?;
    Field::from_label(&label).map(|field| (field, value))
}

fn strip_bullet(line: &str) -> Option<&str> {
    ["- ", "* ", "+ "]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
        .map(str::trim)
        .or_else(|| matches!(line, "-" | "*" | "+").then_some(""))
}

fn strip_numbered(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    line[digits..].strip_prefix(". ").map(str::trim)
}

fn strip_checkbox(item: &str) -> &str {
    for marker in ["[ ]", "[x]", "[X]"] {
        if let Some(rest) = item.strip_prefix(marker) {
            return rest.trim();
        }
    }
    item
}

fn strip_code(value: &str) -> &str {
    value.trim().trim_matches('`').trim()
}

fn push_nonempty(target: &mut Vec<String>, item: &str) {
    let item = item.trim();
    if !item.is_empty() {
        target.push(item.to_string());
    }
}

fn parse_timestamp(value: &str, line: usize) -> Result<DateTime<Utc>, MalformedSpecError> {
    DateTime::parse_from_rfc3339(strip_code(value))
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| MalformedSpecError::InvalidTimestamp {
            line,
            value: value.to_string(),
        })
}
