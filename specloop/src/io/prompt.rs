//! Task-context rendering for agent input.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::selector::SelectionMode;
use crate::spec::{Spec, Task};

const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

/// A task whose failed-to-passed transition needs a learning record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LearningRequest {
    pub id: String,
    pub title: String,
}

impl LearningRequest {
    /// Requests for `ids`, titled from `spec`. Ids no longer in the spec keep
    /// an empty title.
    pub fn for_ids(spec: &Spec, ids: &[String]) -> Vec<Self> {
        ids.iter()
            .map(|id| Self {
                id: id.clone(),
                title: spec.task(id).map(|t| t.title.clone()).unwrap_or_default(),
            })
            .collect()
    }
}

/// Everything the task context is rendered from.
#[derive(Debug, Clone)]
pub struct TaskContext<'a> {
    pub spec: &'a Spec,
    /// Spec path as the agent should see it (relative to the project root).
    pub spec_path: &'a Path,
    pub tasks: &'a [&'a Task],
    pub mode: SelectionMode,
    pub resumed: bool,
    pub budget_points: u32,
    pub learnings: &'a [LearningRequest],
    pub learnings_path: &'a Path,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("task", TASK_TEMPLATE)
            .expect("task template should be valid");
        Self { env }
    }
}

/// Render the task context handed to the agent on stdin.
///
/// Learning requests, when present, come first so they are handled before
/// any task work.
pub fn render_task_context(input: &TaskContext<'_>) -> Result<String> {
    let engine = PromptEngine::new();
    let template = engine.env.get_template("task")?;
    let rendered = template
        .render(context! {
            title => input.spec.title.trim(),
            spec_path => input.spec_path.display().to_string(),
            context => input.spec.context.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            resumed => input.resumed,
            greedy => input.mode == SelectionMode::Greedy,
            budget_points => input.budget_points,
            tasks => input.tasks,
            acceptance => &input.spec.acceptance_criteria,
            learnings => input.learnings,
            learnings_path => input.learnings_path.display().to_string(),
        })
        .context("render task context")?;
    debug!(
        bytes = rendered.len(),
        tasks = input.tasks.len(),
        learnings = input.learnings.len(),
        "rendered task context"
    );
    Ok(rendered)
}
