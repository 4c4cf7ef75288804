//! Iteration logging helpers for `.specloop/iterations/`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::activity::ActivitySummary;
use crate::core::events::EventEnvelope;
use crate::core::selector::SelectionMode;

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iter: u32,
    pub task_ids: Vec<String>,
    pub mode: SelectionMode,
    pub resumed: bool,
    /// Tasks whose learning capture was requested in this iteration's context.
    pub learnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub activity: ActivitySummary,
    /// Task statuses after the iteration, in declaration order.
    pub statuses_after: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub events_path: PathBuf,
    pub stream_path: PathBuf,
    pub agent_log_path: PathBuf,
}

impl IterationPaths {
    pub fn new(root: &Path, run_id: &str, iter: u32) -> Self {
        let dir = root
            .join(".specloop")
            .join("iterations")
            .join(run_id)
            .join(iter.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            events_path: dir.join("events.jsonl"),
            stream_path: dir.join("stream.jsonl"),
            agent_log_path: dir.join("agent.log"),
            dir,
        }
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create iteration dir {}", self.dir.display()))
    }
}

pub fn write_prompt(paths: &IterationPaths, prompt: &str) -> Result<()> {
    write_text(&paths.prompt_path, prompt)
}

pub fn write_agent_log(paths: &IterationPaths, log: &str) -> Result<()> {
    write_text(&paths.agent_log_path, log)
}

pub fn write_meta(paths: &IterationPaths, meta: &IterationMeta) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(meta)?;
    buf.push('\n');
    write_text(&paths.meta_path, &buf)
}

/// Append-only JSONL log of the envelopes applied to the activity machine.
pub struct EventLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl EventLog {
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("create event log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, envelope: &EventEnvelope) -> Result<()> {
        serde_json::to_writer(&mut self.writer, envelope)
            .with_context(|| format!("serialize event into {}", self.path.display()))?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .with_context(|| format!("write event log {}", self.path.display()))
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
