//! Run state storage for iteration bookkeeping.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::atomic::write_json_atomic;

/// Persisted bookkeeping for the current run (`.specloop/state/run_state.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    /// Identifier for the current execution run.
    pub run_id: Option<String>,
    /// Next iteration number (1-indexed, monotonically increasing).
    pub next_iter: u32,
    /// Task ids planned in the previous iteration.
    #[serde(default)]
    pub last_tasks: Vec<String>,
    /// Whether the previous iteration's agent session reported success.
    #[serde(default)]
    pub last_success: Option<bool>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            run_id: None,
            next_iter: 1,
            last_tasks: Vec::new(),
            last_success: None,
        }
    }
}

impl RunState {
    /// Start a fresh run, keeping nothing from the previous one.
    pub fn begin(run_id: String) -> Self {
        Self {
            run_id: Some(run_id),
            ..Self::default()
        }
    }
}

/// Load run state from disk.
pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let state: RunState = serde_json::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    debug!(run_id = ?state.run_id, next_iter = state.next_iter, "run state loaded");
    Ok(state)
}

/// Atomically write run state to disk.
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(path = %path.display(), run_id = ?state.run_id, next_iter = state.next_iter, "writing run state");
    write_json_atomic(path, state)
}
