//! Loop configuration stored under `.specloop/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::atomic::write_atomic;

/// Loop configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields fall back to
/// the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Size points the agent may take on per iteration (S=1, M=2, L=4).
    pub budget_points: u32,

    /// Consecutive iterations without a task-status change before the run
    /// is declared stuck.
    pub stuck_threshold: u32,

    /// Kill the agent when no event arrives for this many seconds.
    pub idle_timeout_secs: u64,

    /// Total per-iteration wall-clock budget in seconds.
    pub iteration_timeout_secs: u64,

    /// Truncate agent stderr kept for `agent.log` beyond this many bytes.
    pub agent_output_limit_bytes: usize,

    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command that runs the coding agent. The task context is written to its
    /// stdin and events are read from its stdout.
    pub command: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: [
                "claude",
                "-p",
                "--output-format",
                "stream-json",
                "--verbose",
                "--dangerously-skip-permissions",
            ]
            .map(str::to_string)
            .to_vec(),
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            budget_points: 4,
            stuck_threshold: 3,
            idle_timeout_secs: 10 * 60,
            iteration_timeout_secs: 60 * 60,
            agent_output_limit_bytes: 100_000,
            agent: AgentConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.budget_points == 0 {
            return Err(anyhow!("budget_points must be > 0"));
        }
        if self.stuck_threshold == 0 {
            return Err(anyhow!("stuck_threshold must be > 0"));
        }
        if self.idle_timeout_secs == 0 {
            return Err(anyhow!("idle_timeout_secs must be > 0"));
        }
        if self.iteration_timeout_secs == 0 {
            return Err(anyhow!("iteration_timeout_secs must be > 0"));
        }
        if self.agent_output_limit_bytes == 0 {
            return Err(anyhow!("agent_output_limit_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn iteration_timeout(&self) -> Duration {
        Duration::from_secs(self.iteration_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, LoopConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = LoopConfig {
            budget_points: 6,
            ..LoopConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "stuck_threshold = 5\n[agent]\ncommand = [\"my-agent\"]\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.stuck_threshold, 5);
        assert_eq!(cfg.budget_points, 4);
        assert_eq!(cfg.agent.command, vec!["my-agent".to_string()]);
    }

    #[test]
    fn rejects_zero_budget() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "budget_points = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("budget_points"));
    }
}
