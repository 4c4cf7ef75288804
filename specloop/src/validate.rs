//! Validation helpers for `.specloop/` layout and the active spec.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::load_config;
use crate::io::init::ProjectPaths;
use crate::io::locator::locate_active_spec;
use crate::io::run_state::load_run_state;
use crate::io::spec_store::load_spec;

/// High-level validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub spec_path: PathBuf,
    pub tasks: usize,
    /// Run id recorded by the last `specloop run`, if any.
    pub run_id: Option<String>,
}

/// Validate `.specloop/` layout, config, run state and the active spec.
pub fn validate_project(root: &Path) -> Result<ValidateOutcome> {
    let paths = ProjectPaths::new(root);

    ensure_dir(&paths.loop_dir)?;
    ensure_dir(&paths.state_dir)?;
    ensure_dir(&paths.iterations_dir)?;
    ensure_dir(&paths.active_dir)?;

    ensure_file(&paths.gitignore_path)?;
    ensure_file(&paths.run_state_path)?;
    ensure_gitignore(&paths.gitignore_path)?;

    load_config(&paths.config_path).with_context(|| "load config.toml")?;
    let run_state = load_run_state(&paths.run_state_path).with_context(|| "load run_state.json")?;

    let spec_path = locate_active_spec(root)?;
    let spec = load_spec(&spec_path)?;

    Ok(ValidateOutcome {
        spec_path,
        tasks: spec.tasks.len(),
        run_id: run_state.run_id,
    })
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing directory {}", path.display()));
    }
    if !path.is_dir() {
        return Err(anyhow!("expected directory {}", path.display()));
    }
    Ok(())
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing file {}", path.display()));
    }
    if !path.is_file() {
        return Err(anyhow!("expected file {}", path.display()));
    }
    Ok(())
}

fn ensure_gitignore(path: &Path) -> Result<()> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    for required in ["state/", "iterations/"] {
        if !contents.lines().any(|line| line.trim() == required) {
            return Err(anyhow!("missing '{}' in {}", required, path.display()));
        }
    }
    Ok(())
}
