//! Project layout and `.specloop/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::{LoopConfig, write_config};
use super::run_state::{RunState, write_run_state};

/// All canonical paths for a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub loop_dir: PathBuf,
    pub state_dir: PathBuf,
    pub iterations_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub run_state_path: PathBuf,
    pub status_history_path: PathBuf,
    pub specs_dir: PathBuf,
    pub active_dir: PathBuf,
    pub completed_dir: PathBuf,
    pub learnings_path: PathBuf,
    pub legacy_spec_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let loop_dir = root.join(".specloop");
        let state_dir = loop_dir.join("state");
        let specs_dir = root.join("specs");
        Self {
            loop_dir: loop_dir.clone(),
            state_dir: state_dir.clone(),
            iterations_dir: loop_dir.join("iterations"),
            gitignore_path: loop_dir.join(".gitignore"),
            config_path: loop_dir.join("config.toml"),
            run_state_path: state_dir.join("run_state.json"),
            status_history_path: state_dir.join("status_history.json"),
            active_dir: specs_dir.join("active"),
            completed_dir: specs_dir.join("completed"),
            learnings_path: specs_dir.join("learnings.md"),
            specs_dir,
            legacy_spec_path: root.join("SPEC.md"),
            root,
        }
    }

    /// `path` relative to the project root, for prompts and messages.
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing loop-owned files.
    pub force: bool,
}

/// Create `.specloop/` scaffolding and the `specs/` directories in `root`.
///
/// Fails if `.specloop/` already exists unless `options.force` is set.
/// Existing spec documents are never touched.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<ProjectPaths> {
    let paths = ProjectPaths::new(root);
    if paths.loop_dir.exists() && !paths.loop_dir.is_dir() {
        return Err(anyhow!("init: .specloop exists but is not a directory"));
    }
    if paths.loop_dir.exists() && !options.force {
        return Err(anyhow!(
            "init: .specloop already exists (use --force to overwrite)"
        ));
    }

    for dir in [
        &paths.loop_dir,
        &paths.state_dir,
        &paths.iterations_dir,
        &paths.active_dir,
        &paths.completed_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    fs::write(&paths.gitignore_path, LOOP_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &LoopConfig::default())?;
    write_run_state(&paths.run_state_path, &RunState::default())?;

    info!(root = %root.display(), force = options.force, "initialized project");
    Ok(paths)
}

const LOOP_GITIGNORE: &str = "state/\niterations/\n";
