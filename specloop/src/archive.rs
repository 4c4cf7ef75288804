//! Move a fully resolved spec into `specs/completed/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::core::progress::evaluate;
use crate::errors::SpecNotCompleteError;
use crate::io::atomic::write_atomic;
use crate::io::init::ProjectPaths;
use crate::io::spec_store::load_spec;
use crate::io::status_history::StatusHistory;

/// Archive the spec at `spec_path` and return its new location.
///
/// Fails with [`SpecNotCompleteError`] (leaving the file in place) while any
/// task is `pending` or `in_progress`. Failed tasks stay failed. The archived
/// copy is stamped with `now` and written to
/// `<specs>/completed/<YYYY-MM-DD>-<name>.md`, next to the `active/`
/// directory holding the spec.
#[instrument(skip_all, fields(spec = %spec_path.display()))]
pub fn archive_spec(spec_path: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    let mut spec = load_spec(spec_path)?;
    let report = evaluate(&spec);
    if !report.completed {
        return Err(SpecNotCompleteError {
            path: spec_path.to_path_buf(),
            pending: report.counts.pending,
            in_progress: report.counts.in_progress,
        }
        .into());
    }

    spec.completed_at = Some(now);
    let completed_dir = completed_dir_for(spec_path)?;
    let target = archive_target(&completed_dir, spec_path, now)?;
    write_atomic(&target, &spec.to_markdown())?;
    fs::remove_file(spec_path)
        .with_context(|| format!("remove archived spec {}", spec_path.display()))?;

    info!(
        target = %target.display(),
        passed = report.counts.passed,
        failed = report.counts.failed,
        "spec archived"
    );
    Ok(target)
}

/// Archive the active spec and clear the status history kept for it.
///
/// Learnings still uncaptured at this point are logged and dropped so they
/// never surface under another spec's task ids. `specloop run` captures them
/// before it archives.
pub fn archive_active_spec(
    paths: &ProjectPaths,
    spec_path: &Path,
    now: DateTime<Utc>,
) -> Result<PathBuf> {
    let history = StatusHistory::load_for_spec(&paths.status_history_path, spec_path);
    let tasks = load_spec(spec_path)?.tasks;
    let target = archive_spec(spec_path, now)?;

    let dropped = history.uncaptured_learnings(&tasks);
    if !dropped.is_empty() {
        warn!(ids = ?dropped, "archived with uncaptured learnings");
    }
    if let Err(err) = StatusHistory::empty(&paths.status_history_path).persist() {
        warn!(err = %format!("{err:#}"), "failed to clear status history");
    }
    Ok(target)
}

fn completed_dir_for(spec_path: &Path) -> Result<PathBuf> {
    let active_dir = spec_path
        .parent()
        .ok_or_else(|| anyhow!("spec path missing parent {}", spec_path.display()))?;
    let specs_dir = active_dir.parent().unwrap_or(active_dir);
    Ok(specs_dir.join("completed"))
}

/// First free `<date>-<stem>[-N].md` path in `dir`.
fn archive_target(dir: &Path, spec_path: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    let stem = spec_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("spec path has no file name {}", spec_path.display()))?;
    let base = format!("{}-{stem}", now.format("%Y-%m-%d"));

    let first = dir.join(format!("{base}.md"));
    if !first.exists() {
        return Ok(first);
    }
    (2u32..)
        .map(|n| dir.join(format!("{base}-{n}.md")))
        .find(|candidate| !candidate.exists())
        .ok_or_else(|| anyhow!("no free archive name for {base}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::io::init::ProjectPaths;
    use crate::io::spec_store::write_spec;
    use crate::spec::{TaskSize, TaskStatus};
    use crate::test_support::{spec_with, task};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn archives_resolved_spec_and_keeps_failed_tasks() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let spec_path = paths.active_dir.join("widget.md");
        write_spec(
            &spec_path,
            &spec_with(vec![
                task("T001", TaskStatus::Passed, TaskSize::S),
                task("T002", TaskStatus::Failed, TaskSize::M),
            ]),
        )
        .expect("write spec");

        let target = archive_spec(&spec_path, now()).expect("archive");

        assert_eq!(target, paths.completed_dir.join("2026-03-14-widget.md"));
        assert!(!spec_path.exists());
        let archived = load_spec(&target).expect("load archived");
        assert_eq!(archived.completed_at, Some(now()));
        assert_eq!(
            archived.task("T002").map(|t| t.status),
            Some(TaskStatus::Failed)
        );
    }

    #[test]
    fn refuses_incomplete_spec_without_moving_it() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let spec_path = paths.active_dir.join("widget.md");
        write_spec(
            &spec_path,
            &spec_with(vec![
                task("T001", TaskStatus::Passed, TaskSize::S),
                task("T002", TaskStatus::InProgress, TaskSize::M),
                task("T003", TaskStatus::Pending, TaskSize::M),
            ]),
        )
        .expect("write spec");

        let err = archive_spec(&spec_path, now()).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SpecNotCompleteError>(),
            Some(&SpecNotCompleteError {
                path: spec_path.clone(),
                pending: 1,
                in_progress: 1,
            })
        );
        assert!(spec_path.exists());
        assert!(!paths.completed_dir.exists());
    }

    #[test]
    fn name_collisions_get_a_suffix() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let spec = spec_with(vec![task("T001", TaskStatus::Passed, TaskSize::S)]);
        let spec_path = paths.active_dir.join("widget.md");

        write_spec(&spec_path, &spec).expect("write spec");
        archive_spec(&spec_path, now()).expect("first archive");
        write_spec(&spec_path, &spec).expect("write spec again");
        let second = archive_spec(&spec_path, now()).expect("second archive");

        assert_eq!(second, paths.completed_dir.join("2026-03-14-widget-2.md"));
    }

    #[test]
    fn archiving_active_spec_clears_status_history() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let spec_path = paths.active_dir.join("widget.md");
        let mut history = StatusHistory::empty(&paths.status_history_path);
        history.observe(&[task("T001", TaskStatus::Failed, TaskSize::S)], now());
        history.observe(&[task("T001", TaskStatus::Passed, TaskSize::S)], now());
        history.persist().expect("persist");
        write_spec(
            &spec_path,
            &spec_with(vec![task("T001", TaskStatus::Passed, TaskSize::S)]),
        )
        .expect("write spec");

        archive_active_spec(&paths, &spec_path, now()).expect("archive");

        let next = StatusHistory::load_for_spec(&paths.status_history_path, &spec_path);
        assert!(next.is_empty());
        assert!(next.pending_learnings().is_empty());
    }
}
