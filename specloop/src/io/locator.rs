//! Locate the single active spec document.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::errors::LocateError;
use crate::io::init::ProjectPaths;

/// Find the one `*.md` document in `specs/active/`.
///
/// Zero documents fail with [`LocateError::NoActiveSpec`], or with
/// [`LocateError::LegacySpecMigration`] when a legacy root `SPEC.md` exists.
/// Two or more fail with [`LocateError::AmbiguousSpec`]. Hidden files are
/// ignored.
pub fn locate_active_spec(root: &Path) -> Result<PathBuf> {
    let paths = ProjectPaths::new(root);
    let mut candidates = active_candidates(&paths.active_dir)?;
    debug!(dir = %paths.active_dir.display(), count = candidates.len(), "active spec candidates");

    match candidates.len() {
        0 if paths.legacy_spec_path.is_file() => Err(LocateError::LegacySpecMigration {
            legacy: paths.legacy_spec_path,
            dir: paths.active_dir,
        }
        .into()),
        0 => Err(LocateError::NoActiveSpec {
            dir: paths.active_dir,
        }
        .into()),
        1 => {
            if paths.legacy_spec_path.is_file() {
                warn!(legacy = %paths.legacy_spec_path.display(), "ignoring legacy spec file");
            }
            Ok(candidates.remove(0))
        }
        _ => Err(LocateError::AmbiguousSpec {
            dir: paths.active_dir,
            candidates,
        }
        .into()),
    }
}

fn active_candidates(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        let is_markdown = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));
        if !hidden && is_markdown && path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, "# Spec\n").expect("write");
    }

    #[test]
    fn finds_single_active_spec() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let spec = paths.active_dir.join("feature.md");
        write(&spec);
        write(&paths.active_dir.join(".draft.md"));
        write(&paths.active_dir.join("notes.txt"));

        assert_eq!(locate_active_spec(temp.path()).expect("locate"), spec);
    }

    #[test]
    fn no_spec_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = locate_active_spec(temp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LocateError>(),
            Some(LocateError::NoActiveSpec { .. })
        ));
    }

    #[test]
    fn two_specs_are_ambiguous() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        write(&paths.active_dir.join("b.md"));
        write(&paths.active_dir.join("a.md"));

        let err = locate_active_spec(temp.path()).unwrap_err();
        let Some(LocateError::AmbiguousSpec { candidates, .. }) = err.downcast_ref() else {
            panic!("expected ambiguous spec error, got {err:#}");
        };
        assert_eq!(
            candidates,
            &vec![paths.active_dir.join("a.md"), paths.active_dir.join("b.md")]
        );
    }

    #[test]
    fn legacy_spec_requires_migration() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(&temp.path().join("SPEC.md"));

        let err = locate_active_spec(temp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LocateError>(),
            Some(LocateError::LegacySpecMigration { .. })
        ));
        assert!(err.to_string().contains("migrate"));
    }
}
