//! Spec document persistence.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::parser::{parse, serialize};
use crate::io::atomic::write_atomic;
use crate::spec::Spec;

/// Read and parse a spec document.
///
/// A [`crate::errors::MalformedSpecError`] stays reachable through
/// `downcast_ref` on the returned error.
pub fn load_spec(path: &Path) -> Result<Spec> {
    let text = fs::read_to_string(path).with_context(|| format!("read spec {}", path.display()))?;
    let spec = parse(&text).with_context(|| format!("parse spec {}", path.display()))?;
    debug!(path = %path.display(), tasks = spec.tasks.len(), "spec loaded");
    Ok(spec)
}

/// Atomically replace a spec document with the canonical serialization.
pub fn write_spec(path: &Path, spec: &Spec) -> Result<()> {
    debug!(path = %path.display(), tasks = spec.tasks.len(), "writing spec");
    write_atomic(path, &serialize(spec))
}
