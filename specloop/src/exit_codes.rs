//! Stable exit codes for specloop CLI commands.

/// Command succeeded, or every task in the spec is resolved.
pub const OK: i32 = 0;
/// Command failed due to an invalid spec, layout or config, or another fatal error.
pub const INVALID: i32 = 1;
/// `specloop select` found no selectable task because the spec is complete.
pub const COMPLETE: i32 = 2;
/// The run stopped without task-status progress, or no task can make progress.
pub const STUCK: i32 = 3;
/// `specloop run` used up its requested iteration count.
pub const ITERATION_LIMIT: i32 = 4;
