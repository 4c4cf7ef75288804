//! Spec-driven agent loop.
//!
//! A spec is a markdown document of sized tasks (`specs/active/*.md`). The
//! loop repeatedly picks tasks that fit a point budget, hands them to a
//! coding agent, watches the agent's event stream, and re-reads the spec
//! until every task is resolved or no progress is made. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (parsing, selection, progress,
//!   the iteration event machine). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, agent processes,
//!   prompts, iteration logs). Isolated to enable scripted agents in tests.
//!
//! Orchestration modules ([`step`], [`looping`], [`select`], [`status`],
//! [`validate`], [`archive`]) coordinate core logic with I/O to implement
//! CLI commands.

pub mod archive;
pub mod core;
pub mod errors;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod select;
pub mod spec;
pub mod status;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
