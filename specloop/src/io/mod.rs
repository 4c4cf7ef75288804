//! I/O helpers for specloop commands.

pub mod agent;
pub mod atomic;
pub mod config;
pub mod init;
pub mod iteration_log;
pub mod locator;
pub mod process;
pub mod prompt;
pub mod run_state;
pub mod spec_store;
pub mod status_history;
