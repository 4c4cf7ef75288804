//! Deterministic, pure logic shared by the loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod activity;
pub mod budget;
pub mod events;
pub mod invariants;
pub mod parser;
pub mod progress;
pub mod selector;
pub mod stream_decode;
