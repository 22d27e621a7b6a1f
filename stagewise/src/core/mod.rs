//! Deterministic, pure logic shared by the orchestration core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod invariants;
pub mod loop_guard;
pub mod plan;
pub mod selector;
pub mod truncate;
pub mod types;
