//! Stage-by-stage orchestration of agent workflows.
//!
//! A planner leaves a list of stages and success criteria in session state.
//! The [`orchestrator::StageOrchestrator`] then implements one stage at a time
//! through a coder/reviewer loop, asks a checker which criteria are now met,
//! lets a reflector revise the remaining plan, and repeats until the criteria
//! are met or the plan runs out. The layout keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (plan parsing, selection,
//!   repetition detection, truncation). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (configuration files).
//!
//! [`agents`], [`orchestrator`] and [`workflow`] compose agents over a shared
//! [`session::Session`] and report progress as [`event::Event`] streams.

pub mod agents;
pub mod compaction;
pub mod core;
pub mod event;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
