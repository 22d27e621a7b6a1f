//! Agent abstraction and the composite agents the workflow is built from.
//!
//! An agent runs against a borrowed [`Session`] and reports progress as a lazy
//! stream of events. Dropping the stream cancels the agent at its next
//! suspension point, and the cancellation reaches every nested stream.

use std::error::Error;
use std::fmt;

use futures::stream::BoxStream;

use crate::event::Event;
use crate::session::Session;

pub mod guarded;
pub mod looping;
pub mod review;
pub mod sequence;
pub mod tool;

pub use guarded::Guarded;
pub use looping::{EscalationPolicy, LoopRunner};
pub use review::{ReviewDecision, ReviewGate};
pub use sequence::Sequence;
pub use tool::{Tool, ToolRegistry};

/// Lazy sequence of events produced by one agent invocation.
pub type EventStream<'a> = BoxStream<'a, anyhow::Result<Event>>;

/// Anything that can take a turn in a run.
///
/// Agents record the events they create through [`Session::emit`]; composites
/// forward the events of their children without recording them again.
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn run<'a>(&'a self, session: &'a mut Session) -> EventStream<'a>;
}

/// The run was cancelled from outside. Never downgraded to a warning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("run cancelled")
    }
}

impl Error for Cancelled {}

/// Returns true if `err` (or anything it wraps) is a [`Cancelled`].
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}
