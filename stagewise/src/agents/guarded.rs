//! Repetition guard around a text-generating agent.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use tracing::warn;

use crate::core::loop_guard::{Decision, LoopGuard, LoopGuardConfig};
use crate::event::Event;
use crate::session::Session;

use super::{Agent, EventStream};

/// Feeds everything the wrapped agent writes into a fresh [`LoopGuard`] per
/// invocation and cuts the invocation short once the guard trips.
///
/// A trip is a normal end of the invocation: the offending event is still
/// forwarded, followed by a warning, and the inner stream is dropped.
pub struct Guarded {
    name: String,
    inner: Arc<dyn Agent>,
    config: LoopGuardConfig,
}

impl Guarded {
    pub fn new(inner: Arc<dyn Agent>, config: LoopGuardConfig) -> Self {
        Self {
            name: inner.name().to_string(),
            inner,
            config,
        }
    }
}

impl Agent for Guarded {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, session: &'a mut Session) -> EventStream<'a> {
        Box::pin(stream! {
            let mut guard = LoopGuard::new(self.config.clone());
            let mut streamed_partials = false;
            let mut tripped = None;
            {
                let mut inner = self.inner.run(&mut *session);
                while let Some(item) = inner.next().await {
                    let event = match item {
                        Ok(event) => event,
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    };
                    // A final event repeats text already seen as partial fragments.
                    let fresh_text = match event.generated_text() {
                        Some(text) if event.partial || !streamed_partials => Some(text),
                        _ => None,
                    };
                    let decision = fresh_text.map_or(Decision::Continue, |text| guard.observe(text));
                    if event.partial {
                        streamed_partials = true;
                    } else if event.generated_text().is_some() {
                        streamed_partials = false;
                    }
                    yield Ok(event);
                    if decision == Decision::Stop {
                        tripped = guard.repeating_unit();
                        break;
                    }
                }
            }
            if guard.is_tripped() {
                warn!(
                    agent = %self.name,
                    unit_chars = tripped.unwrap_or_default(),
                    buffered = guard.buffered(),
                    "repetitive output detected; ending invocation"
                );
                let notice = Event::warning(
                    self.name.as_str(),
                    "Repetitive output detected; the invocation was stopped early.",
                );
                yield Ok(session.emit(notice));
            }
        })
    }
}
