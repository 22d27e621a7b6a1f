//! Turns a reviewer's structured exit decision into an escalation.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::event::Event;
use crate::session::{Session, keys};

use super::{Agent, EventStream};

/// Structured verdict a confirmation agent leaves in state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub exit: bool,
    #[serde(default)]
    pub reason: String,
}

/// Runs a confirmation agent, then escalates if its decision says to exit.
pub struct ReviewGate {
    name: String,
    inner: Arc<dyn Agent>,
}

impl ReviewGate {
    pub fn new(inner: Arc<dyn Agent>) -> Self {
        Self {
            name: inner.name().to_string(),
            inner,
        }
    }
}

impl Agent for ReviewGate {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, session: &'a mut Session) -> EventStream<'a> {
        Box::pin(stream! {
            {
                let mut inner = self.inner.run(&mut *session);
                while let Some(item) = inner.next().await {
                    let failed = item.is_err();
                    yield item;
                    if failed {
                        return;
                    }
                }
            }

            let decision = match session.state().get(keys::REVIEW_CONFIRMATION_DECISION) {
                None | Some(serde_json::Value::Null) => {
                    warn!(agent = %self.name, "no review decision in state; continuing loop");
                    return;
                }
                Some(value) => serde_json::from_value::<ReviewDecision>(value.clone()),
            };
            match decision {
                Ok(decision) if decision.exit => {
                    info!(agent = %self.name, reason = %decision.reason, "review approved; exiting loop");
                    yield Ok(session.emit(Event::message(self.name.as_str(), "").escalating()));
                }
                Ok(decision) => {
                    info!(agent = %self.name, reason = %decision.reason, "review requested more work");
                }
                Err(err) => {
                    warn!(agent = %self.name, error = %err, "malformed review decision; continuing loop");
                }
            }
        })
    }
}
