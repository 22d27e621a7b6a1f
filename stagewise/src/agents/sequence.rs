//! One-shot ordered execution of sub-agents.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use tracing::debug;

use crate::session::Session;

use super::{Agent, EventStream};

/// Runs each sub-agent once, in order. An error item ends the sequence.
pub struct Sequence {
    name: String,
    sub_agents: Vec<Arc<dyn Agent>>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, sub_agents: Vec<Arc<dyn Agent>>) -> Self {
        Self {
            name: name.into(),
            sub_agents,
        }
    }

    pub fn sub_agents(&self) -> &[Arc<dyn Agent>] {
        &self.sub_agents
    }
}

impl Agent for Sequence {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, session: &'a mut Session) -> EventStream<'a> {
        Box::pin(stream! {
            for agent in &self.sub_agents {
                debug!(sequence = %self.name, agent = agent.name(), "starting sub-agent");
                let mut inner = agent.run(&mut *session);
                while let Some(item) = inner.next().await {
                    let failed = item.is_err();
                    yield item;
                    if failed {
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Cancelled;
    use crate::test_support::{ScriptedAgent, Step, collect, collect_all};

    #[tokio::test]
    async fn runs_each_agent_once_in_order() {
        let first = Arc::new(ScriptedAgent::new("planner", vec![Step::message("plan")]));
        let second = Arc::new(ScriptedAgent::new("summarizer", vec![Step::message("summary")]));
        let sequence = Sequence::new(
            "workflow",
            vec![first.clone() as Arc<dyn Agent>, second.clone() as Arc<dyn Agent>],
        );
        let mut session = Session::new("s");
        let events = collect(sequence.run(&mut session)).await.expect("events");
        let authors: Vec<_> = events.iter().map(|e| e.author.as_str()).collect();
        assert_eq!(authors, ["planner", "summarizer"]);
        assert_eq!((first.calls(), second.calls()), (1, 1));
        assert_eq!(sequence.sub_agents().len(), 2);
    }

    #[tokio::test]
    async fn cancellation_ends_the_sequence() {
        let first = Arc::new(ScriptedAgent::new("planner", vec![Step::Cancel]));
        let second = Arc::new(ScriptedAgent::new("summarizer", vec![Step::message("summary")]));
        let sequence = Sequence::new(
            "workflow",
            vec![first as Arc<dyn Agent>, second.clone() as Arc<dyn Agent>],
        );
        let mut session = Session::new("s");
        let items = collect_all(sequence.run(&mut session)).await;
        assert_eq!(items.len(), 1);
        let err = items[0].as_ref().unwrap_err();
        assert!(err.downcast_ref::<Cancelled>().is_some());
        assert_eq!(second.calls(), 0);
    }
}
