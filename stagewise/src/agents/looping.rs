//! Repeated execution of a fixed list of sub-agents.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use tracing::debug;

use crate::session::Session;

use super::{Agent, EventStream};

/// What the runner does with an escalation flag after it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EscalationPolicy {
    /// Clear the flag on the re-emitted event so only this loop stops.
    #[default]
    Suppress,
    /// Forward the flag unchanged so enclosing loops stop too.
    Propagate,
}

/// Runs its sub-agents in order, pass after pass, until one escalates,
/// one fails, or the iteration cap is reached.
pub struct LoopRunner {
    name: String,
    sub_agents: Vec<Arc<dyn Agent>>,
    max_iterations: Option<u32>,
    escalation: EscalationPolicy,
}

impl LoopRunner {
    /// Unbounded, escalation-suppressing runner.
    pub fn new(name: impl Into<String>, sub_agents: Vec<Arc<dyn Agent>>) -> Self {
        Self {
            name: name.into(),
            sub_agents,
            max_iterations: None,
            escalation: EscalationPolicy::Suppress,
        }
    }

    /// Cap the number of passes. Zero means unbounded.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = (max_iterations > 0).then_some(max_iterations);
        self
    }

    pub fn propagating(mut self) -> Self {
        self.escalation = EscalationPolicy::Propagate;
        self
    }

    pub fn max_iterations(&self) -> Option<u32> {
        self.max_iterations
    }

    pub fn escalation(&self) -> EscalationPolicy {
        self.escalation
    }
}

impl Agent for LoopRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, session: &'a mut Session) -> EventStream<'a> {
        Box::pin(stream! {
            if self.sub_agents.is_empty() {
                return;
            }
            let mut iteration = 0u32;
            'passes: loop {
                if self.max_iterations.is_some_and(|cap| iteration >= cap) {
                    debug!(runner = %self.name, iteration, "iteration cap reached");
                    break;
                }
                iteration += 1;
                for agent in &self.sub_agents {
                    let mut inner = agent.run(&mut *session);
                    while let Some(item) = inner.next().await {
                        match item {
                            Ok(event) if event.is_escalation() => {
                                debug!(
                                    runner = %self.name,
                                    agent = agent.name(),
                                    iteration,
                                    "escalation received"
                                );
                                let forwarded = match self.escalation {
                                    EscalationPolicy::Suppress => event.without_escalation(),
                                    EscalationPolicy::Propagate => event,
                                };
                                yield Ok(forwarded);
                                break 'passes;
                            }
                            Ok(event) => yield Ok(event),
                            Err(err) => {
                                yield Err(err);
                                break 'passes;
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedAgent, Step, collect};

    #[tokio::test]
    async fn stops_after_cap() {
        let worker = Arc::new(ScriptedAgent::new("worker", vec![Step::message("tick")]).repeating());
        let runner = LoopRunner::new("loop", vec![worker.clone() as Arc<dyn Agent>]).with_max_iterations(3);
        let mut session = Session::new("s");
        let events = collect(runner.run(&mut session)).await.expect("events");
        assert_eq!(events.len(), 3);
        assert_eq!(worker.calls(), 3);
    }

    #[tokio::test]
    async fn propagating_runner_keeps_the_flag() {
        let worker = Arc::new(ScriptedAgent::new(
            "worker",
            vec![Step::Escalate("approved".into())],
        ));
        let runner = LoopRunner::new("planning_loop", vec![worker as Arc<dyn Agent>]).propagating();
        let mut session = Session::new("s");
        let events = collect(runner.run(&mut session)).await.expect("events");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_escalation());
    }

    #[tokio::test]
    async fn error_ends_the_runner() {
        let failing = Arc::new(ScriptedAgent::new("coder", vec![Step::Fail("boom".into())]).repeating());
        let after = Arc::new(ScriptedAgent::new("reviewer", vec![Step::message("ok")]));
        let runner = LoopRunner::new("loop", vec![failing as Arc<dyn Agent>, after.clone() as Arc<dyn Agent>]).with_max_iterations(5);
        let mut session = Session::new("s");
        let err = collect(runner.run(&mut session)).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(after.calls(), 0);
    }

    #[tokio::test]
    async fn empty_runner_yields_nothing() {
        let runner = LoopRunner::new("loop", Vec::new());
        let mut session = Session::new("s");
        let events = collect(runner.run(&mut session)).await.expect("events");
        assert!(events.is_empty());
    }

    #[test]
    fn zero_cap_means_unbounded() {
        let runner = LoopRunner::new("loop", Vec::new()).with_max_iterations(0);
        assert_eq!(runner.max_iterations(), None);
    }

    #[test]
    fn suppression_is_the_default_policy() {
        let runner = LoopRunner::new("loop", Vec::new());
        assert_eq!(runner.escalation(), EscalationPolicy::Suppress);
        assert_eq!(runner.propagating().escalation(), EscalationPolicy::Propagate);
    }
}
