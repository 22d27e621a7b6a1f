//! Assembly of the full plan → implement → summarize workflow.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};

use crate::agents::{Agent, EventStream, Guarded, LoopRunner, ReviewGate, Sequence};
use crate::io::config::OrchestratorConfig;
use crate::orchestrator::StageOrchestrator;
use crate::session::Session;

pub const WORKFLOW_NAME: &str = "stagewise_workflow";
pub const IMPLEMENTATION_LOOP_NAME: &str = "implementation_loop";

/// The assembled top-level agent.
pub struct Workflow {
    root: Sequence,
}

impl Workflow {
    pub fn builder() -> WorkflowBuilder {
        WorkflowBuilder::default()
    }
}

impl Agent for Workflow {
    fn name(&self) -> &str {
        self.root.name()
    }

    fn run<'a>(&'a self, session: &'a mut Session) -> EventStream<'a> {
        self.root.run(session)
    }
}

/// Collects the role agents and settings for a [`Workflow`].
#[derive(Default)]
pub struct WorkflowBuilder {
    planner: Option<Arc<dyn Agent>>,
    coder: Option<Arc<dyn Agent>>,
    reviewer: Option<Arc<dyn Agent>>,
    review_confirmation: Option<Arc<dyn Agent>>,
    criteria_checker: Option<Arc<dyn Agent>>,
    reflector: Option<Arc<dyn Agent>>,
    summarizer: Option<Arc<dyn Agent>>,
    config: OrchestratorConfig,
}

impl WorkflowBuilder {
    pub fn planner(mut self, agent: Arc<dyn Agent>) -> Self {
        self.planner = Some(agent);
        self
    }

    pub fn coder(mut self, agent: Arc<dyn Agent>) -> Self {
        self.coder = Some(agent);
        self
    }

    pub fn reviewer(mut self, agent: Arc<dyn Agent>) -> Self {
        self.reviewer = Some(agent);
        self
    }

    /// Agent whose structured decision ends the implementation loop early.
    pub fn review_confirmation(mut self, agent: Arc<dyn Agent>) -> Self {
        self.review_confirmation = Some(agent);
        self
    }

    pub fn criteria_checker(mut self, agent: Arc<dyn Agent>) -> Self {
        self.criteria_checker = Some(agent);
        self
    }

    pub fn reflector(mut self, agent: Arc<dyn Agent>) -> Self {
        self.reflector = Some(agent);
        self
    }

    pub fn summarizer(mut self, agent: Arc<dyn Agent>) -> Self {
        self.summarizer = Some(agent);
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Workflow> {
        self.config.validate().context("workflow config")?;
        let planner = require(self.planner, "planner")?;
        let coder = require(self.coder, "coder")?;
        let reviewer = require(self.reviewer, "reviewer")?;
        let criteria_checker = require(self.criteria_checker, "criteria checker")?;
        let reflector = require(self.reflector, "reflector")?;
        let summarizer = require(self.summarizer, "summarizer")?;

        let guard = &self.config.loop_guard;
        let guarded_coder: Arc<dyn Agent> = Arc::new(Guarded::new(coder, guard.clone()));
        let guarded_reviewer: Arc<dyn Agent> = Arc::new(Guarded::new(reviewer, guard.clone()));
        let mut implementation = vec![guarded_coder, guarded_reviewer];
        if let Some(confirmation) = self.review_confirmation {
            implementation.push(Arc::new(ReviewGate::new(confirmation)));
        }
        let implementation_loop = LoopRunner::new(IMPLEMENTATION_LOOP_NAME, implementation)
            .with_max_iterations(self.config.implementation_loop_iterations);

        let orchestrator: Arc<dyn Agent> = Arc::new(
            StageOrchestrator::new(Arc::new(implementation_loop), criteria_checker, reflector)
                .with_config(&self.config),
        );

        let root = Sequence::new(WORKFLOW_NAME, vec![planner, orchestrator, summarizer]);
        Ok(Workflow { root })
    }
}

fn require(agent: Option<Arc<dyn Agent>>, role: &str) -> Result<Arc<dyn Agent>> {
    agent.ok_or_else(|| anyhow!("workflow is missing the {role} agent"))
}
