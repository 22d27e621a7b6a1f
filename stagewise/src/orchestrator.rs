//! Stage-by-stage execution of a plan held in session state.
//!
//! The orchestrator walks the stage list in order. For every open stage it runs
//! the implementation sub-workflow, then the criteria checker, then the
//! reflector, and only then marks the stage completed. It stops when every
//! success criterion is met, when the plan runs out of stages, or when the
//! global pass cap is reached. Sub-agent failures are reported as events and
//! never end the run; only cancellation unwinds past this point.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_stream::stream;
use futures::StreamExt;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::agents::{Agent, EventStream, is_cancelled};
use crate::compaction::{ContextCompactor, ThresholdCompactor};
use crate::core::selector::{all_criteria_met, criteria_met_count, mark_completed, mark_skipped, merge_met, next_stage};
use crate::core::truncate::truncate_summary;
use crate::core::types::{Criterion, CurrentStage, DoneReason, Phase, RunOutcome, Stage, StageImplementation};
use crate::event::Event;
use crate::io::config::OrchestratorConfig;
use crate::session::{Role, Session, SessionState, keys};

pub const ORCHESTRATOR_NAME: &str = "stage_orchestrator";

const ROLE: Role = Role::Orchestrator;

/// Drives the stage loop. See the module docs for the lifecycle.
pub struct StageOrchestrator {
    name: String,
    implementation: Arc<dyn Agent>,
    criteria_checker: Arc<dyn Agent>,
    reflector: Arc<dyn Agent>,
    compactor: Arc<dyn ContextCompactor>,
    max_iterations: u32,
    max_stage_attempts: u32,
    summary_limit_chars: usize,
}

impl StageOrchestrator {
    pub fn new(
        implementation: Arc<dyn Agent>,
        criteria_checker: Arc<dyn Agent>,
        reflector: Arc<dyn Agent>,
    ) -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            name: ORCHESTRATOR_NAME.to_string(),
            implementation,
            criteria_checker,
            reflector,
            compactor: Arc::new(ThresholdCompactor::new(defaults.compaction.clone())),
            max_iterations: defaults.max_iterations,
            max_stage_attempts: defaults.max_stage_attempts,
            summary_limit_chars: defaults.summary_limit_chars,
        }
    }

    /// Apply caps, limits and compaction thresholds from `config`.
    pub fn with_config(mut self, config: &OrchestratorConfig) -> Self {
        self.max_iterations = config.max_iterations;
        self.max_stage_attempts = config.max_stage_attempts;
        self.summary_limit_chars = config.summary_limit_chars;
        self.compactor = Arc::new(ThresholdCompactor::new(config.compaction.clone()));
        self
    }

    pub fn with_compactor(mut self, compactor: Arc<dyn ContextCompactor>) -> Self {
        self.compactor = compactor;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_stage_attempts(mut self, max_stage_attempts: u32) -> Self {
        self.max_stage_attempts = max_stage_attempts;
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Seed `session` with a plan, then run it.
    pub fn run_plan<'a>(
        &'a self,
        session: &'a mut Session,
        stages: Vec<Stage>,
        criteria: Vec<Criterion>,
    ) -> EventStream<'a> {
        Box::pin(stream! {
            let seeded = session
                .state_mut()
                .set_stages(ROLE, &stages)
                .and_then(|()| session.state_mut().set_criteria(ROLE, &criteria));
            if let Err(err) = seeded {
                yield Err(err);
                return;
            }
            let mut inner = self.run(&mut *session);
            while let Some(item) = inner.next().await {
                yield item;
            }
        })
    }

    fn completion(&self, reason: DoneReason, text: impl Into<String>) -> Event {
        Event::completion(self.name.as_str(), RunOutcome::Done { reason }, text)
    }
}

impl Agent for StageOrchestrator {
    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, session: &'a mut Session) -> EventStream<'a> {
        Box::pin(stream! {
            debug!(phase = %Phase::Validating, "orchestrator phase");
            if let Err(err) = init_tracking_keys(session.state_mut()) {
                yield Err(err);
                return;
            }
            let plan = match session.state().plan() {
                Ok(plan) => plan,
                Err(err) => {
                    error!(error = %err, "plan failed validation; aborting");
                    debug!(phase = %Phase::Aborted, "orchestrator phase");
                    let notice = format!("Cannot proceed with orchestration: {err}");
                    yield Ok(session.emit(Event::error(self.name.as_str(), notice)));
                    let outcome = RunOutcome::Aborted { reason: err.to_string() };
                    let completion = Event::completion(self.name.as_str(), outcome, "Orchestration aborted.");
                    yield Ok(session.emit(completion));
                    return;
                }
            };
            let (mut stages, mut criteria) = (plan.stages, plan.criteria);
            info!(stages = stages.len(), criteria = criteria.len(), "starting orchestration");

            let mut failures: HashMap<u32, u32> = HashMap::new();
            let mut iteration = 0u32;
            while iteration < self.max_iterations {
                iteration += 1;
                debug!(phase = %Phase::SelectingStage, iteration, "orchestrator phase");

                let met = criteria_met_count(&criteria);
                info!(iteration, met, total = criteria.len(), "criteria status");
                if all_criteria_met(&criteria) {
                    debug!(phase = %Phase::Done, "orchestrator phase");
                    let text = format!("All {} success criteria have been met.", criteria.len());
                    yield Ok(session.emit(self.completion(DoneReason::AllCriteriaMet, text)));
                    return;
                }

                let mut selected = next_stage(&stages).cloned();
                if selected.is_none() {
                    warn!(iteration, "no open stages left; asking the reflector to extend the plan");
                    let mut failure = None;
                    {
                        let mut inner = self.reflector.run(&mut *session);
                        while let Some(item) = inner.next().await {
                            match item {
                                Ok(event) => yield Ok(event),
                                Err(err) if is_cancelled(&err) => {
                                    yield Err(err);
                                    return;
                                }
                                Err(err) => {
                                    failure = Some(err);
                                    break;
                                }
                            }
                        }
                    }
                    if let Some(err) = failure {
                        warn!(error = %err, "reflector failed while extending the plan");
                        let notice = format!("Stage reflector failed while extending the plan: {err:#}");
                        yield Ok(session.emit(Event::warning(self.name.as_str(), notice)));
                    }
                    match refresh_stages(session.state_mut(), &stages) {
                        Ok(Ok(refreshed)) => stages = refreshed,
                        Ok(Err(problem)) => {
                            yield Ok(session.emit(Event::warning(self.name.as_str(), problem)));
                        }
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                    selected = next_stage(&stages).cloned();
                }
                let Some(stage) = selected else {
                    warn!(met, total = criteria.len(), "plan exhausted before all criteria were met");
                    debug!(phase = %Phase::Done, "orchestrator phase");
                    let notice = "No remaining stages to implement, but not all success criteria are met.";
                    yield Ok(session.emit(Event::warning(self.name.as_str(), notice)));
                    let text = format!("Plan exhausted with {met}/{} criteria met.", criteria.len());
                    yield Ok(session.emit(self.completion(DoneReason::PlanExhausted, text)));
                    return;
                };

                debug!(phase = %Phase::Implementing, stage_index = stage.index, "orchestrator phase");
                info!(stage_index = stage.index, title = %stage.title, "starting stage");
                let banner = format!(
                    "### Stage {}: {}\n\n{}\n\nBeginning implementation...",
                    u64::from(stage.index) + 1,
                    stage.title,
                    stage.description
                );
                yield Ok(session.emit(Event::message(self.name.as_str(), banner)));
                if let Err(err) = begin_stage(session.state_mut(), &stage) {
                    yield Err(err);
                    return;
                }

                let mut failure = None;
                {
                    let mut inner = self.implementation.run(&mut *session);
                    while let Some(item) = inner.next().await {
                        match item {
                            Ok(event) => yield Ok(event),
                            Err(err) if is_cancelled(&err) => {
                                yield Err(err);
                                return;
                            }
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }
                }
                if let Some(err) = failure {
                    let attempts = failures.entry(stage.index).or_insert(0);
                    *attempts += 1;
                    let attempts = *attempts;
                    error!(stage_index = stage.index, attempts, error = %err, "implementation failed");
                    let notice = format!(
                        "Implementation failed for stage {} ({}): {err:#}",
                        stage.index, stage.title
                    );
                    yield Ok(session.emit(Event::error(self.name.as_str(), notice)));
                    if attempts >= self.max_stage_attempts {
                        mark_skipped(&mut stages, stage.index);
                        if let Err(err) = session.state_mut().set_stages(ROLE, &stages) {
                            yield Err(err);
                            return;
                        }
                        warn!(stage_index = stage.index, attempts, "stage skipped after repeated failures");
                        let notice = format!(
                            "Stage {} ({}) failed {attempts} times and was skipped.",
                            stage.index, stage.title
                        );
                        yield Ok(session.emit(Event::warning(self.name.as_str(), notice)));
                    }
                    continue;
                }
                info!(stage_index = stage.index, "implementation finished");

                match self.compactor.compact(session.events_mut(), stage.index) {
                    Ok(Some(marker)) => yield Ok(marker),
                    Ok(None) => {}
                    Err(err) => warn!(stage_index = stage.index, error = %err, "context compaction failed"),
                }

                let implemented = match record_implementation(
                    session.state_mut(),
                    &mut stages,
                    &stage,
                    self.summary_limit_chars,
                ) {
                    Ok(implemented) => implemented,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };

                debug!(phase = %Phase::CheckingCriteria, stage_index = stage.index, "orchestrator phase");
                let before = criteria.clone();
                let mut failure = None;
                {
                    let mut inner = self.criteria_checker.run(&mut *session);
                    while let Some(item) = inner.next().await {
                        match item {
                            Ok(event) => yield Ok(event),
                            Err(err) if is_cancelled(&err) => {
                                yield Err(err);
                                return;
                            }
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }
                }
                if let Some(err) = failure {
                    warn!(stage_index = stage.index, error = %err, "criteria checker failed");
                    let notice = format!(
                        "Criteria checker failed for stage {}: {err:#}. Continuing without criteria update.",
                        stage.index
                    );
                    yield Ok(session.emit(Event::warning(self.name.as_str(), notice)));
                    criteria = before;
                } else {
                    match session.state().criteria() {
                        Ok(after) => {
                            let (merged, restored) = merge_met(&before, after);
                            if !restored.is_empty() {
                                warn!(stage_index = stage.index, ?restored, "criteria checker tried to unset met criteria");
                            }
                            criteria = merged;
                        }
                        Err(problem) => {
                            warn!(stage_index = stage.index, error = %problem, "criteria checker left invalid criteria");
                            let notice = format!("Criteria checker left invalid criteria ({problem}); keeping the previous list.");
                            yield Ok(session.emit(Event::warning(self.name.as_str(), notice)));
                            criteria = before;
                        }
                    }
                }
                if let Err(err) = session.state_mut().set_criteria(ROLE, &criteria) {
                    yield Err(err);
                    return;
                }
                info!(
                    stage_index = stage.index,
                    met = criteria_met_count(&criteria),
                    total = criteria.len(),
                    "criteria status after check"
                );

                debug!(phase = %Phase::Reflecting, stage_index = stage.index, "orchestrator phase");
                let mut failure = None;
                {
                    let mut inner = self.reflector.run(&mut *session);
                    while let Some(item) = inner.next().await {
                        match item {
                            Ok(event) => yield Ok(event),
                            Err(err) if is_cancelled(&err) => {
                                yield Err(err);
                                return;
                            }
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }
                }
                if let Some(err) = failure {
                    warn!(stage_index = stage.index, error = %err, "stage reflector failed");
                    let notice = format!(
                        "Stage reflector failed for stage {}: {err:#}. Continuing without stage modifications.",
                        stage.index
                    );
                    yield Ok(session.emit(Event::warning(self.name.as_str(), notice)));
                } else {
                    match refresh_stages(session.state_mut(), &stages) {
                        Ok(Ok(refreshed)) => stages = refreshed,
                        Ok(Err(problem)) => {
                            yield Ok(session.emit(Event::warning(self.name.as_str(), problem)));
                        }
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }

                mark_completed(&mut stages, &implemented);
                if let Err(err) = finish_stage(session.state_mut(), &stages, stage.index) {
                    yield Err(err);
                    return;
                }
                info!(stage_index = stage.index, iteration, "stage cycle complete");
            }

            warn!(max_iterations = self.max_iterations, "orchestration pass cap reached");
            debug!(phase = %Phase::Done, "orchestrator phase");
            let notice = format!(
                "Reached maximum orchestration iterations ({}); proceeding with current progress.",
                self.max_iterations
            );
            yield Ok(session.emit(Event::warning(self.name.as_str(), notice)));
            let text = format!(
                "Stopped after {} passes with {}/{} criteria met.",
                self.max_iterations,
                criteria_met_count(&criteria),
                criteria.len()
            );
            yield Ok(session.emit(self.completion(DoneReason::IterationCapReached, text)));
        })
    }
}

fn init_tracking_keys(state: &mut SessionState) -> Result<()> {
    if !state.contains(keys::CURRENT_STAGE) {
        state.write(ROLE, keys::CURRENT_STAGE, Value::Null)?;
    }
    if !state.contains(keys::CURRENT_STAGE_INDEX) {
        state.write(ROLE, keys::CURRENT_STAGE_INDEX, json!(0))?;
    }
    if !state.contains(keys::STAGE_IMPLEMENTATIONS) {
        state.write(ROLE, keys::STAGE_IMPLEMENTATIONS, json!([]))?;
    }
    Ok(())
}

fn begin_stage(state: &mut SessionState, stage: &Stage) -> Result<()> {
    state.write_as(ROLE, keys::CURRENT_STAGE, &CurrentStage::from(stage))?;
    state.remove(ROLE, keys::IMPLEMENTATION_SUMMARY)?;
    state.remove(ROLE, keys::REVIEW_FEEDBACK)?;
    state.remove(ROLE, keys::REVIEW_CONFIRMATION_DECISION)?;
    Ok(())
}

/// Store the stage's result and append it to the implementation history.
///
/// Returns the stage as it should be restored if the reflector drops it.
fn record_implementation(
    state: &mut SessionState,
    stages: &mut [Stage],
    stage: &Stage,
    limit_chars: usize,
) -> Result<Stage> {
    let summary = state
        .get_str(keys::IMPLEMENTATION_SUMMARY)
        .unwrap_or_default();
    let result = truncate_summary(summary, limit_chars).into_owned();

    let mut implemented = stage.clone();
    implemented.implementation_result = result.clone();
    if let Some(entry) = stages.iter_mut().find(|s| s.index == stage.index) {
        entry.implementation_result = result.clone();
    }
    state.set_stages(ROLE, stages)?;

    let mut history = state.stage_implementations().unwrap_or_else(|err| {
        warn!(error = %err, "stage implementation history unreadable; starting over");
        Vec::new()
    });
    history.push(StageImplementation {
        stage_index: stage.index,
        stage_title: stage.title.clone(),
        implementation_summary: result,
    });
    state.write_as(ROLE, keys::STAGE_IMPLEMENTATIONS, &history)?;
    Ok(implemented)
}

/// Re-read stages after a sub-agent that may edit them.
///
/// An unparseable list is replaced by `previous`; the inner `Err` carries the
/// warning to surface.
fn refresh_stages(state: &mut SessionState, previous: &[Stage]) -> Result<Result<Vec<Stage>, String>> {
    match state.stages() {
        Ok(stages) => Ok(Ok(stages)),
        Err(problem) => {
            warn!(error = %problem, "stage list left invalid; restoring previous list");
            state.set_stages(ROLE, previous)?;
            Ok(Err(format!(
                "Stage list was left invalid ({problem}); keeping the previous list."
            )))
        }
    }
}

fn finish_stage(state: &mut SessionState, stages: &[Stage], stage_index: u32) -> Result<()> {
    state.set_stages(ROLE, stages)?;
    state.write(ROLE, keys::CURRENT_STAGE_INDEX, json!(stage_index))?;
    Ok(())
}
