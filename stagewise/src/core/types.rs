//! Shared deterministic types for the orchestration core.
//!
//! These records are the typed view of the plan that upstream agents keep in
//! session state. They should not depend on external state or I/O.

use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// One discrete unit of plan execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stable identifier, unique within a plan.
    pub index: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Set by the orchestrator once checking and reflection have run.
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub implementation_result: String,
    /// Set when the stage failed too many times and was given up on.
    #[serde(default)]
    pub skipped: bool,
}

impl Stage {
    /// Build an open stage, rejecting a blank title.
    pub fn new(index: u32, title: impl Into<String>, description: impl Into<String>) -> Result<Self> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(anyhow!("stage {index}: title must not be blank"));
        }
        Ok(Self {
            index,
            title,
            description: description.into(),
            completed: false,
            implementation_result: String::new(),
            skipped: false,
        })
    }

    /// True if the stage still needs to be implemented.
    pub fn is_open(&self) -> bool {
        !self.completed && !self.skipped
    }
}

/// One success condition tracked independently of stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub index: u32,
    pub criteria: String,
    #[serde(default)]
    pub met: bool,
}

impl Criterion {
    /// Build an unmet criterion, rejecting blank text.
    pub fn new(index: u32, criteria: impl Into<String>) -> Result<Self> {
        let criteria = criteria.into();
        if criteria.trim().is_empty() {
            return Err(anyhow!("criterion {index}: text must not be blank"));
        }
        Ok(Self {
            index,
            criteria,
            met: false,
        })
    }
}

/// The stage currently handed to the implementation sub-workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentStage {
    pub index: u32,
    pub title: String,
    pub description: String,
}

impl From<&Stage> for CurrentStage {
    fn from(stage: &Stage) -> Self {
        Self {
            index: stage.index,
            title: stage.title.clone(),
            description: stage.description.clone(),
        }
    }
}

/// History entry appended once a stage's implementation finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageImplementation {
    pub stage_index: u32,
    pub stage_title: String,
    pub implementation_summary: String,
}

/// Why a run finished normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    /// Every success criterion is met.
    AllCriteriaMet,
    /// No stage is left to implement even after asking the reflector to extend the plan.
    PlanExhausted,
    /// The global iteration cap was reached.
    IterationCapReached,
}

/// Terminal outcome of an orchestrated run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Done { reason: DoneReason },
    /// The plan was structurally invalid; nothing was executed.
    Aborted { reason: String },
}

impl RunOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self, RunOutcome::Done { .. })
    }
}

/// Orchestrator state-machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    SelectingStage,
    Implementing,
    CheckingCriteria,
    Reflecting,
    Done,
    Aborted,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Validating => "validating",
            Phase::SelectingStage => "selecting_stage",
            Phase::Implementing => "implementing",
            Phase::CheckingCriteria => "checking_criteria",
            Phase::Reflecting => "reflecting",
            Phase::Done => "done",
            Phase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}
