//! Plan parsing with schema + invariant validation.
//!
//! Stages and criteria arrive in session state as loosely shaped JSON written
//! by upstream agents. They are checked against the embedded JSON Schema,
//! deserialized into typed records, then checked for semantic invariants.

use std::error::Error;
use std::fmt;

use jsonschema::validator_for;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::core::invariants::{validate_criteria_invariants, validate_stage_invariants};
use crate::core::types::{Criterion, Stage};

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

/// Structural problem with the plan held in state. Fatal to a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanError {
    pub problems: Vec<String>,
}

impl PlanError {
    fn single(problem: impl Into<String>) -> Self {
        Self {
            problems: vec![problem.into()],
        }
    }
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan: {}", self.problems.join("; "))
    }
}

impl Error for PlanError {}

/// Validated stage list plus criterion list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub stages: Vec<Stage>,
    pub criteria: Vec<Criterion>,
}

/// Parse both halves of the plan. Stage problems are reported before criteria problems.
pub fn parse_plan(stages: Option<&Value>, criteria: Option<&Value>) -> Result<Plan, PlanError> {
    let stages = parse_stages(stages)?;
    let criteria = parse_criteria(criteria)?;
    Ok(Plan { stages, criteria })
}

/// Parse and validate the `high_level_stages` value.
pub fn parse_stages(value: Option<&Value>) -> Result<Vec<Stage>, PlanError> {
    let value = require_list(value, "no high-level stages found in state")?;
    validate_schema(&json!({ "stages": value }))?;
    let stages: Vec<Stage> = deserialize(value, "stages")?;
    into_result(stages, validate_stage_invariants)
}

/// Parse and validate the `high_level_success_criteria` value.
pub fn parse_criteria(value: Option<&Value>) -> Result<Vec<Criterion>, PlanError> {
    let value = require_list(value, "no success criteria found in state")?;
    validate_schema(&json!({ "criteria": value }))?;
    let criteria: Vec<Criterion> = deserialize(value, "criteria")?;
    into_result(criteria, validate_criteria_invariants)
}

fn require_list<'a>(value: Option<&'a Value>, missing: &str) -> Result<&'a Value, PlanError> {
    match value {
        None | Some(Value::Null) => Err(PlanError::single(missing)),
        Some(Value::Array(items)) if items.is_empty() => Err(PlanError::single(missing)),
        Some(value) => Ok(value),
    }
}

fn deserialize<T: DeserializeOwned>(value: &Value, what: &str) -> Result<T, PlanError> {
    serde_json::from_value(value.clone())
        .map_err(|err| PlanError::single(format!("deserialize {what}: {err}")))
}

fn into_result<T>(items: Vec<T>, check: fn(&[T]) -> Vec<String>) -> Result<Vec<T>, PlanError> {
    let problems = check(&items);
    if problems.is_empty() {
        return Ok(items);
    }
    Err(PlanError { problems })
}

fn validate_schema(instance: &Value) -> Result<(), PlanError> {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA)
        .map_err(|err| PlanError::single(format!("parse plan schema: {err}")))?;
    let compiled = validator_for(&schema)
        .map_err(|err| PlanError::single(format!("invalid plan schema: {err}")))?;
    let problems: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if problems.is_empty() {
        return Ok(());
    }
    Err(PlanError { problems })
}
