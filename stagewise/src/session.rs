//! Session state and event log for one run.
//!
//! The session is passed as `&mut Session` through every agent call, so state
//! mutations are strictly ordered and no locking is needed. Reserved keys have
//! owners: [`SessionState::write`] refuses a write from a [`Role`] that does not
//! own the key, while free-form keys stay open to everyone.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use crate::core::plan::{Plan, PlanError, parse_criteria, parse_plan, parse_stages};
use crate::core::types::{CurrentStage, Criterion, Stage, StageImplementation};
use crate::event::Event;

/// Well-known state keys.
pub mod keys {
    pub const CURRENT_STAGE: &str = "current_stage";
    pub const CURRENT_STAGE_INDEX: &str = "current_stage_index";
    pub const STAGE_IMPLEMENTATIONS: &str = "stage_implementations";
    pub const HIGH_LEVEL_STAGES: &str = "high_level_stages";
    pub const HIGH_LEVEL_SUCCESS_CRITERIA: &str = "high_level_success_criteria";
    pub const IMPLEMENTATION_SUMMARY: &str = "implementation_summary";
    pub const REVIEW_FEEDBACK: &str = "review_feedback";
    pub const REVIEW_CONFIRMATION_DECISION: &str = "review_confirmation_decision";
}

/// Component identity used for key ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Planner,
    Coder,
    Reviewer,
    CriteriaChecker,
    Reflector,
    Summarizer,
    Orchestrator,
    /// Caller-side code seeding or inspecting a session.
    External,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Planner => "planner",
            Role::Coder => "coder",
            Role::Reviewer => "reviewer",
            Role::CriteriaChecker => "criteria_checker",
            Role::Reflector => "reflector",
            Role::Summarizer => "summarizer",
            Role::Orchestrator => "orchestrator",
            Role::External => "external",
        };
        f.write_str(name)
    }
}

const RESERVED_KEYS: &[(&str, &[Role])] = &[
    (
        keys::HIGH_LEVEL_STAGES,
        &[Role::Planner, Role::Reflector, Role::Orchestrator],
    ),
    (
        keys::HIGH_LEVEL_SUCCESS_CRITERIA,
        &[Role::Planner, Role::CriteriaChecker, Role::Orchestrator],
    ),
    (keys::CURRENT_STAGE, &[Role::Orchestrator]),
    (keys::CURRENT_STAGE_INDEX, &[Role::Orchestrator]),
    (keys::STAGE_IMPLEMENTATIONS, &[Role::Orchestrator]),
    (keys::IMPLEMENTATION_SUMMARY, &[Role::Coder, Role::Orchestrator]),
    (keys::REVIEW_FEEDBACK, &[Role::Reviewer, Role::Orchestrator]),
    (
        keys::REVIEW_CONFIRMATION_DECISION,
        &[Role::Reviewer, Role::Orchestrator],
    ),
];

/// Owners of `key`, or `None` for a free-form key.
pub fn key_owners(key: &str) -> Option<&'static [Role]> {
    RESERVED_KEYS
        .iter()
        .find(|(reserved, _)| *reserved == key)
        .map(|(_, owners)| *owners)
}

/// Returns true if `role` may write `key`.
pub fn can_write(role: Role, key: &str) -> bool {
    key_owners(key).is_none_or(|owners| owners.contains(&role))
}

/// A write to a reserved key by a role that does not own it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipError {
    pub role: Role,
    pub key: String,
}

impl fmt::Display for OwnershipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} may not write state key '{}'", self.role, self.key)
    }
}

impl Error for OwnershipError {}

/// Shared key-value store for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    values: BTreeMap<String, Value>,
}

impl SessionState {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Deserialize the value at `key`. Missing keys yield `Ok(None)`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.values
            .get(key)
            .filter(|value| !value.is_null())
            .map(|value| {
                serde_json::from_value(value.clone()).with_context(|| format!("decode state key '{key}'"))
            })
            .transpose()
    }

    /// Write `value` under `key` on behalf of `role`.
    pub fn write(&mut self, role: Role, key: &str, value: Value) -> Result<Option<Value>> {
        if !can_write(role, key) {
            return Err(OwnershipError {
                role,
                key: key.to_string(),
            }
            .into());
        }
        trace!(%role, key, "state write");
        Ok(self.values.insert(key.to_string(), value))
    }

    /// Serialize `value` and write it under `key` on behalf of `role`.
    pub fn write_as<T: Serialize + ?Sized>(&mut self, role: Role, key: &str, value: &T) -> Result<()> {
        let value =
            serde_json::to_value(value).with_context(|| format!("encode state key '{key}'"))?;
        self.write(role, key, value)?;
        Ok(())
    }

    /// Remove `key` on behalf of `role`.
    pub fn remove(&mut self, role: Role, key: &str) -> Result<Option<Value>> {
        if !can_write(role, key) {
            return Err(OwnershipError {
                role,
                key: key.to_string(),
            }
            .into());
        }
        Ok(self.values.remove(key))
    }

    /// Validated plan (schema + invariants).
    pub fn plan(&self) -> Result<Plan, PlanError> {
        parse_plan(
            self.get(keys::HIGH_LEVEL_STAGES),
            self.get(keys::HIGH_LEVEL_SUCCESS_CRITERIA),
        )
    }

    pub fn stages(&self) -> Result<Vec<Stage>, PlanError> {
        parse_stages(self.get(keys::HIGH_LEVEL_STAGES))
    }

    pub fn criteria(&self) -> Result<Vec<Criterion>, PlanError> {
        parse_criteria(self.get(keys::HIGH_LEVEL_SUCCESS_CRITERIA))
    }

    pub fn set_stages(&mut self, role: Role, stages: &[Stage]) -> Result<()> {
        self.write_as(role, keys::HIGH_LEVEL_STAGES, stages)
    }

    pub fn set_criteria(&mut self, role: Role, criteria: &[Criterion]) -> Result<()> {
        self.write_as(role, keys::HIGH_LEVEL_SUCCESS_CRITERIA, criteria)
    }

    pub fn current_stage(&self) -> Result<Option<CurrentStage>> {
        self.get_as(keys::CURRENT_STAGE)
    }

    pub fn stage_implementations(&self) -> Result<Vec<StageImplementation>> {
        Ok(self.get_as(keys::STAGE_IMPLEMENTATIONS)?.unwrap_or_default())
    }
}

/// Ordered, append-only record of recorded events.
///
/// The only structural change allowed is inserting a compaction marker (see
/// `crate::compaction`), after which earlier history may be elided.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn push(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn as_slice(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }
}

/// Everything one logical run shares: its state and its event log.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    state: SessionState,
    events: EventLog,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::default(),
            events: EventLog::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventLog {
        &mut self.events
    }

    /// Record a newly created event and hand it back for streaming.
    ///
    /// Partial fragments are streamed but not recorded.
    pub fn emit(&mut self, event: Event) -> Event {
        if !event.partial {
            self.events.push(event.clone());
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::stage;
    use serde_json::json;

    #[test]
    fn reserved_keys_reject_non_owners() {
        let mut state = SessionState::default();
        let err = state
            .write(Role::Coder, keys::HIGH_LEVEL_STAGES, json!([]))
            .unwrap_err();
        let ownership = err.downcast_ref::<OwnershipError>().expect("ownership error");
        assert_eq!(ownership.role, Role::Coder);
        assert!(!state.contains(keys::HIGH_LEVEL_STAGES));
    }

    #[test]
    fn free_form_keys_are_open() {
        let mut state = SessionState::default();
        state
            .write(Role::Summarizer, "final_report", json!("done"))
            .expect("write");
        assert_eq!(state.get_str("final_report"), Some("done"));
        assert!(can_write(Role::External, "anything"));
    }

    #[test]
    fn typed_stage_accessors_round_trip() {
        let mut state = SessionState::default();
        state
            .set_stages(Role::Planner, &[stage(0, "Load"), stage(1, "Fit")])
            .expect("set");
        let stages = state.stages().expect("stages");
        assert_eq!(stages[1].title, "Fit");
    }

    #[test]
    fn emit_skips_partial_fragments() {
        let mut session = Session::new("s");
        session.emit(Event::message("coding_agent", "chunk").partial());
        session.emit(Event::message("coding_agent", "whole"));
        assert_eq!(session.events().len(), 1);
    }

    #[test]
    fn get_as_treats_null_as_missing() {
        let mut state = SessionState::default();
        state
            .write(Role::Orchestrator, keys::CURRENT_STAGE, Value::Null)
            .expect("write");
        assert_eq!(state.current_stage().expect("decode"), None);
    }
}
