//! Observable occurrences in a run.
//!
//! Every agent, and the orchestrator itself, reports progress as a stream of
//! [`Event`]s. Events are immutable once created: the loop runner clears an
//! escalation flag by building a new event, not by editing the one it received.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::compaction::CompactionSummary;
use crate::core::types::RunOutcome;

/// How serious an error event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A step failed but the run continues.
    Warning,
    /// A step failed in a way the caller should surface.
    Error,
}

/// What happened, with its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Message {
        text: String,
    },
    Thought {
        text: String,
    },
    ToolCall {
        name: String,
        arguments: Value,
    },
    ToolResult {
        name: String,
        result: Value,
        is_error: bool,
    },
    Completion {
        outcome: RunOutcome,
        text: String,
    },
    Error {
        severity: Severity,
        message: String,
    },
    Compaction(CompactionSummary),
}

/// Control signals attached to an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventActions {
    /// The producer believes the enclosing loop should stop.
    #[serde(default)]
    pub escalate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub author: String,
    #[serde(flatten)]
    pub kind: EventKind,
    /// More of this event is still coming.
    #[serde(default)]
    pub partial: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub actions: EventActions,
}

impl Event {
    pub fn new(author: impl Into<String>, kind: EventKind) -> Self {
        Self {
            author: author.into(),
            kind,
            partial: false,
            timestamp: Utc::now(),
            actions: EventActions::default(),
        }
    }

    pub fn message(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(author, EventKind::Message { text: text.into() })
    }

    pub fn thought(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(author, EventKind::Thought { text: text.into() })
    }

    pub fn tool_call(author: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::new(
            author,
            EventKind::ToolCall {
                name: name.into(),
                arguments,
            },
        )
    }

    pub fn tool_result(
        author: impl Into<String>,
        name: impl Into<String>,
        result: Value,
        is_error: bool,
    ) -> Self {
        Self::new(
            author,
            EventKind::ToolResult {
                name: name.into(),
                result,
                is_error,
            },
        )
    }

    pub fn completion(author: impl Into<String>, outcome: RunOutcome, text: impl Into<String>) -> Self {
        Self::new(
            author,
            EventKind::Completion {
                outcome,
                text: text.into(),
            },
        )
    }

    pub fn warning(author: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            author,
            EventKind::Error {
                severity: Severity::Warning,
                message: message.into(),
            },
        )
    }

    pub fn error(author: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            author,
            EventKind::Error {
                severity: Severity::Error,
                message: message.into(),
            },
        )
    }

    pub fn compaction(author: impl Into<String>, summary: CompactionSummary) -> Self {
        Self::new(author, EventKind::Compaction(summary))
    }

    /// Mark as a streamed fragment.
    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }

    /// Attach the escalation signal.
    pub fn escalating(mut self) -> Self {
        self.actions.escalate = true;
        self
    }

    /// Copy of this event with the escalation signal cleared.
    pub fn without_escalation(&self) -> Self {
        let mut cleared = self.clone();
        cleared.actions.escalate = false;
        cleared
    }

    pub fn is_escalation(&self) -> bool {
        self.actions.escalate
    }

    /// Human-readable text carried by the event, if any.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Message { text } | EventKind::Thought { text } => Some(text),
            EventKind::Completion { text, .. } => Some(text),
            EventKind::Error { message, .. } => Some(message),
            EventKind::ToolCall { .. } | EventKind::ToolResult { .. } | EventKind::Compaction(_) => {
                None
            }
        }
    }

    /// Text produced by the model itself (messages and thoughts).
    pub fn generated_text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Message { text } | EventKind::Thought { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self.kind, EventKind::ToolCall { .. })
    }

    pub fn is_compaction(&self) -> bool {
        matches!(self.kind, EventKind::Compaction(_))
    }

    pub fn completion_outcome(&self) -> Option<&RunOutcome> {
        match &self.kind {
            EventKind::Completion { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    pub fn severity(&self) -> Option<Severity> {
        match &self.kind {
            EventKind::Error { severity, .. } => Some(*severity),
            _ => None,
        }
    }

    /// Stable name of the event kind, for logs.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::Message { .. } => "message",
            EventKind::Thought { .. } => "thought",
            EventKind::ToolCall { .. } => "tool_call",
            EventKind::ToolResult { .. } => "tool_result",
            EventKind::Completion { .. } => "completion",
            EventKind::Error { .. } => "error",
            EventKind::Compaction(_) => "compaction",
        }
    }
}
