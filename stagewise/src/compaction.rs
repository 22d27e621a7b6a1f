//! Per-stage context compaction.
//!
//! After a stage's implementation succeeds, the recent slice of the event log
//! is measured. If it is too large, a compaction marker is appended that
//! stands in for everything recorded since the previous marker; readers that
//! assemble model context use [`EventLog::visible`] and never see the elided
//! range.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::event::Event;
use crate::session::EventLog;

pub const COMPACTION_AUTHOR: &str = "stage_orchestrator";

/// Thresholds for the default compactor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Logs with fewer events are never compacted.
    pub min_events: usize,
    /// Upper bound on how many trailing events are measured.
    pub window_events: usize,
    pub max_chars: usize,
    pub max_tool_calls: usize,
    /// Authors whose short messages are quoted in the marker note.
    pub excerpt_authors: Vec<String>,
    pub excerpt_max_source_chars: usize,
    pub excerpt_clip_chars: usize,
    pub max_excerpts: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_events: 10,
            window_events: 50,
            max_chars: 50_000,
            max_tool_calls: 20,
            excerpt_authors: vec!["coding_agent".to_string(), "review_agent".to_string()],
            excerpt_max_source_chars: 500,
            excerpt_clip_chars: 200,
            max_excerpts: 5,
        }
    }
}

impl CompactionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_events == 0 {
            bail!("compaction.window_events must be > 0");
        }
        if self.max_chars == 0 {
            bail!("compaction.max_chars must be > 0");
        }
        Ok(())
    }
}

/// Payload of a compaction marker event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionSummary {
    pub stage_index: u32,
    pub tool_calls: usize,
    /// Number of events the marker stands in for.
    pub event_count: usize,
    pub total_chars: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub note: String,
}

impl EventLog {
    /// Position of the most recent compaction marker.
    pub fn last_compaction(&self) -> Option<usize> {
        self.as_slice().iter().rposition(Event::is_compaction)
    }

    /// Events recorded since the last marker, capped to the trailing `max_events`.
    pub fn compaction_window(&self, max_events: usize) -> &[Event] {
        let events = self.as_slice();
        let after_marker = self.last_compaction().map_or(0, |idx| idx + 1);
        let start = after_marker.max(events.len().saturating_sub(max_events));
        &events[start..]
    }

    /// Append a marker that supersedes everything since the previous one.
    pub fn insert_compaction(&mut self, event: Event) -> Result<()> {
        if !event.is_compaction() {
            bail!("expected a compaction event, got {}", event.kind_name());
        }
        self.push(event);
        Ok(())
    }

    /// Events a context reader should see: the latest marker and what follows it.
    pub fn visible(&self) -> &[Event] {
        let events = self.as_slice();
        match self.last_compaction() {
            Some(idx) => &events[idx..],
            None => events,
        }
    }
}

/// Shrinks the event log between stages.
pub trait ContextCompactor: Send + Sync {
    /// Compact `log` after stage `stage_index`; returns the marker if one was written.
    fn compact(&self, log: &mut EventLog, stage_index: u32) -> Result<Option<Event>>;
}

/// Compacts when the recent window exceeds character or tool-call limits.
#[derive(Debug, Clone, Default)]
pub struct ThresholdCompactor {
    config: CompactionConfig,
}

impl ThresholdCompactor {
    pub fn new(config: CompactionConfig) -> Self {
        Self { config }
    }

    /// Measure the current window without changing the log.
    pub fn measure(&self, log: &EventLog, stage_index: u32) -> Option<CompactionSummary> {
        let window = log.compaction_window(self.config.window_events);
        let (first, last) = (window.first()?, window.last()?);

        let mut total_chars = 0;
        let mut tool_calls = 0;
        let mut excerpts = Vec::new();
        for event in window {
            if event.is_tool_call() {
                tool_calls += 1;
            }
            let Some(text) = event.text() else { continue };
            let chars = text.chars().count();
            total_chars += chars;
            if chars < self.config.excerpt_max_source_chars
                && excerpts.len() < self.config.max_excerpts
                && self.config.excerpt_authors.iter().any(|a| *a == event.author)
            {
                let clipped: String = text.chars().take(self.config.excerpt_clip_chars).collect();
                excerpts.push(format!("[{}]: {clipped}", event.author));
            }
        }

        let mut note = format!(
            "[STAGE {stage_index} SUMMARY]\n\
             Stage completed with {tool_calls} tool calls across {} events.\n\
             Context size reduced from ~{total_chars} chars to this summary.",
            window.len()
        );
        if !excerpts.is_empty() {
            note.push_str("\nKey messages:\n");
            note.push_str(&excerpts.join("\n"));
        }

        Some(CompactionSummary {
            stage_index,
            tool_calls,
            event_count: window.len(),
            total_chars,
            start: first.timestamp,
            end: last.timestamp,
            note,
        })
    }
}

impl ContextCompactor for ThresholdCompactor {
    fn compact(&self, log: &mut EventLog, stage_index: u32) -> Result<Option<Event>> {
        if log.len() < self.config.min_events {
            return Ok(None);
        }
        let Some(summary) = self.measure(log, stage_index) else {
            return Ok(None);
        };
        info!(
            stage_index,
            total_chars = summary.total_chars,
            tool_calls = summary.tool_calls,
            events = summary.event_count,
            "stage context measured"
        );
        if summary.total_chars <= self.config.max_chars && summary.tool_calls <= self.config.max_tool_calls {
            debug!(stage_index, "context below compaction thresholds");
            return Ok(None);
        }

        let marker = Event::compaction(COMPACTION_AUTHOR, summary);
        log.insert_compaction(marker.clone())?;
        info!(stage_index, "compaction marker written");
        Ok(Some(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log_with(events: impl IntoIterator<Item = Event>) -> EventLog {
        let mut log = EventLog::default();
        for event in events {
            log.push(event);
        }
        log
    }

    fn tool_calls(n: usize) -> Vec<Event> {
        (0..n)
            .map(|i| Event::tool_call("coding_agent", "run_python", json!({ "step": i })))
            .collect()
    }

    #[test]
    fn short_logs_are_left_alone() {
        let mut log = log_with(tool_calls(9));
        let marker = ThresholdCompactor::default().compact(&mut log, 0).expect("compact");
        assert!(marker.is_none());
        assert_eq!(log.len(), 9);
    }

    #[test]
    fn too_many_tool_calls_trigger_a_marker() {
        let mut log = log_with(tool_calls(21));
        let marker = ThresholdCompactor::default()
            .compact(&mut log, 2)
            .expect("compact")
            .expect("marker");
        assert!(marker.is_compaction());
        assert_eq!(log.len(), 22);
        assert_eq!(log.visible().len(), 1);
        let crate::event::EventKind::Compaction(summary) = &marker.kind else {
            panic!("expected compaction payload");
        };
        assert_eq!(summary.tool_calls, 21);
        assert!(summary.note.starts_with("[STAGE 2 SUMMARY]"));
    }

    #[test]
    fn large_text_triggers_a_marker_with_excerpts() {
        let mut events = vec![Event::message("coding_agent", "wrote loader.py")];
        events.extend((0..10).map(|_| Event::message("coding_agent", "x".repeat(6_000))));
        let mut log = log_with(events);
        let marker = ThresholdCompactor::default()
            .compact(&mut log, 0)
            .expect("compact")
            .expect("marker");
        let crate::event::EventKind::Compaction(summary) = &marker.kind else {
            panic!("expected compaction payload");
        };
        assert!(summary.total_chars > 50_000);
        assert!(summary.note.contains("[coding_agent]: wrote loader.py"));
    }

    #[test]
    fn window_starts_after_previous_marker() {
        let mut log = log_with(tool_calls(21));
        let compactor = ThresholdCompactor::default();
        compactor.compact(&mut log, 0).expect("compact");
        for event in tool_calls(3) {
            log.push(event);
        }
        assert_eq!(log.compaction_window(50).len(), 3);
        assert!(compactor.compact(&mut log, 1).expect("compact").is_none());
    }

    #[test]
    fn window_is_capped() {
        let log = log_with(tool_calls(80));
        assert_eq!(log.compaction_window(50).len(), 50);
    }

    #[test]
    fn insert_rejects_non_markers() {
        let mut log = EventLog::default();
        assert!(log.insert_compaction(Event::message("a", "b")).is_err());
    }
}
