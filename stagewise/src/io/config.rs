//! Orchestrator configuration stored as TOML.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::compaction::CompactionConfig;
use crate::core::loop_guard::LoopGuardConfig;

/// Orchestrator configuration (TOML).
///
/// Missing fields and sections fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Global cap on stage passes per run.
    pub max_iterations: u32,

    /// Failed implementation attempts before a stage is skipped.
    pub max_stage_attempts: u32,

    /// Coder/reviewer passes per stage.
    pub implementation_loop_iterations: u32,

    /// Implementation summaries longer than this many characters are truncated.
    pub summary_limit_chars: usize,

    pub loop_guard: LoopGuardConfig,

    pub compaction: CompactionConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_stage_attempts: 3,
            implementation_loop_iterations: 10,
            summary_limit_chars: 40_000,
            loop_guard: LoopGuardConfig::default(),
            compaction: CompactionConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_stage_attempts == 0 {
            return Err(anyhow!("max_stage_attempts must be > 0"));
        }
        if self.implementation_loop_iterations == 0 {
            return Err(anyhow!("implementation_loop_iterations must be > 0"));
        }
        if self.summary_limit_chars == 0 {
            return Err(anyhow!("summary_limit_chars must be > 0"));
        }
        self.loop_guard.validate()?;
        self.compaction.validate()?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `OrchestratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig> {
    if !path.exists() {
        let cfg = OrchestratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: OrchestratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &OrchestratorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, OrchestratorConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("stagewise.toml");
        let mut cfg = OrchestratorConfig::default();
        cfg.max_iterations = 12;
        cfg.loop_guard.repetition_threshold = 3;
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("stagewise.toml");
        fs::write(&path, "max_iterations = 7\n\n[compaction]\nmax_tool_calls = 4\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 7);
        assert_eq!(cfg.compaction.max_tool_calls, 4);
        assert_eq!(cfg.compaction.max_chars, 50_000);
        assert_eq!(cfg.loop_guard, LoopGuardConfig::default());
    }

    #[test]
    fn rejects_inverted_guard_bounds() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("stagewise.toml");
        fs::write(&path, "[loop_guard]\nmin_pattern_length = 500\nmax_pattern_length = 100\n")
            .expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("exceeds max_pattern_length"));
    }

    #[test]
    fn rejects_zero_cap() {
        let cfg = OrchestratorConfig {
            max_iterations: 0,
            ..OrchestratorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
