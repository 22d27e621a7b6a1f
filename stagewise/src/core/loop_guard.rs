//! Sliding-window repetition detector for streamed agent output.
//!
//! A governed agent that keeps regenerating the same block of text is not
//! making progress. The guard keeps the trailing `window_size` characters and
//! reports [`Decision::Stop`] once the tail of that window is a unit of
//! `min_pattern_length..=max_pattern_length` characters repeated back to back.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Loop guard tuning (TOML section `[loop_guard]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopGuardConfig {
    /// Shortest candidate repeat unit, in characters.
    pub min_pattern_length: usize,
    /// Longest candidate repeat unit, in characters.
    pub max_pattern_length: usize,
    /// How many copies must precede the trailing unit to trip the guard.
    pub repetition_threshold: usize,
    /// Trailing characters retained for analysis.
    pub window_size: usize,
}

impl Default for LoopGuardConfig {
    fn default() -> Self {
        Self {
            min_pattern_length: 200,
            max_pattern_length: 1000,
            repetition_threshold: 5,
            window_size: 5000,
        }
    }
}

impl LoopGuardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_pattern_length == 0 {
            return Err(anyhow!("loop_guard.min_pattern_length must be > 0"));
        }
        if self.min_pattern_length > self.max_pattern_length {
            return Err(anyhow!(
                "loop_guard.min_pattern_length ({}) exceeds max_pattern_length ({})",
                self.min_pattern_length,
                self.max_pattern_length
            ));
        }
        if self.repetition_threshold == 0 {
            return Err(anyhow!("loop_guard.repetition_threshold must be > 0"));
        }
        if self.window_size == 0 {
            return Err(anyhow!("loop_guard.window_size must be > 0"));
        }
        Ok(())
    }
}

/// Verdict for one observed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Stop,
}

/// Repetition detector for a single agent invocation.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    config: LoopGuardConfig,
    window: Vec<char>,
    tripped: bool,
}

impl LoopGuard {
    pub fn new(config: LoopGuardConfig) -> Self {
        let capacity = config.window_size;
        Self {
            config,
            window: Vec::with_capacity(capacity),
            tripped: false,
        }
    }

    /// Feed one emitted text fragment. Stays at `Stop` once tripped.
    pub fn observe(&mut self, chunk: &str) -> Decision {
        if self.tripped {
            return Decision::Stop;
        }
        self.window.extend(chunk.chars());
        let excess = self.window.len().saturating_sub(self.config.window_size);
        if excess > 0 {
            self.window.drain(..excess);
        }
        if self.repeating_unit().is_some() {
            self.tripped = true;
            return Decision::Stop;
        }
        Decision::Continue
    }

    /// Length of the repeat unit that tripped the guard, if any.
    pub fn repeating_unit(&self) -> Option<usize> {
        let text = &self.window;
        let len = text.len();
        let repeats = self.config.repetition_threshold;
        (self.config.min_pattern_length..=self.config.max_pattern_length)
            .take_while(|unit| unit.saturating_mul(repeats + 1) <= len)
            .find(|&unit| {
                let tail = &text[len - unit..];
                (1..=repeats).all(|copy| {
                    let end = len - copy * unit;
                    &text[end - unit..end] == tail
                })
            })
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    /// Number of characters currently buffered.
    pub fn buffered(&self) -> usize {
        self.window.len()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.tripped = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic letters with no short period (LCG over a 2^31 modulus).
    fn pseudo_random_text(seed: u64, len: usize) -> String {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = (state.wrapping_mul(1_103_515_245).wrapping_add(12_345)) % (1 << 31);
                char::from(b'a' + ((state >> 16) % 26) as u8)
            })
            .collect()
    }

    fn feed_in_chunks(guard: &mut LoopGuard, text: &str, chunk: usize) -> Vec<Decision> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(chunk)
            .map(|piece| guard.observe(&piece.iter().collect::<String>()))
            .collect()
    }

    #[test]
    fn block_repeated_six_times_stops() {
        let block = pseudo_random_text(7, 250);
        let text = block.repeat(6);
        let mut guard = LoopGuard::new(LoopGuardConfig::default());

        let decisions = feed_in_chunks(&mut guard, &text, 50);
        assert_eq!(decisions.last(), Some(&Decision::Stop));
        assert_eq!(guard.repeating_unit(), Some(250));
        assert!(guard.is_tripped());
    }

    #[test]
    fn non_repeating_text_continues_throughout() {
        let text = pseudo_random_text(11, 1500);
        let mut guard = LoopGuard::new(LoopGuardConfig::default());

        let decisions = feed_in_chunks(&mut guard, &text, 50);
        assert!(decisions.iter().all(|decision| *decision == Decision::Continue));
    }

    #[test]
    fn five_copies_are_not_enough_with_threshold_five() {
        let block = pseudo_random_text(3, 250);
        let mut guard = LoopGuard::new(LoopGuardConfig::default());
        assert_eq!(guard.observe(&block.repeat(5)), Decision::Continue);
        assert_eq!(guard.observe(&block), Decision::Stop);
    }

    #[test]
    fn short_period_is_caught_through_multiples() {
        let mut guard = LoopGuard::new(LoopGuardConfig::default());
        let decisions = feed_in_chunks(&mut guard, &"ab".repeat(2000), 100);
        // 6 x 200 chars are buffered after the twelfth chunk.
        assert_eq!(decisions[10], Decision::Continue);
        assert_eq!(decisions[11], Decision::Stop);
        assert_eq!(guard.repeating_unit(), Some(200));
    }

    #[test]
    fn window_evicts_oldest_characters() {
        let config = LoopGuardConfig {
            window_size: 100,
            ..LoopGuardConfig::default()
        };
        let mut guard = LoopGuard::new(config);
        guard.observe(&pseudo_random_text(1, 250));
        assert_eq!(guard.buffered(), 100);
    }

    #[test]
    fn stays_tripped_until_reset() {
        let config = LoopGuardConfig {
            min_pattern_length: 2,
            max_pattern_length: 4,
            repetition_threshold: 2,
            window_size: 64,
        };
        let mut guard = LoopGuard::new(config);
        assert_eq!(guard.observe("xyzxyzxyz"), Decision::Stop);
        assert_eq!(guard.observe("fresh text"), Decision::Stop);
        guard.reset();
        assert_eq!(guard.observe("fresh text"), Decision::Continue);
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let config = LoopGuardConfig {
            min_pattern_length: 10,
            max_pattern_length: 5,
            ..LoopGuardConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
