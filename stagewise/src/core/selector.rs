//! Deterministic stage selection and criteria bookkeeping.

use crate::core::types::{Criterion, Stage};

/// Find the first open stage in list order.
///
/// Returns `None` if every stage is completed or skipped. Selection has no side
/// effects, so calling it twice on the same list returns the same stage.
pub fn next_stage(stages: &[Stage]) -> Option<&Stage> {
    stages.iter().find(|stage| stage.is_open())
}

/// Number of criteria currently marked met.
pub fn criteria_met_count(criteria: &[Criterion]) -> usize {
    criteria.iter().filter(|criterion| criterion.met).count()
}

/// True when every criterion is met. An empty list is never "all met".
pub fn all_criteria_met(criteria: &[Criterion]) -> bool {
    !criteria.is_empty() && criteria.iter().all(|criterion| criterion.met)
}

/// Keep `met` monotone across a checker pass.
///
/// Any criterion that was met in `before` and reported unmet in `after` is
/// restored. Returns the merged list and the indices that were restored.
pub fn merge_met(before: &[Criterion], mut after: Vec<Criterion>) -> (Vec<Criterion>, Vec<u32>) {
    let mut restored = Vec::new();
    for criterion in &mut after {
        let was_met = before
            .iter()
            .any(|prev| prev.index == criterion.index && prev.met);
        if was_met && !criterion.met {
            criterion.met = true;
            restored.push(criterion.index);
        }
    }
    (after, restored)
}

/// Mark the stage with `index` completed, re-appending `stage` if it was removed.
pub fn mark_completed(stages: &mut Vec<Stage>, stage: &Stage) {
    match stages.iter_mut().find(|candidate| candidate.index == stage.index) {
        Some(existing) => existing.completed = true,
        None => {
            let mut restored = stage.clone();
            restored.completed = true;
            stages.push(restored);
        }
    }
}

/// Mark the stage with `index` skipped. Returns false if it is no longer in the list.
pub fn mark_skipped(stages: &mut [Stage], index: u32) -> bool {
    match stages.iter_mut().find(|candidate| candidate.index == index) {
        Some(stage) => {
            stage.skipped = true;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{criterion, stage};

    #[test]
    fn next_stage_picks_first_open_in_list_order() {
        let mut done = stage(0, "first");
        done.completed = true;
        let mut skipped = stage(1, "second");
        skipped.skipped = true;
        let stages = vec![done, skipped, stage(3, "third"), stage(2, "fourth")];

        let selected = next_stage(&stages).expect("open stage");
        assert_eq!(selected.index, 3);
    }

    #[test]
    fn next_stage_is_idempotent() {
        let stages = vec![stage(0, "a"), stage(1, "b")];
        let first = next_stage(&stages).cloned();
        let second = next_stage(&stages).cloned();
        assert_eq!(first, second);
        assert_eq!(first.map(|s| s.index), Some(0));
    }

    #[test]
    fn next_stage_none_when_all_closed() {
        let mut a = stage(0, "a");
        a.completed = true;
        assert!(next_stage(&[a]).is_none());
    }

    #[test]
    fn all_criteria_met_requires_non_empty() {
        assert!(!all_criteria_met(&[]));
        let mut c = criterion(0, "c");
        c.met = true;
        assert!(all_criteria_met(&[c.clone()]));
        assert!(!all_criteria_met(&[c, criterion(1, "d")]));
    }

    #[test]
    fn merge_met_restores_flipped_criteria() {
        let mut met = criterion(0, "a");
        met.met = true;
        let before = vec![met, criterion(1, "b")];
        let mut after = before.clone();
        after[0].met = false;
        after[1].met = true;

        let (merged, restored) = merge_met(&before, after);
        assert!(merged.iter().all(|c| c.met));
        assert_eq!(restored, vec![0]);
    }

    #[test]
    fn mark_completed_reappends_removed_stage() {
        let mut stages = vec![stage(1, "other")];
        mark_completed(&mut stages, &stage(0, "gone"));
        assert_eq!(stages.len(), 2);
        assert!(stages[1].completed);
        assert_eq!(stages[1].index, 0);
    }
}
