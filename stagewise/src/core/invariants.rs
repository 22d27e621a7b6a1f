//! Semantic plan invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::types::{Criterion, Stage};

/// Check stage invariants:
/// - No duplicate indices
/// - Titles are not whitespace-only
pub fn validate_stage_invariants(stages: &[Stage]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (position, stage) in stages.iter().enumerate() {
        if !seen.insert(stage.index) {
            errors.push(format!(
                "stages[{position}]: duplicate stage index {}",
                stage.index
            ));
        }
        if stage.title.trim().is_empty() {
            errors.push(format!("stages[{position}]: title must not be blank"));
        }
    }
    errors
}

/// Check criterion invariants:
/// - No duplicate indices
/// - Criterion text is not whitespace-only
pub fn validate_criteria_invariants(criteria: &[Criterion]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (position, criterion) in criteria.iter().enumerate() {
        if !seen.insert(criterion.index) {
            errors.push(format!(
                "criteria[{position}]: duplicate criterion index {}",
                criterion.index
            ));
        }
        if criterion.criteria.trim().is_empty() {
            errors.push(format!("criteria[{position}]: text must not be blank"));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{criterion, stage};

    #[test]
    fn stage_invariants_report_duplicates_and_blank_titles() {
        let mut blank = stage(1, "x");
        blank.title = "   ".to_string();
        let errors = validate_stage_invariants(&[stage(1, "a"), blank]);
        assert!(errors.iter().any(|err| err.contains("duplicate stage index 1")));
        assert!(errors.iter().any(|err| err.contains("title must not be blank")));
    }

    #[test]
    fn criteria_invariants_accept_well_formed_list() {
        let errors = validate_criteria_invariants(&[criterion(0, "a"), criterion(1, "b")]);
        assert!(errors.is_empty());
    }
}
