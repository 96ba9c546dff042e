pub mod rule;
pub mod semantic;

use crate::model::Suggestion;

/// Merge rule and semantic suggestions, sorted by priority (critical first).
/// The sort is stable: within a priority, rule suggestions keep their order
/// and precede semantic ones.
pub fn merge_suggestions(
	rule: Vec<Suggestion>,
	semantic: Vec<Suggestion>,
) -> Vec<Suggestion> {
	let mut merged = rule;
	merged.extend(semantic);
	merged.sort_by_key(|s| s.priority);
	merged
}

/// Round to two decimal places, the precision used for every stored score.
pub(crate) fn round2(value: f64) -> f64 {
	(value * 100.0).round() / 100.0
}
