//! Picks the single exit condition to act on.

use super::conditions::ExitConditionResult;

/// Resolves a cycle's result set to at most one action.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityResolver;

impl PriorityResolver {
    /// Highest-tier triggered result, ties broken by condition precedence.
    ///
    /// Returns `None` when nothing triggered.
    pub fn resolve(&self, results: &[ExitConditionResult]) -> Option<ExitConditionResult> {
        results
            .iter()
            .filter(|r| r.triggered)
            // Earlier-declared conditions take precedence within a tier.
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.condition.cmp(&a.condition))
            })
            .copied()
    }
}
