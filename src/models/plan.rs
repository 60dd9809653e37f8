//! Execution plans.

use super::{CapabilityKind, CapabilityMatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The capabilities a request should be routed to.
///
/// Confidence never decreases as matches are folded in and never exceeds 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Overall confidence in `[0, 1]`.
    pub confidence: f64,
    /// Matched nodes.
    pub matched_nodes: Vec<CapabilityMatch>,
    /// Matched workflows.
    pub matched_workflows: Vec<CapabilityMatch>,
    /// Matched tools.
    pub matched_tools: Vec<CapabilityMatch>,
    /// Matched services.
    pub matched_services: Vec<CapabilityMatch>,
    /// Time the plan was generated.
    pub generated_at: DateTime<Utc>,
}

impl Default for ExecutionPlan {
    fn default() -> Self {
        Self::empty(Utc::now())
    }
}

impl ExecutionPlan {
    /// Creates a plan with no matches and zero confidence.
    #[must_use]
    pub const fn empty(generated_at: DateTime<Utc>) -> Self {
        Self {
            confidence: 0.0,
            matched_nodes: Vec::new(),
            matched_workflows: Vec::new(),
            matched_tools: Vec::new(),
            matched_services: Vec::new(),
            generated_at,
        }
    }

    /// Adds a match and raises confidence to `score * boost` (capped at 1.0)
    /// if that is higher than the current value.
    pub fn fold(&mut self, matched: CapabilityMatch, boost: f64) {
        let candidate = (matched.score * boost).clamp(0.0, 1.0);
        if candidate > self.confidence {
            self.confidence = candidate;
        }
        self.matches_mut(matched.kind).push(matched);
    }

    /// Returns the matches of one kind.
    #[must_use]
    pub fn matches(&self, kind: CapabilityKind) -> &[CapabilityMatch] {
        match kind {
            CapabilityKind::Node => &self.matched_nodes,
            CapabilityKind::Workflow => &self.matched_workflows,
            CapabilityKind::Tool => &self.matched_tools,
            CapabilityKind::Service => &self.matched_services,
        }
    }

    fn matches_mut(&mut self, kind: CapabilityKind) -> &mut Vec<CapabilityMatch> {
        match kind {
            CapabilityKind::Node => &mut self.matched_nodes,
            CapabilityKind::Workflow => &mut self.matched_workflows,
            CapabilityKind::Tool => &mut self.matched_tools,
            CapabilityKind::Service => &mut self.matched_services,
        }
    }

    /// Returns the total number of matches.
    #[must_use]
    pub fn match_count(&self) -> usize {
        self.matched_nodes.len()
            + self.matched_workflows.len()
            + self.matched_tools.len()
            + self.matched_services.len()
    }

    /// Returns true when nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.match_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchTier;

    fn matched(kind: CapabilityKind, score: f64) -> CapabilityMatch {
        CapabilityMatch {
            name: "x".to_string(),
            kind,
            tier: MatchTier::Trigger,
            score,
        }
    }

    #[test]
    fn test_fold_is_monotonic_and_capped() {
        let mut plan = ExecutionPlan::default();
        plan.fold(matched(CapabilityKind::Workflow, 0.95), 1.1);
        assert!((plan.confidence - 1.0).abs() < f64::EPSILON);
        plan.fold(matched(CapabilityKind::Tool, 0.5), 1.1);
        assert!((plan.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(plan.match_count(), 2);
        assert_eq!(plan.matches(CapabilityKind::Tool).len(), 1);
    }

    #[test]
    fn test_empty_plan() {
        let plan = ExecutionPlan::default();
        assert!(plan.is_empty());
        assert!(plan.confidence.abs() < f64::EPSILON);
    }
}
