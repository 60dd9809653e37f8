//! Request analysis into execution plans.

use crate::clock::{Clock, SystemClock};
use crate::models::{CapabilityKind, CapabilityMatch, ExecutionPlan, MatchTier};
use crate::services::CapabilityIndex;
use crate::services::capability_index::RequestText;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

/// Scores requests against the capability index.
///
/// The plan is a pure function of the request text and the index contents,
/// apart from its `generated_at` stamp.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use switchboard::{CapabilityEntry, CapabilityIndex, CapabilityKind, RequestAnalyzer};
///
/// let index = Arc::new(CapabilityIndex::new());
/// index.register(
///     CapabilityEntry::new("Deploy", CapabilityKind::Workflow).with_slash_command("/deploy"),
/// )?;
/// let analyzer = RequestAnalyzer::new(index);
///
/// assert!(analyzer.analyze("please /deploy now").confidence >= 0.95);
/// assert!(analyzer.analyze("").is_empty());
/// # Ok::<(), switchboard::Error>(())
/// ```
pub struct RequestAnalyzer {
    index: Arc<CapabilityIndex>,
    clock: Arc<dyn Clock>,
}

impl RequestAnalyzer {
    /// Creates an analyzer over a shared index.
    #[must_use]
    pub fn new(index: Arc<CapabilityIndex>) -> Self {
        Self::with_clock(index, Arc::new(SystemClock))
    }

    /// Creates an analyzer that stamps plans with `clock`.
    #[must_use]
    pub fn with_clock(index: Arc<CapabilityIndex>, clock: Arc<dyn Clock>) -> Self {
        Self { index, clock }
    }

    /// Returns the index this analyzer reads.
    #[must_use]
    pub fn index(&self) -> &Arc<CapabilityIndex> {
        &self.index
    }

    /// Builds the execution plan for `text`.
    ///
    /// Every matching entry is kept. Confidence is the best match score
    /// times the configured boost, capped at 1.0.
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub fn analyze(&self, text: &str) -> ExecutionPlan {
        let mut plan = ExecutionPlan::empty(self.clock.now());
        let request = RequestText::new(text);
        if request.is_blank() {
            return plan;
        }

        let mut best: BTreeMap<(CapabilityKind, String), CapabilityMatch> = self
            .index
            .lookup(text)
            .into_iter()
            .map(|m| ((m.kind, m.name.clone()), m))
            .collect();

        for matched in self.service_keyword_matches(&request) {
            let key = (matched.kind, matched.name.clone());
            match best.get(&key) {
                Some(existing) if existing.score >= matched.score => {},
                _ => {
                    best.insert(key, matched);
                },
            }
        }

        let mut matches: Vec<CapabilityMatch> = best.into_values().collect();
        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.name.cmp(&b.name))
        });

        let boost = self.index.tunables().confidence_boost;
        for matched in matches {
            plan.fold(matched, boost);
        }

        metrics::counter!("analyzer_requests_total").increment(1);
        tracing::debug!(
            matches = plan.match_count(),
            confidence = plan.confidence,
            "request analyzed"
        );
        plan
    }

    /// Services whose type names a keyword group with a word in the request.
    fn service_keyword_matches(&self, request: &RequestText) -> Vec<CapabilityMatch> {
        let tunables = self.index.tunables();
        let score = tunables.tier_score(MatchTier::ServiceKeyword);

        self.index
            .entries(Some(CapabilityKind::Service))
            .into_iter()
            .filter(|service| {
                service
                    .service_type
                    .as_deref()
                    .and_then(|group| tunables.service_keywords.get(&group.to_lowercase()))
                    .is_some_and(|words| {
                        words.iter().any(|word| request.has_token(&word.to_lowercase()))
                    })
            })
            .map(|service| CapabilityMatch {
                name: service.name,
                kind: CapabilityKind::Service,
                tier: MatchTier::ServiceKeyword,
                score,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringTunables;
    use crate::models::CapabilityEntry;
    use test_case::test_case;

    fn analyzer() -> RequestAnalyzer {
        let index = Arc::new(CapabilityIndex::new());
        index
            .register_all([
                CapabilityEntry::new("Deploy", CapabilityKind::Workflow)
                    .with_slash_command("/deploy")
                    .with_triggers(["deploy", "release"]),
                CapabilityEntry::new("Payments", CapabilityKind::Service).with_service_type("api"),
                CapabilityEntry::new("Sessions", CapabilityKind::Service)
                    .with_service_type("cache"),
            ])
            .unwrap();
        RequestAnalyzer::new(index)
    }

    #[test_case("please /deploy now", 1.0; "slash command boosted and capped")]
    #[test_case("let's deploy today", 0.935; "name tier boosted")]
    #[test_case("restart the api server", 0.77; "service keyword tier boosted")]
    #[test_case("water the plants", 0.0; "nothing matches")]
    #[test_case("", 0.0; "empty")]
    fn test_confidence(text: &str, expected: f64) {
        let plan = analyzer().analyze(text);
        assert!(
            (plan.confidence - expected).abs() < 1e-9,
            "{text}: {}",
            plan.confidence
        );
    }

    #[test]
    fn test_empty_text_gives_empty_plan() {
        let plan = analyzer().analyze("   ");
        assert!(plan.is_empty());
        assert!(plan.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_service_keywords_are_whole_tokens() {
        // "happy" contains "app" but is not the token "app".
        let plan = analyzer().analyze("a happy capital");
        assert!(plan.matched_services.is_empty());
    }

    #[test]
    fn test_all_matches_retained() {
        let plan = analyzer().analyze("deploy the api and warm the cache");
        assert_eq!(plan.matched_workflows.len(), 1);
        assert_eq!(plan.matched_services.len(), 2);
        assert!(plan.matched_services.iter().all(|m| m.tier == MatchTier::ServiceKeyword));
    }

    #[test]
    fn test_higher_tier_beats_service_keyword() {
        let plan = analyzer().analyze("check payments api");
        assert_eq!(plan.matched_services.len(), 1);
        assert_eq!(plan.matched_services[0].tier, MatchTier::Name);
    }

    #[test]
    fn test_deterministic() {
        let analyzer = analyzer();
        let a = analyzer.analyze("deploy the api");
        let b = analyzer.analyze("deploy the api");
        assert_eq!(a.matched_workflows, b.matched_workflows);
        assert_eq!(a.matched_services, b.matched_services);
        assert!((a.confidence - b.confidence).abs() < f64::EPSILON);
    }

    #[test]
    fn test_custom_boost() {
        let tunables = ScoringTunables {
            confidence_boost: 1.0,
            ..ScoringTunables::default()
        };
        let index = Arc::new(CapabilityIndex::with_tunables(tunables));
        index
            .register(CapabilityEntry::new("Deploy", CapabilityKind::Workflow))
            .unwrap();
        let plan = RequestAnalyzer::new(index).analyze("deploy");
        assert!((plan.confidence - 0.85).abs() < 1e-9);
    }
}
