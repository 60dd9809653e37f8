//! Capability scoring thresholds.

use crate::models::MatchTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tier scores, overlap threshold, confidence boost and service keyword
/// groups used by the capability index and the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringTunables {
    /// Score for a slash-command token match.
    pub slash_command: f64,
    /// Score for a name substring match.
    pub name: f64,
    /// Score for a trigger substring match.
    pub trigger: f64,
    /// Score for a description substring match.
    pub description: f64,
    /// Score for description token overlap or a tool name read as words.
    pub token_overlap: f64,
    /// Score for a service keyword group match.
    pub service_keyword: f64,
    /// Minimum shared tokens for the overlap tier.
    pub min_token_overlap: usize,
    /// Multiplier applied to the best tier score.
    pub confidence_boost: f64,
    /// Service type to keyword group.
    pub service_keywords: BTreeMap<String, Vec<String>>,
}

impl Default for ScoringTunables {
    fn default() -> Self {
        Self {
            slash_command: 0.95,
            name: 0.85,
            trigger: 0.85,
            description: 0.80,
            token_overlap: 0.75,
            service_keyword: 0.70,
            min_token_overlap: 2,
            confidence_boost: 1.1,
            service_keywords: default_service_keywords(),
        }
    }
}

impl ScoringTunables {
    /// Returns the score assigned to a tier.
    #[must_use]
    pub const fn tier_score(&self, tier: MatchTier) -> f64 {
        match tier {
            MatchTier::SlashCommand => self.slash_command,
            MatchTier::Name => self.name,
            MatchTier::Trigger => self.trigger,
            MatchTier::Description => self.description,
            MatchTier::TokenOverlap => self.token_overlap,
            MatchTier::ServiceKeyword => self.service_keyword,
        }
    }
}

fn default_service_keywords() -> BTreeMap<String, Vec<String>> {
    let groups: [(&str, &[&str]); 5] = [
        ("api", &["api", "endpoint", "request", "server", "service"]),
        ("database", &["database", "postgres", "db", "query", "data"]),
        ("cache", &["cache", "redis", "memory", "store"]),
        ("mcp", &["mcp", "protocol", "connect", "bridge"]),
        ("frontend", &["ui", "interface", "web", "frontend", "app"]),
    ];
    groups
        .into_iter()
        .map(|(group, words)| {
            (
                group.to_string(),
                words.iter().map(ToString::to_string).collect(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tiers_descend() {
        let t = ScoringTunables::default();
        assert!(t.slash_command > t.name);
        assert!(t.name >= t.trigger);
        assert!(t.trigger > t.description);
        assert!(t.description > t.token_overlap);
        assert!(t.token_overlap > t.service_keyword);
        assert_eq!(t.service_keywords.len(), 5);
    }

    #[test]
    fn test_override_from_toml() {
        let t: ScoringTunables = toml::from_str("confidence_boost = 1.0\nname = 0.9").unwrap();
        assert!((t.confidence_boost - 1.0).abs() < f64::EPSILON);
        assert!((t.tier_score(MatchTier::Name) - 0.9).abs() < f64::EPSILON);
        assert!((t.tier_score(MatchTier::SlashCommand) - 0.95).abs() < f64::EPSILON);
    }
}
