//! Property-based tests for keyword extraction, scoring and indexing.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Keywords are lower-case, long enough, stop-word free and unique
//! - Identifiers and cache keys are deterministic
//! - Plan confidence stays within [0, 1] and analysis is deterministic
//! - Index candidates always agree with a brute-force filter

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use switchboard::services::{
    ContentHasher, MemoryIndex, STOP_WORDS, extract_keywords, identify_concepts,
};
use switchboard::storage::RecordKeys;
use switchboard::{
    CapabilityEntry, CapabilityIndex, CapabilityKind, MemoryId, MemoryQuery, RequestAnalyzer,
    RequestConfig,
};

fn analyzer() -> RequestAnalyzer {
    let index = CapabilityIndex::new();
    index
        .register_all([
            CapabilityEntry::new("Deploy", CapabilityKind::Workflow)
                .with_slash_command("/deploy")
                .with_triggers(["deploy", "ship"]),
            CapabilityEntry::new("Backup", CapabilityKind::Workflow).with_triggers(["backup"]),
            CapabilityEntry::new("scribe", CapabilityKind::Node).with_triggers(["notes", "write"]),
            CapabilityEntry::new("grep_logs", CapabilityKind::Tool),
            CapabilityEntry::new("ledger", CapabilityKind::Service).with_service_type("database"),
        ])
        .unwrap();
    RequestAnalyzer::new(Arc::new(index))
}

fn request_words() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just("deploy".to_string()),
            Just("/deploy".to_string()),
            Just("backup".to_string()),
            Just("grep logs".to_string()),
            Just("database".to_string()),
            Just("the".to_string()),
            Just("notes".to_string()),
            "[a-zA-Z]{1,10}",
        ],
        0..12,
    )
    .prop_map(|words| words.join(" "))
}

fn record_keys() -> impl Strategy<Value = Vec<RecordKeys>> {
    prop::collection::vec(
        (
            0u8..40,
            prop::sample::select(vec!["note", "log", "task"]),
            prop::collection::btree_set(prop::sample::select(vec!["a", "b", "c", "d"]), 0..3),
            prop::sample::select(vec!["cli", "pipeline"]),
        ),
        0..40,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .map(|(id, category, tags, source)| RecordKeys {
                id: MemoryId::new(format!("id-{id}")),
                category: category.to_string(),
                tags: tags.into_iter().map(str::to_string).collect(),
                source: source.to_string(),
            })
            .collect()
    })
}

proptest! {
    /// Property: keywords are normalized, filtered and unique.
    #[test]
    fn prop_keywords_are_normalized(text in ".{0,200}") {
        let keywords = extract_keywords(&text);
        let unique: BTreeSet<&String> = keywords.iter().collect();
        prop_assert_eq!(unique.len(), keywords.len());
        for keyword in &keywords {
            prop_assert!(keyword.chars().count() > 3);
            prop_assert!(!STOP_WORDS.contains(&keyword.as_str()));
            prop_assert_eq!(keyword.to_lowercase(), keyword.clone());
        }
    }

    /// Property: concepts without memories come only from the request text.
    #[test]
    fn prop_concepts_appear_in_request(text in request_words()) {
        let lowered = text.to_lowercase();
        for concept in identify_concepts(&text, &[]) {
            prop_assert!(lowered.contains(&concept));
        }
    }

    /// Property: memory ids depend only on category and content.
    #[test]
    fn prop_memory_id_is_deterministic(category in "[a-z]{1,12}", body in ".{0,64}") {
        let content = json!({ "body": body, "n": 1 });
        let first = ContentHasher::memory_id(&category, &content);
        let second = ContentHasher::memory_id(&category, &content.clone());
        prop_assert_eq!(&first, &second);

        let other = ContentHasher::memory_id(&format!("{category}x"), &content);
        prop_assert_ne!(first, other);
    }

    /// Property: the cache key changes with the request config.
    #[test]
    fn prop_request_key_covers_config(text in ".{0,80}", ttl in 1u32..240) {
        let base = RequestConfig::default().with_cache_ttl_minutes(ttl);
        prop_assert_eq!(
            ContentHasher::request_key(&text, &base),
            ContentHasher::request_key(&text, &base)
        );
        prop_assert_ne!(
            ContentHasher::request_key(&text, &base),
            ContentHasher::request_key(&text, &base.without_cache())
        );
    }

    /// Property: confidence is bounded and analysis is repeatable.
    #[test]
    fn prop_confidence_is_bounded(text in request_words()) {
        let analyzer = analyzer();
        let plan = analyzer.analyze(&text);
        prop_assert!((0.0..=1.0).contains(&plan.confidence));
        prop_assert_eq!(plan.is_empty(), plan.confidence == 0.0);

        let again = analyzer.analyze(&text);
        prop_assert_eq!(plan.matched_workflows, again.matched_workflows);
        prop_assert_eq!(plan.matched_nodes, again.matched_nodes);
        prop_assert_eq!(plan.matched_tools, again.matched_tools);
        prop_assert_eq!(plan.matched_services, again.matched_services);
    }

    /// Property: a slash command always yields near-certain confidence.
    #[test]
    fn prop_slash_command_dominates(prefix in "[a-z ]{0,30}", suffix in "[a-z ]{0,30}") {
        let plan = analyzer().analyze(&format!("{prefix} /deploy {suffix}"));
        prop_assert!(plan.confidence >= 0.95);
    }

    /// Property: index candidates match a brute-force filter over the
    /// latest keys per id.
    #[test]
    fn prop_index_candidates_match_scan(
        rows in record_keys(),
        category in prop::option::of(prop::sample::select(vec!["note", "log", "task"])),
        tag in prop::option::of(prop::sample::select(vec!["a", "b", "c", "d"])),
    ) {
        let mut index = MemoryIndex::new();
        let mut latest = std::collections::BTreeMap::new();
        for keys in rows {
            latest.insert(keys.id.clone(), keys.clone());
            index.insert(keys);
        }
        prop_assert_eq!(index.len(), latest.len());

        let mut query = MemoryQuery::new(100);
        if let Some(category) = category {
            query = query.with_category(category);
        }
        if let Some(tag) = tag {
            query = query.with_tag(tag);
        }

        let expected: BTreeSet<MemoryId> = latest
            .values()
            .filter(|k| category.is_none_or(|c| k.category == c))
            .filter(|k| tag.is_none_or(|t| k.tags.contains(t)))
            .map(|k| k.id.clone())
            .collect();

        match index.candidates(&query) {
            None => prop_assert!(category.is_none() && tag.is_none()),
            Some(found) => prop_assert_eq!(found, expected),
        }
    }
}
