//! Keyword, concept and task derivation for requests.

// LazyLock statics with compile-time regex literals.
#![allow(clippy::expect_used)]

use crate::models::{ExternalSource, MemoryRecord, Task, TaskPriority};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

/// Tokens are runs of characters other than whitespace and list separators.
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\s,;:]+").expect("static regex: token"));

/// Stop words dropped from keywords.
pub const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
];

/// Concepts recognised in request text.
pub const SYSTEM_CONCEPTS: &[&str] = &[
    "deployment",
    "monitoring",
    "security",
    "optimization",
    "documentation",
    "workflow",
    "node",
    "service",
    "database",
    "api",
    "frontend",
    "authentication",
    "encryption",
    "visualization",
    "testing",
];

/// Concept to `(action, target, priority)`.
const CONCEPT_TASKS: &[(&str, &str, &str, TaskPriority)] = &[
    ("deployment", "deploy", "system", TaskPriority::High),
    ("monitoring", "monitor", "services", TaskPriority::Medium),
    ("security", "audit", "security", TaskPriority::High),
    ("optimization", "optimize", "performance", TaskPriority::Medium),
    ("documentation", "document", "code", TaskPriority::Low),
];

/// Memories whose tags contribute concepts.
const CONCEPT_MEMORY_LIMIT: usize = 10;

/// Extracts keywords from a request.
///
/// Lower-cases, trims punctuation from token edges, drops tokens of three
/// characters or fewer and stop words, and de-duplicates keeping first
/// occurrence order.
///
/// # Example
///
/// ```rust
/// use switchboard::services::extract_keywords;
///
/// let keywords = extract_keywords("Deploy the API, then deploy docs!");
/// assert_eq!(keywords, vec!["deploy", "then", "docs"]);
/// ```
#[must_use]
pub fn extract_keywords(request: &str) -> Vec<String> {
    let lowered = request.to_lowercase();
    let mut keywords: Vec<String> = Vec::new();

    for token in TOKEN.find_iter(&lowered) {
        let cleaned = token
            .as_str()
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '_');

        if cleaned.chars().count() <= 3 || STOP_WORDS.contains(&cleaned) {
            continue;
        }
        if keywords.iter().any(|k| k == cleaned) {
            continue;
        }
        keywords.push(cleaned.to_string());
    }

    keywords
}

/// Collects system concepts mentioned in the request plus the tags of the
/// first ten recalled memories. Sorted and de-duplicated.
#[must_use]
pub fn identify_concepts(request: &str, memories: &[MemoryRecord]) -> Vec<String> {
    let lowered = request.to_lowercase();
    let mut concepts: BTreeSet<String> = SYSTEM_CONCEPTS
        .iter()
        .filter(|concept| lowered.contains(*concept))
        .map(ToString::to_string)
        .collect();

    for memory in memories.iter().take(CONCEPT_MEMORY_LIMIT) {
        concepts.extend(memory.tags.iter().cloned());
    }

    concepts.into_iter().collect()
}

/// Maps concepts to tasks. Concepts without a task are skipped.
#[must_use]
pub fn assign_tasks(concepts: &[String]) -> Vec<Task> {
    concepts
        .iter()
        .filter_map(|concept| {
            CONCEPT_TASKS
                .iter()
                .find(|(name, ..)| *name == concept.as_str())
                .map(|(name, action, target, priority)| Task {
                    concept: (*name).to_string(),
                    action: (*action).to_string(),
                    target: (*target).to_string(),
                    priority: *priority,
                })
        })
        .collect()
}

/// Summarises external sources by type, e.g.
/// `Analyzed 3 external sources | - docs: 2 sources | - repository: 1 sources`.
///
/// Returns `None` when there are no sources.
#[must_use]
pub fn comparative_analysis(sources: &[ExternalSource]) -> Option<String> {
    if sources.is_empty() {
        return None;
    }

    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for source in sources {
        *by_type.entry(source.source_type.as_str()).or_default() += 1;
    }

    let mut summary = format!("Analyzed {} external sources", sources.len());
    for (source_type, count) in by_type {
        summary.push_str(&format!(" | - {source_type}: {count} sources"));
    }
    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemoryId;
    use chrono::Utc;
    use test_case::test_case;

    fn memory(tags: &[&str]) -> MemoryRecord {
        MemoryRecord {
            id: MemoryId::new("m"),
            category: "note".to_string(),
            content: serde_json::Value::Null,
            tags: tags.iter().map(ToString::to_string).collect(),
            source: "test".to_string(),
            timestamp: Utc::now(),
            relevance_score: 1.0,
            access_count: 0,
            last_accessed: None,
        }
    }

    #[test_case("", &[]; "empty")]
    #[test_case("the and with", &[]; "only stop words")]
    #[test_case("Deploy deploy DEPLOY", &["deploy"]; "case folded dedupe")]
    #[test_case("(security), audit!", &["security", "audit"]; "edge punctuation")]
    #[test_case("api db run", &[]; "short tokens dropped")]
    #[test_case("node_pool re-index", &["node_pool", "re-index"]; "inner punctuation kept")]
    fn test_extract_keywords(request: &str, expected: &[&str]) {
        assert_eq!(extract_keywords(request), expected);
    }

    #[test]
    fn test_identify_concepts_from_request_and_memories() {
        let memories = vec![memory(&["rollback"]), memory(&["security"])];
        let concepts = identify_concepts("Check the deployment and API health", &memories);
        assert_eq!(concepts, vec!["api", "deployment", "rollback", "security"]);
    }

    #[test]
    fn test_identify_concepts_limits_memories() {
        let mut memories: Vec<MemoryRecord> = (0..10).map(|_| memory(&["early"])).collect();
        memories.push(memory(&["late"]));
        let concepts = identify_concepts("", &memories);
        assert_eq!(concepts, vec!["early"]);
    }

    #[test]
    fn test_assign_tasks() {
        let concepts = vec![
            "deployment".to_string(),
            "api".to_string(),
            "documentation".to_string(),
        ];
        let tasks = assign_tasks(&concepts);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].action, "deploy");
        assert_eq!(tasks[0].priority, TaskPriority::High);
        assert_eq!(tasks[1].action, "document");
        assert_eq!(tasks[1].priority, TaskPriority::Low);
    }

    #[test]
    fn test_comparative_analysis() {
        assert!(comparative_analysis(&[]).is_none());

        let source = |t: &str| ExternalSource {
            id: t.to_string(),
            source_type: t.to_string(),
            source_url: None,
            content: serde_json::Value::Null,
            analysis: None,
            integrated_at: Utc::now(),
        };
        let summary = comparative_analysis(&[source("docs"), source("repo"), source("docs")])
            .unwrap();
        assert_eq!(
            summary,
            "Analyzed 3 external sources | - docs: 2 sources | - repo: 1 sources"
        );
    }
}
