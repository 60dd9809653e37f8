//! Memory records, queries and side tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Unique identifier for a memory.
///
/// Derived from the record's category and canonical content, so storing the
/// same content twice lands on the same id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Creates a new memory ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A persisted memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Deterministic identifier.
    pub id: MemoryId,
    /// Record category (e.g. `processing_context`).
    pub category: String,
    /// Arbitrary JSON content.
    pub content: serde_json::Value,
    /// Tags used by the tag index.
    pub tags: BTreeSet<String>,
    /// Producer of the record.
    pub source: String,
    /// Time of the latest store.
    pub timestamp: DateTime<Utc>,
    /// Relevance assigned at store time, in `[1.0, 2.0]`.
    pub relevance_score: f64,
    /// Number of recalls.
    pub access_count: u64,
    /// Time of the latest recall.
    pub last_accessed: Option<DateTime<Utc>>,
}

/// Filters for a memory query.
///
/// An omitted filter is not applied. An empty tag set means no tag filter;
/// otherwise a record matches if it carries any of the tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// Category filter.
    pub category: Option<String>,
    /// Tag filter (any-of).
    pub tags: BTreeSet<String>,
    /// Source filter.
    pub source: Option<String>,
    /// Maximum records returned.
    pub limit: usize,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self::new(10)
    }
}

impl MemoryQuery {
    /// Creates an unfiltered query.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            category: None,
            tags: BTreeSet::new(),
            source: None,
            limit,
        }
    }

    /// Filters by category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Adds a tag to the any-of tag filter.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Filters by source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Returns true when no filter is set.
    #[must_use]
    pub fn is_unfiltered(&self) -> bool {
        self.category.is_none() && self.tags.is_empty() && self.source.is_none()
    }
}

/// Material pulled in from outside the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSource {
    /// Identifier derived from type and URL.
    pub id: String,
    /// Kind of source (e.g. `documentation`, `repository`).
    pub source_type: String,
    /// Where the source came from.
    pub source_url: Option<String>,
    /// Source content.
    pub content: serde_json::Value,
    /// Optional analysis attached at integration time.
    pub analysis: Option<serde_json::Value>,
    /// Time of integration.
    pub integrated_at: DateTime<Utc>,
}

/// A user preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    /// Preference key.
    pub key: String,
    /// Preference value.
    pub value: serde_json::Value,
    /// Preference category.
    pub category: String,
}

/// Aggregate store counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStatistics {
    /// Total records.
    pub total_memories: u64,
    /// Records per category.
    pub by_category: BTreeMap<String, u64>,
    /// Total external sources.
    pub total_external_sources: u64,
    /// Total preferences.
    pub total_preferences: u64,
    /// The most recalled records, highest first.
    pub most_accessed: Vec<AccessCount>,
    /// Connection and pattern counters since the store was opened.
    #[serde(default)]
    pub learning: LearningMetrics,
}

/// Counters for the connections and category patterns observed at store
/// time. Kept in memory only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningMetrics {
    /// Successful `store` calls.
    pub total_stored: u64,
    /// Successful `recall` calls.
    pub total_recalled: u64,
    /// Connections made across all stores.
    pub connections_made: u64,
    /// Records that currently have connections.
    pub connections_tracked: u64,
    /// Per-category pattern.
    pub patterns: BTreeMap<String, CategoryPattern>,
}

/// How often a category was stored and which tags it was stored with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPattern {
    /// Stores into the category.
    pub count: u64,
    /// Every tag seen with the category.
    pub tags: BTreeSet<String>,
}

/// Recall count for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessCount {
    /// Record id.
    pub id: MemoryId,
    /// Record category.
    pub category: String,
    /// Number of recalls.
    pub access_count: u64,
}
