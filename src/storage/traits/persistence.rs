//! Persistence backend trait.

use crate::Result;
use crate::models::{ExternalSource, MemoryId, MemoryRecord, MemoryStatistics, Preference};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// The index-relevant fields of one persisted record.
///
/// A full scan of these rebuilds the in-memory secondary indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKeys {
    /// Record id.
    pub id: MemoryId,
    /// Category key.
    pub category: String,
    /// Tag keys.
    pub tags: BTreeSet<String>,
    /// Source key.
    pub source: String,
}

impl From<&MemoryRecord> for RecordKeys {
    fn from(record: &MemoryRecord) -> Self {
        Self {
            id: record.id.clone(),
            category: record.category.clone(),
            tags: record.tags.clone(),
            source: record.source.clone(),
        }
    }
}

/// Trait for persistence layer backends.
///
/// Persistence backends are the authoritative source of truth for records,
/// external sources and preferences. Secondary indexes live above this layer
/// and are derived from [`PersistenceBackend::scan_index_keys`].
pub trait PersistenceBackend: Send + Sync {
    /// Inserts or replaces a record.
    ///
    /// On conflict the category, content, tags, source, timestamp and
    /// relevance are replaced; `access_count` and `last_accessed` are kept.
    fn upsert_record(&self, record: &MemoryRecord) -> Result<()>;

    /// Retrieves a record by id without touching its access counters.
    fn get_record(&self, id: &MemoryId) -> Result<Option<MemoryRecord>>;

    /// Retrieves several records. Missing ids are skipped.
    fn get_records(&self, ids: &[MemoryId]) -> Result<Vec<MemoryRecord>>;

    /// Increments `access_count` by one, sets `last_accessed`, and returns
    /// the updated record.
    fn touch_record(&self, id: &MemoryId, at: DateTime<Utc>) -> Result<Option<MemoryRecord>>;

    /// Returns up to `limit` records, most relevant first.
    fn list_records(&self, limit: usize) -> Result<Vec<MemoryRecord>>;

    /// Returns the index keys of every record.
    fn scan_index_keys(&self) -> Result<Vec<RecordKeys>>;

    /// Deletes records and returns how many rows were removed.
    fn delete_records(&self, ids: &[MemoryId]) -> Result<usize>;

    /// Returns ids of records stored before `cutoff`, optionally within one
    /// category.
    fn ids_older_than(&self, cutoff: DateTime<Utc>, category: Option<&str>)
    -> Result<Vec<MemoryId>>;

    /// Inserts or replaces an external source.
    fn upsert_external_source(&self, source: &ExternalSource) -> Result<()>;

    /// Lists external sources, newest first, optionally of one type.
    fn list_external_sources(&self, source_type: Option<&str>) -> Result<Vec<ExternalSource>>;

    /// Inserts or replaces a preference.
    fn set_preference(&self, preference: &Preference) -> Result<()>;

    /// Retrieves a preference by key.
    fn get_preference(&self, key: &str) -> Result<Option<Preference>>;

    /// Lists preferences, optionally within one category.
    fn list_preferences(&self, category: Option<&str>) -> Result<Vec<Preference>>;

    /// Returns aggregate counters with the `top` most recalled records.
    fn statistics(&self, top: usize) -> Result<MemoryStatistics>;

    /// Checks if a record exists.
    fn exists(&self, id: &MemoryId) -> Result<bool> {
        Ok(self.get_record(id)?.is_some())
    }
}
