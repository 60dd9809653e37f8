//! Persisted memory store with in-memory secondary indexes.
//!
//! Records live in a [`PersistenceBackend`]. Category, tag and source
//! indexes are kept in a [`MemoryIndex`] that is rebuilt from a full scan at
//! open and whenever a query finds an index entry without a record.
//!
//! # Write ordering
//!
//! Writers are serialized. A record is written to the backend before it is
//! filed in the index, and rotation unfiles ids before deleting rows, so a
//! reader may miss a just-written record but never sees an index entry for
//! a record that was never written.

use crate::clock::{Clock, SystemClock};
use crate::models::{
    ExternalSource, LearningMetrics, MemoryId, MemoryQuery, MemoryRecord, MemoryStatistics,
    Preference,
};
use crate::services::{ContentHasher, MemoryIndex};
use crate::storage::{PersistenceBackend, RecordKeys, SqlitePersistenceBackend};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::instrument;

/// Base relevance of a new record.
const BASE_RELEVANCE: f64 = 1.0;
/// Upper bound on relevance.
const MAX_RELEVANCE: f64 = 2.0;
/// A category with more records than this boosts new records.
const CATEGORY_BOOST_THRESHOLD: usize = 5;
const CATEGORY_BOOST: f64 = 0.1;
/// A tag with more records than this boosts new records.
const TAG_BOOST_THRESHOLD: usize = 3;
const TAG_BOOST: f64 = 0.05;
/// Entries listed in `most_accessed`.
const STATISTICS_TOP: usize = 10;
/// Connections taken from a new record's category.
const CATEGORY_CONNECTIONS: usize = 3;
/// Connections taken from each of a new record's tags.
const TAG_CONNECTIONS: usize = 2;

/// Connections between records and per-category patterns, rebuilt from
/// scratch each time the store is opened.
#[derive(Debug, Default)]
struct Learning {
    connections: BTreeMap<MemoryId, BTreeSet<MemoryId>>,
    metrics: LearningMetrics,
}

impl Learning {
    fn stored(&mut self, record: &MemoryRecord, connections: BTreeSet<MemoryId>) {
        self.metrics.total_stored += 1;
        if connections.is_empty() {
            self.connections.remove(&record.id);
        } else {
            self.metrics.connections_made += connections.len() as u64;
            self.connections.insert(record.id.clone(), connections);
        }

        let pattern = self
            .metrics
            .patterns
            .entry(record.category.clone())
            .or_default();
        pattern.count += 1;
        pattern.tags.extend(record.tags.iter().cloned());
    }

    fn forget(&mut self, ids: &[MemoryId]) {
        for id in ids {
            self.connections.remove(id);
        }
        self.connections.retain(|_, related| {
            related.retain(|other| !ids.contains(other));
            !related.is_empty()
        });
    }

    fn snapshot(&self) -> LearningMetrics {
        LearningMetrics {
            connections_tracked: self.connections.len() as u64,
            ..self.metrics.clone()
        }
    }
}

/// Store for memory records, preferences and external sources.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use switchboard::{MemoryQuery, MemoryStore};
///
/// let store = MemoryStore::in_memory()?;
/// let id = store.store("note", json!({"text": "ship it"}), ["release".to_string()].into(), "cli")?;
///
/// let record = store.recall(&id)?;
/// assert_eq!(record.access_count, 1);
///
/// let found = store.query(&MemoryQuery::new(10).with_tag("release"))?;
/// assert_eq!(found.len(), 1);
/// # Ok::<(), switchboard::Error>(())
/// ```
pub struct MemoryStore {
    backend: Arc<dyn PersistenceBackend>,
    index: RwLock<MemoryIndex>,
    writer: Mutex<()>,
    learning: Mutex<Learning>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Opens a store over a backend and rebuilds the indexes.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial index scan fails.
    pub fn open(backend: Arc<dyn PersistenceBackend>, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = Self {
            backend,
            index: RwLock::new(MemoryIndex::new()),
            writer: Mutex::new(()),
            learning: Mutex::new(Learning::default()),
            clock,
        };
        let filed = store.rebuild_indexes()?;
        tracing::debug!(filed, "memory indexes built");
        Ok(store)
    }

    /// Opens a `SQLite` store at `path` with the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or scanned.
    pub fn open_path(path: &Path) -> Result<Self> {
        let backend = SqlitePersistenceBackend::new(path)?;
        Self::open(Arc::new(backend), Arc::new(SystemClock))
    }

    /// Opens an in-memory `SQLite` store with the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let backend = SqlitePersistenceBackend::in_memory()?;
        Self::open(Arc::new(backend), Arc::new(SystemClock))
    }

    fn read_index(&self) -> RwLockReadGuard<'_, MemoryIndex> {
        self.index.read().unwrap_or_else(|poisoned| {
            tracing::warn!("memory index lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, MemoryIndex> {
        self.index.write().unwrap_or_else(|poisoned| {
            tracing::warn!("memory index lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("memory writer lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn lock_learning(&self) -> MutexGuard<'_, Learning> {
        self.learning.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("memory learning lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Stores a record and returns its deterministic id.
    ///
    /// Storing the same category and content again replaces tags, source,
    /// timestamp and relevance but keeps the access counters. Blank tags
    /// are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a blank category and
    /// [`Error::Storage`] if the write fails. A failed write leaves the
    /// indexes untouched.
    #[instrument(skip(self, content, tags), fields(operation = "store", category = %category))]
    pub fn store(
        &self,
        category: &str,
        content: serde_json::Value,
        tags: BTreeSet<String>,
        source: &str,
    ) -> Result<MemoryId> {
        let category = category.trim();
        if category.is_empty() {
            return Err(Error::InvalidInput("memory category is blank".to_string()));
        }
        let tags: BTreeSet<String> = tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        let id = ContentHasher::memory_id(category, &content);
        let _writer = self.lock_writer();
        let connections = self.read_index().related(
            &id,
            category,
            &tags,
            CATEGORY_CONNECTIONS,
            TAG_CONNECTIONS,
        );

        let record = MemoryRecord {
            id: id.clone(),
            category: category.to_string(),
            relevance_score: self.relevance_for(&id, category, &tags),
            content,
            tags,
            source: source.to_string(),
            timestamp: self.clock.now(),
            access_count: 0,
            last_accessed: None,
        };

        self.backend.upsert_record(&record)?;
        self.write_index().insert(RecordKeys::from(&record));
        self.lock_learning().stored(&record, connections);

        metrics::counter!("memory_store_operations_total", "operation" => "store").increment(1);
        tracing::debug!(id = %id, "memory stored");
        Ok(id)
    }

    /// Relevance for a new record given how populated its keys already are.
    /// The record itself is not counted.
    fn relevance_for(&self, id: &MemoryId, category: &str, tags: &BTreeSet<String>) -> f64 {
        let index = self.read_index();
        let own = usize::from(index.contains(id));

        let mut relevance = BASE_RELEVANCE;
        if index.category_count(category).saturating_sub(own) > CATEGORY_BOOST_THRESHOLD {
            relevance += CATEGORY_BOOST;
        }
        for tag in tags {
            if index.tag_count(tag).saturating_sub(own) > TAG_BOOST_THRESHOLD {
                relevance += TAG_BOOST;
            }
        }
        relevance.min(MAX_RELEVANCE)
    }

    /// Reads a record, counting the access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no record has this id.
    #[instrument(skip(self), fields(operation = "recall", id = %id))]
    pub fn recall(&self, id: &MemoryId) -> Result<MemoryRecord> {
        let record = self.backend.touch_record(id, self.clock.now())?;
        metrics::counter!("memory_store_operations_total", "operation" => "recall").increment(1);

        match record {
            Some(record) => {
                self.lock_learning().metrics.total_recalled += 1;
                Ok(record)
            },
            None => {
                self.unfile_if_missing(id)?;
                Err(Error::NotFound {
                    kind: "memory",
                    id: id.to_string(),
                })
            },
        }
    }

    /// Drops the index entry for `id` if its row is still absent once no
    /// writer is active. A concurrent `store` may have written it since.
    fn unfile_if_missing(&self, id: &MemoryId) -> Result<()> {
        let _writer = self.lock_writer();
        if !self.backend.exists(id)? && self.write_index().remove(id) {
            tracing::warn!(id = %id, "dropped index entry for missing record");
        }
        Ok(())
    }

    /// Returns records matching the query, most relevant then newest first.
    ///
    /// Access counters are not changed. With no filters an arbitrary
    /// bounded page is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if records cannot be read.
    #[instrument(skip(self), fields(operation = "query", limit = query.limit))]
    pub fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        let start = Instant::now();
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let Some(candidates) = self.read_index().candidates(query) else {
            return self.backend.list_records(query.limit);
        };
        let ids: Vec<MemoryId> = candidates.into_iter().collect();
        let mut records = self.backend.get_records(&ids)?;

        if records.len() < ids.len() {
            tracing::warn!(
                indexed = ids.len(),
                found = records.len(),
                "index references missing records, rebuilding"
            );
            metrics::counter!("memory_index_rebuilds_total", "reason" => "divergence").increment(1);
            self.rebuild_indexes()?;
        }

        records.sort_by(|a, b| {
            b.relevance_score
                .total_cmp(&a.relevance_score)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });
        records.truncate(query.limit);

        metrics::counter!("memory_store_operations_total", "operation" => "query").increment(1);
        metrics::histogram!("memory_query_duration_ms")
            .record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(records)
    }

    /// Rebuilds the indexes from a full scan. Idempotent.
    ///
    /// Returns the number of filed records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the scan fails. The old indexes are
    /// kept in that case.
    #[instrument(skip(self), fields(operation = "rebuild_indexes"))]
    pub fn rebuild_indexes(&self) -> Result<usize> {
        let _writer = self.lock_writer();
        let rebuilt = MemoryIndex::rebuild(self.backend.scan_index_keys()?);
        let filed = rebuilt.len();
        *self.write_index() = rebuilt;
        Ok(filed)
    }

    /// Deletes records older than `older_than`, optionally in one category.
    ///
    /// Index entries are removed before rows. Returns the number of rows
    /// deleted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the lookup or delete fails.
    #[instrument(skip(self), fields(operation = "rotate"))]
    pub fn rotate(&self, older_than: chrono::Duration, category: Option<&str>) -> Result<usize> {
        let cutoff = self.clock.now() - older_than;
        let writer = self.lock_writer();

        let ids = self.backend.ids_older_than(cutoff, category)?;
        if ids.is_empty() {
            return Ok(0);
        }
        {
            let mut index = self.write_index();
            for id in &ids {
                index.remove(id);
            }
        }

        match self.backend.delete_records(&ids) {
            Ok(deleted) => {
                self.lock_learning().forget(&ids);
                tracing::info!(deleted, "rotated memories");
                metrics::counter!("memory_rotated_total").increment(deleted as u64);
                Ok(deleted)
            },
            Err(e) => {
                drop(writer);
                if let Err(rebuild) = self.rebuild_indexes() {
                    tracing::warn!(error = %rebuild, "index rebuild after failed rotate failed");
                }
                Err(e)
            },
        }
    }

    /// Returns the number of indexed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_index().len()
    }

    /// Returns true when no records are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_index().is_empty()
    }

    // =========================================================================
    // Preferences
    // =========================================================================

    /// Sets a preference, replacing any previous value for the key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a blank key, or a storage error.
    pub fn set_preference(&self, key: &str, value: serde_json::Value, category: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidInput("preference key is blank".to_string()));
        }
        self.backend.set_preference(&Preference {
            key: key.to_string(),
            value,
            category: category.to_string(),
        })
    }

    /// Returns one preference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the key is unset.
    pub fn get_preference(&self, key: &str) -> Result<Preference> {
        self.backend
            .get_preference(key.trim())?
            .ok_or_else(|| Error::NotFound {
                kind: "preference",
                id: key.to_string(),
            })
    }

    /// Returns every preference, optionally only one category.
    ///
    /// # Errors
    ///
    /// Returns an error if preferences cannot be read.
    pub fn get_all_preferences(&self, category: Option<&str>) -> Result<Vec<Preference>> {
        self.backend.list_preferences(category)
    }

    // =========================================================================
    // External sources
    // =========================================================================

    /// Integrates an external source and returns its id.
    ///
    /// The id is derived from type and URL, so integrating the same source
    /// again replaces it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a blank type, or a storage error.
    #[instrument(skip(self, content, analysis), fields(operation = "store_external_source"))]
    pub fn store_external_source(
        &self,
        source_type: &str,
        source_url: Option<&str>,
        content: serde_json::Value,
        analysis: Option<serde_json::Value>,
    ) -> Result<String> {
        let source_type = source_type.trim();
        if source_type.is_empty() {
            return Err(Error::InvalidInput("source type is blank".to_string()));
        }
        let id = ContentHasher::source_id(source_type, source_url);
        self.backend.upsert_external_source(&ExternalSource {
            id: id.clone(),
            source_type: source_type.to_string(),
            source_url: source_url.map(ToString::to_string),
            content,
            analysis,
            integrated_at: self.clock.now(),
        })?;
        Ok(id)
    }

    /// Returns external sources, optionally only one type.
    ///
    /// # Errors
    ///
    /// Returns an error if sources cannot be read.
    pub fn external_sources(&self, source_type: Option<&str>) -> Result<Vec<ExternalSource>> {
        self.backend.list_external_sources(source_type)
    }

    /// Returns aggregate counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the counters cannot be read.
    pub fn statistics(&self) -> Result<MemoryStatistics> {
        let mut stats = self.backend.statistics(STATISTICS_TOP)?;
        stats.learning = self.learning_metrics();
        Ok(stats)
    }

    /// Returns connection and pattern counters since the store was opened.
    #[must_use]
    pub fn learning_metrics(&self) -> LearningMetrics {
        self.lock_learning().snapshot()
    }

    /// Returns the records `id` was connected to when it was last stored.
    #[must_use]
    pub fn connections(&self, id: &MemoryId) -> Vec<MemoryId> {
        self.lock_learning()
            .connections
            .get(id)
            .map(|related| related.iter().cloned().collect())
            .unwrap_or_default()
    }
}
