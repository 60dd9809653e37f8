//! `SQLite`-based persistence backend.
//!
//! Provides durable storage using `SQLite` as the authoritative source of truth
//! for memory records, external sources and preferences.

use crate::models::{
    AccessCount, ExternalSource, LearningMetrics, MemoryId, MemoryRecord, MemoryStatistics,
    Preference,
};
use crate::storage::sqlite::{
    RECORD_COLUMNS, SOURCE_COLUMNS, acquire_lock, configure_connection, count_to_sql,
    format_timestamp, open_connection, preference_from_row, record_from_row,
    record_operation_metrics, source_from_row, status_label,
};
use crate::storage::traits::{PersistenceBackend, RecordKeys};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

const BACKEND: &str = "sqlite_persistence";

/// Maximum ids bound into one `IN (...)` clause.
const ID_CHUNK: usize = 500;

/// `SQLite`-based persistence backend.
///
/// # Concurrency Model
///
/// Uses a `Mutex<Connection>` for thread-safe access. Writes run inside
/// `BEGIN IMMEDIATE` transactions; WAL mode and `busy_timeout` handle
/// contention with other processes.
///
/// # Schema
///
/// - `memories(id, category, content, tags, source, timestamp,
///   relevance_score, access_count, last_accessed)`
/// - `external_sources(id, source_type, source_url, content, analysis,
///   integrated_at)`
/// - `preferences(key, value, category, updated_at)`
pub struct SqlitePersistenceBackend {
    /// Protected by Mutex because `rusqlite::Connection` is not `Sync`.
    conn: Mutex<Connection>,
    /// Path to the `SQLite` database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqlitePersistenceBackend {
    /// Opens (or creates) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = open_connection(&db_path)?;

        let backend = Self {
            conn: Mutex::new(conn),
            db_path: Some(db_path),
        };

        backend.initialize()?;
        Ok(backend)
    }

    /// Creates an in-memory database (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::storage("open_sqlite_in_memory", e))?;

        let backend = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };

        backend.initialize()?;
        Ok(backend)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);

        configure_connection(&conn)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                category TEXT NOT NULL,
                content TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                source TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                relevance_score REAL NOT NULL DEFAULT 1.0,
                access_count INTEGER NOT NULL DEFAULT 0,
                last_accessed TEXT
            );
            CREATE TABLE IF NOT EXISTS external_sources (
                id TEXT PRIMARY KEY,
                source_type TEXT NOT NULL,
                source_url TEXT,
                content TEXT NOT NULL,
                analysis TEXT,
                integrated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT 'general',
                updated_at TEXT NOT NULL
            );",
        )
        .map_err(|e| Error::storage("create_tables", e))?;

        Self::create_indexes(&conn);

        Ok(())
    }

    /// Creates indexes for the time, category and type scans.
    fn create_indexes(conn: &Connection) {
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_timestamp ON memories(timestamp)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_relevance ON memories(relevance_score DESC, timestamp DESC)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sources_type ON external_sources(source_type)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_preferences_category ON preferences(category)",
            [],
        );
    }

    /// Runs `f` inside `BEGIN IMMEDIATE` / `COMMIT`, rolling back on error.
    fn in_transaction<T>(conn: &Connection, f: impl FnOnce() -> Result<T>) -> Result<T> {
        conn.execute("BEGIN IMMEDIATE", [])
            .map_err(|e| Error::storage("begin_transaction", e))?;

        let result = f();

        if result.is_ok() {
            conn.execute("COMMIT", [])
                .map_err(|e| Error::storage("commit_transaction", e))?;
        } else {
            let _ = conn.execute("ROLLBACK", []);
        }

        result
    }

    fn select_record(conn: &Connection, id: &MemoryId) -> Result<Option<MemoryRecord>> {
        conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM memories WHERE id = ?1"),
            params![id.as_str()],
            record_from_row,
        )
        .optional()
        .map_err(|e| Error::storage("get_record", e))
    }
}

impl PersistenceBackend for SqlitePersistenceBackend {
    #[instrument(skip(self, record), fields(operation = "upsert_record", backend = BACKEND, memory.id = %record.id))]
    fn upsert_record(&self, record: &MemoryRecord) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            let content = serde_json::to_string(&record.content)
                .map_err(|e| Error::storage("serialize_content", e))?;
            let tags = serde_json::to_string(&record.tags)
                .map_err(|e| Error::storage("serialize_tags", e))?;

            let conn = acquire_lock(&self.conn);
            Self::in_transaction(&conn, || {
                conn.execute(
                    "INSERT INTO memories (id, category, content, tags, source, timestamp, relevance_score, access_count, last_accessed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(id) DO UPDATE SET
                        category = excluded.category,
                        content = excluded.content,
                        tags = excluded.tags,
                        source = excluded.source,
                        timestamp = excluded.timestamp,
                        relevance_score = excluded.relevance_score",
                    params![
                        record.id.as_str(),
                        record.category,
                        content,
                        tags,
                        record.source,
                        format_timestamp(record.timestamp),
                        record.relevance_score,
                        count_to_sql(record.access_count),
                        record.last_accessed.map(format_timestamp),
                    ],
                )
                .map_err(|e| Error::storage("upsert_record", e))?;
                Ok(())
            })
        })();

        record_operation_metrics(BACKEND, "upsert_record", start, status_label(&result));
        result
    }

    #[instrument(skip(self), fields(operation = "get_record", backend = BACKEND, memory.id = %id))]
    fn get_record(&self, id: &MemoryId) -> Result<Option<MemoryRecord>> {
        let start = Instant::now();
        let result = {
            let conn = acquire_lock(&self.conn);
            Self::select_record(&conn, id)
        };

        record_operation_metrics(BACKEND, "get_record", start, status_label(&result));
        result
    }

    #[instrument(skip(self, ids), fields(operation = "get_records", backend = BACKEND, count = ids.len()))]
    fn get_records(&self, ids: &[MemoryId]) -> Result<Vec<MemoryRecord>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let mut records = Vec::with_capacity(ids.len());

            for chunk in ids.chunks(ID_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {RECORD_COLUMNS} FROM memories WHERE id IN ({placeholders})"
                    ))
                    .map_err(|e| Error::storage("prepare_get_records", e))?;
                let rows = stmt
                    .query_map(params_from_iter(chunk.iter().map(MemoryId::as_str)), |row| {
                        record_from_row(row)
                    })
                    .map_err(|e| Error::storage("get_records", e))?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| Error::storage("get_records", e))?;
                records.extend(rows);
            }

            Ok(records)
        })();

        record_operation_metrics(BACKEND, "get_records", start, status_label(&result));
        result
    }

    #[instrument(skip(self), fields(operation = "touch_record", backend = BACKEND, memory.id = %id))]
    fn touch_record(&self, id: &MemoryId, at: DateTime<Utc>) -> Result<Option<MemoryRecord>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            Self::in_transaction(&conn, || {
                let changed = conn
                    .execute(
                        "UPDATE memories SET access_count = access_count + 1, last_accessed = ?2 WHERE id = ?1",
                        params![id.as_str(), format_timestamp(at)],
                    )
                    .map_err(|e| Error::storage("touch_record", e))?;
                if changed == 0 {
                    return Ok(None);
                }
                Self::select_record(&conn, id)
            })
        })();

        record_operation_metrics(BACKEND, "touch_record", start, status_label(&result));
        result
    }

    #[instrument(skip(self), fields(operation = "list_records", backend = BACKEND))]
    fn list_records(&self, limit: usize) -> Result<Vec<MemoryRecord>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {RECORD_COLUMNS} FROM memories ORDER BY relevance_score DESC, timestamp DESC LIMIT ?1"
                ))
                .map_err(|e| Error::storage("prepare_list_records", e))?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            stmt.query_map(params![limit], |row| record_from_row(row))
                .map_err(|e| Error::storage("list_records", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("list_records", e))
        })();

        record_operation_metrics(BACKEND, "list_records", start, status_label(&result));
        result
    }

    #[instrument(skip(self), fields(operation = "scan_index_keys", backend = BACKEND))]
    fn scan_index_keys(&self) -> Result<Vec<RecordKeys>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare("SELECT id, category, tags, source FROM memories")
                .map_err(|e| Error::storage("prepare_scan_index_keys", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(|e| Error::storage("scan_index_keys", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("scan_index_keys", e))?;

            rows.into_iter()
                .map(|(id, category, tags, source)| {
                    let tags: BTreeSet<String> = serde_json::from_str(&tags)
                        .map_err(|e| Error::storage("decode_tags", format!("{id}: {e}")))?;
                    Ok(RecordKeys {
                        id: MemoryId::new(id),
                        category,
                        tags,
                        source,
                    })
                })
                .collect()
        })();

        record_operation_metrics(BACKEND, "scan_index_keys", start, status_label(&result));
        result
    }

    #[instrument(skip(self, ids), fields(operation = "delete_records", backend = BACKEND, count = ids.len()))]
    fn delete_records(&self, ids: &[MemoryId]) -> Result<usize> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            Self::in_transaction(&conn, || {
                let mut deleted = 0;
                for chunk in ids.chunks(ID_CHUNK) {
                    let placeholders = vec!["?"; chunk.len()].join(", ");
                    deleted += conn
                        .execute(
                            &format!("DELETE FROM memories WHERE id IN ({placeholders})"),
                            params_from_iter(chunk.iter().map(MemoryId::as_str)),
                        )
                        .map_err(|e| Error::storage("delete_records", e))?;
                }
                Ok(deleted)
            })
        })();

        record_operation_metrics(BACKEND, "delete_records", start, status_label(&result));
        result
    }

    #[instrument(skip(self), fields(operation = "ids_older_than", backend = BACKEND))]
    fn ids_older_than(
        &self,
        cutoff: DateTime<Utc>,
        category: Option<&str>,
    ) -> Result<Vec<MemoryId>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM memories WHERE timestamp < ?1 AND (?2 IS NULL OR category = ?2)",
                )
                .map_err(|e| Error::storage("prepare_ids_older_than", e))?;
            stmt.query_map(params![format_timestamp(cutoff), category], |row| {
                row.get::<_, String>(0).map(MemoryId::new)
            })
            .map_err(|e| Error::storage("ids_older_than", e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::storage("ids_older_than", e))
        })();

        record_operation_metrics(BACKEND, "ids_older_than", start, status_label(&result));
        result
    }

    #[instrument(skip(self, source), fields(operation = "upsert_external_source", backend = BACKEND, source.id = %source.id))]
    fn upsert_external_source(&self, source: &ExternalSource) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            let content = serde_json::to_string(&source.content)
                .map_err(|e| Error::storage("serialize_source_content", e))?;
            let analysis = source
                .analysis
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| Error::storage("serialize_source_analysis", e))?;

            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT OR REPLACE INTO external_sources (id, source_type, source_url, content, analysis, integrated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    source.id,
                    source.source_type,
                    source.source_url,
                    content,
                    analysis,
                    format_timestamp(source.integrated_at),
                ],
            )
            .map_err(|e| Error::storage("upsert_external_source", e))?;
            Ok(())
        })();

        record_operation_metrics(
            BACKEND,
            "upsert_external_source",
            start,
            status_label(&result),
        );
        result
    }

    #[instrument(skip(self), fields(operation = "list_external_sources", backend = BACKEND))]
    fn list_external_sources(&self, source_type: Option<&str>) -> Result<Vec<ExternalSource>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SOURCE_COLUMNS} FROM external_sources
                     WHERE (?1 IS NULL OR source_type = ?1)
                     ORDER BY integrated_at DESC, id"
                ))
                .map_err(|e| Error::storage("prepare_list_external_sources", e))?;
            stmt.query_map(params![source_type], |row| source_from_row(row))
                .map_err(|e| Error::storage("list_external_sources", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("list_external_sources", e))
        })();

        record_operation_metrics(
            BACKEND,
            "list_external_sources",
            start,
            status_label(&result),
        );
        result
    }

    #[instrument(skip(self, preference), fields(operation = "set_preference", backend = BACKEND, key = %preference.key))]
    fn set_preference(&self, preference: &Preference) -> Result<()> {
        let start = Instant::now();
        let result = (|| {
            let value = serde_json::to_string(&preference.value)
                .map_err(|e| Error::storage("serialize_preference", e))?;
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "INSERT OR REPLACE INTO preferences (key, value, category, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    preference.key,
                    value,
                    preference.category,
                    format_timestamp(Utc::now()),
                ],
            )
            .map_err(|e| Error::storage("set_preference", e))?;
            Ok(())
        })();

        record_operation_metrics(BACKEND, "set_preference", start, status_label(&result));
        result
    }

    #[instrument(skip(self), fields(operation = "get_preference", backend = BACKEND))]
    fn get_preference(&self, key: &str) -> Result<Option<Preference>> {
        let start = Instant::now();
        let result = {
            let conn = acquire_lock(&self.conn);
            conn.query_row(
                "SELECT key, value, category FROM preferences WHERE key = ?1",
                params![key],
                preference_from_row,
            )
            .optional()
            .map_err(|e| Error::storage("get_preference", e))
        };

        record_operation_metrics(BACKEND, "get_preference", start, status_label(&result));
        result
    }

    #[instrument(skip(self), fields(operation = "list_preferences", backend = BACKEND))]
    fn list_preferences(&self, category: Option<&str>) -> Result<Vec<Preference>> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare(
                    "SELECT key, value, category FROM preferences
                     WHERE (?1 IS NULL OR category = ?1) ORDER BY key",
                )
                .map_err(|e| Error::storage("prepare_list_preferences", e))?;
            stmt.query_map(params![category], |row| preference_from_row(row))
                .map_err(|e| Error::storage("list_preferences", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("list_preferences", e))
        })();

        record_operation_metrics(BACKEND, "list_preferences", start, status_label(&result));
        result
    }

    #[instrument(skip(self), fields(operation = "statistics", backend = BACKEND))]
    fn statistics(&self, top: usize) -> Result<MemoryStatistics> {
        let start = Instant::now();
        let result = (|| {
            let conn = acquire_lock(&self.conn);
            let count = |sql: &str| -> Result<u64> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| u64::try_from(n).unwrap_or(0))
                    .map_err(|e| Error::storage("statistics", e))
            };

            let total_memories = count("SELECT COUNT(*) FROM memories")?;
            let total_external_sources = count("SELECT COUNT(*) FROM external_sources")?;
            let total_preferences = count("SELECT COUNT(*) FROM preferences")?;

            let mut stmt = conn
                .prepare("SELECT category, COUNT(*) FROM memories GROUP BY category")
                .map_err(|e| Error::storage("statistics", e))?;
            let by_category: BTreeMap<String, u64> = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        u64::try_from(row.get::<_, i64>(1)?).unwrap_or(0),
                    ))
                })
                .map_err(|e| Error::storage("statistics", e))?
                .collect::<rusqlite::Result<_>>()
                .map_err(|e| Error::storage("statistics", e))?;

            let mut stmt = conn
                .prepare(
                    "SELECT id, category, access_count FROM memories
                     WHERE access_count > 0 ORDER BY access_count DESC, id LIMIT ?1",
                )
                .map_err(|e| Error::storage("statistics", e))?;
            let top = i64::try_from(top).unwrap_or(i64::MAX);
            let most_accessed = stmt
                .query_map(params![top], |row| {
                    Ok(AccessCount {
                        id: MemoryId::new(row.get::<_, String>(0)?),
                        category: row.get(1)?,
                        access_count: u64::try_from(row.get::<_, i64>(2)?).unwrap_or(0),
                    })
                })
                .map_err(|e| Error::storage("statistics", e))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::storage("statistics", e))?;

            Ok(MemoryStatistics {
                total_memories,
                by_category,
                total_external_sources,
                total_preferences,
                most_accessed,
                learning: LearningMetrics::default(),
            })
        })();

        record_operation_metrics(BACKEND, "statistics", start, status_label(&result));
        result
    }
}
