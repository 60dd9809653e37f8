//! Row conversion for the `memories`, `external_sources` and `preferences`
//! tables.
//!
//! Timestamps are stored as RFC 3339 UTC text with microsecond precision, so
//! lexical order matches chronological order. Tags and JSON payloads are
//! stored as JSON text.

use crate::models::{ExternalSource, MemoryId, MemoryRecord, Preference};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use std::collections::BTreeSet;

/// Column list matching [`record_from_row`].
pub const RECORD_COLUMNS: &str = "id, category, content, tags, source, timestamp, \
     relevance_score, access_count, last_accessed";

/// Column list matching [`source_from_row`].
pub const SOURCE_COLUMNS: &str =
    "id, source_type, source_url, content, analysis, integrated_at";

/// Formats a timestamp for storage.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Converts a count for storage. `SQLite` integers are signed.
#[must_use]
pub fn count_to_sql(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_json(idx: usize, raw: &str) -> rusqlite::Result<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| conversion_error(idx, e))
}

/// Builds a [`MemoryRecord`] from a row selected with [`RECORD_COLUMNS`].
///
/// # Errors
///
/// Returns a conversion error if a JSON or timestamp column is malformed.
pub fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let id: String = row.get(0)?;
    let category: String = row.get(1)?;
    let content: String = row.get(2)?;
    let tags: String = row.get(3)?;
    let source: String = row.get(4)?;
    let timestamp: String = row.get(5)?;
    let relevance_score: f64 = row.get(6)?;
    let access_count: i64 = row.get(7)?;
    let last_accessed: Option<String> = row.get(8)?;

    let tags: BTreeSet<String> = serde_json::from_str(&tags).map_err(|e| conversion_error(3, e))?;

    Ok(MemoryRecord {
        id: MemoryId::new(id),
        category,
        content: parse_json(2, &content)?,
        tags,
        source,
        timestamp: parse_timestamp(5, &timestamp)?,
        relevance_score,
        access_count: u64::try_from(access_count).unwrap_or(0),
        last_accessed: last_accessed
            .as_deref()
            .map(|raw| parse_timestamp(8, raw))
            .transpose()?,
    })
}

/// Builds an [`ExternalSource`] from a row selected with [`SOURCE_COLUMNS`].
///
/// # Errors
///
/// Returns a conversion error if a JSON or timestamp column is malformed.
pub fn source_from_row(row: &Row<'_>) -> rusqlite::Result<ExternalSource> {
    let content: String = row.get(3)?;
    let analysis: Option<String> = row.get(4)?;
    let integrated_at: String = row.get(5)?;

    Ok(ExternalSource {
        id: row.get(0)?,
        source_type: row.get(1)?,
        source_url: row.get(2)?,
        content: parse_json(3, &content)?,
        analysis: analysis.as_deref().map(|raw| parse_json(4, raw)).transpose()?,
        integrated_at: parse_timestamp(5, &integrated_at)?,
    })
}

/// Builds a [`Preference`] from a `key, value, category` row.
///
/// # Errors
///
/// Returns a conversion error if the value is not valid JSON.
pub fn preference_from_row(row: &Row<'_>) -> rusqlite::Result<Preference> {
    let value: String = row.get(1)?;
    Ok(Preference {
        key: row.get(0)?,
        value: parse_json(1, &value)?,
        category: row.get(2)?,
    })
}
