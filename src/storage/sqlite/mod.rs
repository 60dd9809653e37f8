//! Shared `SQLite` infrastructure for the persistence backend.
//!
//! - [`connection`]: lock acquisition with poison recovery, pragmas
//! - [`record_row`]: row conversion for records, sources and preferences
//! - [`metrics`]: per-operation counters and latency histograms

mod connection;
mod metrics;
mod record_row;

pub use connection::{acquire_lock, configure_connection, open_connection};
pub use metrics::{record_operation_metrics, status_label};
pub use record_row::{
    RECORD_COLUMNS, SOURCE_COLUMNS, count_to_sql, format_timestamp, preference_from_row,
    record_from_row, source_from_row,
};
