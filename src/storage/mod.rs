//! Storage layer.
//!
//! `SQLite` is the authoritative store for memory records, external sources
//! and preferences. The secondary indexes used by queries are kept in memory
//! by [`crate::services::MemoryStore`] and rebuilt from
//! [`PersistenceBackend::scan_index_keys`].

// Allow significant_drop_tightening - dropping database connections slightly early
// provides no meaningful benefit.
#![allow(clippy::significant_drop_tightening)]
// Closures are immediately invoked to scope the lock and the metrics timer.
#![allow(clippy::redundant_closure_call)]

pub mod persistence;
pub mod sqlite;
pub mod traits;

pub use persistence::SqlitePersistenceBackend;
pub use traits::{PersistenceBackend, RecordKeys};
