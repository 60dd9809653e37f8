//! # Switchboard
//!
//! A personal automation assistant that routes free-text requests to
//! registered capabilities.
//!
//! Switchboard scores a request against a capability index, runs a
//! multi-stage pipeline (system snapshot, memory recall, concept and task
//! derivation, execution planning) with bounded concurrency and a response
//! cache, and records every processed request into a persisted, indexed
//! memory store.
//!
//! ## Components
//!
//! - [`CapabilityIndex`]: registry of nodes, workflows, tools and services
//! - [`MemoryStore`]: `SQLite`-backed records with category/tag/source indexes
//! - [`RequestAnalyzer`]: tiered keyword scoring into an [`ExecutionPlan`]
//! - [`SnapshotMonitor`]: periodic health sampling with bounded histories
//! - [`PipelineOrchestrator`]: the per-request pipeline
//!
//! ## Example
//!
//! ```rust,ignore
//! use switchboard::{RequestConfig, ServiceContainer};
//!
//! let services = ServiceContainer::from_config(&config)?;
//! let context = services.process("please /deploy now", &RequestConfig::default()).await;
//! assert!(context.execution_plan.confidence >= 0.95);
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod clock;
pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    MonitorConfig, OrchestratorConfig, RequestConfig, ScoringTunables, SwitchboardConfig,
};
pub use models::{
    CapabilityEntry, CapabilityKind, CapabilityMatch, ExecutionPlan, ExternalSource, MatchTier,
    MemoryId, MemoryQuery, MemoryRecord, ProcessingContext, ServiceStatus, SystemHealth,
    SystemSnapshot,
};
pub use services::{
    CapabilityAnalyzer, CapabilityIndex, ContextCache, HealthCheck, LruTtlCache, MemoryProvider,
    MemoryStore, PipelineOrchestrator, RequestAnalyzer, ServiceContainer, SnapshotMonitor,
    StageError, SystemStateProvider,
};
pub use storage::{PersistenceBackend, SqlitePersistenceBackend};

/// Error type for switchboard operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Configuration` | Capability definitions are missing or malformed, config file is invalid |
/// | `NotFound` | Unknown memory id, capability name, or preference key |
/// | `StageTimeout` | A pipeline stage exceeded its deadline (recovered inside the pipeline) |
/// | `Storage` | `SQLite` reads or writes fail |
/// | `InvalidInput` | Caller-supplied arguments are malformed |
/// | `OperationFailed` | Anything else: observability init, I/O outside the store |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid or missing capability definitions or configuration.
    ///
    /// Fatal at startup: the container refuses to build with a broken
    /// capability file.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An id or name was not known.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// What was being looked up (e.g. "memory", "workflow").
        kind: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// A pipeline stage exceeded its deadline.
    ///
    /// The orchestrator never surfaces this from `process`; it is logged and
    /// replaced by the stage's default result.
    #[error("stage '{stage}' timed out after {timeout_ms}ms")]
    StageTimeout {
        /// The stage that timed out.
        stage: String,
        /// The deadline that was exceeded.
        timeout_ms: u64,
    },

    /// A persisted read or write failed.
    #[error("storage operation '{operation}' failed: {cause}")]
    Storage {
        /// The storage operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Builds a [`Error::Storage`] from an operation name and any displayable cause.
    pub fn storage(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::Storage {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Returns true for [`Error::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type alias for switchboard operations.
pub type Result<T> = std::result::Result<T, Error>;
