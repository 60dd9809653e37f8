//! Collaborator traits injected into the pipeline and the monitor.
//!
//! The orchestrator only talks to its collaborators through these traits,
//! so tests can swap in doubles that count calls or stall on purpose.

use crate::Result;
use crate::models::{
    CapabilityEntry, ExecutionPlan, ExternalSource, MemoryId, MemoryQuery, MemoryRecord,
    Preference, ServiceStatus, SystemSnapshot,
};
use crate::services::{MemoryStore, RequestAnalyzer, SnapshotMonitor};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

/// Supplies the system snapshot for a request.
pub trait SystemStateProvider: Send + Sync {
    /// Builds a point-in-time snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    fn snapshot(&self) -> Result<SystemSnapshot>;
}

/// Reads and writes memories on behalf of the pipeline.
pub trait MemoryProvider: Send + Sync {
    /// Queries records.
    ///
    /// # Errors
    ///
    /// Returns an error if records cannot be read.
    fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>>;

    /// Returns every preference.
    ///
    /// # Errors
    ///
    /// Returns an error if preferences cannot be read.
    fn preferences(&self) -> Result<Vec<Preference>>;

    /// Returns every external source.
    ///
    /// # Errors
    ///
    /// Returns an error if sources cannot be read.
    fn external_sources(&self) -> Result<Vec<ExternalSource>>;

    /// Stores a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn store(
        &self,
        category: &str,
        content: serde_json::Value,
        tags: BTreeSet<String>,
        source: &str,
    ) -> Result<MemoryId>;
}

/// Turns request text into an execution plan.
pub trait CapabilityAnalyzer: Send + Sync {
    /// Analyzes `text`. Must be deterministic for a fixed registry.
    fn analyze(&self, text: &str) -> ExecutionPlan;
}

/// Reports the status of a registered service.
pub trait HealthCheck: Send + Sync {
    /// Returns the current status of `service`.
    fn check(&self, service: &CapabilityEntry) -> ServiceStatus;
}

impl SystemStateProvider for SnapshotMonitor {
    fn snapshot(&self) -> Result<SystemSnapshot> {
        Ok(self.current_state())
    }
}

impl MemoryProvider for MemoryStore {
    fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        Self::query(self, query)
    }

    fn preferences(&self) -> Result<Vec<Preference>> {
        self.get_all_preferences(None)
    }

    fn external_sources(&self) -> Result<Vec<ExternalSource>> {
        Self::external_sources(self, None)
    }

    fn store(
        &self,
        category: &str,
        content: serde_json::Value,
        tags: BTreeSet<String>,
        source: &str,
    ) -> Result<MemoryId> {
        Self::store(self, category, content, tags, source)
    }
}

impl CapabilityAnalyzer for RequestAnalyzer {
    fn analyze(&self, text: &str) -> ExecutionPlan {
        Self::analyze(self, text)
    }
}

/// Health check backed by reported statuses.
///
/// Services nobody has reported on get the fallback status, healthy unless
/// configured otherwise.
#[derive(Debug)]
pub struct RecordedHealth {
    statuses: RwLock<BTreeMap<String, ServiceStatus>>,
    fallback: ServiceStatus,
}

impl Default for RecordedHealth {
    fn default() -> Self {
        Self::new(ServiceStatus::Healthy)
    }
}

impl RecordedHealth {
    /// Creates a health check that answers `fallback` for unreported services.
    #[must_use]
    pub const fn new(fallback: ServiceStatus) -> Self {
        Self {
            statuses: RwLock::new(BTreeMap::new()),
            fallback,
        }
    }

    /// Records the status of a service by name.
    pub fn report(&self, service: impl Into<String>, status: ServiceStatus) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service.into(), status);
    }
}

impl HealthCheck for RecordedHealth {
    fn check(&self, service: &CapabilityEntry) -> ServiceStatus {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&service.name)
            .copied()
            .unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CapabilityKind;

    #[test]
    fn test_recorded_health() {
        let health = RecordedHealth::default();
        let cache = CapabilityEntry::new("cache", CapabilityKind::Service);
        assert_eq!(health.check(&cache), ServiceStatus::Healthy);

        health.report("cache", ServiceStatus::Down);
        assert_eq!(health.check(&cache), ServiceStatus::Down);

        let strict = RecordedHealth::new(ServiceStatus::Unknown);
        assert_eq!(strict.check(&cache), ServiceStatus::Unknown);
    }
}
