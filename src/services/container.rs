//! Service container wiring the components together.
//!
//! Construction order: capability index (definition file loaded), memory
//! store (indexes rebuilt), analyzer, monitor, then the orchestrator over
//! all three.

use crate::clock::{Clock, SystemClock};
use crate::config::{OrchestratorConfig, RequestConfig, SwitchboardConfig};
use crate::models::{
    CapabilityEntry, CapabilityKind, ExecutionPlan, HealthSummary, MemoryId, MemoryQuery,
    MemoryRecord, MemoryStatistics, PipelineStats, ProcessingContext,
};
use crate::services::{
    CapabilityIndex, MemoryStore, PipelineOrchestrator, RecordedHealth, RequestAnalyzer,
    SnapshotMonitor,
};
use crate::storage::SqlitePersistenceBackend;
use crate::{MonitorConfig, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Aggregate counters across the system.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatistics {
    /// Pipeline counters.
    pub pipeline: PipelineStats,
    /// Mean processing time per request.
    pub average_processing_ms: f64,
    /// Fraction of requests served from the cache.
    pub cache_hit_rate: f64,
    /// Cached contexts.
    pub cached_contexts: usize,
    /// Memory store counters.
    pub memory: MemoryStatistics,
    /// Latest health sample.
    pub health: HealthSummary,
    /// Registered capabilities per kind.
    pub capabilities: BTreeMap<CapabilityKind, usize>,
}

/// Owns every service and exposes the top-level operations.
pub struct ServiceContainer {
    index: Arc<CapabilityIndex>,
    store: Arc<MemoryStore>,
    analyzer: Arc<RequestAnalyzer>,
    health: Arc<RecordedHealth>,
    monitor: Arc<SnapshotMonitor>,
    orchestrator: PipelineOrchestrator,
    defaults: RequestConfig,
}

impl ServiceContainer {
    /// Builds every service from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if the capability file is
    /// missing or invalid, or a storage error if the store cannot be opened.
    #[tracing::instrument(skip(config), fields(data_dir = %config.data_dir.display()))]
    pub fn from_config(config: &SwitchboardConfig) -> Result<Self> {
        let index = Arc::new(CapabilityIndex::with_tunables(config.scoring.clone()));
        if let Some(path) = &config.capabilities {
            index.load_file(path)?;
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let backend = SqlitePersistenceBackend::new(config.database_path())?;
        let store = Arc::new(MemoryStore::open(Arc::new(backend), Arc::clone(&clock))?);

        Ok(Self::assemble(
            index,
            store,
            config.orchestrator.clone(),
            config.monitor.clone(),
            config.pipeline,
            clock,
        ))
    }

    /// Builds an in-memory container over the given capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if a capability is invalid or the store cannot be
    /// initialized.
    pub fn in_memory(capabilities: impl IntoIterator<Item = CapabilityEntry>) -> Result<Self> {
        Self::in_memory_with_clock(capabilities, Arc::new(SystemClock))
    }

    /// Builds an in-memory container reading time from `clock`.
    ///
    /// # Errors
    ///
    /// Returns an error if a capability is invalid or the store cannot be
    /// initialized.
    pub fn in_memory_with_clock(
        capabilities: impl IntoIterator<Item = CapabilityEntry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let index = Arc::new(CapabilityIndex::new());
        index.register_all(capabilities)?;
        let backend = SqlitePersistenceBackend::in_memory()?;
        let store = Arc::new(MemoryStore::open(Arc::new(backend), Arc::clone(&clock))?);

        Ok(Self::assemble(
            index,
            store,
            OrchestratorConfig::default(),
            MonitorConfig::default(),
            RequestConfig::default(),
            clock,
        ))
    }

    fn assemble(
        index: Arc<CapabilityIndex>,
        store: Arc<MemoryStore>,
        orchestrator: OrchestratorConfig,
        monitor: MonitorConfig,
        defaults: RequestConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let analyzer = Arc::new(RequestAnalyzer::with_clock(
            Arc::clone(&index),
            Arc::clone(&clock),
        ));
        let health = Arc::new(RecordedHealth::default());
        let monitor = Arc::new(SnapshotMonitor::with_clock(
            Arc::clone(&index),
            health.clone(),
            monitor,
            Arc::clone(&clock),
        ));
        let orchestrator = PipelineOrchestrator::new(
            monitor.clone(),
            store.clone(),
            analyzer.clone(),
            orchestrator,
        )
        .with_clock(clock);

        Self {
            index,
            store,
            analyzer,
            health,
            monitor,
            orchestrator,
            defaults,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Returns the capability index.
    #[must_use]
    pub const fn index(&self) -> &Arc<CapabilityIndex> {
        &self.index
    }

    /// Returns the memory store.
    #[must_use]
    pub const fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Returns the snapshot monitor.
    #[must_use]
    pub const fn monitor(&self) -> &Arc<SnapshotMonitor> {
        &self.monitor
    }

    /// Returns the health check that service statuses are reported to.
    #[must_use]
    pub const fn health_reporter(&self) -> &Arc<RecordedHealth> {
        &self.health
    }

    /// Returns the pipeline.
    #[must_use]
    pub const fn orchestrator(&self) -> &PipelineOrchestrator {
        &self.orchestrator
    }

    /// Returns the request config used by [`Self::process_default`].
    #[must_use]
    pub const fn default_request_config(&self) -> &RequestConfig {
        &self.defaults
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Processes a request and records activity for every matched node.
    pub async fn process(&self, request: &str, config: &RequestConfig) -> ProcessingContext {
        let context = self.orchestrator.process(request, config).await;
        for node in &context.execution_plan.matched_nodes {
            self.monitor.record_node_activity(&node.name);
        }
        context
    }

    /// Processes a request with the configured default switches.
    pub async fn process_default(&self, request: &str) -> ProcessingContext {
        let config = self.defaults;
        self.process(request, &config).await
    }

    /// Analyzes a request without running the pipeline.
    #[must_use]
    pub fn analyze(&self, text: &str) -> ExecutionPlan {
        self.analyzer.analyze(text)
    }

    /// Stores a memory record.
    ///
    /// # Errors
    ///
    /// See [`MemoryStore::store`].
    pub fn store_memory(
        &self,
        category: &str,
        content: serde_json::Value,
        tags: BTreeSet<String>,
        source: &str,
    ) -> Result<MemoryId> {
        self.store.store(category, content, tags, source)
    }

    /// Recalls a memory record.
    ///
    /// # Errors
    ///
    /// See [`MemoryStore::recall`].
    pub fn recall(&self, id: &MemoryId) -> Result<MemoryRecord> {
        self.store.recall(id)
    }

    /// Queries memory records.
    ///
    /// # Errors
    ///
    /// See [`MemoryStore::query`].
    pub fn query(&self, query: &MemoryQuery) -> Result<Vec<MemoryRecord>> {
        self.store.query(query)
    }

    /// Returns the latest health summary.
    #[must_use]
    pub fn health_summary(&self) -> HealthSummary {
        self.monitor.health_summary()
    }

    /// Aggregates pipeline, memory, health and capability counters.
    ///
    /// # Errors
    ///
    /// Returns an error if memory statistics cannot be read.
    pub fn statistics(&self) -> Result<SystemStatistics> {
        let pipeline = self.orchestrator.stats();
        Ok(SystemStatistics {
            average_processing_ms: pipeline.average_processing_ms(),
            cache_hit_rate: pipeline.cache_hit_rate(),
            pipeline,
            cached_contexts: self.orchestrator.cache_len(),
            memory: self.store.statistics()?,
            health: self.monitor.health_summary(),
            capabilities: self.index.counts(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceStatus;
    use crate::models::SystemHealth;
    use std::io::Write;

    fn capabilities() -> Vec<CapabilityEntry> {
        vec![
            CapabilityEntry::new("Deploy", CapabilityKind::Workflow)
                .with_slash_command("/deploy")
                .with_triggers(["deploy", "release"]),
            CapabilityEntry::new("scribe", CapabilityKind::Node).with_triggers(["notes"]),
            CapabilityEntry::new("payments", CapabilityKind::Service).with_service_type("api"),
        ]
    }

    #[tokio::test]
    async fn test_process_and_statistics() {
        let container = ServiceContainer::in_memory(capabilities()).unwrap();
        let context = container.process_default("please /deploy now").await;
        assert!(context.execution_plan.confidence >= 0.95);
        assert_eq!(context.execution_plan.matched_workflows[0].name, "Deploy");

        let again = container.process_default("please /deploy now").await;
        assert!(again.cache_hit);

        let stats = container.statistics().unwrap();
        assert_eq!(stats.pipeline.requests_processed, 2);
        assert!((stats.cache_hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.memory.by_category.get("processing_context"), Some(&1));
        assert_eq!(stats.capabilities[&CapabilityKind::Workflow], 1);
    }

    #[tokio::test]
    async fn test_matched_nodes_become_active() {
        let container = ServiceContainer::in_memory(capabilities()).unwrap();
        container.process_default("write the release notes").await;
        let snapshot = container.monitor().sample();
        assert_eq!(snapshot.active_nodes, vec!["scribe"]);
    }

    #[test]
    fn test_health_reporting() {
        let container = ServiceContainer::in_memory(capabilities()).unwrap();
        container.monitor().sample();
        assert_eq!(container.health_summary().health, SystemHealth::Healthy);

        container
            .health_reporter()
            .report("payments", ServiceStatus::Down);
        container.monitor().sample();
        assert_eq!(container.health_summary().health, SystemHealth::Critical);
    }

    #[test]
    fn test_from_config_loads_definitions() {
        let dir = tempfile::TempDir::new().unwrap();
        let caps = dir.path().join("capabilities.yaml");
        let mut file = std::fs::File::create(&caps).unwrap();
        file.write_all(b"capabilities:\n  - name: Deploy\n    kind: workflow\n")
            .unwrap();

        let config = SwitchboardConfig::new()
            .with_data_dir(dir.path().join("data"))
            .with_capabilities(&caps);
        let container = ServiceContainer::from_config(&config).unwrap();
        assert_eq!(container.index().len(), 1);
        assert!(dir.path().join("data").join("memory.db").exists());
    }

    #[test]
    fn test_from_config_rejects_missing_definitions() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = SwitchboardConfig::new()
            .with_data_dir(dir.path())
            .with_capabilities(dir.path().join("missing.yaml"));
        let err = ServiceContainer::from_config(&config).err().unwrap();
        assert!(matches!(err, crate::Error::Configuration(_)));
    }
}
