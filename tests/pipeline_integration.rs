//! Integration tests for the request pipeline.
//!
//! Collaborators are replaced by doubles that count calls, so the tests can
//! tell whether a request actually reached the providers or was served from
//! the context cache.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use switchboard::models::{ExternalSource, Preference};
use switchboard::{
    CapabilityEntry, CapabilityIndex, CapabilityKind, LruTtlCache, ManualClock, MemoryId,
    MemoryProvider, MemoryQuery, MemoryRecord, MemoryStore, OrchestratorConfig,
    PipelineOrchestrator, RequestAnalyzer, RequestConfig, ServiceContainer, SystemSnapshot,
    SystemStateProvider,
};

// ============================================================================
// Test doubles
// ============================================================================

#[derive(Default)]
struct CountingState {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingState {
    fn slow(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SystemStateProvider for CountingState {
    fn snapshot(&self) -> switchboard::Result<SystemSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let mut snapshot = SystemSnapshot::empty(chrono::Utc::now());
        snapshot.workflows_available = 2;
        Ok(snapshot)
    }
}

/// Delegates to a real store and counts recall queries.
struct CountingMemory {
    inner: MemoryStore,
    queries: AtomicUsize,
}

impl CountingMemory {
    fn new() -> Self {
        Self {
            inner: MemoryStore::in_memory().unwrap(),
            queries: AtomicUsize::new(0),
        }
    }

    fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl MemoryProvider for CountingMemory {
    fn query(&self, query: &MemoryQuery) -> switchboard::Result<Vec<MemoryRecord>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(query)
    }

    fn preferences(&self) -> switchboard::Result<Vec<Preference>> {
        self.inner.get_all_preferences(None)
    }

    fn external_sources(&self) -> switchboard::Result<Vec<ExternalSource>> {
        self.inner.external_sources(None)
    }

    fn store(
        &self,
        category: &str,
        content: serde_json::Value,
        tags: BTreeSet<String>,
        source: &str,
    ) -> switchboard::Result<MemoryId> {
        self.inner.store(category, content, tags, source)
    }
}

fn capabilities() -> Arc<CapabilityIndex> {
    let index = CapabilityIndex::new();
    index
        .register_all([
            CapabilityEntry::new("Deploy", CapabilityKind::Workflow)
                .with_slash_command("/deploy")
                .with_triggers(["deploy", "release"]),
            CapabilityEntry::new("inventory", CapabilityKind::Node).with_triggers(["inventory"]),
            CapabilityEntry::new("edit_file", CapabilityKind::Tool).with_primary_tool("editor"),
            CapabilityEntry::new("billing", CapabilityKind::Service).with_service_type("api"),
        ])
        .unwrap();
    Arc::new(index)
}

fn pipeline(
    state: Arc<CountingState>,
    memory: Arc<CountingMemory>,
    config: OrchestratorConfig,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        state,
        memory,
        Arc::new(RequestAnalyzer::new(capabilities())),
        config,
    )
}

// ============================================================================
// Cache behaviour
// ============================================================================

#[tokio::test]
async fn test_cache_hit_skips_providers() {
    let state = Arc::new(CountingState::default());
    let memory = Arc::new(CountingMemory::new());
    let pipeline = pipeline(state.clone(), memory.clone(), OrchestratorConfig::default());
    let config = RequestConfig::default();

    let first = pipeline.process("check the inventory levels", &config).await;
    assert!(!first.cache_hit);
    let state_calls = state.calls();
    let memory_queries = memory.queries();
    assert_eq!(state_calls, 1);
    assert!(memory_queries > 0);

    let second = pipeline.process("check the inventory levels", &config).await;
    assert!(second.cache_hit);
    assert_eq!(second.request_hash, first.request_hash);
    assert_eq!(second.execution_plan, first.execution_plan);
    assert_eq!(state.calls(), state_calls);
    assert_eq!(memory.queries(), memory_queries);
}

#[tokio::test]
async fn test_cache_expires_after_ttl() {
    let clock = Arc::new(ManualClock::default());
    let state = Arc::new(CountingState::default());
    let memory = Arc::new(CountingMemory::new());
    let pipeline = pipeline(state.clone(), memory, OrchestratorConfig::default())
        .with_clock(clock.clone());
    let config = RequestConfig::default().with_cache_ttl_minutes(5);

    pipeline.process("release the build", &config).await;
    clock.advance(chrono::Duration::minutes(4));
    assert!(pipeline.process("release the build", &config).await.cache_hit);
    assert_eq!(state.calls(), 1);

    clock.advance(chrono::Duration::minutes(2));
    assert!(!pipeline.process("release the build", &config).await.cache_hit);
    assert_eq!(state.calls(), 2);
}

#[tokio::test]
async fn test_injected_cache_bounds_entries() {
    let state = Arc::new(CountingState::default());
    let memory = Arc::new(CountingMemory::new());
    let config = OrchestratorConfig::new()
        .with_max_concurrent_stages(1)
        .with_cache_capacity(64);
    let pipeline =
        pipeline(state.clone(), memory, config).with_cache(Arc::new(LruTtlCache::new(1)));
    let request = RequestConfig::default();

    pipeline.process("release the build", &request).await;
    pipeline.process("check the inventory", &request).await;
    assert_eq!(pipeline.cache_len(), 1);

    assert!(!pipeline.process("release the build", &request).await.cache_hit);
    assert!(pipeline.process("release the build", &request).await.cache_hit);
    assert_eq!(state.calls(), 3);
    assert_eq!(pipeline.config().max_concurrent_stages, 1);
}

#[tokio::test]
async fn test_different_config_is_a_different_cache_key() {
    let state = Arc::new(CountingState::default());
    let memory = Arc::new(CountingMemory::new());
    let pipeline = pipeline(state.clone(), memory, OrchestratorConfig::default());

    let parallel = pipeline
        .process("release the build", &RequestConfig::default())
        .await;
    let sequential = pipeline
        .process("release the build", &RequestConfig::default().sequential())
        .await;

    assert!(!sequential.cache_hit);
    assert_ne!(parallel.request_hash, sequential.request_hash);
    assert_eq!(state.calls(), 2);
}

// ============================================================================
// Stage failures
// ============================================================================

#[tokio::test]
async fn test_slow_state_provider_yields_empty_snapshot() {
    let state = Arc::new(CountingState::slow(Duration::from_millis(500)));
    let memory = Arc::new(CountingMemory::new());
    let config = OrchestratorConfig::new().with_stage_timeout_ms(50);
    let pipeline = pipeline(state, memory, config);

    let started = std::time::Instant::now();
    let context = pipeline
        .process("/deploy the service", &RequestConfig::default())
        .await;
    let elapsed = started.elapsed();

    // Two pooled stages at 50ms each, well short of the 500ms provider.
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
    assert!(context.snapshot.is_empty());
    assert!(context.is_degraded());
    assert_eq!(context.warnings.len(), 1);
    assert_eq!(context.warnings[0].stage, "snapshot");
    assert!(context.warnings[0].message.contains("timed out"));
    assert!(context.execution_plan.confidence >= 0.95);
    assert_eq!(pipeline.stats().stage_failures, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stalled_state_provider_does_not_starve_later_requests() {
    let state = Arc::new(CountingState::slow(Duration::from_secs(2)));
    let memory = Arc::new(CountingMemory::new());
    memory
        .inner
        .store("note", json!("inventory counts"), ["inventory".to_string()].into(), "cli")
        .unwrap();
    let config = OrchestratorConfig::new().with_stage_timeout_ms(100);
    let pipeline = pipeline(state.clone(), memory.clone(), config);

    for word in ["alpha", "bravo", "charlie", "delta", "echo"] {
        let context = pipeline
            .process(&format!("inventory report {word}"), &RequestConfig::default())
            .await;
        let stages: Vec<&str> = context.warnings.iter().map(|w| w.stage.as_str()).collect();
        assert_eq!(stages, vec!["snapshot"], "request {word}");
        assert!(
            context
                .memories
                .iter()
                .any(|m| m.content == json!("inventory counts")),
            "request {word} lost its recall"
        );
    }

    let audit = memory
        .inner
        .query(&MemoryQuery::new(10).with_category(switchboard::services::CONTEXT_CATEGORY))
        .unwrap();
    assert_eq!(audit.len(), 5);
    assert_eq!(state.calls(), 5);
    assert_eq!(pipeline.stats().stage_failures, 5);
}

#[tokio::test]
async fn test_sequential_and_parallel_agree() {
    let seeded = || {
        let memory = Arc::new(CountingMemory::new());
        memory
            .inner
            .store("note", json!("inventory counts"), ["inventory".to_string()].into(), "cli")
            .unwrap();
        pipeline(
            Arc::new(CountingState::default()),
            memory,
            OrchestratorConfig::default(),
        )
    };

    let parallel = seeded()
        .process("inventory report", &RequestConfig::default())
        .await;
    let sequential = seeded()
        .process("inventory report", &RequestConfig::default().sequential())
        .await;

    assert_eq!(parallel.keywords, sequential.keywords);
    assert_eq!(parallel.concepts, sequential.concepts);
    assert_eq!(parallel.memories, sequential.memories);
    assert_eq!(parallel.execution_plan.matched_nodes, sequential.execution_plan.matched_nodes);
    assert_eq!(parallel.memories.len(), 1);
    assert_eq!(parallel.memories[0].content, json!("inventory counts"));
}

// ============================================================================
// End to end through the container
// ============================================================================

#[tokio::test]
async fn test_container_routes_slash_command() {
    let container = ServiceContainer::in_memory(capabilities().entries(None)).unwrap();

    let context = container.process_default("please /deploy now").await;
    assert!(context.execution_plan.confidence >= 0.95);
    assert_eq!(context.execution_plan.matched_workflows[0].name, "Deploy");

    let empty = container.process_default("   ").await;
    assert!(empty.execution_plan.is_empty());
    assert!(empty.execution_plan.confidence.abs() < f64::EPSILON);

    let stats = container.statistics().unwrap();
    assert_eq!(stats.pipeline.requests_processed, 2);
    assert_eq!(stats.capabilities[&CapabilityKind::Workflow], 1);
}

#[tokio::test]
async fn test_processed_requests_are_recallable() {
    let container = ServiceContainer::in_memory(capabilities().entries(None)).unwrap();
    container
        .process_default("release checklist for friday")
        .await;

    let records = container
        .query(&MemoryQuery::new(10).with_tag("checklist"))
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, switchboard::services::CONTEXT_CATEGORY);
    assert_eq!(records[0].content["request"], "release checklist for friday");
}
