//! The per-request processing pipeline.
//!
//! ```text
//! request ──► cache? ──hit──► context (cache_hit = true)
//!               │
//!              miss
//!               ▼
//!   ┌─ (a) snapshot ─┐   per-request bounded pool, per-stage deadline,
//!   └─ (b) recall  ──┘   defaults on timeout or failure
//!               ▼
//!   (c) concepts → (d) tasks → (e) comparative analysis → (f) plan
//!               ▼
//!   persist (logged on failure) → cache put → counters
//! ```

use crate::clock::{Clock, SystemClock};
use crate::config::{OrchestratorConfig, RequestConfig};
use crate::models::{
    CONTEXT_VERSION, ExecutionPlan, ExternalSource, MemoryQuery, MemoryRecord, PipelineStats,
    Preference, ProcessingContext, StageWarning, SystemSnapshot,
};
use crate::observability::{RequestContext, scope_request_context};
use crate::services::{
    CapabilityAnalyzer, ContentHasher, ContextCache, LruTtlCache, MemoryProvider, SHORT_ID_LEN,
    StageError, StagePool, SystemStateProvider, assign_tasks, comparative_analysis,
    extract_keywords, identify_concepts, run_blocking,
};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::Instrument;

/// Category of records written for processed requests.
pub const CONTEXT_CATEGORY: &str = "processing_context";
/// Source of records written by the pipeline.
pub const PIPELINE_SOURCE: &str = "pipeline";

const STAGE_SNAPSHOT: &str = "snapshot";
const STAGE_RECALL: &str = "recall";
const STAGE_PERSIST: &str = "persist";

/// What the recall stage gathers.
#[derive(Debug, Default)]
struct Recall {
    memories: Vec<MemoryRecord>,
    preferences: Vec<Preference>,
    external_sources: Vec<ExternalSource>,
}

/// Runs requests through snapshot, recall, derivation and planning.
///
/// `process` never fails: stages that time out or error are replaced by
/// their defaults and reported as warnings on the returned context.
pub struct PipelineOrchestrator {
    state: Arc<dyn SystemStateProvider>,
    memory: Arc<dyn MemoryProvider>,
    analyzer: Arc<dyn CapabilityAnalyzer>,
    cache: Arc<dyn ContextCache>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    stats: Mutex<PipelineStats>,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator with an LRU cache sized from `config` and the
    /// system clock.
    #[must_use]
    pub fn new(
        state: Arc<dyn SystemStateProvider>,
        memory: Arc<dyn MemoryProvider>,
        analyzer: Arc<dyn CapabilityAnalyzer>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            state,
            memory,
            analyzer,
            cache: Arc::new(LruTtlCache::new(config.cache_capacity)),
            clock: Arc::new(SystemClock),
            config,
            stats: Mutex::new(PipelineStats::default()),
        }
    }

    /// Replaces the context cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ContextCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the clock used for timestamps and cache expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the orchestrator configuration.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn lock_stats(&self) -> MutexGuard<'_, PipelineStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the running counters.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.lock_stats().clone()
    }

    /// Drops every cached context.
    pub fn clear_cache(&self) {
        self.cache.clear();
        tracing::info!("context cache cleared");
    }

    /// Returns the number of cached contexts.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Processes one request.
    pub async fn process(&self, request: &str, config: &RequestConfig) -> ProcessingContext {
        let request_hash = ContentHasher::request_key(request, config);
        let context = RequestContext::from_id(request_hash.clone());
        let span = tracing::info_span!("process", request_hash = %context.short_id());

        scope_request_context(context, self.process_scoped(request, config, request_hash))
        .instrument(span)
        .await
    }

    async fn process_scoped(
        &self,
        request: &str,
        config: &RequestConfig,
        request_hash: String,
    ) -> ProcessingContext {
        let started = Instant::now();

        if config.enable_caching
            && let Some(cached) = self.cache.get(&request_hash, self.clock.now())
        {
            let elapsed = elapsed_ms(started);
            self.record_request(elapsed, true, 0, false);
            tracing::debug!("served from cache");
            return cached.as_cache_hit();
        }

        let created_at = self.clock.now();
        let keywords = extract_keywords(request);
        let mut warnings = Vec::new();

        // A stage that overruns its deadline keeps its permit until the
        // provider returns, so permits are never shared across requests.
        let pool = StagePool::new(self.config.max_concurrent_stages, self.config.stage_timeout());
        let snapshot_stage = self.snapshot_stage(&pool, config, created_at);
        let recall_stage = self.recall_stage(&pool, config, &keywords);
        let (snapshot, recall) = if config.enable_parallel {
            tokio::join!(snapshot_stage, recall_stage)
        } else {
            let snapshot = snapshot_stage.await;
            (snapshot, recall_stage.await)
        };

        let snapshot = self.or_default(snapshot, &request_hash, &mut warnings, || {
            SystemSnapshot::empty(created_at)
        });
        let recall = self.or_default(recall, &request_hash, &mut warnings, Recall::default);

        let concepts = identify_concepts(request, &recall.memories);
        let tasks = assign_tasks(&concepts);
        let comparative = if config.enable_external_sources && config.enable_comparative_analysis
        {
            comparative_analysis(&recall.external_sources)
        } else {
            None
        };
        let execution_plan = if config.use_analyzer {
            self.analyzer.analyze(request)
        } else {
            ExecutionPlan::empty(created_at)
        };

        let mut context = ProcessingContext {
            version: CONTEXT_VERSION,
            request: request.to_string(),
            request_hash: request_hash.clone(),
            created_at,
            keywords,
            snapshot,
            memories: recall.memories,
            preferences: recall.preferences,
            external_sources: recall.external_sources,
            concepts,
            tasks,
            comparative_analysis: comparative,
            execution_plan,
            warnings: Vec::new(),
            processing_time_ms: 0,
            cache_hit: false,
        };

        let persisted = self.persist(&context).await;
        let persist_failed = persisted.is_err();
        if let Err(err) = persisted {
            stage_failed(&err, &request_hash, &mut warnings, "processing context not persisted");
        }

        let stage_failures = warnings.len();
        context.warnings = warnings;
        context.processing_time_ms = elapsed_ms(started);

        if config.enable_caching {
            self.cache.put(
                &request_hash,
                context.clone(),
                self.clock.now(),
                config.cache_ttl(),
            );
        }

        self.record_request(context.processing_time_ms, false, stage_failures, persist_failed);
        tracing::info!(
            confidence = context.execution_plan.confidence,
            memories = context.memories.len(),
            warnings = context.warnings.len(),
            elapsed_ms = context.processing_time_ms,
            "request processed"
        );
        context
    }

    // =========================================================================
    // Stages
    // =========================================================================

    async fn snapshot_stage(
        &self,
        pool: &StagePool,
        config: &RequestConfig,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<SystemSnapshot, StageError> {
        if !config.use_snapshot {
            return Ok(SystemSnapshot::empty(at));
        }
        let state = Arc::clone(&self.state);
        pool.run(STAGE_SNAPSHOT, move || state.snapshot()).await
    }

    async fn recall_stage(
        &self,
        pool: &StagePool,
        config: &RequestConfig,
        keywords: &[String],
    ) -> Result<Recall, StageError> {
        if !config.use_memory {
            return Ok(Recall::default());
        }

        let memory = Arc::clone(&self.memory);
        let tags: Vec<String> = keywords
            .iter()
            .take(self.config.recall_keyword_limit)
            .cloned()
            .collect();
        let per_keyword = self.config.recall_per_keyword;
        let with_sources = config.enable_external_sources;

        pool.run(STAGE_RECALL, move || {
            let mut seen = HashSet::new();
            let mut memories = Vec::new();
            for tag in tags {
                for record in memory.query(&MemoryQuery::new(per_keyword).with_tag(tag))? {
                    if seen.insert(record.id.clone()) {
                        memories.push(record);
                    }
                }
            }

            Ok(Recall {
                memories,
                preferences: memory.preferences()?,
                external_sources: if with_sources {
                    memory.external_sources()?
                } else {
                    Vec::new()
                },
            })
        })
        .await
    }

    /// Writes a compact summary of the context as a new memory record.
    ///
    /// The creation time is part of the content, so every processing of a
    /// request gets its own id. Runs outside the stage pool.
    async fn persist(&self, context: &ProcessingContext) -> Result<(), StageError> {
        let content = serde_json::json!({
            "request": context.request,
            "created_at": context.created_at.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            "request_hash": context.request_hash,
            "keywords": context.keywords,
            "concepts": context.concepts,
            "tasks": context.tasks,
            "confidence": context.execution_plan.confidence,
            "matched": {
                "nodes": names(&context.execution_plan.matched_nodes),
                "workflows": names(&context.execution_plan.matched_workflows),
                "tools": names(&context.execution_plan.matched_tools),
                "services": names(&context.execution_plan.matched_services),
            },
        });
        let tags: BTreeSet<String> = context.keywords.iter().cloned().collect();
        let memory = Arc::clone(&self.memory);

        run_blocking(STAGE_PERSIST, move || {
            memory.store(CONTEXT_CATEGORY, content, tags, PIPELINE_SOURCE)
        })
        .await
        .map(|_| ())
    }

    fn or_default<T>(
        &self,
        result: Result<T, StageError>,
        request_hash: &str,
        warnings: &mut Vec<StageWarning>,
        default: impl FnOnce() -> T,
    ) -> T {
        result.unwrap_or_else(|err| {
            stage_failed(&err, request_hash, warnings, "stage replaced by default");
            default()
        })
    }

    fn record_request(
        &self,
        elapsed_ms: u64,
        cache_hit: bool,
        stage_failures: usize,
        persist_failed: bool,
    ) {
        {
            let mut stats = self.lock_stats();
            stats.requests_processed += 1;
            stats.total_processing_ms = stats.total_processing_ms.saturating_add(elapsed_ms);
            if cache_hit {
                stats.cache_hits += 1;
            }
            stats.stage_failures += u64::try_from(stage_failures).unwrap_or(u64::MAX);
            if persist_failed {
                stats.persist_failures += 1;
            }
        }

        metrics::counter!(
            "pipeline_requests_total",
            "cache" => if cache_hit { "hit" } else { "miss" }
        )
        .increment(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("pipeline_processing_duration_ms").record(elapsed_ms as f64);
    }
}

/// Logs, counts and records a failed stage as a warning.
fn stage_failed(
    err: &StageError,
    request_hash: &str,
    warnings: &mut Vec<StageWarning>,
    outcome: &'static str,
) {
    tracing::warn!(
        stage = err.stage(),
        request_hash = %short(request_hash),
        error = %err,
        "{outcome}"
    );
    metrics::counter!(
        "pipeline_stage_failures_total",
        "stage" => err.stage(),
        "reason" => err.reason()
    )
    .increment(1);
    warnings.push(StageWarning {
        stage: err.stage().to_string(),
        request_hash: request_hash.to_string(),
        message: err.to_string(),
    });
}

fn names(matches: &[crate::models::CapabilityMatch]) -> Vec<&str> {
    matches.iter().map(|m| m.name.as_str()).collect()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn short(hash: &str) -> &str {
    hash.get(..SHORT_ID_LEN).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::clock::ManualClock;
    use crate::models::MemoryId;
    use crate::services::MemoryStore;
    use serde_json::json;

    struct FixedState;

    impl SystemStateProvider for FixedState {
        fn snapshot(&self) -> crate::Result<SystemSnapshot> {
            let mut snapshot = SystemSnapshot::empty(chrono::Utc::now());
            snapshot.workflows_available = 3;
            Ok(snapshot)
        }
    }

    struct FailingState;

    impl SystemStateProvider for FailingState {
        fn snapshot(&self) -> crate::Result<SystemSnapshot> {
            Err(Error::OperationFailed {
                operation: "snapshot".to_string(),
                cause: "health endpoint offline".to_string(),
            })
        }
    }

    struct NoPlan;

    impl CapabilityAnalyzer for NoPlan {
        fn analyze(&self, _text: &str) -> ExecutionPlan {
            ExecutionPlan::default()
        }
    }

    struct BrokenMemory;

    impl MemoryProvider for BrokenMemory {
        fn query(&self, _query: &MemoryQuery) -> crate::Result<Vec<MemoryRecord>> {
            Err(Error::storage("query", "locked"))
        }
        fn preferences(&self) -> crate::Result<Vec<Preference>> {
            Ok(Vec::new())
        }
        fn external_sources(&self) -> crate::Result<Vec<ExternalSource>> {
            Ok(Vec::new())
        }
        fn store(
            &self,
            _category: &str,
            _content: serde_json::Value,
            _tags: BTreeSet<String>,
            _source: &str,
        ) -> crate::Result<MemoryId> {
            Err(Error::storage("store", "read-only"))
        }
    }

    fn orchestrator(
        state: Arc<dyn SystemStateProvider>,
        memory: Arc<dyn MemoryProvider>,
    ) -> PipelineOrchestrator {
        PipelineOrchestrator::new(state, memory, Arc::new(NoPlan), OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn test_recall_and_persist() {
        let store = Arc::new(MemoryStore::in_memory().unwrap());
        store
            .store("note", json!("rollback plan"), ["deployment".to_string()].into(), "cli")
            .unwrap();
        store.set_preference("region", json!("eu"), "infra").unwrap();
        store
            .store_external_source("docs", Some("https://a"), json!("runbook"), None)
            .unwrap();

        let pipeline = orchestrator(Arc::new(FixedState), store.clone());
        let context = pipeline
            .process("plan the deployment rollout", &RequestConfig::default())
            .await;

        assert!(!context.cache_hit);
        assert!(context.warnings.is_empty());
        assert_eq!(context.snapshot.workflows_available, 3);
        assert_eq!(context.keywords, vec!["plan", "deployment", "rollout"]);
        assert_eq!(context.memories.len(), 1);
        assert_eq!(context.preferences.len(), 1);
        assert_eq!(context.external_sources.len(), 1);
        assert!(context.concepts.contains(&"deployment".to_string()));
        assert_eq!(context.tasks[0].action, "deploy");
        assert_eq!(
            context.comparative_analysis.as_deref(),
            Some("Analyzed 1 external sources | - docs: 1 sources")
        );

        let persisted = store
            .query(&MemoryQuery::new(10).with_category(CONTEXT_CATEGORY))
            .unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].source, PIPELINE_SOURCE);
        assert!(persisted[0].tags.contains("rollout"));
    }

    #[tokio::test]
    async fn test_failed_stages_default_and_warn() {
        let pipeline = orchestrator(Arc::new(FailingState), Arc::new(BrokenMemory));
        let context = pipeline
            .process("audit security", &RequestConfig::default().sequential())
            .await;

        assert!(context.snapshot.is_empty());
        assert!(context.memories.is_empty());
        let stages: Vec<&str> = context.warnings.iter().map(|w| w.stage.as_str()).collect();
        assert_eq!(stages, vec![STAGE_SNAPSHOT, STAGE_RECALL, STAGE_PERSIST]);
        assert!(context.warnings.iter().all(|w| w.request_hash == context.request_hash));

        let stats = pipeline.stats();
        assert_eq!(stats.requests_processed, 1);
        assert_eq!(stats.stage_failures, 3);
        assert_eq!(stats.persist_failures, 1);
    }

    #[test]
    fn test_persist_failure_counts_as_stage_failure() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let pipeline = orchestrator(Arc::new(FixedState), Arc::new(BrokenMemory));
        let config = RequestConfig {
            use_memory: false,
            ..RequestConfig::default()
        };

        let context = metrics::with_local_recorder(&recorder, || {
            runtime.block_on(pipeline.process("deploy it", &config))
        });

        assert_eq!(context.warnings.len(), 1);
        assert_eq!(context.warnings[0].stage, STAGE_PERSIST);
        assert!(context.warnings[0].message.contains("read-only"));
        assert_eq!(pipeline.stats().persist_failures, 1);
        let rendered = handle.render();
        assert!(rendered.contains("pipeline_stage_failures_total"));
        assert!(rendered.contains(r#"stage="persist""#));
    }

    #[tokio::test]
    async fn test_disabled_stages_are_skipped_without_warnings() {
        let pipeline = orchestrator(Arc::new(FailingState), Arc::new(BrokenMemory));
        let config = RequestConfig {
            use_snapshot: false,
            use_memory: false,
            ..RequestConfig::default()
        };
        let context = pipeline.process("hello there", &config).await;
        let stages: Vec<&str> = context.warnings.iter().map(|w| w.stage.as_str()).collect();
        assert_eq!(stages, vec![STAGE_PERSIST]);
    }

    #[tokio::test]
    async fn test_cache_hit_and_ttl() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::in_memory().unwrap());
        let pipeline = orchestrator(Arc::new(FixedState), store.clone()).with_clock(clock.clone());
        let config = RequestConfig::default().with_cache_ttl_minutes(30);

        assert!(!pipeline.process("deploy it", &config).await.cache_hit);
        assert!(pipeline.process("deploy it", &config).await.cache_hit);

        clock.advance(chrono::Duration::minutes(31));
        assert!(!pipeline.process("deploy it", &config).await.cache_hit);

        let stats = pipeline.stats();
        assert_eq!(stats.requests_processed, 3);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(pipeline.cache_len(), 1);

        let audit = store
            .query(&MemoryQuery::new(10).with_category(CONTEXT_CATEGORY))
            .unwrap();
        assert_eq!(audit.len(), 2);
        assert_ne!(audit[0].content["created_at"], audit[1].content["created_at"]);

        pipeline.clear_cache();
        assert_eq!(pipeline.cache_len(), 0);
    }

    #[tokio::test]
    async fn test_caching_disabled() {
        let store = Arc::new(MemoryStore::in_memory().unwrap());
        let pipeline = orchestrator(Arc::new(FixedState), store);
        let config = RequestConfig::default().without_cache();
        pipeline.process("deploy it", &config).await;
        assert!(!pipeline.process("deploy it", &config).await.cache_hit);
        assert_eq!(pipeline.cache_len(), 0);
    }
}
