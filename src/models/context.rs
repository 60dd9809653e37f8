//! Per-request results produced by the pipeline.

use super::{ExecutionPlan, ExternalSource, MemoryRecord, Preference, SystemSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current processing context format version.
pub const CONTEXT_VERSION: u32 = 1;

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    /// Do first.
    High,
    /// Normal.
    Medium,
    /// When convenient.
    Low,
}

impl TaskPriority {
    /// Returns the priority as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A task derived from a concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// The concept that produced the task.
    pub concept: String,
    /// Verb (e.g. `deploy`).
    pub action: String,
    /// Object of the action (e.g. `system`).
    pub target: String,
    /// Priority.
    pub priority: TaskPriority,
}

/// A stage that timed out or failed and was replaced by its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageWarning {
    /// Stage name.
    pub stage: String,
    /// Request hash of the affected request.
    pub request_hash: String,
    /// What went wrong.
    pub message: String,
}

/// Everything produced for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingContext {
    /// Format version.
    pub version: u32,
    /// The request text.
    pub request: String,
    /// Cache key of the request and its config.
    pub request_hash: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Keywords extracted from the request.
    pub keywords: Vec<String>,
    /// System snapshot (empty if skipped or defaulted).
    pub snapshot: SystemSnapshot,
    /// Recalled memories.
    pub memories: Vec<MemoryRecord>,
    /// User preferences.
    pub preferences: Vec<Preference>,
    /// External sources.
    pub external_sources: Vec<ExternalSource>,
    /// Concepts found in the request and recalled memories.
    pub concepts: Vec<String>,
    /// Tasks derived from the concepts.
    pub tasks: Vec<Task>,
    /// Summary of external sources by type.
    pub comparative_analysis: Option<String>,
    /// Routing plan.
    pub execution_plan: ExecutionPlan,
    /// Stages that were replaced by defaults.
    pub warnings: Vec<StageWarning>,
    /// Wall time spent producing the context.
    pub processing_time_ms: u64,
    /// True when served from the cache.
    pub cache_hit: bool,
}

impl ProcessingContext {
    /// Returns a copy flagged as served from the cache.
    #[must_use]
    pub fn as_cache_hit(&self) -> Self {
        Self {
            cache_hit: true,
            ..self.clone()
        }
    }

    /// Returns true when any stage fell back to its default.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Running pipeline counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Calls to `process`.
    pub requests_processed: u64,
    /// Calls served from the cache.
    pub cache_hits: u64,
    /// Stages replaced by defaults.
    pub stage_failures: u64,
    /// Persistence failures after processing.
    pub persist_failures: u64,
    /// Cumulative processing time.
    pub total_processing_ms: u64,
}

impl PipelineStats {
    /// Mean processing time per request.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_processing_ms(&self) -> f64 {
        if self.requests_processed == 0 {
            0.0
        } else {
            self.total_processing_ms as f64 / self.requests_processed as f64
        }
    }

    /// Fraction of requests served from the cache.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cache_hit_rate(&self) -> f64 {
        if self.requests_processed == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.requests_processed as f64
        }
    }
}
