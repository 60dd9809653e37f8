//! Data models for switchboard.
//!
//! This module contains all the core data structures used throughout the system.

mod capability;
mod context;
mod memory;
mod plan;
mod snapshot;

pub use capability::{CapabilityEntry, CapabilityKind, CapabilityMatch, MatchTier};
pub use context::{
    CONTEXT_VERSION, PipelineStats, ProcessingContext, StageWarning, Task, TaskPriority,
};
pub use memory::{
    AccessCount, CategoryPattern, ExternalSource, LearningMetrics, MemoryId, MemoryQuery,
    MemoryRecord, MemoryStatistics, Preference,
};
pub use plan::ExecutionPlan;
pub use snapshot::{
    HealthSummary, MonitorEvent, MonitorEventKind, SNAPSHOT_VERSION, ServiceStatus, SystemHealth,
    SystemSnapshot,
};
