//! Business logic services.
//!
//! Services sit between the storage layer and the binary: the capability
//! index and analyzer score requests, the memory store wraps persistence
//! with secondary indexes, the monitor samples health, and the orchestrator
//! runs the per-request pipeline over all of them.

mod analyzer;
mod capability_index;
mod capability_loader;
mod container;
mod context_cache;
mod hasher;
mod keywords;
mod memory_index;
mod memory_store;
mod monitor;
mod orchestrator;
mod providers;
mod stage_pool;

pub use analyzer::RequestAnalyzer;
pub use capability_index::CapabilityIndex;
pub use capability_loader::{DefinitionFormat, parse_definitions};
pub use container::{ServiceContainer, SystemStatistics};
pub use context_cache::{ContextCache, LruTtlCache};
pub use hasher::{ContentHasher, SHORT_ID_LEN};
pub use keywords::{
    STOP_WORDS, SYSTEM_CONCEPTS, assign_tasks, comparative_analysis, extract_keywords,
    identify_concepts,
};
pub use memory_index::MemoryIndex;
pub use memory_store::MemoryStore;
pub use monitor::{MonitorHandle, SnapshotMonitor};
pub use orchestrator::{CONTEXT_CATEGORY, PIPELINE_SOURCE, PipelineOrchestrator};
pub use providers::{
    CapabilityAnalyzer, HealthCheck, MemoryProvider, RecordedHealth, SystemStateProvider,
};
pub use stage_pool::{StageError, StagePool, run_blocking};
