//! Per-request pipeline switches.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Switches controlling one `process` call.
///
/// Every flag defaults to `true` and the cache TTL to 30 minutes. The
/// serialized form doubles as the normalized config that goes into the cache
/// key, so two configs with the same field values always hash the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct RequestConfig {
    /// Run the system snapshot stage.
    pub use_snapshot: bool,
    /// Run the memory recall stage.
    pub use_memory: bool,
    /// Run plan generation through the analyzer.
    pub use_analyzer: bool,
    /// Include external sources in recall.
    pub enable_external_sources: bool,
    /// Summarize external sources by type.
    pub enable_comparative_analysis: bool,
    /// Serve and populate the context cache.
    pub enable_caching: bool,
    /// Run snapshot and recall concurrently.
    pub enable_parallel: bool,
    /// Cache entry lifetime in minutes.
    pub cache_ttl_minutes: u32,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            use_snapshot: true,
            use_memory: true,
            use_analyzer: true,
            enable_external_sources: true,
            enable_comparative_analysis: true,
            enable_caching: true,
            enable_parallel: true,
            cache_ttl_minutes: 30,
        }
    }
}

impl RequestConfig {
    /// Returns the cache entry lifetime.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::minutes(i64::from(self.cache_ttl_minutes))
    }

    /// Returns the canonical string form used in cache keys.
    #[must_use]
    pub fn normalized(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Disables the concurrent snapshot/recall fan-out.
    #[must_use]
    pub const fn sequential(mut self) -> Self {
        self.enable_parallel = false;
        self
    }

    /// Disables the context cache.
    #[must_use]
    pub const fn without_cache(mut self) -> Self {
        self.enable_caching = false;
        self
    }

    /// Sets the cache TTL.
    #[must_use]
    pub const fn with_cache_ttl_minutes(mut self, minutes: u32) -> Self {
        self.cache_ttl_minutes = minutes;
        self
    }
}
