//! Processed-context cache.
//!
//! Caches [`ProcessingContext`]s by request key in an in-memory LRU map with
//! per-entry TTL.

use crate::models::ProcessingContext;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::RwLock;

/// Cache of processed contexts keyed by request hash.
///
/// Implementations must never return an entry once
/// `now - created_at > ttl`, and `put` on an existing key overwrites it.
pub trait ContextCache: Send + Sync {
    /// Returns the cached context for `key` if present and not expired.
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<ProcessingContext>;

    /// Stores `context` under `key`, replacing any previous entry.
    fn put(&self, key: &str, context: ProcessingContext, created_at: DateTime<Utc>, ttl: Duration);

    /// Removes `key`. Returns true if an entry was removed.
    fn evict(&self, key: &str) -> bool;

    /// Removes every entry.
    fn clear(&self);

    /// Returns the number of stored entries, expired ones included.
    fn len(&self) -> usize;

    /// Returns true when nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    context: ProcessingContext,
    created_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at > self.ttl
    }
}

/// LRU map with per-entry TTL.
///
/// # Lock Poisoning
///
/// Poisoning is handled with fail-open semantics: a poisoned lock turns
/// reads into misses and writes into no-ops. The pipeline then recomputes
/// the context, which is always correct.
pub struct LruTtlCache {
    entries: RwLock<LruCache<String, CacheEntry>>,
}

impl LruTtlCache {
    /// Creates a cache holding at most `capacity` contexts (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }
}

impl Default for LruTtlCache {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ContextCache for LruTtlCache {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Option<ProcessingContext> {
        let Ok(mut entries) = self.entries.write() else {
            tracing::warn!("context cache lock poisoned, treating as miss");
            metrics::counter!("context_cache_errors_total", "operation" => "get").increment(1);
            return None;
        };

        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                metrics::counter!("context_cache_hits_total").increment(1);
                return Some(entry.context.clone());
            },
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            metrics::counter!("context_cache_expired_total").increment(1);
        }
        metrics::counter!("context_cache_misses_total").increment(1);
        None
    }

    fn put(&self, key: &str, context: ProcessingContext, created_at: DateTime<Utc>, ttl: Duration) {
        let Ok(mut entries) = self.entries.write() else {
            tracing::warn!("context cache lock poisoned, skipping insert");
            metrics::counter!("context_cache_errors_total", "operation" => "put").increment(1);
            return;
        };
        entries.put(
            key.to_string(),
            CacheEntry {
                context,
                created_at,
                ttl,
            },
        );
    }

    fn evict(&self, key: &str) -> bool {
        self.entries
            .write()
            .ok()
            .is_some_and(|mut entries| entries.pop(key).is_some())
    }

    fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CONTEXT_VERSION, ExecutionPlan, SystemSnapshot};

    fn context(request: &str) -> ProcessingContext {
        let now = Utc::now();
        ProcessingContext {
            version: CONTEXT_VERSION,
            request: request.to_string(),
            request_hash: format!("hash-{request}"),
            created_at: now,
            keywords: Vec::new(),
            snapshot: SystemSnapshot::empty(now),
            memories: Vec::new(),
            preferences: Vec::new(),
            external_sources: Vec::new(),
            concepts: Vec::new(),
            tasks: Vec::new(),
            comparative_analysis: None,
            execution_plan: ExecutionPlan::empty(now),
            warnings: Vec::new(),
            processing_time_ms: 0,
            cache_hit: false,
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = LruTtlCache::new(4);
        let now = Utc::now();
        cache.put("k", context("a"), now, Duration::minutes(30));

        let hit = cache.get("k", now + Duration::minutes(29)).unwrap();
        assert_eq!(hit.request, "a");
    }

    #[test]
    fn test_expired_entry_is_never_returned() {
        let cache = LruTtlCache::new(4);
        let now = Utc::now();
        cache.put("k", context("a"), now, Duration::minutes(30));

        assert!(cache.get("k", now + Duration::minutes(31)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_overwrites() {
        let cache = LruTtlCache::new(4);
        let now = Utc::now();
        cache.put("k", context("a"), now, Duration::minutes(30));
        cache.put("k", context("b"), now, Duration::minutes(30));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k", now).unwrap().request, "b");
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = LruTtlCache::new(2);
        let now = Utc::now();
        let ttl = Duration::minutes(30);
        cache.put("a", context("a"), now, ttl);
        cache.put("b", context("b"), now, ttl);
        assert!(cache.get("a", now).is_some());
        cache.put("c", context("c"), now, ttl);

        assert!(cache.get("b", now).is_none());
        assert!(cache.get("a", now).is_some());
        assert!(cache.get("c", now).is_some());
    }

    #[test]
    fn test_evict_and_clear() {
        let cache = LruTtlCache::new(0);
        let now = Utc::now();
        cache.put("a", context("a"), now, Duration::minutes(1));
        assert!(cache.evict("a"));
        assert!(!cache.evict("a"));
        cache.put("a", context("a"), now, Duration::minutes(1));
        cache.clear();
        assert!(cache.is_empty());
    }
}
