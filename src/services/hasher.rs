//! Deterministic identifiers.
//!
//! Record ids, external source ids and cache keys are all truncated or full
//! SHA-256 digests over a canonical string form, so the same input always
//! produces the same key across processes.

use crate::config::RequestConfig;
use crate::models::MemoryId;
use sha2::{Digest, Sha256};

/// Hex characters kept for record and source ids.
pub const SHORT_ID_LEN: usize = 16;

/// Content hasher for ids and cache keys.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use switchboard::services::ContentHasher;
///
/// let a = ContentHasher::memory_id("note", &json!({"b": 1, "a": 2}));
/// let b = ContentHasher::memory_id("note", &json!({"a": 2, "b": 1}));
/// assert_eq!(a, b);
/// assert_eq!(a.as_str().len(), 16);
/// ```
pub struct ContentHasher;

impl ContentHasher {
    /// Computes the lowercase hex SHA-256 of `content`.
    #[must_use]
    pub fn hash(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns canonical JSON: object keys sorted, no insignificant whitespace.
    #[must_use]
    pub fn canonical_json(value: &serde_json::Value) -> String {
        serde_json::to_string(&sorted(value)).unwrap_or_default()
    }

    /// Derives a record id from `category ":" canonical_json(content)`.
    #[must_use]
    pub fn memory_id(category: &str, content: &serde_json::Value) -> MemoryId {
        let digest = Self::hash(&format!("{category}:{}", Self::canonical_json(content)));
        MemoryId::new(Self::short(&digest))
    }

    /// Derives an external source id from its type and URL.
    #[must_use]
    pub fn source_id(source_type: &str, source_url: Option<&str>) -> String {
        let digest = Self::hash(&format!("{source_type}:{}", source_url.unwrap_or_default()));
        Self::short(&digest).to_string()
    }

    /// Derives the cache key for a request under a config.
    ///
    /// A unit separator keeps `("ab", cfg)` and `("a", "b" + cfg)` apart.
    #[must_use]
    pub fn request_key(request: &str, config: &RequestConfig) -> String {
        Self::hash(&format!("{request}\u{1f}{}", config.normalized()))
    }

    fn short(digest: &str) -> &str {
        digest.get(..SHORT_ID_LEN).unwrap_or(digest)
    }
}

/// Rebuilds objects with keys inserted in sorted order.
fn sorted(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            serde_json::Value::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), sorted(&map[k])))
                    .collect(),
            )
        },
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(sorted).collect())
        },
        other => other.clone(),
    }
}
