//! Secondary indexes over persisted records.
//!
//! Maps category, tag and source keys to ordered id sets. The index is
//! derived state: [`MemoryIndex::rebuild`] reconstructs it from a full scan.

use crate::models::{MemoryId, MemoryQuery};
use crate::storage::RecordKeys;
use std::collections::{BTreeMap, BTreeSet};

type KeyMap = BTreeMap<String, BTreeSet<MemoryId>>;

/// Category, tag and source indexes plus the keys each id is filed under.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryIndex {
    by_category: KeyMap,
    by_tag: KeyMap,
    by_source: KeyMap,
    filed: BTreeMap<MemoryId, RecordKeys>,
}

impl MemoryIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from scanned keys.
    #[must_use]
    pub fn rebuild(keys: impl IntoIterator<Item = RecordKeys>) -> Self {
        let mut index = Self::new();
        for entry in keys {
            index.insert(entry);
        }
        index
    }

    /// Files a record under its keys, moving it off any keys it had before.
    pub fn insert(&mut self, keys: RecordKeys) {
        self.remove(&keys.id);

        add(&mut self.by_category, &keys.category, &keys.id);
        add(&mut self.by_source, &keys.source, &keys.id);
        for tag in &keys.tags {
            add(&mut self.by_tag, tag, &keys.id);
        }
        self.filed.insert(keys.id.clone(), keys);
    }

    /// Removes a record from every index. Returns false if it was not filed.
    pub fn remove(&mut self, id: &MemoryId) -> bool {
        let Some(previous) = self.filed.remove(id) else {
            return false;
        };

        drop_id(&mut self.by_category, &previous.category, id);
        drop_id(&mut self.by_source, &previous.source, id);
        for tag in &previous.tags {
            drop_id(&mut self.by_tag, tag, id);
        }
        true
    }

    /// Returns the ids matching a query's filters.
    ///
    /// `None` means the query has no filters. A filter whose key is not
    /// indexed yields an empty set.
    #[must_use]
    pub fn candidates(&self, query: &MemoryQuery) -> Option<BTreeSet<MemoryId>> {
        let mut sets: Vec<BTreeSet<MemoryId>> = Vec::new();

        if let Some(category) = &query.category {
            sets.push(self.by_category.get(category).cloned().unwrap_or_default());
        }
        if !query.tags.is_empty() {
            let any_tag: BTreeSet<MemoryId> = query
                .tags
                .iter()
                .filter_map(|tag| self.by_tag.get(tag))
                .flatten()
                .cloned()
                .collect();
            sets.push(any_tag);
        }
        if let Some(source) = &query.source {
            sets.push(self.by_source.get(source).cloned().unwrap_or_default());
        }

        let mut sets = sets.into_iter();
        let first = sets.next()?;
        Some(sets.fold(first, |acc, set| acc.intersection(&set).cloned().collect()))
    }

    /// Returns true if the id is filed.
    #[must_use]
    pub fn contains(&self, id: &MemoryId) -> bool {
        self.filed.contains_key(id)
    }

    /// Returns the number of filed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.filed.len()
    }

    /// Returns true when nothing is filed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filed.is_empty()
    }

    /// Returns the number of records in a category.
    #[must_use]
    pub fn category_count(&self, category: &str) -> usize {
        self.by_category.get(category).map_or(0, BTreeSet::len)
    }

    /// Returns the number of records carrying a tag.
    #[must_use]
    pub fn tag_count(&self, tag: &str) -> usize {
        self.by_tag.get(tag).map_or(0, BTreeSet::len)
    }

    /// Returns existing ids related to a record with these keys: the first
    /// `per_category` ids in its category plus the first `per_tag` ids under
    /// each of its tags. The record itself is never included.
    #[must_use]
    pub fn related(
        &self,
        id: &MemoryId,
        category: &str,
        tags: &BTreeSet<String>,
        per_category: usize,
        per_tag: usize,
    ) -> BTreeSet<MemoryId> {
        let first = |map: &KeyMap, key: &str, n: usize| -> Vec<MemoryId> {
            map.get(key)
                .into_iter()
                .flatten()
                .filter(|other| *other != id)
                .take(n)
                .cloned()
                .collect()
        };

        let mut related: BTreeSet<MemoryId> =
            first(&self.by_category, category, per_category).into_iter().collect();
        for tag in tags {
            related.extend(first(&self.by_tag, tag, per_tag));
        }
        related
    }
}

fn add(map: &mut KeyMap, key: &str, id: &MemoryId) {
    map.entry(key.to_string()).or_default().insert(id.clone());
}

fn drop_id(map: &mut KeyMap, key: &str, id: &MemoryId) {
    if let Some(ids) = map.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            map.remove(key);
        }
    }
}
