//! Registry of nodes, workflows, tools and services.
//!
//! Entries are keyed by `(kind, name)` and matched against free text with a
//! fixed tier ladder. Scores come from [`ScoringTunables`].

use crate::config::ScoringTunables;
use crate::models::{CapabilityEntry, CapabilityKind, CapabilityMatch, MatchTier};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::instrument;

type EntryMap = BTreeMap<(CapabilityKind, String), CapabilityEntry>;

/// Registry of capability entries.
///
/// Entries may be appended at runtime but are never removed. Readers and
/// writers share one `RwLock`; poisoning is recovered with a warning.
///
/// # Example
///
/// ```rust
/// use switchboard::{CapabilityEntry, CapabilityIndex, CapabilityKind, MatchTier};
///
/// let index = CapabilityIndex::new();
/// index.register(
///     CapabilityEntry::new("Deploy", CapabilityKind::Workflow)
///         .with_slash_command("/deploy")
///         .with_triggers(["deploy", "release"]),
/// )?;
///
/// let matches = index.lookup("please /deploy now");
/// assert_eq!(matches[0].tier, MatchTier::SlashCommand);
/// # Ok::<(), switchboard::Error>(())
/// ```
pub struct CapabilityIndex {
    entries: RwLock<EntryMap>,
    tunables: ScoringTunables,
}

impl Default for CapabilityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityIndex {
    /// Creates an empty index with default tunables.
    #[must_use]
    pub fn new() -> Self {
        Self::with_tunables(ScoringTunables::default())
    }

    /// Creates an empty index with the given tunables.
    #[must_use]
    pub fn with_tunables(tunables: ScoringTunables) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            tunables,
        }
    }

    /// Returns the scoring tunables.
    #[must_use]
    pub const fn tunables(&self) -> &ScoringTunables {
        &self.tunables
    }

    fn read(&self) -> RwLockReadGuard<'_, EntryMap> {
        self.entries.read().unwrap_or_else(|poisoned| {
            tracing::warn!("capability index lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntryMap> {
        self.entries.write().unwrap_or_else(|poisoned| {
            tracing::warn!("capability index lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Adds or overwrites an entry.
    ///
    /// The name is trimmed, the slash command is normalized to a lower-case
    /// `/word`, and triggers are lower-cased with blanks dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the name is blank or the slash
    /// command has no single command word.
    #[instrument(skip(self, entry), fields(kind = %entry.kind, name = %entry.name))]
    pub fn register(&self, entry: CapabilityEntry) -> Result<()> {
        let entry = normalize_entry(entry)?;
        let key = (entry.kind, entry.name.clone());

        let replaced = self.write().insert(key, entry).is_some();
        if replaced {
            tracing::debug!("capability overwritten");
        }
        metrics::counter!("capability_registrations_total").increment(1);
        Ok(())
    }

    /// Registers several entries, stopping at the first invalid one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the position of the first
    /// invalid entry. Entries before it stay registered.
    pub fn register_all(&self, entries: impl IntoIterator<Item = CapabilityEntry>) -> Result<usize> {
        let mut count = 0;
        for (position, entry) in entries.into_iter().enumerate() {
            self.register(entry).map_err(|e| match e {
                Error::Configuration(msg) => {
                    Error::Configuration(format!("capability #{position}: {msg}"))
                },
                other => other,
            })?;
            count += 1;
        }
        Ok(count)
    }

    /// Returns an entry by kind and name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no such entry is registered.
    pub fn get(&self, kind: CapabilityKind, name: &str) -> Result<CapabilityEntry> {
        self.read()
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: kind.as_str(),
                id: name.to_string(),
            })
    }

    /// Returns every entry, optionally of one kind, ordered by kind and name.
    #[must_use]
    pub fn entries(&self, kind: Option<CapabilityKind>) -> Vec<CapabilityEntry> {
        self.read()
            .values()
            .filter(|entry| kind.is_none_or(|k| entry.kind == k))
            .cloned()
            .collect()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns true when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns the number of entries per kind. Every kind is present.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<CapabilityKind, usize> {
        let mut counts: BTreeMap<CapabilityKind, usize> =
            CapabilityKind::all().iter().map(|k| (*k, 0)).collect();
        for (kind, _) in self.read().keys() {
            *counts.entry(*kind).or_default() += 1;
        }
        counts
    }

    /// Free-text search over names and descriptions for introspection.
    ///
    /// An empty needle returns every entry of the requested kind.
    #[must_use]
    pub fn query(&self, needle: &str, kind: Option<CapabilityKind>) -> Vec<CapabilityEntry> {
        let needle = needle.trim().to_lowercase();
        self.read()
            .values()
            .filter(|entry| kind.is_none_or(|k| entry.kind == k))
            .filter(|entry| {
                needle.is_empty()
                    || entry.name.to_lowercase().contains(&needle)
                    || entry
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }

    /// Matches `text` against every entry.
    ///
    /// Each entry contributes at most one match, at its highest-scoring
    /// tier. Results are ordered by kind, then score (highest first), then
    /// name.
    #[must_use]
    pub fn lookup(&self, text: &str) -> Vec<CapabilityMatch> {
        let request = RequestText::new(text);
        if request.is_blank() {
            return Vec::new();
        }

        let mut matches: Vec<CapabilityMatch> = self
            .read()
            .values()
            .filter_map(|entry| {
                best_tier(entry, &request, &self.tunables).map(|(tier, score)| CapabilityMatch {
                    name: entry.name.clone(),
                    kind: entry.kind,
                    tier,
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            a.kind
                .cmp(&b.kind)
                .then(b.score.total_cmp(&a.score))
                .then_with(|| a.name.cmp(&b.name))
        });
        matches
    }
}

/// Lower-cased request text with its punctuation-trimmed whitespace tokens.
pub(crate) struct RequestText {
    lowered: String,
    tokens: BTreeSet<String>,
}

impl RequestText {
    pub(crate) fn new(text: &str) -> Self {
        let lowered = text.to_lowercase();
        let tokens = lowered
            .split_whitespace()
            .map(|token| {
                token.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
            })
            .map(|token| token.trim_start_matches(|c: char| !c.is_alphanumeric() && c != '/'))
            .filter(|token| !token.is_empty())
            .map(ToString::to_string)
            .collect();
        Self { lowered, tokens }
    }

    pub(crate) fn is_blank(&self) -> bool {
        self.tokens.is_empty()
    }

    pub(crate) fn contains(&self, needle: &str) -> bool {
        !needle.is_empty() && self.lowered.contains(needle)
    }

    pub(crate) fn has_token(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    fn shared_tokens(&self, other: &str) -> usize {
        other
            .split_whitespace()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|token| self.tokens.contains(*token))
            .count()
    }
}

/// Returns the highest-scoring tier `entry` reaches for `request`.
fn best_tier(
    entry: &CapabilityEntry,
    request: &RequestText,
    tunables: &ScoringTunables,
) -> Option<(MatchTier, f64)> {
    let name = entry.name.to_lowercase();
    let description = entry.description.as_deref().map(str::to_lowercase);

    let mut tiers: Vec<MatchTier> = Vec::new();

    if entry
        .slash_command
        .as_deref()
        .is_some_and(|cmd| request.has_token(cmd))
    {
        tiers.push(MatchTier::SlashCommand);
    }
    if request.contains(&name) {
        tiers.push(MatchTier::Name);
    }
    if entry.triggers.iter().any(|trigger| request.contains(trigger)) {
        tiers.push(MatchTier::Trigger);
    }
    if let Some(description) = description.as_deref() {
        if request.contains(description.trim()) {
            tiers.push(MatchTier::Description);
        }
        if request.shared_tokens(description) >= tunables.min_token_overlap.max(1) {
            tiers.push(MatchTier::TokenOverlap);
        }
    }
    if entry.kind == CapabilityKind::Tool {
        let spaced = name.replace(['_', '-'], " ");
        if request.contains(spaced.trim()) {
            tiers.push(MatchTier::TokenOverlap);
        }
    }

    tiers
        .into_iter()
        .map(|tier| (tier, tunables.tier_score(tier)))
        .reduce(|best, next| if next.1 > best.1 { next } else { best })
}

fn normalize_entry(mut entry: CapabilityEntry) -> Result<CapabilityEntry> {
    entry.name = entry.name.trim().to_string();
    if entry.name.is_empty() {
        return Err(Error::Configuration(format!(
            "{} entry has a blank name",
            entry.kind
        )));
    }

    if let Some(command) = entry.slash_command.take() {
        let word = command.trim().trim_start_matches('/').to_lowercase();
        if word.is_empty() || word.contains(char::is_whitespace) {
            return Err(Error::Configuration(format!(
                "{} '{}' has an invalid slash command '{command}'",
                entry.kind, entry.name
            )));
        }
        entry.slash_command = Some(format!("/{word}"));
    }

    entry.triggers = entry
        .triggers
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    Ok(entry)
}
