//! Command handlers module.
//!
//! - `pipeline.rs`: process, analyze, capabilities, health, stats, monitor
//! - `memory.rs`: remember, recall, query, reindex, rotate
//! - `prefs.rs`: preferences and external sources

mod memory;
mod pipeline;
mod prefs;

use clap::{Args, Subcommand};
use serde::Serialize;
use std::collections::BTreeSet;

pub use memory::{cmd_query, cmd_recall, cmd_remember, cmd_reindex, cmd_rotate};
pub use pipeline::{
    cmd_analyze, cmd_capabilities, cmd_health, cmd_monitor, cmd_process, cmd_stats,
};
pub use prefs::{cmd_prefs, cmd_sources};

/// Per-request pipeline switches; unset flags keep the configured default.
#[derive(Args, Debug, Clone, Copy, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct RequestFlags {
    /// Skip the system snapshot stage.
    #[arg(long)]
    pub no_snapshot: bool,

    /// Skip memory recall.
    #[arg(long)]
    pub no_memory: bool,

    /// Skip capability analysis.
    #[arg(long)]
    pub no_analyzer: bool,

    /// Bypass the context cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Run snapshot and recall one after the other.
    #[arg(long)]
    pub sequential: bool,

    /// Leave external sources out of recall.
    #[arg(long)]
    pub no_external_sources: bool,

    /// Skip the comparative analysis.
    #[arg(long)]
    pub no_comparative: bool,
}

/// Preference subcommands.
#[derive(Subcommand)]
pub enum PrefsAction {
    /// Set a preference.
    Set {
        /// Preference key.
        key: String,

        /// Value; parsed as JSON when valid.
        value: String,

        /// Preference category.
        #[arg(short, long, default_value = "general")]
        category: String,
    },

    /// Get one preference.
    Get {
        /// Preference key.
        key: String,
    },

    /// List preferences.
    List {
        /// Only this category.
        #[arg(short, long)]
        category: Option<String>,
    },
}

/// External source subcommands.
#[derive(Subcommand)]
pub enum SourcesAction {
    /// Record an external source.
    Add {
        /// Source type, e.g. `article` or `repository`.
        source_type: String,

        /// Content; parsed as JSON when valid.
        content: String,

        /// Where the content came from.
        #[arg(short, long)]
        url: Option<String>,

        /// Analysis of the content; parsed as JSON when valid.
        #[arg(short, long)]
        analysis: Option<String>,
    },

    /// List external sources.
    List {
        /// Only this source type.
        #[arg(short = 't', long = "type")]
        source_type: Option<String>,
    },
}

/// Prints a value as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parses CLI text as JSON, falling back to a JSON string.
fn json_or_string(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}

/// Splits a comma-separated tag list, dropping blanks.
fn parse_tags(tags: Option<&str>) -> BTreeSet<String> {
    tags.map(|t| {
        t.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
