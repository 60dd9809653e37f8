//! Capability registry types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The kind of a registered capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    /// A named capability unit with a primary tool and trigger keywords.
    Node,
    /// A named automation invocable by slash command or keyword.
    Workflow,
    /// A standalone tool.
    Tool,
    /// An external service (API, database, cache, ...).
    Service,
}

impl CapabilityKind {
    /// Returns all kinds in lookup order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Node, Self::Workflow, Self::Tool, Self::Service]
    }

    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Workflow => "workflow",
            Self::Tool => "tool",
            Self::Service => "service",
        }
    }

    /// Parses a kind from a string (case-insensitive, singular or plural).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "node" | "nodes" => Some(Self::Node),
            "workflow" | "workflows" => Some(Self::Workflow),
            "tool" | "tools" => Some(Self::Tool),
            "service" | "services" => Some(Self::Service),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A registered node, workflow, tool or service.
///
/// Entries are unique by `(kind, name)`. The serialized form accepts both
/// `slash_command` and `slashCommand` spellings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    /// Entry name, unique within its kind.
    #[serde(default)]
    pub name: String,
    /// Entry kind.
    pub kind: CapabilityKind,
    /// Trigger keywords.
    #[serde(default)]
    pub triggers: BTreeSet<String>,
    /// Slash command (e.g. `/deploy`).
    #[serde(default, alias = "slashCommand", skip_serializing_if = "Option::is_none")]
    pub slash_command: Option<String>,
    /// Role or description text.
    #[serde(default, alias = "role", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Service type for services (`api`, `database`, `cache`, `mcp`, `frontend`).
    #[serde(default, alias = "serviceType", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    /// Service endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Primary tool invoked by a node.
    #[serde(default, alias = "primaryTool", skip_serializing_if = "Option::is_none")]
    pub primary_tool: Option<String>,
}

impl CapabilityEntry {
    /// Creates an entry with no triggers or metadata.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: CapabilityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            triggers: BTreeSet::new(),
            slash_command: None,
            description: None,
            service_type: None,
            endpoint: None,
            primary_tool: None,
        }
    }

    /// Adds trigger keywords.
    #[must_use]
    pub fn with_triggers<I, S>(mut self, triggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.triggers.extend(triggers.into_iter().map(Into::into));
        self
    }

    /// Sets the slash command.
    #[must_use]
    pub fn with_slash_command(mut self, command: impl Into<String>) -> Self {
        self.slash_command = Some(command.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the service type.
    #[must_use]
    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    /// Sets the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the primary tool.
    #[must_use]
    pub fn with_primary_tool(mut self, tool: impl Into<String>) -> Self {
        self.primary_tool = Some(tool.into());
        self
    }
}

/// The rule that produced a capability match, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// The request contains the entry's slash command as a token.
    SlashCommand,
    /// The request contains the entry name.
    Name,
    /// The request contains one of the entry's triggers.
    Trigger,
    /// The request contains the entry's role/description.
    Description,
    /// The description shares enough tokens with the request, or a tool name
    /// read as words appears in it.
    TokenOverlap,
    /// A service keyword group matched a service of that type.
    ServiceKeyword,
}

impl MatchTier {
    /// Returns the tier as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SlashCommand => "slash_command",
            Self::Name => "name",
            Self::Trigger => "trigger",
            Self::Description => "description",
            Self::TokenOverlap => "token_overlap",
            Self::ServiceKeyword => "service_keyword",
        }
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single entry matched against a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityMatch {
    /// Entry name.
    pub name: String,
    /// Entry kind.
    pub kind: CapabilityKind,
    /// The winning tier for this entry.
    pub tier: MatchTier,
    /// Tier score in `[0, 1]`.
    pub score: f64,
}
