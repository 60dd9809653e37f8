//! System snapshots produced by the monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Health reported for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Service answers normally.
    Healthy,
    /// Service answers but is impaired.
    Degraded,
    /// Service does not answer.
    Down,
    /// No health check result yet.
    #[default]
    Unknown,
}

impl ServiceStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
            Self::Unknown => "unknown",
        }
    }

    /// Parses a status. `available` and `up` read as healthy.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "healthy" | "available" | "up" => Some(Self::Healthy),
            "degraded" => Some(Self::Degraded),
            "down" => Some(Self::Down),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregate system health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemHealth {
    /// Every known service is healthy (or there are none).
    Healthy,
    /// Some service is not healthy, none is down.
    Degraded,
    /// At least one service is down.
    Critical,
    /// Nothing has been sampled.
    #[default]
    Unknown,
}

impl SystemHealth {
    /// Aggregates per-service statuses.
    #[must_use]
    pub fn from_statuses<'a>(statuses: impl IntoIterator<Item = &'a ServiceStatus>) -> Self {
        let mut all_healthy = true;
        for status in statuses {
            match status {
                ServiceStatus::Down => return Self::Critical,
                ServiceStatus::Healthy => {},
                _ => all_healthy = false,
            }
        }
        if all_healthy {
            Self::Healthy
        } else {
            Self::Degraded
        }
    }

    /// Returns the health as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SystemHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a monitor event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorEventKind {
    /// A node did some work.
    NodeActivity,
    /// A workflow ran.
    WorkflowExecution,
    /// A service changed status between samples.
    ServiceStatusChanged,
}

/// One entry in the monitor's event ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorEvent {
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Event kind.
    pub kind: MonitorEventKind,
    /// Node, workflow or service name.
    pub subject: String,
    /// Free-form detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Point-in-time view of the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Format version.
    pub version: u32,
    /// Sample time.
    pub taken_at: DateTime<Utc>,
    /// Aggregate health.
    pub health: SystemHealth,
    /// Per-service status.
    pub services: BTreeMap<String, ServiceStatus>,
    /// Nodes active within the monitor's window.
    pub active_nodes: Vec<String>,
    /// Registered workflow count.
    pub workflows_available: usize,
    /// Events in the ring at sample time.
    pub events_count: usize,
    /// Most recent events, newest last.
    pub recent_events: Vec<MonitorEvent>,
}

impl SystemSnapshot {
    /// The snapshot used when no sample is available.
    #[must_use]
    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            taken_at,
            health: SystemHealth::Unknown,
            services: BTreeMap::new(),
            active_nodes: Vec::new(),
            workflows_available: 0,
            events_count: 0,
            recent_events: Vec::new(),
        }
    }

    /// Returns true for the empty snapshot shape.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.health == SystemHealth::Unknown
            && self.services.is_empty()
            && self.active_nodes.is_empty()
            && self.recent_events.is_empty()
    }
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self::empty(Utc::now())
    }
}

/// Cheap aggregate of the latest sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    /// Aggregate health.
    pub health: SystemHealth,
    /// Known services.
    pub services_total: usize,
    /// Services reporting healthy.
    pub services_up: usize,
    /// Active nodes.
    pub nodes_active: usize,
    /// Registered workflows.
    pub workflows_available: usize,
    /// Events in the ring.
    pub events_count: usize,
    /// Time of the latest sample.
    pub last_sample: Option<DateTime<Utc>>,
}
