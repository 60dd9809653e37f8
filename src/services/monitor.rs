//! Periodic system snapshots with bounded histories.
//!
//! The monitor reads the capability index and a [`HealthCheck`] to build
//! [`SystemSnapshot`]s. It keeps a ring of recent events, per-node and
//! per-workflow activity timestamps, and a history of sampled snapshots.
//! Every buffer has a fixed capacity; the oldest entries are dropped.

use crate::clock::{Clock, SystemClock};
use crate::config::MonitorConfig;
use crate::models::{
    CapabilityKind, HealthSummary, MonitorEvent, MonitorEventKind, SNAPSHOT_VERSION,
    ServiceStatus, SystemHealth, SystemSnapshot,
};
use crate::services::{CapabilityIndex, HealthCheck};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Events copied into each snapshot.
const RECENT_EVENTS: usize = 10;

#[derive(Debug, Default)]
struct MonitorState {
    events: VecDeque<MonitorEvent>,
    node_activity: BTreeMap<String, VecDeque<DateTime<Utc>>>,
    workflow_executions: BTreeMap<String, VecDeque<DateTime<Utc>>>,
    snapshots: VecDeque<SystemSnapshot>,
    last_statuses: BTreeMap<String, ServiceStatus>,
}

/// Samples system health and keeps activity histories.
pub struct SnapshotMonitor {
    index: Arc<CapabilityIndex>,
    health_check: Arc<dyn HealthCheck>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl SnapshotMonitor {
    /// Creates a monitor using the system clock.
    #[must_use]
    pub fn new(
        index: Arc<CapabilityIndex>,
        health_check: Arc<dyn HealthCheck>,
        config: MonitorConfig,
    ) -> Self {
        Self::with_clock(index, health_check, config, Arc::new(SystemClock))
    }

    /// Creates a monitor reading time from `clock`.
    #[must_use]
    pub fn with_clock(
        index: Arc<CapabilityIndex>,
        health_check: Arc<dyn HealthCheck>,
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index,
            health_check,
            clock,
            config,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Returns the monitor configuration.
    #[must_use]
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("monitor state lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    // =========================================================================
    // Activity
    // =========================================================================

    /// Records that a node did some work.
    pub fn record_node_activity(&self, node: &str) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        push_bounded(
            state.node_activity.entry(node.to_string()).or_default(),
            now,
            self.config.activity_history,
        );
        self.push_event(&mut state, now, MonitorEventKind::NodeActivity, node, None);
    }

    /// Records that a workflow ran.
    pub fn record_workflow_execution(&self, workflow: &str) {
        let now = self.clock.now();
        let mut state = self.lock_state();
        push_bounded(
            state
                .workflow_executions
                .entry(workflow.to_string())
                .or_default(),
            now,
            self.config.activity_history,
        );
        self.push_event(
            &mut state,
            now,
            MonitorEventKind::WorkflowExecution,
            workflow,
            None,
        );
    }

    fn push_event(
        &self,
        state: &mut MonitorState,
        timestamp: DateTime<Utc>,
        kind: MonitorEventKind,
        subject: &str,
        detail: Option<String>,
    ) {
        push_bounded(
            &mut state.events,
            MonitorEvent {
                timestamp,
                kind,
                subject: subject.to_string(),
                detail,
            },
            self.config.event_capacity,
        );
    }

    /// Returns the activity timestamps of a node, oldest first.
    #[must_use]
    pub fn node_activity(&self, node: &str) -> Vec<DateTime<Utc>> {
        self.lock_state()
            .node_activity
            .get(node)
            .map(|times| times.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the execution timestamps of a workflow, oldest first.
    #[must_use]
    pub fn workflow_executions(&self, workflow: &str) -> Vec<DateTime<Utc>> {
        self.lock_state()
            .workflow_executions
            .get(workflow)
            .map(|times| times.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns up to `limit` most recent events, newest last.
    #[must_use]
    pub fn recent_events(&self, limit: usize) -> Vec<MonitorEvent> {
        let state = self.lock_state();
        let skip = state.events.len().saturating_sub(limit);
        state.events.iter().skip(skip).cloned().collect()
    }

    /// Returns up to `limit` most recent sampled snapshots, newest last.
    #[must_use]
    pub fn snapshot_history(&self, limit: usize) -> Vec<SystemSnapshot> {
        let state = self.lock_state();
        let skip = state.snapshots.len().saturating_sub(limit);
        state.snapshots.iter().skip(skip).cloned().collect()
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    fn check_services(&self) -> BTreeMap<String, ServiceStatus> {
        self.index
            .entries(Some(CapabilityKind::Service))
            .iter()
            .map(|service| (service.name.clone(), self.health_check.check(service)))
            .collect()
    }

    fn build_snapshot(
        &self,
        state: &MonitorState,
        services: BTreeMap<String, ServiceStatus>,
        now: DateTime<Utc>,
    ) -> SystemSnapshot {
        let window = chrono::Duration::seconds(
            i64::try_from(self.config.active_window_secs).unwrap_or(i64::MAX),
        );
        let active_nodes = state
            .node_activity
            .iter()
            .filter(|(_, times)| times.back().is_some_and(|last| now - *last <= window))
            .map(|(name, _)| name.clone())
            .collect();

        let skip = state.events.len().saturating_sub(RECENT_EVENTS);
        SystemSnapshot {
            version: SNAPSHOT_VERSION,
            taken_at: now,
            health: SystemHealth::from_statuses(services.values()),
            services,
            active_nodes,
            workflows_available: self
                .index
                .counts()
                .get(&CapabilityKind::Workflow)
                .copied()
                .unwrap_or_default(),
            events_count: state.events.len(),
            recent_events: state.events.iter().skip(skip).cloned().collect(),
        }
    }

    /// Builds a point-in-time snapshot without recording it.
    #[must_use]
    pub fn current_state(&self) -> SystemSnapshot {
        let services = self.check_services();
        let now = self.clock.now();
        let state = self.lock_state();
        self.build_snapshot(&state, services, now)
    }

    /// Takes a sample: checks services, records status changes as events,
    /// and appends the snapshot to the history.
    pub fn sample(&self) -> SystemSnapshot {
        let services = self.check_services();
        let now = self.clock.now();
        let mut state = self.lock_state();

        for (name, status) in &services {
            let previous = state.last_statuses.insert(name.clone(), *status);
            if previous.is_some_and(|p| p != *status) {
                let detail = previous.map(|p| format!("{p} -> {status}"));
                tracing::info!(service = %name, status = %status, "service status changed");
                self.push_event(
                    &mut state,
                    now,
                    MonitorEventKind::ServiceStatusChanged,
                    name,
                    detail,
                );
            }
        }

        let snapshot = self.build_snapshot(&state, services, now);
        push_bounded(
            &mut state.snapshots,
            snapshot.clone(),
            self.config.snapshot_history,
        );

        metrics::counter!("monitor_samples_total", "health" => snapshot.health.as_str())
            .increment(1);
        snapshot
    }

    /// Aggregates the latest sample. Health is unknown before the first one.
    #[must_use]
    pub fn health_summary(&self) -> HealthSummary {
        let state = self.lock_state();
        state.snapshots.back().map_or_else(
            || HealthSummary {
                health: SystemHealth::Unknown,
                services_total: 0,
                services_up: 0,
                nodes_active: 0,
                workflows_available: 0,
                events_count: state.events.len(),
                last_sample: None,
            },
            |latest| HealthSummary {
                health: latest.health,
                services_total: latest.services.len(),
                services_up: latest
                    .services
                    .values()
                    .filter(|s| **s == ServiceStatus::Healthy)
                    .count(),
                nodes_active: latest.active_nodes.len(),
                workflows_available: latest.workflows_available,
                events_count: state.events.len(),
                last_sample: Some(latest.taken_at),
            },
        )
    }

    // =========================================================================
    // Background sampling
    // =========================================================================

    /// Starts sampling every configured interval on the tokio runtime.
    ///
    /// The first sample is taken immediately. The task runs until
    /// [`MonitorHandle::stop`] is awaited.
    #[must_use]
    pub fn start(self: &Arc<Self>) -> MonitorHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let monitor = Arc::clone(self);
        let interval = self.config.interval().max(std::time::Duration::from_millis(10));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_ms = interval.as_millis(), "monitor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let monitor = Arc::clone(&monitor);
                        if let Err(e) = tokio::task::spawn_blocking(move || monitor.sample()).await {
                            tracing::warn!(error = %e, "monitor sample aborted");
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("monitor stopped");
        });

        MonitorHandle { shutdown, task }
    }
}

/// Handle to a running monitor task.
#[derive(Debug)]
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signals the task to stop and waits for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "monitor task ended abnormally");
        }
    }

    /// Returns true once the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(item);
}
