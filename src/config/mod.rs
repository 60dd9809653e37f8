//! Configuration management.

mod request;
mod scoring;

pub use request::RequestConfig;
pub use scoring::ScoringTunables;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for switchboard.
#[derive(Debug, Clone)]
pub struct SwitchboardConfig {
    /// Directory holding the memory database.
    pub data_dir: PathBuf,
    /// Capability definition file (YAML, TOML or JSON).
    pub capabilities: Option<PathBuf>,
    /// Default switches for `process` calls.
    pub pipeline: RequestConfig,
    /// Orchestrator pool, timeout and cache sizing.
    pub orchestrator: OrchestratorConfig,
    /// Snapshot monitor sizing.
    pub monitor: MonitorConfig,
    /// Capability scoring tunables.
    pub scoring: ScoringTunables,
    /// Logging and metrics settings.
    pub observability: ObservabilitySettings,
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Worker permits shared by the snapshot and recall stages.
    ///
    /// Default: 3.
    pub max_concurrent_stages: usize,
    /// Per-stage deadline in milliseconds.
    ///
    /// Default: 10000.
    pub stage_timeout_ms: u64,
    /// Maximum cached contexts.
    ///
    /// Default: 256.
    pub cache_capacity: usize,
    /// Keywords used as recall tags.
    pub recall_keyword_limit: usize,
    /// Records fetched per recall keyword.
    pub recall_per_keyword: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl OrchestratorConfig {
    /// Creates the default orchestrator configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_concurrent_stages: 3,
            stage_timeout_ms: 10_000,
            cache_capacity: 256,
            recall_keyword_limit: 5,
            recall_per_keyword: 10,
        }
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `SWITCHBOARD_MAX_CONCURRENT_STAGES` | Stage worker permits | 3 |
    /// | `SWITCHBOARD_STAGE_TIMEOUT_MS` | Per-stage deadline | 10000 |
    /// | `SWITCHBOARD_CACHE_CAPACITY` | Cached contexts | 256 |
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("SWITCHBOARD_MAX_CONCURRENT_STAGES")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.max_concurrent_stages = parsed.max(1);
        }
        if let Ok(v) = std::env::var("SWITCHBOARD_STAGE_TIMEOUT_MS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.stage_timeout_ms = parsed;
        }
        if let Ok(v) = std::env::var("SWITCHBOARD_CACHE_CAPACITY")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.cache_capacity = parsed.max(1);
        }
        self
    }

    /// Returns the per-stage deadline.
    #[must_use]
    pub const fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    /// Sets the per-stage deadline in milliseconds.
    #[must_use]
    pub const fn with_stage_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stage_timeout_ms = timeout_ms;
        self
    }

    /// Sets the number of stage worker permits.
    #[must_use]
    pub const fn with_max_concurrent_stages(mut self, max: usize) -> Self {
        self.max_concurrent_stages = max;
        self
    }

    /// Sets the cache capacity.
    #[must_use]
    pub const fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

/// Snapshot monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between samples.
    pub interval_secs: u64,
    /// Recent event ring size.
    pub event_capacity: usize,
    /// Per-node and per-workflow activity history size.
    pub activity_history: usize,
    /// Retained snapshots.
    pub snapshot_history: usize,
    /// A node counts as active if it recorded activity this recently.
    pub active_window_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorConfig {
    /// Creates the default monitor configuration.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interval_secs: 5,
            event_capacity: 5000,
            activity_history: 1000,
            snapshot_history: 100,
            active_window_secs: 300,
        }
    }

    /// Applies the `SWITCHBOARD_MONITOR_INTERVAL_SECS` override.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("SWITCHBOARD_MONITOR_INTERVAL_SECS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.interval_secs = parsed.max(1);
        }
        self
    }

    /// Returns the sampling interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Sets the sampling interval in seconds.
    #[must_use]
    pub const fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    /// Sets the event ring size.
    #[must_use]
    pub const fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Sets the activity history size.
    #[must_use]
    pub const fn with_activity_history(mut self, capacity: usize) -> Self {
        self.activity_history = capacity;
        self
    }

    /// Sets the snapshot history size.
    #[must_use]
    pub const fn with_snapshot_history(mut self, capacity: usize) -> Self {
        self.snapshot_history = capacity;
        self
    }
}

/// Observability section of the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilitySettings {
    /// Logging settings.
    pub logging: Option<LoggingSettings>,
    /// Metrics settings.
    pub metrics: Option<MetricsSettings>,
}

/// Logging settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingSettings {
    /// `json` or `pretty`.
    pub format: Option<String>,
    /// `EnvFilter` directive, e.g. `switchboard=debug`.
    pub filter: Option<String>,
    /// Optional log file; logs go to stderr otherwise.
    pub file: Option<String>,
}

/// Metrics settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsSettings {
    /// Install the Prometheus recorder.
    pub enabled: Option<bool>,
    /// Port for the Prometheus HTTP listener.
    pub port: Option<u16>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Capability definition file.
    pub capabilities: Option<String>,
    /// Default request switches.
    pub pipeline: Option<RequestConfig>,
    /// Orchestrator section.
    pub orchestrator: Option<OrchestratorConfig>,
    /// Monitor section.
    pub monitor: Option<MonitorConfig>,
    /// Scoring section.
    pub scoring: Option<ScoringTunables>,
    /// Observability section.
    pub observability: Option<ObservabilitySettings>,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".switchboard"),
            capabilities: None,
            pipeline: RequestConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            monitor: MonitorConfig::default(),
            scoring: ScoringTunables::default(),
            observability: ObservabilitySettings::default(),
        }
    }
}

impl SwitchboardConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;

        Self::from_toml_str(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Configuration`] if the text is not valid TOML
    /// for [`ConfigFile`].
    pub fn from_toml_str(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile = toml::from_str(contents)
            .map_err(|e| crate::Error::Configuration(format!("invalid config file: {e}")))?;
        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the following paths in order:
    /// 1. Platform-specific config dir (`~/.config/switchboard/` on Linux)
    /// 2. `~/.config/switchboard/` for macOS users who keep XDG layouts
    ///
    /// Returns default configuration if no config file is found.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs
                .config_dir()
                .join("switchboard")
                .join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join("switchboard")
                .join("config.toml"),
        ];

        for path in candidates {
            if path.exists()
                && let Ok(config) = Self::load_from_file(&path)
            {
                return config;
            }
        }

        Self::default()
    }

    /// Applies `SWITCHBOARD_*` environment overrides to every section.
    ///
    /// `SWITCHBOARD_DATA_DIR` and `SWITCHBOARD_CAPABILITIES` replace the
    /// corresponding paths; the orchestrator and monitor sections read their
    /// own variables.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("SWITCHBOARD_DATA_DIR")
            && !v.trim().is_empty()
        {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SWITCHBOARD_CAPABILITIES")
            && !v.trim().is_empty()
        {
            self.capabilities = Some(PathBuf::from(v));
        }
        self.orchestrator = self.orchestrator.with_env_overrides();
        self.monitor = self.monitor.with_env_overrides();
        self
    }

    /// Converts a `ConfigFile` to `SwitchboardConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        config.capabilities = file.capabilities.map(PathBuf::from);
        if let Some(pipeline) = file.pipeline {
            config.pipeline = pipeline;
        }
        if let Some(orchestrator) = file.orchestrator {
            config.orchestrator = orchestrator;
        }
        if let Some(monitor) = file.monitor {
            config.monitor = monitor;
        }
        if let Some(scoring) = file.scoring {
            config.scoring = scoring;
        }
        if let Some(observability) = file.observability {
            config.observability = observability;
        }

        config
    }

    /// Returns the memory database path.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("memory.db")
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Sets the capability definition file.
    #[must_use]
    pub fn with_capabilities(mut self, path: impl Into<PathBuf>) -> Self {
        self.capabilities = Some(path.into());
        self
    }
}
