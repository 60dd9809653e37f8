//! Observability: structured logging, Prometheus metrics and request
//! correlation.

mod logging;
mod metrics;
mod request_context;

pub use logging::{LogFormat, LoggingConfig};
pub use metrics::{DEFAULT_METRICS_PORT, MetricsConfig, MetricsHandle, install_prometheus};
pub use request_context::{
    RequestContext, RequestContextGuard, current_request_id, enter_request_context,
    scope_request_context,
};

use crate::config::ObservabilitySettings;
use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Layer, Registry, fmt};

/// Full observability configuration.
#[derive(Debug, Clone, Default)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
    /// Whether to expose metrics via HTTP listener.
    pub metrics_expose: bool,
}

/// Options supplied by the command line.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// `--verbose` was passed.
    pub verbose: bool,
    /// Start the Prometheus scrape listener.
    pub metrics_expose: bool,
}

/// Keeps process-wide observability components alive.
#[derive(Debug)]
pub struct ObservabilityHandle {
    metrics: Option<MetricsHandle>,
}

impl ObservabilityHandle {
    /// Returns the metrics handle if a recorder was installed.
    #[must_use]
    pub const fn metrics(&self) -> Option<&MetricsHandle> {
        self.metrics.as_ref()
    }
}

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Initializes observability from config settings with env overrides.
///
/// # Errors
///
/// Returns an error if observability has already been initialized or if any
/// component fails to initialize.
pub fn init_from_config(
    settings: &ObservabilitySettings,
    options: InitOptions,
) -> Result<ObservabilityHandle> {
    init(build_config(Some(settings), options))
}

fn build_config(
    settings: Option<&ObservabilitySettings>,
    options: InitOptions,
) -> ObservabilityConfig {
    ObservabilityConfig {
        logging: LoggingConfig::from_settings(
            settings.and_then(|cfg| cfg.logging.as_ref()),
            options.verbose,
        ),
        metrics: MetricsConfig::from_settings(settings.and_then(|cfg| cfg.metrics.as_ref())),
        metrics_expose: options.metrics_expose,
    }
}

/// Installs the global subscriber and, when enabled, the metrics recorder.
///
/// Logs go to stderr unless a file is configured so stdout stays reserved
/// for command output.
///
/// # Errors
///
/// Returns an error if observability has already been initialized, the log
/// filter is invalid, or the log file cannot be opened.
pub fn init(config: ObservabilityConfig) -> Result<ObservabilityHandle> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(init_failed("observability already initialized"));
    }

    let filter = config.logging.filter()?;
    let metrics = install_prometheus(&config.metrics, config.metrics_expose)?;

    tracing_subscriber::registry()
        .with(fmt_layer(&config.logging)?)
        .with(filter)
        .try_init()
        .map_err(init_error)?;

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| init_failed("failed to mark observability initialized"))?;

    tracing::debug!(
        format = ?config.logging.format,
        directive = %config.logging.directive,
        metrics = config.metrics.enabled,
        "observability initialized"
    );

    Ok(ObservabilityHandle { metrics })
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builds the formatting layer for the configured format and destination.
fn fmt_layer(logging: &LoggingConfig) -> Result<BoxedLayer> {
    let layer = match (&logging.file, logging.format) {
        (Some(path), LogFormat::Json) => fmt::layer()
            .json()
            .with_writer(open_log_file(path)?)
            .with_current_span(true)
            .with_span_list(true)
            .with_thread_ids(true)
            .boxed(),
        (Some(path), LogFormat::Pretty) => fmt::layer()
            .with_writer(open_log_file(path)?)
            .with_ansi(false)
            .with_thread_ids(true)
            .boxed(),
        (None, LogFormat::Json) => fmt::layer()
            .json()
            .with_writer(io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        (None, LogFormat::Pretty) => fmt::layer().pretty().with_writer(io::stderr).boxed(),
    };
    Ok(layer)
}

/// Thread-safe file writer for logging.
#[derive(Clone)]
struct LogFileWriter {
    file: Arc<Mutex<File>>,
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .file
            .lock()
            .map_err(|e| io::Error::other(e.to_string()))?;
        guard.flush()
    }
}

impl<'a> fmt::MakeWriter<'a> for LogFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn open_log_file(path: &Path) -> Result<LogFileWriter> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
            operation: "create_log_dir".to_string(),
            cause: e.to_string(),
        })?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::OperationFailed {
            operation: "open_log_file".to_string(),
            cause: format!("{}: {}", path.display(), e),
        })?;

    Ok(LogFileWriter {
        file: Arc::new(Mutex::new(file)),
    })
}

fn init_failed(cause: &str) -> Error {
    Error::OperationFailed {
        operation: "observability_init".to_string(),
        cause: cause.to_string(),
    }
}

#[allow(clippy::needless_pass_by_value)]
fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    init_failed(&e.to_string())
}
