//! Log output settings.

use crate::config::LoggingSettings;
use crate::{Error, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Directive used when neither the config file nor the environment sets one.
const DEFAULT_FILTER: &str = "warn";

/// Directive appended for `--verbose`.
const VERBOSE_DIRECTIVE: &str = "switchboard=debug";

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event.
    Json,
    /// Multi-line human readable output.
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses `json` or `pretty`, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" | "text" => Some(Self::Pretty),
            _ => None,
        }
    }
}

/// Resolved logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive string.
    pub directive: String,
    /// Log file; stderr when unset.
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    /// Builds logging configuration from config settings with env overrides.
    ///
    /// `SWITCHBOARD_LOG` beats `RUST_LOG`, which beats the config file.
    /// `verbose` raises this crate to debug on top of whichever directive
    /// won. `SWITCHBOARD_LOG_FORMAT` and `SWITCHBOARD_LOG_FILE` override the
    /// matching settings.
    #[must_use]
    pub fn from_settings(settings: Option<&LoggingSettings>, verbose: bool) -> Self {
        let configured = settings.and_then(|s| s.filter.as_deref()).map(str::to_string);
        let base = parse_string_env("SWITCHBOARD_LOG")
            .or_else(|| parse_string_env("RUST_LOG"))
            .or(configured)
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let directive = if verbose {
            format!("{base},{VERBOSE_DIRECTIVE}")
        } else {
            base
        };

        let format = parse_string_env("SWITCHBOARD_LOG_FORMAT")
            .or_else(|| settings.and_then(|s| s.format.clone()))
            .and_then(|value| LogFormat::parse(&value))
            .unwrap_or_default();

        let file = parse_string_env("SWITCHBOARD_LOG_FILE")
            .or_else(|| settings.and_then(|s| s.file.clone()))
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Self {
            format,
            directive,
            file,
        }
    }

    /// Builds the subscriber filter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the directive does not parse.
    pub fn filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.directive).map_err(|err| {
            Error::Configuration(format!("invalid log filter '{}': {err}", self.directive))
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            directive: DEFAULT_FILTER.to_string(),
            file: None,
        }
    }
}

fn parse_string_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("json", Some(LogFormat::Json); "json")]
    #[test_case(" Pretty ", Some(LogFormat::Pretty); "pretty mixed case")]
    #[test_case("text", Some(LogFormat::Pretty); "text alias")]
    #[test_case("xml", None; "unknown")]
    fn test_parse_format(input: &str, expected: Option<LogFormat>) {
        assert_eq!(LogFormat::parse(input), expected);
    }

    #[test]
    fn test_filter_rejects_garbage() {
        let config = LoggingConfig {
            directive: "switchboard=loudest".to_string(),
            ..LoggingConfig::default()
        };
        assert!(matches!(config.filter(), Err(Error::Configuration(_))));
        assert!(LoggingConfig::default().filter().is_ok());
    }

    #[test]
    fn test_verbose_raises_crate_level() {
        let config = LoggingConfig::from_settings(None, true);
        assert!(config.directive.ends_with(",switchboard=debug"));
        assert!(config.filter().is_ok());
    }

    #[test]
    fn test_settings_supply_format_and_file() {
        let settings = LoggingSettings {
            format: Some("json".to_string()),
            filter: None,
            file: Some("logs/switchboard.log".to_string()),
        };
        let config = LoggingConfig::from_settings(Some(&settings), false);
        if std::env::var("SWITCHBOARD_LOG_FORMAT").is_err() {
            assert_eq!(config.format, LogFormat::Json);
        }
        if std::env::var("SWITCHBOARD_LOG_FILE").is_err() {
            assert_eq!(config.file, Some(PathBuf::from("logs/switchboard.log")));
        }
    }
}
