//! Pipeline, capability and health commands.

use super::{RequestFlags, print_json};
use switchboard::{CapabilityKind, RequestConfig, ServiceContainer};

impl RequestFlags {
    /// Applies the flags on top of `base`.
    fn apply(self, mut base: RequestConfig) -> RequestConfig {
        if self.no_snapshot {
            base.use_snapshot = false;
        }
        if self.no_memory {
            base.use_memory = false;
        }
        if self.no_analyzer {
            base.use_analyzer = false;
        }
        if self.no_cache {
            base.enable_caching = false;
        }
        if self.sequential {
            base.enable_parallel = false;
        }
        if self.no_external_sources {
            base.enable_external_sources = false;
        }
        if self.no_comparative {
            base.enable_comparative_analysis = false;
        }
        base
    }
}

/// Process command.
pub async fn cmd_process(
    services: &ServiceContainer,
    request: &str,
    flags: RequestFlags,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = flags.apply(*services.default_request_config());
    let context = services.process(request, &config).await;
    for warning in &context.warnings {
        tracing::warn!(stage = %warning.stage, "{}", warning.message);
    }
    print_json(&context)
}

/// Analyze command.
pub fn cmd_analyze(
    services: &ServiceContainer,
    request: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    print_json(&services.analyze(request))
}

/// Capabilities command.
pub fn cmd_capabilities(
    services: &ServiceContainer,
    kind: Option<String>,
    search: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind = kind
        .map(|k| {
            CapabilityKind::parse(&k).ok_or_else(|| {
                switchboard::Error::InvalidInput(format!(
                    "unknown capability kind '{k}' (expected node, workflow, tool or service)"
                ))
            })
        })
        .transpose()?;

    let entries = match search {
        Some(needle) => services.index().query(&needle, kind),
        None => services.index().entries(kind),
    };
    print_json(&entries)
}

/// Health command: takes one sample so the summary reflects current state.
pub fn cmd_health(services: &ServiceContainer) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = services.monitor().sample();
    print_json(&serde_json::json!({
        "summary": services.health_summary(),
        "snapshot": snapshot,
    }))
}

/// Stats command.
pub fn cmd_stats(services: &ServiceContainer) -> Result<(), Box<dyn std::error::Error>> {
    print_json(&services.statistics()?)
}

/// Monitor command: samples on the configured interval until Ctrl-C.
pub async fn cmd_monitor(services: &ServiceContainer) -> Result<(), Box<dyn std::error::Error>> {
    let monitor = services.monitor();
    let handle = monitor.start();
    tracing::info!(
        interval_secs = monitor.config().interval_secs,
        "monitor running, press Ctrl-C to stop"
    );

    let signal = tokio::signal::ctrl_c().await;
    handle.stop().await;
    signal?;

    print_json(&serde_json::json!({
        "summary": services.health_summary(),
        "snapshots": monitor.snapshot_history(usize::MAX).len(),
        "recent_events": monitor.recent_events(10),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let flags = RequestFlags {
            no_cache: true,
            sequential: true,
            no_comparative: true,
            ..RequestFlags::default()
        };
        let config = flags.apply(RequestConfig::default());
        assert!(!config.enable_caching);
        assert!(!config.enable_parallel);
        assert!(!config.enable_comparative_analysis);
        assert!(config.use_snapshot);
    }

    #[test]
    fn test_no_flags_keep_defaults() {
        let base = RequestConfig::default();
        assert_eq!(RequestFlags::default().apply(base), base);
    }
}
