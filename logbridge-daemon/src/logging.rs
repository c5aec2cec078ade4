//! Tracing setup for the daemon.
//!
//! The `[general]` section picks the verbosity and the output format.
//! JSON is the operational default so log shippers can ingest lines
//! without extra parsing; `pretty` is for working on the daemon locally.

use anyhow::{Result, bail};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use logbridge_core::config::GeneralConfig;

/// `RUST_LOG` wins over the configured level, so a noisy component can be
/// silenced without editing the config file.
fn level_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// Install the global subscriber.
///
/// Must be called exactly once, before the orchestrator starts emitting
/// events.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let registry = tracing_subscriber::registry().with(level_filter(&config.log_level));
    let result = match config.log_format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_current_span(false).with_target(true))
            .try_init(),
        "pretty" => registry
            .with(fmt::layer().pretty().with_thread_names(true))
            .try_init(),
        other => bail!("unknown log format '{other}', expected 'json' or 'pretty'"),
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_format_is_rejected() {
        let mut config = GeneralConfig::default();
        config.log_format = "xml".to_string();
        // Rejected before any global subscriber is installed
        let err = init_tracing(&config).unwrap_err();
        assert!(err.to_string().contains("unknown log format"));
    }
}
