//! Logging and metrics setup

pub mod config;
pub mod metrics;

pub use config::ObservabilityConfig;
#[cfg(feature = "datadog")]
pub use metrics::StatsdMetrics;
pub use metrics::{MetricEvent, MetricsSink, NoopMetrics, RecordingMetrics};

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over the configured default filter. Calling this twice is
/// harmless: the second installation is ignored.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_log_filter));

    let result = if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };

    if let Err(e) = result {
        tracing::debug!(error = %e, "tracing subscriber already installed");
    }
}

/// Build the metrics sink the configuration asks for
///
/// Falls back to `NoopMetrics` when statsd is disabled, when the `datadog`
/// feature is off, or when the client cannot be created.
pub fn build_metrics(config: &ObservabilityConfig) -> Arc<dyn MetricsSink> {
    if !config.statsd_enabled {
        return Arc::new(NoopMetrics);
    }

    #[cfg(feature = "datadog")]
    {
        match StatsdMetrics::new(config) {
            Ok(sink) => return Arc::new(sink),
            Err(e) => tracing::warn!(error = %e, "statsd unavailable, metrics disabled"),
        }
    }

    #[cfg(not(feature = "datadog"))]
    tracing::warn!("statsd requested but the datadog feature is not enabled");

    Arc::new(NoopMetrics)
}
