//! Metrics sinks
//!
//! Reporting is fire-and-forget: a sink never returns an error to the caller
//! and never blocks a transfer on the report.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Destination for timings and counters
pub trait MetricsSink: Send + Sync + 'static {
    fn timing(&self, name: &str, elapsed: Duration);

    fn incr(&self, name: &str);
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn timing(&self, _name: &str, _elapsed: Duration) {}

    fn incr(&self, _name: &str) {}
}

/// A single recorded metric
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    Timing { name: String, elapsed: Duration },
    Incr { name: String },
}

impl MetricEvent {
    pub fn name(&self) -> &str {
        match self {
            MetricEvent::Timing { name, .. } | MetricEvent::Incr { name } => name,
        }
    }
}

/// Records every metric in memory (for tests)
#[derive(Debug, Clone, Default)]
pub struct RecordingMetrics {
    events: Arc<Mutex<Vec<MetricEvent>>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().clone()
    }

    /// Number of events recorded under `name`
    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }
}

impl MetricsSink for RecordingMetrics {
    fn timing(&self, name: &str, elapsed: Duration) {
        self.events.lock().push(MetricEvent::Timing {
            name: name.to_string(),
            elapsed,
        });
    }

    fn incr(&self, name: &str) {
        self.events.lock().push(MetricEvent::Incr {
            name: name.to_string(),
        });
    }
}

/// DogStatsD-backed sink
#[cfg(feature = "datadog")]
pub struct StatsdMetrics {
    client: dogstatsd::Client,
}

#[cfg(feature = "datadog")]
impl StatsdMetrics {
    pub fn new(
        config: &super::ObservabilityConfig,
    ) -> Result<Self, dogstatsd::DogstatsdError> {
        let mut builder = dogstatsd::OptionsBuilder::new();
        builder
            .to_addr(config.statsd_addr.to_string())
            .namespace(config.metric_prefix.clone());
        for tag in config.formatted_tags() {
            builder.default_tag(tag);
        }
        let client = dogstatsd::Client::new(builder.build())?;
        Ok(StatsdMetrics { client })
    }
}

#[cfg(feature = "datadog")]
impl MetricsSink for StatsdMetrics {
    fn timing(&self, name: &str, elapsed: Duration) {
        let ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        if let Err(e) = self.client.timing(name, ms, std::iter::empty::<&str>()) {
            tracing::debug!(metric = name, error = %e, "dropping timing metric");
        }
    }

    fn incr(&self, name: &str) {
        if let Err(e) = self.client.incr(name, std::iter::empty::<&str>()) {
            tracing::debug!(metric = name, error = %e, "dropping counter metric");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_metrics_counts_by_name() {
        let metrics = RecordingMetrics::new();
        metrics.incr("delivery.sent");
        metrics.incr("delivery.sent");
        metrics.timing("ftp-client.zip-upload-time", Duration::from_millis(12));

        assert_eq!(metrics.count("delivery.sent"), 2);
        assert_eq!(metrics.count("ftp-client.zip-upload-time"), 1);
        assert_eq!(metrics.count("delivery.error"), 0);
    }

    #[test]
    fn test_recording_metrics_clones_share_events() {
        let metrics = RecordingMetrics::new();
        let clone = metrics.clone();
        clone.incr("a");
        assert_eq!(metrics.events(), vec![MetricEvent::Incr { name: "a".into() }]);
    }
}
