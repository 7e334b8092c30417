//! Observability Configuration
//!
//! All settings are loaded from environment variables for 12-factor compliance.
//! Metrics use the standard Datadog environment variable names (DD_*).

use std::net::SocketAddr;

const DEFAULT_STATSD_ADDR: &str = "127.0.0.1:8125";

/// Logging and metrics configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Emit logs as JSON lines instead of human-readable text
    pub json_logs: bool,
    /// Default filter when RUST_LOG is unset
    pub default_log_filter: String,
    /// Send metrics to DogStatsD (only honoured with the `datadog` feature)
    pub statsd_enabled: bool,
    /// DogStatsD agent address (default: 127.0.0.1:8125)
    pub statsd_addr: SocketAddr,
    /// Service name tag (default: letter-courier)
    pub service_name: String,
    /// Environment tag (default: development)
    pub env: String,
    /// Service version (default: from Cargo.toml)
    pub version: String,
    /// Metric prefix (default: letter_courier)
    pub metric_prefix: String,
    /// Additional global tags (parsed from DD_TAGS)
    pub global_tags: Vec<(String, String)>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        ObservabilityConfig {
            json_logs: false,
            default_log_filter: "info".to_string(),
            statsd_enabled: false,
            statsd_addr: default_statsd_addr(),
            service_name: "letter-courier".to_string(),
            env: "development".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            metric_prefix: "letter_courier".to_string(),
            global_tags: Vec::new(),
        }
    }
}

impl ObservabilityConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        ObservabilityConfig {
            json_logs: std::env::var("LOGGING_STDOUT_JSON")
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false),
            default_log_filter: std::env::var("LOG_LEVEL")
                .unwrap_or(defaults.default_log_filter),
            statsd_enabled: std::env::var("STATSD_ENABLED")
                .map(|v| v == "1" || v == "true")
                .unwrap_or(false),
            statsd_addr: std::env::var("DD_DOGSTATSD_URL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.statsd_addr),
            service_name: std::env::var("DD_SERVICE").unwrap_or(defaults.service_name),
            env: std::env::var("DD_ENV")
                .or_else(|_| std::env::var("NOTIFY_ENVIRONMENT"))
                .unwrap_or(defaults.env),
            version: std::env::var("DD_VERSION").unwrap_or(defaults.version),
            metric_prefix: std::env::var("DD_METRIC_PREFIX").unwrap_or(defaults.metric_prefix),
            global_tags: parse_tags(&std::env::var("DD_TAGS").unwrap_or_default()),
        }
    }

    /// Get all tags as formatted strings for DogStatsD
    pub fn formatted_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .global_tags
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect();

        tags.push(format!("env:{}", self.env));
        tags.push(format!("service:{}", self.service_name));
        tags.push(format!("version:{}", self.version));

        tags
    }
}

fn default_statsd_addr() -> SocketAddr {
    // Constant literal, always parses
    DEFAULT_STATSD_ADDR
        .parse()
        .expect("hardcoded address must parse")
}

/// Parse a DD_TAGS value (format: "key1:value1,key2:value2")
pub(crate) fn parse_tags(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|tag| {
            let (key, value) = tag.split_once(':')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObservabilityConfig::default();
        assert_eq!(config.service_name, "letter-courier");
        assert_eq!(config.metric_prefix, "letter_courier");
        assert_eq!(config.statsd_addr.port(), 8125);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags("region:eu-west-1,cluster:primary,bogus");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0], ("region".to_string(), "eu-west-1".to_string()));
        assert_eq!(tags[1], ("cluster".to_string(), "primary".to_string()));
    }

    #[test]
    fn test_formatted_tags_include_service_tags() {
        let config = ObservabilityConfig {
            global_tags: vec![("team".to_string(), "letters".to_string())],
            ..Default::default()
        };
        let tags = config.formatted_tags();
        assert_eq!(tags[0], "team:letters");
        assert!(tags.contains(&"service:letter-courier".to_string()));
        assert!(tags.contains(&"env:development".to_string()));
    }
}
