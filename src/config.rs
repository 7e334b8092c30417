//! Courier configuration
//!
//! Loaded from an optional TOML file, then overridden from the environment:
//!
//! ## SFTP
//! - `FTP_HOST`, `FTP_PORT`, `FTP_USERNAME`, `FTP_PASSWORD`
//!
//! ## Object store
//! - `AWS_REGION`: Region for every bucket (default: eu-west-1)
//! - `S3_ENDPOINT`: Custom endpoint for S3-compatible services (optional)
//! - `LETTERS_PDF_BUCKET_NAME`: Source letter PDFs and sent-markers
//! - `DVLA_JOBS_BUCKET_NAME`: Job flat files
//! - `API_NOTIFICATIONS_BUCKET_NAME`: Flat files exported by the API
//! - `ARCHIVE_COPY_BUCKET_NAME`: Side copy of every delivered archive (optional)
//!
//! ## Queues
//! - `NOTIFICATION_QUEUE_PREFIX`: Prepended to every queue name (optional)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// SFTP connection to the partner
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Drop directory, relative to the login directory
    pub remote_dir: String,
    pub connect_timeout_secs: u64,
}

impl Default for SftpConfig {
    fn default() -> Self {
        SftpConfig {
            host: String::new(),
            port: 22,
            username: String::new(),
            password: String::new(),
            remote_dir: "notify".to_string(),
            connect_timeout_secs: 30,
        }
    }
}

impl SftpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// Keep the password out of logs
impl std::fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("remote_dir", &self.remote_dir)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

/// Buckets and object store connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    pub region: String,
    pub endpoint: Option<String>,
    pub letters_pdf_bucket: String,
    pub jobs_bucket: String,
    pub api_bucket: String,
    /// Defaults to `letters_pdf_bucket`
    pub sent_marker_bucket: Option<String>,
    pub archive_copy_bucket: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            region: "eu-west-1".to_string(),
            endpoint: None,
            letters_pdf_bucket: String::new(),
            jobs_bucket: String::new(),
            api_bucket: String::new(),
            sent_marker_bucket: None,
            archive_copy_bucket: None,
        }
    }
}

impl StoreConfig {
    pub fn sent_marker_bucket(&self) -> &str {
        self.sent_marker_bucket
            .as_deref()
            .unwrap_or(&self.letters_pdf_bucket)
    }
}

/// Task queue names
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue for downstream status updates
    pub status_queue: String,
    /// Queue the delivery tasks are re-enqueued on
    pub retry_queue: String,
    pub queue_prefix: Option<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            status_queue: "notify-internal-tasks".to_string(),
            retry_queue: "process-ftp-tasks".to_string(),
            queue_prefix: None,
        }
    }
}

impl QueueConfig {
    /// `name` with the configured prefix applied
    pub fn qualified(&self, name: &str) -> String {
        match self.queue_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{}-{}", prefix, name),
            _ => name.to_string(),
        }
    }

    pub fn status(&self) -> String {
        self.qualified(&self.status_queue)
    }

    pub fn retry(&self) -> String {
        self.qualified(&self.retry_queue)
    }
}

/// Delivery tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Concurrent source fetches per batch
    pub fetch_concurrency: usize,
    /// References per downstream status task
    pub status_chunk_size: usize,
    /// Attempts after the first before an upload failure is terminal
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    /// Appended to a job id to form its flat-file key
    pub job_file_suffix: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            fetch_concurrency: 5,
            status_chunk_size: 1000,
            max_retries: 5,
            retry_delay_secs: 300,
            job_file_suffix: "-letter-job.txt".to_string(),
        }
    }
}

/// Complete courier configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CourierConfig {
    pub sftp: SftpConfig,
    pub store: StoreConfig,
    pub queues: QueueConfig,
    pub delivery: DeliveryConfig,
}

impl CourierConfig {
    /// Configuration for tests: fixed bucket names, no real endpoints
    pub fn test() -> Self {
        CourierConfig {
            sftp: SftpConfig {
                host: "localhost".to_string(),
                username: "test".to_string(),
                password: "test".to_string(),
                ..Default::default()
            },
            store: StoreConfig {
                letters_pdf_bucket: "test-letters-pdf".to_string(),
                jobs_bucket: "test-dvla-jobs".to_string(),
                api_bucket: "test-api-notifications".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Override from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Override from `lookup`; unset variables leave values untouched
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("FTP_HOST") {
            self.sftp.host = host;
        }
        if let Some(port) = lookup("FTP_PORT") {
            self.sftp.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "FTP_PORT",
                value: port,
            })?;
        }
        if let Some(username) = lookup("FTP_USERNAME") {
            self.sftp.username = username;
        }
        if let Some(password) = lookup("FTP_PASSWORD") {
            self.sftp.password = password;
        }

        if let Some(region) = lookup("AWS_REGION") {
            self.store.region = region;
        }
        if let Some(endpoint) = lookup("S3_ENDPOINT") {
            self.store.endpoint = Some(endpoint);
        }
        if let Some(bucket) = lookup("LETTERS_PDF_BUCKET_NAME") {
            self.store.letters_pdf_bucket = bucket;
        }
        if let Some(bucket) = lookup("DVLA_JOBS_BUCKET_NAME") {
            self.store.jobs_bucket = bucket;
        }
        if let Some(bucket) = lookup("API_NOTIFICATIONS_BUCKET_NAME") {
            self.store.api_bucket = bucket;
        }
        if let Some(bucket) = lookup("ARCHIVE_COPY_BUCKET_NAME") {
            self.store.archive_copy_bucket = Some(bucket);
        }

        if let Some(prefix) = lookup("NOTIFICATION_QUEUE_PREFIX") {
            self.queues.queue_prefix = Some(prefix);
        }
        Ok(())
    }

    /// Check the values the real backends depend on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery.fetch_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "delivery.fetch_concurrency must be at least 1".to_string(),
            ));
        }
        if self.delivery.status_chunk_size == 0 {
            return Err(ConfigError::Invalid(
                "delivery.status_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.store.letters_pdf_bucket.is_empty() {
            return Err(ConfigError::Invalid(
                "store.letters_pdf_bucket is not set".to_string(),
            ));
        }
        if self.store.jobs_bucket.is_empty() {
            return Err(ConfigError::Invalid("store.jobs_bucket is not set".to_string()));
        }
        if self.store.api_bucket.is_empty() {
            return Err(ConfigError::Invalid("store.api_bucket is not set".to_string()));
        }
        if self.sftp.host.is_empty() {
            return Err(ConfigError::Invalid("sftp.host is not set".to_string()));
        }
        Ok(())
    }
}
