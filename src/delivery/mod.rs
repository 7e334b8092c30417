//! Delivery Orchestrator
//!
//! `Courier` runs one execution attempt of a delivery task:
//!
//! 1. skip if an earlier attempt already recorded the batch as delivered
//! 2. fetch the sources and build the payload
//! 3. upload it, re-verifying when the upload reports failure
//! 4. record success, or hand the task back to the queue for another attempt
//! 5. tell downstream which references were sent or failed
//!
//! Environmental failures (store, transfer) never escape as errors: they
//! become a `Failed` report with an error dispatch, or a `RetryScheduled`
//! report. `DeliveryError` is reserved for bad input and for the task queue
//! itself being unreachable.
//!
//! Three flows share this machinery: zipped letter PDFs (`letters`),
//! concatenated job flat files (`jobs`) and the API's notification flat files
//! (`api`).

mod api;
mod batch;
pub mod dst;
mod jobs;
mod letters;

pub use api::{notification_references, ApiFileRequest};
pub use batch::{reference_from_key, LetterBatch};
pub use jobs::{concat_job_files, JobRequest};
pub use letters::LetterRequest;

use crate::clock::{Clock, SystemClock};
use crate::config::CourierConfig;
use crate::fanout::StatusFanout;
use crate::naming::NamingError;
use crate::observability::{MetricsSink, NoopMetrics};
use crate::queue::{QueueError, TaskMessage, TaskQueue};
use crate::store::BlobStore;
use crate::transfer::{Transfer, TransferError};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Downstream status task names for letter archives and API files
pub const LETTER_STATUS: StatusTasks = StatusTasks {
    sent: "update-letter-notifications-to-sent",
    error: "update-letter-notifications-to-error",
};

/// Downstream status task names for job flat files
pub const JOB_STATUS: StatusTasks = StatusTasks {
    sent: "update-letter-job-to-sent",
    error: "update-letter-job-to-error",
};

/// Pair of downstream task names, one per outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusTasks {
    pub sent: &'static str,
    pub error: &'static str,
}

impl StatusTasks {
    pub fn for_outcome(&self, outcome: DeliveryOutcome) -> &'static str {
        match outcome {
            DeliveryOutcome::Sent => self.sent,
            DeliveryOutcome::Error => self.error,
        }
    }
}

/// Terminal result of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Error,
}

/// What one execution attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    /// A sent-marker already existed; nothing fetched, uploaded or dispatched
    AlreadySent { marker_key: String },

    /// Delivered and reported as sent
    Sent {
        filename: String,
        references: Vec<String>,
        /// The upload reported failure but the file was verified in place
        rescued: bool,
    },

    /// Reported as errored
    Failed {
        reason: String,
        references: Vec<String>,
    },

    /// Re-enqueued; no status was dispatched. `filename` is the remote name
    /// this attempt worked with.
    RetryScheduled { filename: String, attempt: u32 },
}

impl DeliveryReport {
    /// The outcome dispatched downstream, if any
    pub fn outcome(&self) -> Option<DeliveryOutcome> {
        match self {
            DeliveryReport::Sent { .. } => Some(DeliveryOutcome::Sent),
            DeliveryReport::Failed { .. } => Some(DeliveryOutcome::Error),
            DeliveryReport::AlreadySent { .. } | DeliveryReport::RetryScheduled { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery batch is empty")]
    EmptyBatch,

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error("invalid api file name {0:?}")]
    InvalidFilename(String),

    #[error("api file {filename} line {line}: {reason}")]
    MalformedApiFile {
        filename: String,
        line: usize,
        reason: &'static str,
    },

    #[error("failed to dispatch downstream task: {0}")]
    Dispatch(#[from] QueueError),
}

/// Why a transfer could not be confirmed
#[derive(Debug)]
struct TransferFailed(String);

/// Delivery orchestrator
///
/// Owns its collaborators explicitly; there is no process-wide client state.
pub struct Courier {
    store: Arc<dyn BlobStore>,
    transfer: Arc<dyn Transfer>,
    queue: Arc<dyn TaskQueue>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    fanout: StatusFanout,
    config: CourierConfig,
}

impl Courier {
    pub fn new(
        config: CourierConfig,
        store: Arc<dyn BlobStore>,
        transfer: Arc<dyn Transfer>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        let fanout = StatusFanout::new(
            queue.clone(),
            config.queues.status(),
            config.delivery.status_chunk_size,
        );
        Courier {
            store,
            transfer,
            queue,
            metrics: Arc::new(NoopMetrics),
            clock: Arc::new(SystemClock),
            fanout,
            config,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    /// Upload, falling back to a standalone verification on failure
    ///
    /// `Ok(true)` means the upload errored but the file is in place with the
    /// right size.
    async fn transfer_with_rescue(&self, payload: Bytes, filename: &str) -> Result<bool, TransferFailed> {
        let expected = payload.len() as u64;

        match self.transfer.upload(payload, filename).await {
            Ok(outcome) => {
                debug!(filename, ?outcome, "upload complete");
                Ok(false)
            }
            Err(e) => self.rescue(filename, expected, e).await.map(|()| true),
        }
    }

    /// Check whether a file whose upload reported `upload_err` landed anyway
    async fn rescue(&self, filename: &str, expected: u64, upload_err: TransferError) -> Result<(), TransferFailed> {
        warn!(filename, error = %upload_err, "upload failed, checking whether the file landed");
        match self.transfer.verify(filename, expected).await {
            Ok(()) => {
                warn!(filename, "file landed despite the upload error");
                self.metrics.incr("delivery.rescued");
                Ok(())
            }
            Err(verify_err) => Err(TransferFailed(format!(
                "{}; rescue check: {}",
                upload_err, verify_err
            ))),
        }
    }

    /// Re-enqueue `task` with `args` for another attempt, or fail the batch
    /// when the attempts are used up
    async fn retry_or_fail(
        &self,
        task: &str,
        args: Vec<Value>,
        filename: &str,
        attempt: u32,
        status: StatusTasks,
        references: Vec<String>,
        reason: String,
    ) -> Result<DeliveryReport, DeliveryError> {
        if attempt >= self.config.delivery.max_retries {
            error!(task, filename, attempt, "retries exhausted");
            return self.fail(status, references, reason).await;
        }

        let next = attempt + 1;
        let mut message = TaskMessage::new(task, self.config.queues.retry(), args);
        message.attempt = next;
        message.countdown_secs = Some(self.config.delivery.retry_delay_secs);
        self.queue.send_task(message).await?;

        self.metrics.incr("delivery.retry");
        warn!(task, filename, attempt = next, %reason, "delivery failed, retry scheduled");
        Ok(DeliveryReport::RetryScheduled {
            filename: filename.to_string(),
            attempt: next,
        })
    }

    async fn fail(
        &self,
        status: StatusTasks,
        references: Vec<String>,
        reason: String,
    ) -> Result<DeliveryReport, DeliveryError> {
        error!(references = references.len(), %reason, "delivery failed");
        self.metrics.incr("delivery.error");
        self.fanout
            .dispatch(status.for_outcome(DeliveryOutcome::Error), &references)
            .await?;
        Ok(DeliveryReport::Failed { reason, references })
    }

    async fn succeed(
        &self,
        status: StatusTasks,
        filename: String,
        references: Vec<String>,
        rescued: bool,
    ) -> Result<DeliveryReport, DeliveryError> {
        info!(filename = %filename, references = references.len(), rescued, "delivery sent");
        self.metrics.incr("delivery.sent");
        self.fanout
            .dispatch(status.for_outcome(DeliveryOutcome::Sent), &references)
            .await?;
        Ok(DeliveryReport::Sent {
            filename,
            references,
            rescued,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_task_names() {
        assert_eq!(
            LETTER_STATUS.for_outcome(DeliveryOutcome::Sent),
            "update-letter-notifications-to-sent"
        );
        assert_eq!(
            LETTER_STATUS.for_outcome(DeliveryOutcome::Error),
            "update-letter-notifications-to-error"
        );
        assert_eq!(JOB_STATUS.for_outcome(DeliveryOutcome::Sent), "update-letter-job-to-sent");
        assert_eq!(JOB_STATUS.for_outcome(DeliveryOutcome::Error), "update-letter-job-to-error");
    }

    #[test]
    fn test_report_outcome() {
        let skipped = DeliveryReport::AlreadySent {
            marker_key: "k".to_string(),
        };
        assert_eq!(skipped.outcome(), None);

        let failed = DeliveryReport::Failed {
            reason: "r".to_string(),
            references: vec![],
        };
        assert_eq!(failed.outcome(), Some(DeliveryOutcome::Error));
    }
}
