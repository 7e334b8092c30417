//! Task entry point
//!
//! Routes a `TaskMessage` to the matching delivery flow, decoding its
//! positional JSON arguments, and reports how long the task took.

use crate::delivery::{ApiFileRequest, Courier, DeliveryError, DeliveryReport, JobRequest, LetterRequest};
use crate::observability::MetricsSink;
use crate::queue::TaskMessage;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info};

/// `[source_keys, target_filename?]`
pub const ZIP_AND_SEND_LETTER_PDFS: &str = "zip-and-send-letter-pdfs";

/// `[job_ids, target_filename?]`
pub const SEND_JOB_FILES: &str = "send-job-files";

/// `[api_file_key]`
pub const SEND_API_NOTIFICATIONS: &str = "send-api-notifications";

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("unknown task {0}")]
    UnknownTask(String),

    #[error("bad arguments for task {task}: {message}")]
    BadArguments { task: String, message: String },

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Executes delivery tasks
pub struct Worker {
    courier: Courier,
    metrics: Arc<dyn MetricsSink>,
}

impl Worker {
    pub fn new(courier: Courier, metrics: Arc<dyn MetricsSink>) -> Self {
        Worker { courier, metrics }
    }

    pub fn courier(&self) -> &Courier {
        &self.courier
    }

    /// Run one task to completion
    pub async fn handle(&self, message: TaskMessage) -> Result<DeliveryReport, TaskError> {
        let start = Instant::now();
        let result = self.run(&message).await;
        let elapsed = start.elapsed();

        let status = if result.is_ok() { "success" } else { "failure" };
        self.metrics.timing(
            &format!("tasks.{}.{}.{}", message.queue, message.name, status),
            elapsed,
        );
        match &result {
            Ok(_) => info!(
                "task {} (queue: {}) took {:.4}",
                message.name,
                message.queue,
                elapsed.as_secs_f64()
            ),
            Err(e) => error!(
                error = %e,
                "task {} (queue: {}) failed after {:.4}",
                message.name,
                message.queue,
                elapsed.as_secs_f64()
            ),
        }
        result
    }

    async fn run(&self, message: &TaskMessage) -> Result<DeliveryReport, TaskError> {
        match message.name.as_str() {
            ZIP_AND_SEND_LETTER_PDFS => {
                let (source_keys, target_filename) = decode_args(message)?;
                let request = LetterRequest {
                    source_keys,
                    target_filename,
                    attempt: message.attempt,
                };
                Ok(self.courier.deliver_letters(request).await?)
            }
            SEND_JOB_FILES => {
                let (job_ids, target_filename) = decode_args(message)?;
                let request = JobRequest {
                    job_ids,
                    target_filename,
                    attempt: message.attempt,
                };
                Ok(self.courier.send_job_files(request).await?)
            }
            SEND_API_NOTIFICATIONS => {
                let mut request = ApiFileRequest::new(decode_key_arg(message)?);
                request.attempt = message.attempt;
                Ok(self.courier.send_api_notifications(request).await?)
            }
            other => Err(TaskError::UnknownTask(other.to_string())),
        }
    }
}

/// `[list of strings, optional filename]`
fn decode_args(message: &TaskMessage) -> Result<(Vec<String>, Option<String>), TaskError> {
    let bad = |msg: String| TaskError::BadArguments {
        task: message.name.clone(),
        message: msg,
    };

    if message.args.len() > 2 {
        return Err(bad(format!("expected at most 2 arguments, got {}", message.args.len())));
    }
    let first = message
        .args
        .first()
        .ok_or_else(|| bad("missing list argument".to_string()))?;
    let items: Vec<String> =
        serde_json::from_value(first.clone()).map_err(|e| bad(format!("first argument: {}", e)))?;

    let filename = match message.args.get(1) {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(other) => return Err(bad(format!("filename must be a string, got {}", other))),
    };
    Ok((items, filename))
}

/// `[string]`
fn decode_key_arg(message: &TaskMessage) -> Result<String, TaskError> {
    match message.args.as_slice() {
        [Value::String(key)] => Ok(key.clone()),
        other => Err(TaskError::BadArguments {
            task: message.name.clone(),
            message: format!("expected one string argument, got {}", Value::from(other.to_vec())),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CourierConfig;
    use crate::observability::{MetricEvent, RecordingMetrics};
    use crate::queue::InMemoryTaskQueue;
    use crate::store::InMemoryBlobStore;
    use crate::transfer::InMemoryTransfer;
    use serde_json::json;

    fn worker() -> (Worker, InMemoryBlobStore, RecordingMetrics) {
        let store = InMemoryBlobStore::new();
        let metrics = RecordingMetrics::new();
        let courier = Courier::new(
            CourierConfig::test(),
            Arc::new(store.clone()),
            Arc::new(InMemoryTransfer::default()),
            Arc::new(InMemoryTaskQueue::new()),
        );
        (Worker::new(courier, Arc::new(metrics.clone())), store, metrics)
    }

    #[tokio::test]
    async fn test_routes_letter_task_with_filename() {
        let (worker, store, metrics) = worker();
        store.insert("test-letters-pdf", "2017-01-01/NOTIFY.REF1.PDF", b"pdf".to_vec());

        let message = TaskMessage::new(
            ZIP_AND_SEND_LETTER_PDFS,
            "process-ftp-tasks",
            vec![json!(["2017-01-01/NOTIFY.REF1.PDF"]), json!("NOTIFY.20180101120000.ZIP")],
        );
        let report = worker.handle(message).await.unwrap();

        assert!(matches!(
            report,
            DeliveryReport::Sent { ref filename, .. } if filename == "NOTIFY.20180101120000.ZIP"
        ));
        let events = metrics.events();
        assert!(matches!(
            &events[..],
            [MetricEvent::Timing { name, .. }]
                if name == "tasks.process-ftp-tasks.zip-and-send-letter-pdfs.success"
        ));
    }

    #[tokio::test]
    async fn test_routes_api_task() {
        let (worker, store, metrics) = worker();
        store.insert(
            "test-api-notifications",
            "api-run.txt",
            b"140|500|001||REF1|x\n".to_vec(),
        );

        let mut message = TaskMessage::new(SEND_API_NOTIFICATIONS, "process-ftp-tasks", vec![json!("api-run.txt")]);
        message.attempt = 2;
        let report = worker.handle(message).await.unwrap();

        assert_eq!(
            report,
            DeliveryReport::Sent {
                filename: "api-run.txt".to_string(),
                references: vec!["REF1".to_string()],
                rescued: false,
            }
        );
        assert_eq!(
            metrics.count("tasks.process-ftp-tasks.send-api-notifications.success"),
            1
        );
    }

    #[test]
    fn test_decode_key_arg() {
        let ok = TaskMessage::new(SEND_API_NOTIFICATIONS, "q", vec![json!("f.txt")]);
        assert_eq!(decode_key_arg(&ok).unwrap(), "f.txt");

        let none = TaskMessage::new(SEND_API_NOTIFICATIONS, "q", vec![]);
        assert!(matches!(decode_key_arg(&none), Err(TaskError::BadArguments { .. })));

        let list = TaskMessage::new(SEND_API_NOTIFICATIONS, "q", vec![json!(["f.txt"])]);
        assert!(decode_key_arg(&list).is_err());

        let extra = TaskMessage::new(SEND_API_NOTIFICATIONS, "q", vec![json!("f.txt"), json!("g.txt")]);
        assert!(decode_key_arg(&extra).is_err());
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let (worker, _, metrics) = worker();

        let err = worker
            .handle(TaskMessage::new("reticulate-splines", "q", vec![]))
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::UnknownTask(ref name) if name == "reticulate-splines"));
        assert_eq!(metrics.count("tasks.q.reticulate-splines.failure"), 1);
    }

    #[test]
    fn test_decode_args() {
        let ok = TaskMessage::new(SEND_JOB_FILES, "q", vec![json!(["a", "b"]), Value::Null]);
        assert_eq!(
            decode_args(&ok).unwrap(),
            (vec!["a".to_string(), "b".to_string()], None)
        );

        let missing = TaskMessage::new(SEND_JOB_FILES, "q", vec![]);
        assert!(matches!(decode_args(&missing), Err(TaskError::BadArguments { .. })));

        let not_strings = TaskMessage::new(SEND_JOB_FILES, "q", vec![json!([1, 2])]);
        assert!(decode_args(&not_strings).is_err());

        let bad_name = TaskMessage::new(SEND_JOB_FILES, "q", vec![json!(["a"]), json!(5)]);
        assert!(decode_args(&bad_name).is_err());
    }

    #[tokio::test]
    async fn test_empty_batch_is_task_error() {
        let (worker, _, _) = worker();
        let err = worker
            .handle(TaskMessage::new(ZIP_AND_SEND_LETTER_PDFS, "q", vec![json!([])]))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Delivery(DeliveryError::EmptyBatch)));
    }
}
