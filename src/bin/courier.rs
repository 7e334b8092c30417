//! Courier worker
//!
//! Runs a single delivery task and exits. Follow-up tasks (status updates,
//! retries) are written to stdout as JSON lines for the queue bridge.
//!
//! ```text
//! courier <task-name> <json-args> [attempt]
//! courier zip-and-send-letter-pdfs '[["2017-01-01/NOTIFY.REF1.D.2.C.C.20170101120000.PDF"]]'
//! courier send-api-notifications '["2017-01-01T12:34:56Z-dvla-notifications.txt"]'
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | COURIER_CONFIG | - | Path to a TOML config file |
//! | FTP_HOST / FTP_PORT | - / 22 | SFTP server |
//! | FTP_USERNAME / FTP_PASSWORD | - | SFTP credentials |
//! | AWS_REGION | eu-west-1 | Object store region |
//! | S3_ENDPOINT | - | S3-compatible endpoint |
//! | LETTERS_PDF_BUCKET_NAME | - | Letter PDFs and sent-markers |
//! | DVLA_JOBS_BUCKET_NAME | - | Job flat files |
//! | API_NOTIFICATIONS_BUCKET_NAME | - | Flat files exported by the API |
//! | ARCHIVE_COPY_BUCKET_NAME | - | Side copy of delivered archives |
//! | NOTIFICATION_QUEUE_PREFIX | - | Queue name prefix |
//! | RUST_LOG / LOG_LEVEL | info | Log filter |
//! | LOGGING_STDOUT_JSON | false | JSON log output |
//! | STATSD_ENABLED | false | Send metrics to DogStatsD |
//!
//! ## Datadog (when built with --features datadog)
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | DD_SERVICE | letter-courier | Service name |
//! | DD_ENV | development | Environment |
//! | DD_DOGSTATSD_URL | 127.0.0.1:8125 | DogStatsD address |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use letter_courier::observability::{build_metrics, init_tracing, ObservabilityConfig};
use letter_courier::queue::JsonLinesTaskQueue;
use letter_courier::store::{S3BlobStore, S3Settings};
use letter_courier::transfer::SftpTransfer;
use letter_courier::{Courier, CourierConfig, TaskMessage, Worker};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let observability = ObservabilityConfig::from_env();
    init_tracing(&observability);
    let metrics = build_metrics(&observability);

    let mut config = match std::env::var("COURIER_CONFIG") {
        Ok(path) => CourierConfig::load(path)?,
        Err(_) => CourierConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;

    let mut args = std::env::args().skip(1);
    let (Some(task), Some(raw_args)) = (args.next(), args.next()) else {
        eprintln!("usage: courier <task-name> <json-args> [attempt]");
        std::process::exit(2);
    };
    let task_args: Vec<Value> = serde_json::from_str(&raw_args)?;
    let attempt: u32 = match args.next() {
        Some(raw) => raw.parse()?,
        None => 0,
    };

    let store = S3BlobStore::new(S3Settings {
        region: config.store.region.clone(),
        endpoint: config.store.endpoint.clone(),
    });
    let transfer = SftpTransfer::new(config.sftp.clone(), metrics.clone());
    let queue = JsonLinesTaskQueue::new(std::io::stdout());

    let mut message = TaskMessage::new(task, config.queues.retry(), task_args);
    message.attempt = attempt;

    info!(task = %message.name, attempt, "starting courier");
    let courier = Courier::new(config, Arc::new(store), Arc::new(transfer), Arc::new(queue))
        .with_metrics(metrics.clone());
    let worker = Worker::new(courier, metrics);

    match worker.handle(message).await {
        Ok(report) => {
            info!(?report, "task finished");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "task failed");
            std::process::exit(1);
        }
    }
}
