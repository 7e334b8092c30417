//! Job flat-file delivery
//!
//! Every job has one exported text file in the jobs bucket. A batch of jobs
//! goes out as a single plain file named after the current minute, so two
//! batches in the same minute collide on the remote name. On a batch's first
//! placement a same-sized file under the name is taken as this batch; anything
//! else gets one bump to the next minute and no more. Once a name has been
//! written it is carried through retries, and whatever sits under it is this
//! batch's own partial upload.

use super::{Courier, DeliveryError, DeliveryReport, JOB_STATUS};
use crate::naming::{current_name, next_name, FileKind};
use crate::store::fetch_many;
use crate::tasks::SEND_JOB_FILES;
use crate::transfer::{Placement, PlacementError, UploadOutcome};
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use tracing::{info, info_span, Instrument};

/// Arguments of one `send-job-files` execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub job_ids: Vec<String>,
    /// Set once an attempt has written under a name
    pub target_filename: Option<String>,
    pub attempt: u32,
}

impl JobRequest {
    pub fn new(job_ids: Vec<String>) -> Self {
        JobRequest {
            job_ids,
            target_filename: None,
            attempt: 0,
        }
    }
}

/// Join the job files in order, each ending in exactly one newline
pub fn concat_job_files(files: &[Bytes]) -> Bytes {
    let mut out = BytesMut::new();
    for contents in files {
        let mut end = contents.len();
        while end > 0 && contents[end - 1] == b'\n' {
            end -= 1;
        }
        out.put_slice(&contents[..end]);
        out.put_u8(b'\n');
    }
    out.freeze()
}

impl Courier {
    /// Concatenate the jobs' flat files and deliver them as one plain file
    pub async fn send_job_files(&self, request: JobRequest) -> Result<DeliveryReport, DeliveryError> {
        if request.job_ids.is_empty() {
            return Err(DeliveryError::EmptyBatch);
        }
        let carried = request.target_filename.is_some();
        let filename = request
            .target_filename
            .unwrap_or_else(|| current_name(FileKind::Plain, self.clock.now()));

        let span = info_span!("send_job_files", %filename, carried, jobs = request.job_ids.len(), attempt = request.attempt);
        self.deliver_jobs(request.job_ids, filename, carried, request.attempt)
            .instrument(span)
            .await
    }

    async fn deliver_jobs(
        &self,
        job_ids: Vec<String>,
        filename: String,
        carried: bool,
        attempt: u32,
    ) -> Result<DeliveryReport, DeliveryError> {
        let suffix = &self.config.delivery.job_file_suffix;
        let keys: Vec<String> = job_ids.iter().map(|id| format!("{}{}", id, suffix)).collect();

        let files = match fetch_many(
            self.store.as_ref(),
            &self.config.store.jobs_bucket,
            &keys,
            self.config.delivery.fetch_concurrency,
        )
        .await
        {
            Ok(files) => files,
            Err(e) => return self.fail(JOB_STATUS, job_ids, e.to_string()).await,
        };
        let payload = concat_job_files(&files);
        info!(bytes = payload.len(), "job file built");

        if carried {
            return match self.transfer_with_rescue(payload, &filename).await {
                Ok(rescued) => self.succeed(JOB_STATUS, filename, job_ids, rescued).await,
                Err(failed) => {
                    self.retry_jobs(job_ids, &filename, Some(&filename), attempt, failed.0)
                        .await
                }
            };
        }

        let expected = payload.len() as u64;
        let renamed = next_name(&filename)?;
        match self.transfer.place(payload, &filename, &renamed).await {
            Ok(Placement::Placed { filename, outcome }) => {
                if outcome == UploadOutcome::AlreadyPresent {
                    info!(filename = %filename, "job file already delivered");
                }
                self.succeed(JOB_STATUS, filename, job_ids, false).await
            }
            Ok(Placement::Taken { filename }) => {
                self.fail(
                    JOB_STATUS,
                    job_ids,
                    format!("filename {} still taken after rename", filename),
                )
                .await
            }
            Err(PlacementError {
                filename: Some(placed),
                error,
            }) => match self.rescue(&placed, expected, error).await {
                Ok(()) => self.succeed(JOB_STATUS, placed, job_ids, true).await,
                Err(failed) => {
                    self.retry_jobs(job_ids, &placed, Some(&placed), attempt, failed.0)
                        .await
                }
            },
            // Nothing was written, so the retry picks its name afresh
            Err(PlacementError {
                filename: None,
                error,
            }) => {
                self.retry_jobs(job_ids, &filename, None, attempt, error.to_string())
                    .await
            }
        }
    }

    async fn retry_jobs(
        &self,
        job_ids: Vec<String>,
        filename: &str,
        carry: Option<&str>,
        attempt: u32,
        reason: String,
    ) -> Result<DeliveryReport, DeliveryError> {
        let args = vec![Value::from(job_ids.clone()), carry.map_or(Value::Null, Value::from)];
        self.retry_or_fail(SEND_JOB_FILES, args, filename, attempt, JOB_STATUS, job_ids, reason)
            .await
    }
}
