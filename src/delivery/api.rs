//! API notification file delivery
//!
//! The API exports letters sent through it as one flat file per run into the
//! API bucket. The file goes to the partner unchanged, under its own name, and
//! the notification references it carries drive the status updates.
//!
//! Every non-blank line is one `|`-delimited record; the fifth field is the
//! notification reference.

use super::{Courier, DeliveryError, DeliveryReport, LETTER_STATUS};
use crate::archive::entry_name;
use crate::tasks::SEND_API_NOTIFICATIONS;
use serde_json::Value;
use tracing::{info, info_span, Instrument};

/// Zero-based field holding the notification reference
const REFERENCE_FIELD: usize = 4;

/// Arguments of one `send-api-notifications` execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFileRequest {
    /// Object key in the API bucket
    pub filename: String,
    pub attempt: u32,
}

impl ApiFileRequest {
    pub fn new(filename: impl Into<String>) -> Self {
        ApiFileRequest {
            filename: filename.into(),
            attempt: 0,
        }
    }
}

/// Notification references of an API flat file, in file order
///
/// Line numbers in errors are one-based.
pub fn notification_references(filename: &str, contents: &[u8]) -> Result<Vec<String>, DeliveryError> {
    let malformed = |line: usize, reason: &'static str| DeliveryError::MalformedApiFile {
        filename: filename.to_string(),
        line,
        reason,
    };

    let mut references = Vec::new();
    for (index, raw) in contents.split(|b| *b == b'\n').enumerate() {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let line = std::str::from_utf8(raw).map_err(|_| malformed(index + 1, "not UTF-8"))?;
        let reference = line
            .split('|')
            .nth(REFERENCE_FIELD)
            .ok_or_else(|| malformed(index + 1, "too few fields"))?
            .trim();
        if reference.is_empty() {
            return Err(malformed(index + 1, "empty reference"));
        }
        references.push(reference.to_string());
    }
    Ok(references)
}

impl Courier {
    /// Send one API flat file and report its notifications
    pub async fn send_api_notifications(&self, request: ApiFileRequest) -> Result<DeliveryReport, DeliveryError> {
        let remote_name = entry_name(&request.filename);
        if remote_name.is_empty() {
            return Err(DeliveryError::InvalidFilename(request.filename));
        }
        let remote_name = remote_name.to_string();

        let span = info_span!("send_api_notifications", key = %request.filename, filename = %remote_name, attempt = request.attempt);
        self.deliver_api_file(request.filename, remote_name, request.attempt)
            .instrument(span)
            .await
    }

    async fn deliver_api_file(
        &self,
        key: String,
        filename: String,
        attempt: u32,
    ) -> Result<DeliveryReport, DeliveryError> {
        // Without the file there are no references to report on
        let contents = match self.store.get(&self.config.store.api_bucket, &key).await {
            Ok(contents) => contents,
            Err(e) => return self.fail(LETTER_STATUS, Vec::new(), e.to_string()).await,
        };

        let references = notification_references(&key, &contents)?;
        if references.is_empty() {
            return Err(DeliveryError::EmptyBatch);
        }
        info!(bytes = contents.len(), notifications = references.len(), "api file fetched");

        match self.transfer_with_rescue(contents, &filename).await {
            Ok(rescued) => self.succeed(LETTER_STATUS, filename, references, rescued).await,
            Err(failed) => {
                self.retry_or_fail(
                    SEND_API_NOTIFICATIONS,
                    vec![Value::from(key)],
                    &filename,
                    attempt,
                    LETTER_STATUS,
                    references,
                    failed.0,
                )
                .await
            }
        }
    }
}
