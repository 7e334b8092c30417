//! Zipped letter PDF delivery

use super::{Courier, DeliveryError, DeliveryReport, LetterBatch, LETTER_STATUS};
use crate::archive::{self, entry_name};
use crate::naming::{current_name, FileKind};
use crate::store::fetch_many;
use crate::tasks::ZIP_AND_SEND_LETTER_PDFS;
use bytes::Bytes;
use serde_json::Value;
use tracing::{info, info_span, Instrument};

/// Arguments of one `zip-and-send-letter-pdfs` execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LetterRequest {
    pub source_keys: Vec<String>,
    /// Fixed by the first attempt and carried through retries
    pub target_filename: Option<String>,
    pub attempt: u32,
}

impl LetterRequest {
    pub fn new(source_keys: Vec<String>) -> Self {
        LetterRequest {
            source_keys,
            target_filename: None,
            attempt: 0,
        }
    }
}

impl Courier {
    /// Zip the source PDFs and deliver the archive
    pub async fn deliver_letters(&self, request: LetterRequest) -> Result<DeliveryReport, DeliveryError> {
        let batch = LetterBatch::new(request.source_keys)?;
        let filename = request
            .target_filename
            .unwrap_or_else(|| current_name(FileKind::Archive, self.clock.now()));

        let span = info_span!("deliver_letters", %filename, letters = batch.source_keys().len(), attempt = request.attempt);
        self.deliver_batch(batch, filename, request.attempt)
            .instrument(span)
            .await
    }

    async fn deliver_batch(
        &self,
        batch: LetterBatch,
        filename: String,
        attempt: u32,
    ) -> Result<DeliveryReport, DeliveryError> {
        let marker_bucket = self.config.store.sent_marker_bucket();
        let marker_key = batch.sent_marker_key(&filename);

        match self.store.exists(marker_bucket, &marker_key).await {
            Ok(true) => {
                info!(marker = %marker_key, "archive already sent, skipping");
                self.metrics.incr("delivery.skipped");
                return Ok(DeliveryReport::AlreadySent { marker_key });
            }
            Ok(false) => {}
            Err(e) => return self.fail(LETTER_STATUS, batch.references(), e.to_string()).await,
        }

        let archive = match self.build_archive(&batch).await {
            Ok(archive) => archive,
            Err(reason) => return self.fail(LETTER_STATUS, batch.references(), reason).await,
        };

        if let Some(copy_bucket) = &self.config.store.archive_copy_bucket {
            let copy_key = batch.archive_copy_key(&filename);
            if let Err(e) = self.store.put(copy_bucket, &copy_key, archive.clone()).await {
                return self.fail(LETTER_STATUS, batch.references(), e.to_string()).await;
            }
        }

        let rescued = match self.transfer_with_rescue(archive, &filename).await {
            Ok(rescued) => rescued,
            Err(failed) => {
                return self
                    .retry_or_fail(
                        ZIP_AND_SEND_LETTER_PDFS,
                        vec![
                            Value::from(batch.source_keys().to_vec()),
                            Value::from(filename.as_str()),
                        ],
                        &filename,
                        attempt,
                        LETTER_STATUS,
                        batch.references(),
                        failed.0,
                    )
                    .await;
            }
        };

        // Only written once the file is confirmed on the remote side
        let recorded = match serde_json::to_vec(batch.source_keys()) {
            Ok(marker) => self
                .store
                .put(marker_bucket, &marker_key, Bytes::from(marker))
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = recorded {
            return self
                .fail(
                    LETTER_STATUS,
                    batch.references(),
                    format!("archive uploaded but sent-marker not recorded: {}", e),
                )
                .await;
        }

        self.succeed(LETTER_STATUS, filename, batch.references(), rescued)
            .await
    }

    /// Fetch every source and zip them in source order
    async fn build_archive(&self, batch: &LetterBatch) -> Result<Bytes, String> {
        let bucket = &self.config.store.letters_pdf_bucket;
        let fetched = fetch_many(
            self.store.as_ref(),
            bucket,
            batch.source_keys(),
            self.config.delivery.fetch_concurrency,
        )
        .await
        .map_err(|e| e.to_string())?;

        let entries: Vec<(String, Bytes)> = batch
            .source_keys()
            .iter()
            .map(|key| entry_name(key).to_string())
            .zip(fetched)
            .collect();

        let packed = archive::pack(&entries).map_err(|e| e.to_string())?;
        info!(entries = entries.len(), bytes = packed.len(), "archive built");
        Ok(Bytes::from(packed))
    }
}
