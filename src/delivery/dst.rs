//! Deterministic Simulation Testing for delivery
//!
//! Drives letter, job and API batches through the real `Worker`/`Courier` against
//! a fault-injecting store and transfer, following every retry the courier
//! enqueues until the batch reaches a terminal outcome, then checks the
//! delivery invariants against a shadow model of what was submitted.
//!
//! ## Design (FoundationDB-style DST with shadow state)
//!
//! ```text
//! for seed in 0..N {
//!     let mut harness = DeliveryDSTHarness::new(DeliveryDSTConfig::chaos(seed));
//!     harness.run(50).await;
//!     assert!(harness.result().is_success(), "seed {}", seed);
//! }
//! ```
//!
//! ## Invariants
//!
//! - every batch gets exactly one status dispatch, naming all of its references
//! - a `Sent` batch's remote file holds exactly the expected payload
//! - a batch adds at most one remote file and never alters one that was
//!   already there, so no partial copy of a payload survives under another name
//! - a sent-marker exists only for batches reported as sent
//! - a batch with a missing source is never sent
//! - no environmental fault escapes the task as an error
//! - replaying a delivered batch never writes to the partner again
//! - attempts never exceed the retry budget

use crate::archive::{self, entry_name};
use crate::clock::{Clock, FixedClock};
use crate::config::CourierConfig;
use crate::delivery::{reference_from_key, Courier, DeliveryReport, JOB_STATUS, LETTER_STATUS};
use crate::naming::{current_name, FileKind};
use crate::observability::NoopMetrics;
use crate::queue::{InMemoryTaskQueue, TaskMessage};
use crate::sim::{Rng, SimulatedRng};
use crate::store::{InMemoryBlobStore, SimulatedBlobStore, SimulatedStoreConfig, SimulatedStoreStats};
use crate::tasks::{Worker, SEND_API_NOTIFICATIONS, SEND_JOB_FILES, ZIP_AND_SEND_LETTER_PDFS};
use crate::transfer::{
    InMemoryRemoteDir, SimulatedTransfer, SimulatedTransferConfig, SimulatedTransferStats,
};
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Configuration for delivery DST
#[derive(Debug, Clone)]
pub struct DeliveryDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Object store fault configuration
    pub store_config: SimulatedStoreConfig,
    /// Partner link fault configuration
    pub transfer_config: SimulatedTransferConfig,
    /// Largest batch generated (letters or jobs, at most 8)
    pub max_batch_size: usize,
    pub max_retries: u32,
    /// Probability that a batch is job files rather than letters
    pub job_batch_prob: f64,
    /// Probability that a non-job batch is an API file rather than letters
    pub api_batch_prob: f64,
    /// Probability that one source of a batch does not exist
    pub missing_source_prob: f64,
    /// Probability of re-running a delivered batch's task
    pub replay_prob: f64,
    /// Probability that the next job batch starts in the same minute
    pub same_minute_prob: f64,
}

impl Default for DeliveryDSTConfig {
    fn default() -> Self {
        DeliveryDSTConfig {
            seed: 0,
            store_config: SimulatedStoreConfig::default(),
            transfer_config: SimulatedTransferConfig::default(),
            max_batch_size: 8,
            max_retries: 5,
            job_batch_prob: 0.3,
            api_batch_prob: 0.2,
            missing_source_prob: 0.05,
            replay_prob: 0.2,
            same_minute_prob: 0.3,
        }
    }
}

impl DeliveryDSTConfig {
    pub fn new(seed: u64) -> Self {
        DeliveryDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no faults, no missing sources, no name collisions
    pub fn calm(seed: u64) -> Self {
        DeliveryDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::no_faults(),
            transfer_config: SimulatedTransferConfig::no_faults(),
            missing_source_prob: 0.0,
            same_minute_prob: 0.0,
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        DeliveryDSTConfig::new(seed)
    }

    /// Chaos mode - aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        DeliveryDSTConfig {
            seed,
            store_config: SimulatedStoreConfig::high_chaos(),
            transfer_config: SimulatedTransferConfig::high_chaos(),
            missing_source_prob: 0.1,
            replay_prob: 0.3,
            ..Default::default()
        }
    }
}

/// Result of a DST run
#[derive(Debug, Clone)]
pub struct DeliveryDSTResult {
    pub seed: u64,
    pub batches: u64,
    pub sent: u64,
    pub errored: u64,
    /// Sent batches whose upload reported failure
    pub rescued: u64,
    pub retries: u64,
    pub replays: u64,
    pub store_stats: SimulatedStoreStats,
    pub transfer_stats: SimulatedTransferStats,
    pub invariant_violations: Vec<String>,
}

impl DeliveryDSTResult {
    pub fn new(seed: u64) -> Self {
        DeliveryDSTResult {
            seed,
            batches: 0,
            sent: 0,
            errored: 0,
            rescued: 0,
            retries: 0,
            replays: 0,
            store_stats: SimulatedStoreStats::default(),
            transfer_stats: SimulatedTransferStats::default(),
            invariant_violations: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} batches ({} sent, {} errored, {} rescued), {} retries, {} replays, {} violations",
            self.seed,
            self.batches,
            self.sent,
            self.errored,
            self.rescued,
            self.retries,
            self.replays,
            self.invariant_violations.len()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchKind {
    Letters,
    Jobs,
    Api,
}

/// Shadow record of one submitted batch
struct SubmittedBatch {
    id: u64,
    kind: BatchKind,
    status: crate::delivery::StatusTasks,
    references: Vec<String>,
    payload: Bytes,
    missing_source: bool,
    /// Remote name the first attempt would use
    initial_name: String,
}

/// Everything one batch did across its attempts
struct BatchRun {
    report: Result<DeliveryReport, String>,
    attempts: u32,
    statuses: Vec<TaskMessage>,
    last_message: TaskMessage,
}

type DSTStore = SimulatedBlobStore<InMemoryBlobStore, SimulatedRng>;
type DSTTransfer = SimulatedTransfer<SimulatedRng>;

/// Main DST harness for delivery
pub struct DeliveryDSTHarness {
    config: DeliveryDSTConfig,
    courier_config: CourierConfig,
    inner_store: InMemoryBlobStore,
    store: Arc<DSTStore>,
    transfer: Arc<DSTTransfer>,
    dir: InMemoryRemoteDir,
    queue: InMemoryTaskQueue,
    clock: FixedClock,
    worker: Worker,
    rng: SimulatedRng,
    next_batch: u64,
    /// Final task messages of delivered batches, for replay
    delivered: Vec<TaskMessage>,
    result: DeliveryDSTResult,
}

impl DeliveryDSTHarness {
    pub fn new(config: DeliveryDSTConfig) -> Self {
        let mut courier_config = CourierConfig::test();
        courier_config.delivery.max_retries = config.max_retries;

        let inner_store = InMemoryBlobStore::new();
        let store = Arc::new(SimulatedBlobStore::new(
            inner_store.clone(),
            SimulatedRng::new(config.seed ^ 0x5354_4f52),
            config.store_config.clone(),
        ));
        let dir = InMemoryRemoteDir::new();
        let transfer = Arc::new(SimulatedTransfer::new(
            dir.clone(),
            SimulatedRng::new(config.seed ^ 0x5846_4552),
            config.transfer_config.clone(),
        ));
        let queue = InMemoryTaskQueue::new();
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2017, 1, 1, 17, 30, 0).single().unwrap_or_default());

        let courier = Courier::new(
            courier_config.clone(),
            store.clone(),
            transfer.clone(),
            Arc::new(queue.clone()),
        )
        .with_clock(Arc::new(clock.clone()));
        let worker = Worker::new(courier, Arc::new(NoopMetrics));

        DeliveryDSTHarness {
            rng: SimulatedRng::new(config.seed),
            result: DeliveryDSTResult::new(config.seed),
            config,
            courier_config,
            inner_store,
            store,
            transfer,
            dir,
            queue,
            clock,
            worker,
            next_batch: 0,
            delivered: Vec::new(),
        }
    }

    /// Submit `batches` batches, replaying delivered ones along the way
    pub async fn run(&mut self, batches: usize) {
        for _ in 0..batches {
            if self.rng.gen_bool(self.config.job_batch_prob) {
                self.run_job_batch().await;
            } else if self.rng.gen_bool(self.config.api_batch_prob) {
                self.run_api_batch().await;
            } else {
                self.run_letter_batch().await;
            }

            if !self.delivered.is_empty() && self.rng.gen_bool(self.config.replay_prob) {
                self.replay().await;
            }
        }

        self.result.store_stats = self.store.stats();
        self.result.transfer_stats = self.transfer.stats();
    }

    pub fn result(&self) -> &DeliveryDSTResult {
        &self.result
    }

    pub fn into_result(self) -> DeliveryDSTResult {
        self.result
    }

    fn batch_size(&mut self) -> usize {
        let max = self.config.max_batch_size.clamp(1, 8) as u64;
        1 + self.rng.gen_range(0, max) as usize
    }

    async fn run_letter_batch(&mut self) {
        let id = self.next_batch;
        self.next_batch += 1;

        let n = self.batch_size();
        let folder = format!("2017-01-{:02}", 1 + id % 28);
        let missing = self.rng.gen_bool(self.config.missing_source_prob);
        let bucket = self.courier_config.store.letters_pdf_bucket.clone();

        let mut keys = Vec::with_capacity(n);
        let mut entries = Vec::with_capacity(n);
        for i in 0..n {
            let key = format!("{}/NOTIFY.B{:04}L{:02}.D.2.C.C.20170101173000.PDF", folder, id, i);
            let contents = Bytes::from(format!("%PDF batch {} letter {}", id, i));
            if !(missing && i == n - 1) {
                self.inner_store.insert(&bucket, &key, contents.clone());
            }
            entries.push((entry_name(&key).to_string(), contents));
            keys.push(key);
        }
        let payload = match archive::pack(&entries) {
            Ok(packed) => Bytes::from(packed),
            Err(e) => {
                self.violation(format!("batch {}: shadow archive failed: {}", id, e));
                return;
            }
        };

        let batch = SubmittedBatch {
            id,
            kind: BatchKind::Letters,
            status: LETTER_STATUS,
            references: keys.iter().map(|k| reference_from_key(k)).collect(),
            payload,
            missing_source: missing,
            initial_name: current_name(FileKind::Archive, self.clock.now()),
        };
        let message = TaskMessage::new(
            ZIP_AND_SEND_LETTER_PDFS,
            self.courier_config.queues.retry(),
            vec![json!(keys)],
        );

        let before = self.dir.snapshot();
        let run = self.drive(message).await;
        self.check_batch(&batch, &run, &before);
        if let Ok(DeliveryReport::Sent { filename, .. }) = &run.report {
            let marker = format!("{}/zips_sent/{}.TXT", folder, filename);
            match self.inner_store.object(&bucket, &marker) {
                Some(data) => {
                    let listed: Result<Vec<String>, _> = serde_json::from_slice(&data);
                    if listed.ok().as_ref() != Some(&keys) {
                        self.violation(format!("batch {}: sent-marker does not list the batch keys", id));
                    }
                }
                None => self.violation(format!("batch {}: sent without a sent-marker", id)),
            }
        } else if self.marker_count_for(&folder, &batch.initial_name) > 0 {
            self.violation(format!("batch {}: sent-marker exists but batch was not sent", id));
        }

        // Archive names carry seconds; one batch per minute keeps them unique
        self.clock.advance(ChronoDuration::minutes(1));
    }

    async fn run_job_batch(&mut self) {
        let id = self.next_batch;
        self.next_batch += 1;

        let n = self.batch_size();
        let missing = self.rng.gen_bool(self.config.missing_source_prob);
        let bucket = self.courier_config.store.jobs_bucket.clone();
        let suffix = self.courier_config.delivery.job_file_suffix.clone();

        // Payload size is 16n + 128id + 1: unique per batch and odd, so never
        // equal to a truncated remnant (always half of some payload, rounded
        // down to an even number).
        let mut job_ids = Vec::with_capacity(n);
        let mut payload = Vec::new();
        for i in 0..n {
            let job_id = format!("job-{:04}-{:02}", id, i);
            let mut contents = Vec::new();
            if i == 0 {
                contents.push(b'#');
                contents.extend(std::iter::repeat(b'x').take(128 * id as usize));
            }
            contents.extend_from_slice(format!("row {:06} {:04}\n", id, i).as_bytes());
            if !(missing && i == n - 1) {
                self.inner_store
                    .insert(&bucket, &format!("{}{}", job_id, suffix), contents.clone());
            }
            payload.extend_from_slice(&contents);
            job_ids.push(job_id);
        }

        let batch = SubmittedBatch {
            id,
            kind: BatchKind::Jobs,
            status: JOB_STATUS,
            references: job_ids.clone(),
            payload: Bytes::from(payload),
            missing_source: missing,
            initial_name: current_name(FileKind::Plain, self.clock.now()),
        };
        let message = TaskMessage::new(
            SEND_JOB_FILES,
            self.courier_config.queues.retry(),
            vec![json!(job_ids)],
        );

        let before = self.dir.snapshot();
        let run = self.drive(message).await;
        self.check_batch(&batch, &run, &before);

        if !self.rng.gen_bool(self.config.same_minute_prob) {
            self.clock.advance(ChronoDuration::minutes(1));
        }
    }

    async fn run_api_batch(&mut self) {
        let id = self.next_batch;
        self.next_batch += 1;

        let n = self.batch_size();
        let missing = self.rng.gen_bool(self.config.missing_source_prob);
        let bucket = self.courier_config.store.api_bucket.clone();
        let key = format!(
            "{}-{:04}-dvla-notifications.txt",
            self.clock.now().format("%Y-%m-%dT%H:%M:%SZ"),
            id
        );

        let mut references = Vec::with_capacity(n);
        let mut payload = Vec::new();
        for i in 0..n {
            let reference = format!("A{:04}R{:02}", id, i);
            payload.extend_from_slice(format!("140|500|001||{}|Recipient {}|{} Street\n", reference, i, i).as_bytes());
            references.push(reference);
        }
        if !missing {
            self.inner_store.insert(&bucket, &key, payload.clone());
        }

        let batch = SubmittedBatch {
            id,
            kind: BatchKind::Api,
            status: LETTER_STATUS,
            references,
            payload: Bytes::from(payload),
            missing_source: missing,
            initial_name: key.clone(),
        };
        let message = TaskMessage::new(
            SEND_API_NOTIFICATIONS,
            self.courier_config.queues.retry(),
            vec![json!(key)],
        );

        let before = self.dir.snapshot();
        let run = self.drive(message).await;
        self.check_batch(&batch, &run, &before);
        self.clock.advance(ChronoDuration::minutes(1));
    }

    /// Run a task and every retry it schedules until it settles
    async fn drive(&mut self, first: TaskMessage) -> BatchRun {
        let mut message = first;
        let mut attempts = 0;
        let mut statuses = Vec::new();

        loop {
            attempts += 1;
            let outcome = self.worker.handle(message.clone()).await;
            let (retries, status): (Vec<TaskMessage>, Vec<TaskMessage>) = self
                .queue
                .drain()
                .into_iter()
                .partition(|m| m.name == message.name);
            statuses.extend(status);

            let report = match outcome {
                Ok(DeliveryReport::RetryScheduled { .. }) => {
                    self.result.retries += 1;
                    let mut retries = retries.into_iter();
                    match (retries.next(), retries.next()) {
                        (Some(next), None) if attempts <= self.config.max_retries => {
                            message = next;
                            continue;
                        }
                        _ => Err(format!(
                            "retry scheduled on attempt {} without exactly one retry task",
                            attempts
                        )),
                    }
                }
                Ok(report) => {
                    if !retries.is_empty() {
                        self.violation(format!("{} settled but also enqueued a retry", message.name));
                    }
                    Ok(report)
                }
                Err(e) => Err(e.to_string()),
            };

            return BatchRun {
                report,
                attempts,
                statuses,
                last_message: message,
            };
        }
    }

    fn check_batch(&mut self, batch: &SubmittedBatch, run: &BatchRun, before: &BTreeMap<String, Vec<u8>>) {
        self.result.batches += 1;
        let id = batch.id;

        if run.attempts > self.config.max_retries + 1 {
            self.violation(format!("batch {}: {} attempts exceed the retry budget", id, run.attempts));
        }
        self.check_remote(batch, run, before);

        let report = match &run.report {
            Ok(report) => report,
            Err(e) => {
                self.violation(format!("batch {}: task failed: {}", id, e));
                return;
            }
        };

        // An API file that could not be read has no references to report
        if batch.kind == BatchKind::Api {
            if let DeliveryReport::Failed { references, .. } = report {
                if references.is_empty() {
                    self.result.errored += 1;
                    if !run.statuses.is_empty() {
                        self.violation(format!("batch {}: unread api file still dispatched", id));
                    }
                    return;
                }
            }
        }

        let expected_status = match report {
            DeliveryReport::Sent { .. } => batch.status.sent,
            DeliveryReport::Failed { .. } => batch.status.error,
            other => {
                self.violation(format!("batch {}: fresh batch settled as {:?}", id, other));
                return;
            }
        };

        match run.statuses.as_slice() {
            [only] if only.name == expected_status => {
                if only.args.first() != Some(&Value::from(batch.references.clone())) {
                    self.violation(format!("batch {}: status dispatch does not list every reference", id));
                }
            }
            other => self.violation(format!(
                "batch {}: expected one {} dispatch, got {:?}",
                id,
                expected_status,
                other.iter().map(|m| m.name.as_str()).collect::<Vec<_>>()
            )),
        }

        match report {
            DeliveryReport::Sent {
                filename, rescued, ..
            } => {
                self.result.sent += 1;
                if *rescued {
                    self.result.rescued += 1;
                }
                if batch.missing_source {
                    self.violation(format!("batch {}: sent with a missing source", id));
                }
                match self.dir.file(filename) {
                    Some(remote) if remote == &batch.payload[..] => {}
                    Some(remote) => self.violation(format!(
                        "batch {}: remote {} has {} bytes, expected {}",
                        id,
                        filename,
                        remote.len(),
                        batch.payload.len()
                    )),
                    None => self.violation(format!("batch {}: sent but {} is not on the remote", id, filename)),
                }
                let mut replay = run.last_message.clone();
                replay.args = vec![
                    run.last_message.args.first().cloned().unwrap_or(Value::Null),
                    Value::from(filename.as_str()),
                ];
                replay.attempt = 0;
                if batch.kind == BatchKind::Letters {
                    self.delivered.push(replay);
                }
            }
            _ => self.result.errored += 1,
        }
    }

    /// What the batch did to the partner's directory
    fn check_remote(&mut self, batch: &SubmittedBatch, run: &BatchRun, before: &BTreeMap<String, Vec<u8>>) {
        let id = batch.id;
        let after = self.dir.snapshot();

        for (name, contents) in before {
            if after.get(name) != Some(contents) {
                self.violation(format!("batch {}: altered remote file {} it does not own", id, name));
            }
        }

        let added: Vec<String> = after
            .keys()
            .filter(|name| !before.contains_key(*name))
            .cloned()
            .collect();
        if added.len() > 1 {
            self.violation(format!("batch {}: left {} remote files: {:?}", id, added.len(), added));
        }
        if batch.missing_source && !added.is_empty() {
            self.violation(format!("batch {}: uploaded {:?} despite a missing source", id, added));
        }
        if let Ok(DeliveryReport::Sent { filename, .. }) = &run.report {
            if added.iter().any(|name| name != filename) {
                self.violation(format!(
                    "batch {}: sent as {} but also wrote {:?}",
                    id, filename, added
                ));
            }
        }
    }

    /// Re-run a delivered letter batch; it must not touch the partner
    async fn replay(&mut self) {
        let pick = self.rng.gen_range(0, self.delivered.len() as u64) as usize;
        let message = self.delivered[pick].clone();
        self.result.replays += 1;

        let writes_before = self.dir.writes();
        let outcome = self.worker.handle(message).await;
        let dispatched = self.queue.drain();

        match outcome {
            Ok(DeliveryReport::AlreadySent { .. }) => {
                if !dispatched.is_empty() {
                    self.violation("replay skipped but still dispatched".to_string());
                }
            }
            // The marker check itself can fail under store faults
            Ok(DeliveryReport::Failed { .. }) => {}
            Ok(other) => self.violation(format!("replay of a delivered batch settled as {:?}", other)),
            Err(e) => self.violation(format!("replay failed: {}", e)),
        }
        if self.dir.writes() != writes_before {
            self.violation("replay wrote to the partner again".to_string());
        }
    }

    fn marker_count_for(&self, folder: &str, filename: &str) -> usize {
        let marker = format!("{}/zips_sent/{}.TXT", folder, filename);
        let bucket = self.courier_config.store.sent_marker_bucket();
        usize::from(self.inner_store.object(bucket, &marker).is_some())
    }

    fn violation(&mut self, message: String) {
        self.result
            .invariant_violations
            .push(format!("seed {}: {}", self.config.seed, message));
    }
}

/// Run a batch of DST tests with different seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    batches_per_run: usize,
    config_fn: impl Fn(u64) -> DeliveryDSTConfig,
) -> Vec<DeliveryDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = DeliveryDSTHarness::new(config_fn(seed));
        harness.run(batches_per_run).await;
        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[DeliveryDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let batches: u64 = results.iter().map(|r| r.batches).sum();
    let sent: u64 = results.iter().map(|r| r.sent).sum();
    let rescued: u64 = results.iter().map(|r| r.rescued).sum();
    let retries: u64 = results.iter().map(|r| r.retries).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} batches, {} sent, {} rescued, {} retries",
        passed, total, batches, sent, rescued, retries
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}
