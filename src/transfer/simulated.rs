//! Simulated Transfer with Fault Injection
//!
//! Seeded stand-in for the SFTP client used by the deterministic simulation
//! harness. Faults model what a flaky partner link actually does:
//!
//! - the session never opens
//! - the write is lost before anything lands
//! - the file lands but the acknowledgement is lost (an apparent failure)
//! - the write is cut short and a truncated file lands

use super::{
    place_in, inspect, upload_to, verify_in, InMemoryRemoteDir, LosingWrites, Placement,
    PlacementError, RemoteDirectory, RemoteFileState, Transfer, TransferError, UploadOutcome,
};
use crate::sim::Rng;
use bytes::Bytes;
use parking_lot::Mutex;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

/// Configuration for simulated transfer faults
#[derive(Debug, Clone)]
pub struct SimulatedTransferConfig {
    /// Probability that connect/auth/chdir fails
    pub connect_fail_prob: f64,
    /// Probability that an upload fails before writing
    pub write_lost_prob: f64,
    /// Probability that an upload lands but reports failure
    pub ack_lost_prob: f64,
    /// Probability that only part of the payload lands
    pub truncated_write_prob: f64,
}

impl Default for SimulatedTransferConfig {
    fn default() -> Self {
        SimulatedTransferConfig {
            connect_fail_prob: 0.02,
            write_lost_prob: 0.02,
            ack_lost_prob: 0.02,
            truncated_write_prob: 0.01,
        }
    }
}

impl SimulatedTransferConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedTransferConfig {
            connect_fail_prob: 0.1,
            write_lost_prob: 0.1,
            ack_lost_prob: 0.1,
            truncated_write_prob: 0.05,
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedTransferConfig {
            connect_fail_prob: 0.0,
            write_lost_prob: 0.0,
            ack_lost_prob: 0.0,
            truncated_write_prob: 0.0,
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransferStats {
    pub sessions: u64,
    pub connect_failures: u64,
    pub lost_writes: u64,
    pub lost_acks: u64,
    pub truncated_writes: u64,
}

struct SimulatedTransferInner<R: Rng> {
    rng: R,
    stats: SimulatedTransferStats,
}

/// Writes only the first half of every payload
struct Truncating<'a>(&'a InMemoryRemoteDir);

impl RemoteDirectory for Truncating<'_> {
    fn list(&self) -> io::Result<Vec<String>> {
        self.0.list()
    }

    fn size_of(&self, name: &str) -> io::Result<Option<u64>> {
        self.0.size_of(name)
    }

    fn write(&self, name: &str, data: &[u8]) -> io::Result<()> {
        self.0.write(name, &data[..data.len() / 2])
    }
}

enum UploadFault {
    None,
    LostWrite,
    LostAck,
    Truncated,
}

/// Simulated transfer over an in-memory partner directory
pub struct SimulatedTransfer<R: Rng> {
    dir: InMemoryRemoteDir,
    config: SimulatedTransferConfig,
    state: Arc<Mutex<SimulatedTransferInner<R>>>,
}

impl<R: Rng> SimulatedTransfer<R> {
    pub fn new(dir: InMemoryRemoteDir, rng: R, config: SimulatedTransferConfig) -> Self {
        SimulatedTransfer {
            dir,
            config,
            state: Arc::new(Mutex::new(SimulatedTransferInner {
                rng,
                stats: SimulatedTransferStats::default(),
            })),
        }
    }

    pub fn dir(&self) -> &InMemoryRemoteDir {
        &self.dir
    }

    pub fn stats(&self) -> SimulatedTransferStats {
        self.state.lock().stats.clone()
    }

    fn open(&self) -> Result<&InMemoryRemoteDir, TransferError> {
        let mut s = self.state.lock();
        s.stats.sessions += 1;
        if s.rng.gen_bool(self.config.connect_fail_prob) {
            s.stats.connect_failures += 1;
            return Err(TransferError::Session(
                "simulated connection refused".to_string(),
            ));
        }
        Ok(&self.dir)
    }

    fn upload_fault(&self) -> UploadFault {
        let mut s = self.state.lock();
        if s.rng.gen_bool(self.config.write_lost_prob) {
            s.stats.lost_writes += 1;
            UploadFault::LostWrite
        } else if s.rng.gen_bool(self.config.ack_lost_prob) {
            s.stats.lost_acks += 1;
            UploadFault::LostAck
        } else if s.rng.gen_bool(self.config.truncated_write_prob) {
            s.stats.truncated_writes += 1;
            UploadFault::Truncated
        } else {
            UploadFault::None
        }
    }
}

fn lost_ack(filename: &str) -> TransferError {
    TransferError::io(
        "close",
        filename,
        io::Error::new(io::ErrorKind::TimedOut, "simulated lost ack"),
    )
}

impl<R: Rng> Transfer for SimulatedTransfer<R> {
    fn inspect<'a>(
        &'a self,
        filename: &'a str,
        expected_size: u64,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteFileState, TransferError>> + Send + 'a>> {
        Box::pin(async move { inspect(self.open()?, filename, expected_size) })
    }

    fn upload<'a>(
        &'a self,
        payload: Bytes,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UploadOutcome, TransferError>> + Send + 'a>> {
        Box::pin(async move {
            let dir = self.open()?;
            match self.upload_fault() {
                UploadFault::None => upload_to(dir, &payload, filename),
                UploadFault::LostWrite => upload_to(&LosingWrites(dir), &payload, filename),
                UploadFault::LostAck => {
                    upload_to(dir, &payload, filename)?;
                    Err(lost_ack(filename))
                }
                UploadFault::Truncated => upload_to(&Truncating(dir), &payload, filename),
            }
        })
    }

    fn place<'a>(
        &'a self,
        payload: Bytes,
        filename: &'a str,
        fallback: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Placement, PlacementError>> + Send + 'a>> {
        Box::pin(async move {
            let dir = self.open().map_err(PlacementError::unplaced)?;
            match self.upload_fault() {
                UploadFault::None => place_in(dir, &payload, filename, fallback),
                UploadFault::LostWrite => place_in(&LosingWrites(dir), &payload, filename, fallback),
                UploadFault::LostAck => match place_in(dir, &payload, filename, fallback)? {
                    Placement::Placed { filename, .. } => Err(PlacementError {
                        error: lost_ack(&filename),
                        filename: Some(filename),
                    }),
                    taken => Ok(taken),
                },
                UploadFault::Truncated => place_in(&Truncating(dir), &payload, filename, fallback),
            }
        })
    }

    fn verify<'a>(
        &'a self,
        filename: &'a str,
        expected_size: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + 'a>> {
        Box::pin(async move { verify_in(self.open()?, filename, expected_size) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedRng;

    #[tokio::test]
    async fn test_no_faults_uploads() {
        let transfer = SimulatedTransfer::new(
            InMemoryRemoteDir::new(),
            SimulatedRng::new(7),
            SimulatedTransferConfig::no_faults(),
        );

        let outcome = transfer.upload(Bytes::from_static(b"abcd"), "f.zip").await.unwrap();

        assert_eq!(outcome, UploadOutcome::Written);
        transfer.verify("f.zip", 4).await.unwrap();
        assert_eq!(transfer.stats().sessions, 2);
    }

    #[tokio::test]
    async fn test_truncated_write_fails_verification() {
        let config = SimulatedTransferConfig {
            truncated_write_prob: 1.0,
            ..SimulatedTransferConfig::no_faults()
        };
        let transfer = SimulatedTransfer::new(InMemoryRemoteDir::new(), SimulatedRng::new(1), config);

        let err = transfer.upload(Bytes::from_static(b"abcd"), "f.zip").await.unwrap_err();

        assert_eq!(
            err,
            TransferError::SizeMismatch {
                filename: "f.zip".to_string(),
                actual: 2,
                expected: 4,
            }
        );
        assert!(transfer.verify("f.zip", 4).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_placement_names_the_remnant() {
        let config = SimulatedTransferConfig {
            truncated_write_prob: 1.0,
            ..SimulatedTransferConfig::no_faults()
        };
        let transfer = SimulatedTransfer::new(InMemoryRemoteDir::new(), SimulatedRng::new(3), config);

        let err = transfer
            .place(Bytes::from_static(b"abcd"), "a.txt", "b.txt")
            .await
            .unwrap_err();

        assert_eq!(err.filename.as_deref(), Some("a.txt"));
        assert_eq!(transfer.dir().file("a.txt").unwrap(), b"ab".to_vec());

        // Re-uploading under the same name replaces the remnant
        let healthy = SimulatedTransfer::new(
            transfer.dir().clone(),
            SimulatedRng::new(4),
            SimulatedTransferConfig::no_faults(),
        );
        let outcome = healthy.upload(Bytes::from_static(b"abcd"), "a.txt").await.unwrap();
        assert_eq!(outcome, UploadOutcome::Overwritten { previous_size: 2 });
        assert_eq!(transfer.dir().names(), vec!["a.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_lost_ack_is_rescuable() {
        let config = SimulatedTransferConfig {
            ack_lost_prob: 1.0,
            ..SimulatedTransferConfig::no_faults()
        };
        let transfer = SimulatedTransfer::new(InMemoryRemoteDir::new(), SimulatedRng::new(1), config);

        assert!(transfer.upload(Bytes::from_static(b"abcd"), "f.zip").await.is_err());
        transfer.verify("f.zip", 4).await.unwrap();
        assert_eq!(transfer.stats().lost_acks, 1);
    }
}
