//! In-memory transfer double
//!
//! `InMemoryRemoteDir` stands in for the partner's drop directory and
//! `InMemoryTransfer` drives it through the shared directory logic, with a
//! handful of switchable faults for orchestrator tests.

use super::{
    place_in, inspect, upload_to, verify_in, Placement, PlacementError, RemoteDirectory,
    RemoteFileState, Transfer, TransferError, UploadOutcome,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A remote directory held in memory
///
/// Clones share the same files and write counter.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRemoteDir {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    writes: Arc<AtomicU64>,
}

impl InMemoryRemoteDir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a file without counting it as a write
    pub fn insert(&self, name: &str, data: impl Into<Vec<u8>>) {
        self.files.lock().insert(name.to_string(), data.into());
    }

    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.files.lock().get(name).cloned()
    }

    /// File names, sorted
    pub fn names(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    /// Number of writes performed through `RemoteDirectory::write`
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every file and its contents
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.files.lock().clone()
    }
}

impl RemoteDirectory for InMemoryRemoteDir {
    fn list(&self) -> io::Result<Vec<String>> {
        Ok(self.names())
    }

    fn size_of(&self, name: &str) -> io::Result<Option<u64>> {
        Ok(self.files.lock().get(name).map(|data| data.len() as u64))
    }

    fn write(&self, name: &str, data: &[u8]) -> io::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.files.lock().insert(name.to_string(), data.to_vec());
        Ok(())
    }
}

/// Fails every write before anything lands; reads pass through
pub struct LosingWrites<'a>(pub &'a InMemoryRemoteDir);

impl RemoteDirectory for LosingWrites<'_> {
    fn list(&self) -> io::Result<Vec<String>> {
        self.0.list()
    }

    fn size_of(&self, name: &str) -> io::Result<Option<u64>> {
        self.0.size_of(name)
    }

    fn write(&self, _name: &str, _data: &[u8]) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))
    }
}

#[derive(Debug, Default)]
struct Faults {
    /// Sessions that fail to open
    failed_sessions: u32,
    /// Uploads that fail before writing anything
    lost_writes: u32,
    /// Uploads whose file lands but which still report an error
    errors_after_write: u32,
}

/// Transfer double over an `InMemoryRemoteDir`
///
/// Each fault counter applies to the next N matching calls.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransfer {
    dir: InMemoryRemoteDir,
    faults: Arc<Mutex<Faults>>,
    sessions: Arc<AtomicU64>,
}

impl InMemoryTransfer {
    pub fn new(dir: InMemoryRemoteDir) -> Self {
        InMemoryTransfer {
            dir,
            ..Default::default()
        }
    }

    pub fn dir(&self) -> &InMemoryRemoteDir {
        &self.dir
    }

    /// Sessions opened so far, including failed ones
    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn fail_sessions(&self, count: u32) {
        self.faults.lock().failed_sessions = count;
    }

    pub fn lose_writes(&self, count: u32) {
        self.faults.lock().lost_writes = count;
    }

    pub fn error_after_writes(&self, count: u32) {
        self.faults.lock().errors_after_write = count;
    }

    fn open(&self) -> Result<&InMemoryRemoteDir, TransferError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        if take(&mut self.faults.lock().failed_sessions) {
            return Err(TransferError::Session("authentication failed".to_string()));
        }
        Ok(&self.dir)
    }
}

fn lost_ack(filename: &str) -> TransferError {
    TransferError::io(
        "close",
        filename,
        io::Error::new(io::ErrorKind::TimedOut, "timed out waiting for ack"),
    )
}

/// Consume one unit of a fault counter
fn take(counter: &mut u32) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter -= 1;
    true
}

impl Transfer for InMemoryTransfer {
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
            let outcome = if take(&mut self.faults.lock().lost_writes) {
                upload_to(&LosingWrites(dir), &payload, filename)?
            } else {
                upload_to(dir, &payload, filename)?
            };

            if take(&mut self.faults.lock().errors_after_write) {
                return Err(lost_ack(filename));
            }
            Ok(outcome)
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
            let placement = if take(&mut self.faults.lock().lost_writes) {
                place_in(&LosingWrites(dir), &payload, filename, fallback)?
            } else {
                place_in(dir, &payload, filename, fallback)?
            };

            if let Placement::Placed { filename, .. } = &placement {
                if take(&mut self.faults.lock().errors_after_write) {
                    return Err(PlacementError {
                        filename: Some(filename.clone()),
                        error: lost_ack(filename),
                    });
                }
            }
            Ok(placement)
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
