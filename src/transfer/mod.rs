//! Transfer Client
//!
//! Moves one payload into the partner's drop directory and proves it landed.
//!
//! Per call the client walks
//! `Disconnected -> Connected -> DirectorySelected -> (ExistenceChecked) ->
//! Uploaded -> Verified` and stops at the first error. Every call opens its
//! own session; nothing is pooled.
//!
//! The directory-level logic (`inspect`, `upload_to`, `place_in`, `verify_in`)
//! is written once against the synchronous `RemoteDirectory` primitives, so
//! the SFTP session and the test doubles share exactly the same existence,
//! overwrite and verification rules.
//!
//! Implementations of `Transfer`:
//! - `InMemoryTransfer`: For unit tests, with switchable faults
//! - `SimulatedTransfer`: Seeded fault injection for DST
//! - `SftpTransfer`: For production (feature-gated)

pub mod in_memory;
pub mod simulated;
#[cfg(feature = "sftp")]
pub mod sftp;

pub use in_memory::{InMemoryRemoteDir, InMemoryTransfer, LosingWrites};
#[cfg(feature = "sftp")]
pub use sftp::SftpTransfer;
pub use simulated::{SimulatedTransfer, SimulatedTransferConfig, SimulatedTransferStats};

use bytes::Bytes;
use std::future::Future;
use std::io;
use std::pin::Pin;
use thiserror::Error;
use tracing::{debug, info, warn};

/// What the target directory holds under a filename, relative to a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFileState {
    NotPresent,
    PresentSameSize,
    PresentDifferentSize { remote_size: u64 },
}

/// How `upload` left the remote file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The file was absent and has been written
    Written,
    /// A file of another size was replaced
    Overwritten { previous_size: u64 },
    /// A same-sized file was already there; nothing was written
    AlreadyPresent,
}

/// Where `place_in` left a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// The payload is on the remote under `filename`
    Placed {
        filename: String,
        outcome: UploadOutcome,
    },
    /// Both names hold other files; nothing was written
    Taken { filename: String },
}

/// Transfer failure
///
/// Callers treat every variant alike; they differ only in what gets logged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Connect, authentication, directory change or an I/O call failed
    #[error("sftp session failed: {0}")]
    Session(String),

    #[error("Zip file {filename} not uploaded")]
    NotUploaded { filename: String },

    #[error("Zip file {filename} uploaded but size is incorrect: is {actual}, expected {expected}")]
    SizeMismatch {
        filename: String,
        actual: u64,
        expected: u64,
    },
}

/// A `place_in` failure, with the name that was being written
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{error}")]
pub struct PlacementError {
    /// `None` when the call failed before a name was chosen
    pub filename: Option<String>,
    pub error: TransferError,
}

impl PlacementError {
    pub fn unplaced(error: TransferError) -> Self {
        PlacementError {
            filename: None,
            error,
        }
    }
}

impl TransferError {
    pub(crate) fn io(operation: &str, filename: &str, err: io::Error) -> Self {
        TransferError::Session(format!("{} {} failed: {}", operation, filename, err))
    }
}

/// Primitive operations on the selected remote directory
pub trait RemoteDirectory {
    /// Names of the entries in the directory
    fn list(&self) -> io::Result<Vec<String>>;

    /// Size of `name`, or `None` when it does not exist
    fn size_of(&self, name: &str) -> io::Result<Option<u64>>;

    /// Create or truncate `name` and write `data` to it
    fn write(&self, name: &str, data: &[u8]) -> io::Result<()>;
}

/// Compare what is stored under `filename` with a payload of `expected_size`
pub fn inspect<D: RemoteDirectory + ?Sized>(
    dir: &D,
    filename: &str,
    expected_size: u64,
) -> Result<RemoteFileState, TransferError> {
    let state = match dir
        .size_of(filename)
        .map_err(|e| TransferError::io("stat", filename, e))?
    {
        None => RemoteFileState::NotPresent,
        Some(size) if size == expected_size => RemoteFileState::PresentSameSize,
        Some(remote_size) => RemoteFileState::PresentDifferentSize { remote_size },
    };
    debug!(filename, ?state, "inspected remote file");
    Ok(state)
}

/// Upload `payload` as `filename`, then verify it
///
/// A same-sized file already present is taken as delivered and left alone. A
/// file of a different size is overwritten.
pub fn upload_to<D: RemoteDirectory + ?Sized>(
    dir: &D,
    payload: &[u8],
    filename: &str,
) -> Result<UploadOutcome, TransferError> {
    let expected = payload.len() as u64;

    let outcome = match inspect(dir, filename, expected)? {
        RemoteFileState::PresentSameSize => {
            info!(filename, size = expected, "file already uploaded, skipping write");
            return Ok(UploadOutcome::AlreadyPresent);
        }
        RemoteFileState::PresentDifferentSize { remote_size } => {
            warn!(
                filename,
                remote_size,
                payload_size = expected,
                "file exists with a different size, overwriting"
            );
            UploadOutcome::Overwritten {
                previous_size: remote_size,
            }
        }
        RemoteFileState::NotPresent => UploadOutcome::Written,
    };

    write_verified(dir, payload, filename)?;
    Ok(outcome)
}

/// Upload a freshly named payload without touching anyone else's file
///
/// `filename` holding a same-sized file counts as delivered. A file of
/// another size means the name belongs to a different batch, so the payload
/// goes under `fallback` instead, and only if `fallback` is free.
pub fn place_in<D: RemoteDirectory + ?Sized>(
    dir: &D,
    payload: &[u8],
    filename: &str,
    fallback: &str,
) -> Result<Placement, PlacementError> {
    let expected = payload.len() as u64;

    let target = match inspect(dir, filename, expected).map_err(PlacementError::unplaced)? {
        RemoteFileState::NotPresent => filename,
        RemoteFileState::PresentSameSize => {
            info!(filename, size = expected, "file already delivered, skipping write");
            return Ok(Placement::Placed {
                filename: filename.to_string(),
                outcome: UploadOutcome::AlreadyPresent,
            });
        }
        RemoteFileState::PresentDifferentSize { remote_size } => {
            warn!(filename, remote_size, fallback, "remote name taken, renaming");
            match inspect(dir, fallback, expected).map_err(PlacementError::unplaced)? {
                RemoteFileState::NotPresent => fallback,
                _ => {
                    return Ok(Placement::Taken {
                        filename: fallback.to_string(),
                    })
                }
            }
        }
    };

    write_verified(dir, payload, target).map_err(|error| PlacementError {
        filename: Some(target.to_string()),
        error,
    })?;
    Ok(Placement::Placed {
        filename: target.to_string(),
        outcome: UploadOutcome::Written,
    })
}

fn write_verified<D: RemoteDirectory + ?Sized>(
    dir: &D,
    payload: &[u8],
    filename: &str,
) -> Result<(), TransferError> {
    let expected = payload.len() as u64;
    dir.write(filename, payload)
        .map_err(|e| TransferError::io("write", filename, e))?;
    verify_in(dir, filename, expected)?;

    info!(filename, size = expected, "uploaded file");
    Ok(())
}

/// Fail unless the directory lists `filename` with exactly `expected_size`
pub fn verify_in<D: RemoteDirectory + ?Sized>(
    dir: &D,
    filename: &str,
    expected_size: u64,
) -> Result<(), TransferError> {
    let listed = dir
        .list()
        .map_err(|e| TransferError::io("list", filename, e))?
        .iter()
        .any(|name| name == filename);
    if !listed {
        return Err(TransferError::NotUploaded {
            filename: filename.to_string(),
        });
    }

    match dir
        .size_of(filename)
        .map_err(|e| TransferError::io("stat", filename, e))?
    {
        Some(actual) if actual == expected_size => Ok(()),
        Some(actual) => Err(TransferError::SizeMismatch {
            filename: filename.to_string(),
            actual,
            expected: expected_size,
        }),
        // Listed but gone by the time it was stat'ed
        None => Err(TransferError::NotUploaded {
            filename: filename.to_string(),
        }),
    }
}

/// Transfer capability used by the orchestrator
///
/// Each call is one session: connect, select the drop directory, act, release.
pub trait Transfer: Send + Sync + 'static {
    /// Existence check against a payload of `expected_size`
    fn inspect<'a>(
        &'a self,
        filename: &'a str,
        expected_size: u64,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteFileState, TransferError>> + Send + 'a>>;

    /// Upload and verify (see `upload_to`)
    fn upload<'a>(
        &'a self,
        payload: Bytes,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UploadOutcome, TransferError>> + Send + 'a>>;

    /// Upload a freshly named payload in one session (see `place_in`)
    fn place<'a>(
        &'a self,
        payload: Bytes,
        filename: &'a str,
        fallback: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Placement, PlacementError>> + Send + 'a>>;

    /// Standalone verification, used to rescue an upload that reported failure
    fn verify<'a>(
        &'a self,
        filename: &'a str,
        expected_size: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransferError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_tri_state() {
        let dir = InMemoryRemoteDir::new();
        assert_eq!(inspect(&dir, "a.zip", 3).unwrap(), RemoteFileState::NotPresent);

        dir.insert("a.zip", b"abc".to_vec());
        assert_eq!(inspect(&dir, "a.zip", 3).unwrap(), RemoteFileState::PresentSameSize);
        assert_eq!(
            inspect(&dir, "a.zip", 5).unwrap(),
            RemoteFileState::PresentDifferentSize { remote_size: 3 }
        );
    }

    #[test]
    fn test_upload_writes_absent_file() {
        let dir = InMemoryRemoteDir::new();

        let outcome = upload_to(&dir, b"payload", "NOTIFY.20170101173000.ZIP").unwrap();

        assert_eq!(outcome, UploadOutcome::Written);
        assert_eq!(dir.file("NOTIFY.20170101173000.ZIP").unwrap(), b"payload".to_vec());
        assert_eq!(dir.writes(), 1);
    }

    #[test]
    fn test_upload_same_size_skips_write() {
        let dir = InMemoryRemoteDir::new();
        dir.insert("f.zip", b"1234".to_vec());

        let outcome = upload_to(&dir, b"abcd", "f.zip").unwrap();

        assert_eq!(outcome, UploadOutcome::AlreadyPresent);
        assert_eq!(dir.writes(), 0);
        // Existing contents untouched
        assert_eq!(dir.file("f.zip").unwrap(), b"1234".to_vec());
    }

    #[test]
    fn test_upload_different_size_overwrites() {
        let dir = InMemoryRemoteDir::new();
        dir.insert("f.zip", b"12".to_vec());

        let outcome = upload_to(&dir, b"abcd", "f.zip").unwrap();

        assert_eq!(outcome, UploadOutcome::Overwritten { previous_size: 2 });
        assert_eq!(dir.file("f.zip").unwrap(), b"abcd".to_vec());
    }

    #[test]
    fn test_place_free_name() {
        let dir = InMemoryRemoteDir::new();

        let placement = place_in(&dir, b"abcd", "a.txt", "b.txt").unwrap();

        assert_eq!(
            placement,
            Placement::Placed {
                filename: "a.txt".to_string(),
                outcome: UploadOutcome::Written,
            }
        );
        assert_eq!(dir.names(), vec!["a.txt".to_string()]);
    }

    #[test]
    fn test_place_same_size_counts_as_delivered() {
        let dir = InMemoryRemoteDir::new();
        dir.insert("a.txt", b"wxyz".to_vec());

        let placement = place_in(&dir, b"abcd", "a.txt", "b.txt").unwrap();

        assert!(matches!(
            placement,
            Placement::Placed { outcome: UploadOutcome::AlreadyPresent, ref filename } if filename == "a.txt"
        ));
        assert_eq!(dir.writes(), 0);
    }

    #[test]
    fn test_place_moves_to_fallback_and_leaves_other_file() {
        let dir = InMemoryRemoteDir::new();
        dir.insert("a.txt", b"other batch".to_vec());

        let placement = place_in(&dir, b"abcd", "a.txt", "b.txt").unwrap();

        assert!(matches!(placement, Placement::Placed { ref filename, .. } if filename == "b.txt"));
        assert_eq!(dir.file("a.txt").unwrap(), b"other batch".to_vec());
        assert_eq!(dir.file("b.txt").unwrap(), b"abcd".to_vec());
    }

    #[test]
    fn test_place_both_names_taken() {
        let dir = InMemoryRemoteDir::new();
        dir.insert("a.txt", b"other batch".to_vec());
        // Even a same-sized file under the fallback belongs to someone else
        dir.insert("b.txt", b"wxyz".to_vec());

        let placement = place_in(&dir, b"abcd", "a.txt", "b.txt").unwrap();

        assert_eq!(
            placement,
            Placement::Taken {
                filename: "b.txt".to_string()
            }
        );
        assert_eq!(dir.writes(), 0);
    }

    #[test]
    fn test_place_failed_write_names_the_target() {
        let dir = InMemoryRemoteDir::new();
        dir.insert("a.txt", b"other batch".to_vec());

        let err = place_in(&LosingWrites(&dir), b"abcd", "a.txt", "b.txt").unwrap_err();

        assert_eq!(err.filename.as_deref(), Some("b.txt"));
        assert!(matches!(err.error, TransferError::Session(_)));
    }

    #[test]
    fn test_verify_absent_file() {
        let dir = InMemoryRemoteDir::new();
        let err = verify_in(&dir, "f.zip", 4).unwrap_err();
        assert_eq!(err.to_string(), "Zip file f.zip not uploaded");
    }

    #[test]
    fn test_verify_size_mismatch() {
        let dir = InMemoryRemoteDir::new();
        dir.insert("f.zip", b"12".to_vec());

        let err = verify_in(&dir, "f.zip", 4).unwrap_err();

        assert_eq!(
            err.to_string(),
            "Zip file f.zip uploaded but size is incorrect: is 2, expected 4"
        );
    }

    #[test]
    fn test_verify_correct_size() {
        let dir = InMemoryRemoteDir::new();
        dir.insert("f.zip", b"1234".to_vec());
        verify_in(&dir, "f.zip", 4).unwrap();
    }
}
