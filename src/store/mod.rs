//! Object Store Gateway
//!
//! Provides a trait-based abstraction over the blob store holding the source
//! letters, job exports and sent-markers.
//!
//! Implementations:
//! - `InMemoryBlobStore`: For unit tests and DST
//! - `SimulatedBlobStore`: Seeded fault injection around another store
//! - `S3BlobStore`: For production (feature-gated)

pub mod fetch;
#[cfg(feature = "s3")]
pub mod s3;
pub mod simulated;

pub use fetch::fetch_many;
#[cfg(feature = "s3")]
pub use s3::{S3BlobStore, S3Settings};
pub use simulated::{SimulatedBlobStore, SimulatedStoreConfig, SimulatedStoreStats};

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Error type for object store operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The object does not exist
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Transport, authentication or service failure
    #[error("object store request for {bucket}/{key} failed: {message}")]
    Backend {
        bucket: String,
        key: String,
        message: String,
    },

    /// The store could not be constructed for a bucket
    #[error("object store misconfigured: {0}")]
    Config(String),
}

impl StoreError {
    pub fn backend(bucket: &str, key: &str, message: impl Into<String>) -> Self {
        StoreError::Backend {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Blob store capability
///
/// `exists` answers false only for the not-found signal; any other failure is
/// returned as an error.
pub trait BlobStore: Send + Sync + 'static {
    /// Get an object's contents
    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, StoreError>> + Send + 'a>>;

    /// Check if an object exists
    fn exists<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + 'a>>;

    /// Put an object (create or overwrite)
    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>>;
}

// ============================================================================
// InMemoryBlobStore - For tests and DST
// ============================================================================

/// Operation counters for the in-memory store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InMemoryStoreStats {
    pub gets: u64,
    pub exists_checks: u64,
    pub puts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicU64,
    exists_checks: AtomicU64,
    puts: AtomicU64,
}

/// In-memory blob store for unit tests and deterministic simulation
///
/// Clones share the same contents and counters.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobStore {
    data: Arc<RwLock<HashMap<(String, String), Bytes>>>,
    counters: Arc<Counters>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without counting it as a put
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.data
            .write()
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    /// Read an object without counting it as a get
    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.data
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys stored in `bucket`, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .data
            .read()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> InMemoryStoreStats {
        InMemoryStoreStats {
            gets: self.counters.gets.load(Ordering::SeqCst),
            exists_checks: self.counters.exists_checks.load(Ordering::SeqCst),
            puts: self.counters.puts.load(Ordering::SeqCst),
        }
    }
}

impl BlobStore for InMemoryBlobStore {
    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.counters.gets.fetch_add(1, Ordering::SeqCst);
            self.object(bucket, key).ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        })
    }

    fn exists<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.counters.exists_checks.fetch_add(1, Ordering::SeqCst);
            Ok(self.object(bucket, key).is_some())
        })
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.counters.puts.fetch_add(1, Ordering::SeqCst);
            self.insert(bucket, key, data);
            Ok(())
        })
    }
}
