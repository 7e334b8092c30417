//! Simulated Blob Store with Fault Injection
//!
//! DST-compatible wrapper that injects store faults from a seeded RNG.
//! Follows FoundationDB patterns for deterministic simulation testing.

use super::{BlobStore, StoreError};
use crate::sim::Rng;
use bytes::Bytes;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedStoreConfig {
    /// Probability of GET operation failure
    pub get_fail_prob: f64,
    /// Probability of an existence check failing (not a "false")
    pub exists_fail_prob: f64,
    /// Probability of PUT operation failure (nothing is written)
    pub put_fail_prob: f64,
    /// Probability of operation timeout
    pub timeout_prob: f64,
}

impl Default for SimulatedStoreConfig {
    fn default() -> Self {
        SimulatedStoreConfig {
            get_fail_prob: 0.01,    // 1%
            exists_fail_prob: 0.01, // 1%
            put_fail_prob: 0.01,    // 1%
            timeout_prob: 0.005,    // 0.5%
        }
    }
}

impl SimulatedStoreConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedStoreConfig {
            get_fail_prob: 0.05,
            exists_fail_prob: 0.05,
            put_fail_prob: 0.05,
            timeout_prob: 0.02,
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedStoreConfig {
            get_fail_prob: 0.0,
            exists_fail_prob: 0.0,
            put_fail_prob: 0.0,
            timeout_prob: 0.0,
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default)]
pub struct SimulatedStoreStats {
    pub get_attempts: u64,
    pub get_failures: u64,
    pub exists_attempts: u64,
    pub exists_failures: u64,
    pub put_attempts: u64,
    pub put_failures: u64,
    pub timeouts: u64,
}

struct SimulatedStoreInner<R: Rng> {
    rng: R,
    stats: SimulatedStoreStats,
}

#[derive(Clone, Copy)]
enum Op {
    Get,
    Exists,
    Put,
}

/// Simulated blob store that wraps another store and injects faults
pub struct SimulatedBlobStore<S: BlobStore, R: Rng> {
    inner_store: S,
    config: SimulatedStoreConfig,
    state: Arc<Mutex<SimulatedStoreInner<R>>>,
}

impl<S: BlobStore, R: Rng> SimulatedBlobStore<S, R> {
    /// Create a new simulated store with the given RNG
    pub fn new(inner_store: S, rng: R, config: SimulatedStoreConfig) -> Self {
        SimulatedBlobStore {
            inner_store,
            config,
            state: Arc::new(Mutex::new(SimulatedStoreInner {
                rng,
                stats: SimulatedStoreStats::default(),
            })),
        }
    }

    /// Get current statistics
    pub fn stats(&self) -> SimulatedStoreStats {
        self.state.lock().stats.clone()
    }

    /// The wrapped store (faults never corrupt it)
    pub fn inner(&self) -> &S {
        &self.inner_store
    }

    /// Roll the dice for one operation; returns the injected error, if any
    fn inject(&self, op: Op, bucket: &str, key: &str) -> Option<StoreError> {
        let mut s = self.state.lock();

        match op {
            Op::Get => s.stats.get_attempts += 1,
            Op::Exists => s.stats.exists_attempts += 1,
            Op::Put => s.stats.put_attempts += 1,
        }

        if s.rng.gen_bool(self.config.timeout_prob) {
            s.stats.timeouts += 1;
            return Some(StoreError::backend(bucket, key, "simulated timeout"));
        }

        let (prob, label) = match op {
            Op::Get => (self.config.get_fail_prob, "simulated get failure"),
            Op::Exists => (self.config.exists_fail_prob, "simulated head failure"),
            Op::Put => (self.config.put_fail_prob, "simulated put failure"),
        };
        if !s.rng.gen_bool(prob) {
            return None;
        }

        match op {
            Op::Get => s.stats.get_failures += 1,
            Op::Exists => s.stats.exists_failures += 1,
            Op::Put => s.stats.put_failures += 1,
        }
        Some(StoreError::backend(bucket, key, label))
    }
}

impl<S: BlobStore, R: Rng> BlobStore for SimulatedBlobStore<S, R> {
    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(err) = self.inject(Op::Get, bucket, key) {
                return Err(err);
            }
            self.inner_store.get(bucket, key).await
        })
    }

    fn exists<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(err) = self.inject(Op::Exists, bucket, key) {
                return Err(err);
            }
            self.inner_store.exists(bucket, key).await
        })
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(err) = self.inject(Op::Put, bucket, key) {
                return Err(err);
            }
            self.inner_store.put(bucket, key, data).await
        })
    }
}
