//! Concurrent multi-object fetch

use super::{BlobStore, StoreError};
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

/// Fetch every key from `bucket` with at most `concurrency` requests in flight
///
/// Results come back in the order of `keys`. All or nothing: the first failure
/// (including not-found) is returned and the fetches still in flight are
/// dropped, so a partially built archive can never misreport which letters
/// were delivered.
pub async fn fetch_many(
    store: &dyn BlobStore,
    bucket: &str,
    keys: &[String],
    concurrency: usize,
) -> Result<Vec<Bytes>, StoreError> {
    let fetched: Vec<Bytes> = stream::iter(keys)
        .map(|key| store.get(bucket, key))
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    debug!(bucket, objects = fetched.len(), "fetched source objects");
    Ok(fetched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBlobStore;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Records the peak number of concurrent gets
    struct ConcurrencyGauge {
        inner: InMemoryBlobStore,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        delay: fn(&str) -> Duration,
    }

    impl ConcurrencyGauge {
        fn new(inner: InMemoryBlobStore, delay: fn(&str) -> Duration) -> Self {
            ConcurrencyGauge {
                inner,
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                delay,
            }
        }
    }

    fn fixed_delay(_: &str) -> Duration {
        Duration::from_millis(5)
    }

    /// Earlier keys finish later: `L0` waits longest
    fn reverse_delay(key: &str) -> Duration {
        let index: u64 = key
            .trim_start_matches("2017-01-01/L")
            .trim_end_matches(".PDF")
            .parse()
            .unwrap_or(0);
        Duration::from_millis(20u64.saturating_sub(index * 2))
    }

    impl BlobStore for ConcurrencyGauge {
        fn get<'a>(
            &'a self,
            bucket: &'a str,
            key: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Bytes, StoreError>> + Send + 'a>> {
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep((self.delay)(key)).await;
                let result = self.inner.get(bucket, key).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                result
            })
        }

        fn exists<'a>(
            &'a self,
            bucket: &'a str,
            key: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + 'a>> {
            self.inner.exists(bucket, key)
        }

        fn put<'a>(
            &'a self,
            bucket: &'a str,
            key: &'a str,
            data: Bytes,
        ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
            self.inner.put(bucket, key, data)
        }
    }

    fn seeded(n: usize) -> (InMemoryBlobStore, Vec<String>) {
        let store = InMemoryBlobStore::new();
        let keys: Vec<String> = (0..n).map(|i| format!("2017-01-01/L{i}.PDF")).collect();
        for key in &keys {
            store.insert("letters", key, key.as_bytes().to_vec());
        }
        (store, keys)
    }

    #[tokio::test]
    async fn test_fetch_many_returns_every_key() {
        let (store, keys) = seeded(12);

        let fetched = fetch_many(&store, "letters", &keys, 5).await.unwrap();

        assert_eq!(fetched.len(), 12);
        for (key, data) in keys.iter().zip(&fetched) {
            assert_eq!(&data[..], key.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_fetch_many_bounds_concurrency() {
        let (inner, keys) = seeded(20);
        let gauge = ConcurrencyGauge::new(inner, fixed_delay);

        fetch_many(&gauge, "letters", &keys, 5).await.unwrap();

        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak <= 5, "peak concurrency {peak} exceeded pool width");
        assert!(peak > 1, "fetches should overlap, peak was {peak}");
    }

    #[tokio::test]
    async fn test_fetch_many_keeps_key_order() {
        let (inner, keys) = seeded(8);
        let gauge = ConcurrencyGauge::new(inner, reverse_delay);

        let fetched = fetch_many(&gauge, "letters", &keys, 8).await.unwrap();

        let order: Vec<&[u8]> = fetched.iter().map(|data| &data[..]).collect();
        let expected: Vec<&[u8]> = keys.iter().map(|key| key.as_bytes()).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn test_fetch_many_fails_whole_operation_on_missing_key() {
        let (store, mut keys) = seeded(2);
        keys.insert(1, "2017-01-01/MISSING.PDF".to_string());

        let err = fetch_many(&store, "letters", &keys, 5).await.unwrap_err();

        assert_eq!(
            err,
            StoreError::NotFound {
                bucket: "letters".to_string(),
                key: "2017-01-01/MISSING.PDF".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_many_zero_concurrency_still_progresses() {
        let (store, keys) = seeded(3);
        let fetched = fetch_many(&store, "letters", &keys, 0).await.unwrap();
        assert_eq!(fetched.len(), 3);
    }
}
