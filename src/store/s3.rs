//! S3 Blob Store Implementation
//!
//! Provides an S3-compatible blob store for production use.
//! Uses the `object_store` crate from the Arrow ecosystem.
//!
//! Supports:
//! - AWS S3
//! - S3-compatible services (MinIO, LocalStack, etc.)
//! - Custom endpoints
//!
//! One client is built per bucket on first use and reused afterwards.

use super::{BlobStore, StoreError};
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore as ObjectStoreTrait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Connection settings shared by every bucket
#[derive(Debug, Clone)]
pub struct S3Settings {
    /// AWS region
    pub region: String,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
}

/// S3 blob store for production deployments
///
/// Credentials come from the standard AWS environment variables
/// (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN, ...).
#[derive(Clone)]
pub struct S3BlobStore {
    settings: S3Settings,
    buckets: Arc<RwLock<HashMap<String, Arc<dyn ObjectStoreTrait>>>>,
}

impl S3BlobStore {
    pub fn new(settings: S3Settings) -> Self {
        S3BlobStore {
            settings,
            buckets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Use an existing store for `bucket` (for testing against
    /// `object_store::memory::InMemory`)
    pub fn with_bucket_store(self, bucket: &str, store: Arc<dyn ObjectStoreTrait>) -> Self {
        self.buckets.write().insert(bucket.to_string(), store);
        self
    }

    fn bucket(&self, bucket: &str) -> Result<Arc<dyn ObjectStoreTrait>, StoreError> {
        if let Some(store) = self.buckets.read().get(bucket) {
            return Ok(store.clone());
        }

        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(&self.settings.region);

        // Use custom endpoint for S3-compatible services (MinIO)
        if let Some(endpoint) = &self.settings.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store: Arc<dyn ObjectStoreTrait> = Arc::new(builder.build().map_err(|e| {
            StoreError::Config(format!("failed to create S3 client for {}: {}", bucket, e))
        })?);

        Ok(self
            .buckets
            .write()
            .entry(bucket.to_string())
            .or_insert(store)
            .clone())
    }

    /// Convert object_store errors, keeping the not-found signal distinct
    fn map_error(bucket: &str, key: &str, err: object_store::Error) -> StoreError {
        match err {
            object_store::Error::NotFound { .. } => StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
            other => StoreError::backend(bucket, key, other.to_string()),
        }
    }
}

impl std::fmt::Debug for S3BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3BlobStore")
            .field("settings", &self.settings)
            .field("buckets", &self.buckets.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl BlobStore for S3BlobStore {
    fn get<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let store = self.bucket(bucket)?;
            let path = ObjectPath::from(key);
            let result = store
                .get(&path)
                .await
                .map_err(|e| Self::map_error(bucket, key, e))?;
            result
                .bytes()
                .await
                .map_err(|e| Self::map_error(bucket, key, e))
        })
    }

    fn exists<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let store = self.bucket(bucket)?;
            let path = ObjectPath::from(key);
            match store.head(&path).await {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(Self::map_error(bucket, key, e)),
            }
        })
    }

    fn put<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + 'a>> {
        Box::pin(async move {
            let store = self.bucket(bucket)?;
            let path = ObjectPath::from(key);
            store
                .put(&path, data.into())
                .await
                .map_err(|e| Self::map_error(bucket, key, e))?;
            Ok(())
        })
    }
}
