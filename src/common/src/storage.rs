use anyhow::{Context, Result};
use object_store::{ObjectStore, aws::AmazonS3Builder, gcp::GoogleCloudStorageBuilder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::StorageConfig;
use crate::object_ref::ObjectScheme;

/// Create an object store rooted at a single bucket.
pub fn create_bucket_store(
    scheme: ObjectScheme,
    bucket: &str,
    config: &StorageConfig,
) -> Result<Arc<dyn ObjectStore>> {
    match scheme {
        ObjectScheme::Gcs => {
            let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(bucket);
            if let Some(path) = &config.gcs_service_account_path {
                builder = builder.with_service_account_path(path);
            }
            let store = builder
                .build()
                .with_context(|| format!("Failed to create GCS client for bucket {bucket}"))?;
            Ok(Arc::new(store))
        }
        ObjectScheme::S3 => {
            let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
            if let Some(region) = &config.s3_region {
                builder = builder.with_region(region);
            }
            if let Some(endpoint) = &config.s3_endpoint {
                // S3-compatible stores usually need path-style URLs
                builder = builder
                    .with_endpoint(endpoint)
                    .with_allow_http(true)
                    .with_virtual_hosted_style_request(false);
            }
            let store = builder
                .build()
                .with_context(|| format!("Failed to create S3 client for bucket {bucket}"))?;
            Ok(Arc::new(store))
        }
    }
}

/// Lazily created object stores, one per `(scheme, bucket)`.
///
/// Stores registered up front with [`BucketStores::with_store`] take
/// precedence over the configured builders, which is how tests inject
/// in-memory buckets.
#[derive(Debug, Default)]
pub struct BucketStores {
    config: StorageConfig,
    stores: Mutex<HashMap<(ObjectScheme, String), Arc<dyn ObjectStore>>>,
}

impl BucketStores {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Register a pre-built store for a bucket.
    pub fn with_store(
        self,
        scheme: ObjectScheme,
        bucket: impl Into<String>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        self.stores
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((scheme, bucket.into()), store);
        self
    }

    /// Return the store for a bucket, building it on first use.
    pub fn store_for(&self, scheme: ObjectScheme, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = stores.get(&(scheme, bucket.to_string())) {
            return Ok(store.clone());
        }

        tracing::debug!(bucket = %bucket, scheme = ?scheme, "Creating object store client");
        let store = create_bucket_store(scheme, bucket, &self.config)?;
        stores.insert((scheme, bucket.to_string()), store.clone());
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[test]
    fn test_registered_store_is_reused() {
        let memory: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let stores = BucketStores::new(StorageConfig::default()).with_store(
            ObjectScheme::Gcs,
            "bucket-a",
            memory.clone(),
        );

        let first = stores.store_for(ObjectScheme::Gcs, "bucket-a").unwrap();
        let second = stores.store_for(ObjectScheme::Gcs, "bucket-a").unwrap();

        assert!(Arc::ptr_eq(&first, &memory));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_s3_bucket_store_with_endpoint() {
        let config = StorageConfig {
            s3_region: Some("us-east-1".to_string()),
            s3_endpoint: Some("http://localhost:9000".to_string()),
            ..Default::default()
        };

        let store = create_bucket_store(ObjectScheme::S3, "bucket", &config);
        assert!(store.is_ok());
    }
}
