//! Object storage seam used by the deletion pipeline.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::path::Path;
use thiserror::Error;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;

use common::ObjectRef;
use common::storage::BucketStores;

/// Buffered reader over an object's contents.
pub type ObjectReader = Pin<Box<dyn AsyncBufRead + Send>>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object {0} does not exist")]
    NotFound(ObjectRef),

    #[error("storage operation on {object} failed: {message}")]
    Backend { object: ObjectRef, message: String },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    fn from_object_store(object: &ObjectRef, error: object_store::Error) -> Self {
        match error {
            object_store::Error::NotFound { .. } => StorageError::NotFound(object.clone()),
            other => StorageError::Backend {
                object: object.clone(),
                message: other.to_string(),
            },
        }
    }
}

/// Minimal object storage operations needed to purge objects.
#[async_trait]
pub trait ObjectStorage: fmt::Debug + Send + Sync {
    /// Open an object for streaming reads.
    async fn open(&self, object: &ObjectRef) -> Result<ObjectReader, StorageError>;

    /// Delete one object. Reports [`StorageError::NotFound`] when it is already gone.
    async fn delete(&self, object: &ObjectRef) -> Result<(), StorageError>;
}

/// [`ObjectStorage`] over `object_store` clients, one per bucket.
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    stores: Arc<BucketStores>,
}

impl ObjectStoreBackend {
    pub fn new(stores: Arc<BucketStores>) -> Self {
        Self { stores }
    }

    /// Object keys are used as written; `Path::from` would percent-encode them.
    fn path(object: &ObjectRef) -> Result<Path, StorageError> {
        Path::parse(&object.path).map_err(|e| StorageError::Backend {
            object: object.clone(),
            message: e.to_string(),
        })
    }

    fn store(
        &self,
        object: &ObjectRef,
    ) -> Result<Arc<dyn object_store::ObjectStore>, StorageError> {
        self.stores
            .store_for(object.scheme, &object.bucket)
            .map_err(|e| StorageError::Backend {
                object: object.clone(),
                message: format!("{e:#}"),
            })
    }
}

#[async_trait]
impl ObjectStorage for ObjectStoreBackend {
    async fn open(&self, object: &ObjectRef) -> Result<ObjectReader, StorageError> {
        let store = self.store(object)?;
        let result = store
            .get(&Self::path(object)?)
            .await
            .map_err(|e| StorageError::from_object_store(object, e))?;

        let stream = result.into_stream().map_err(io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }

    async fn delete(&self, object: &ObjectRef) -> Result<(), StorageError> {
        let store = self.store(object)?;
        let path = Self::path(object)?;

        // S3 and the in-memory store acknowledge deletes of missing keys
        store
            .head(&path)
            .await
            .map_err(|e| StorageError::from_object_store(object, e))?;

        store
            .delete(&path)
            .await
            .map_err(|e| StorageError::from_object_store(object, e))
    }
}
