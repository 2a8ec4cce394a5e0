//! Manifest-driven bulk deletion of objects from GCS or S3.
//!
//! A manifest is an object holding one `gs://bucket/path` (or `s3://`)
//! reference per line. [`DeletionPipeline`] streams it and deletes every
//! listed object with a bounded pool of workers.

pub mod backend;
pub mod manifest;
pub mod pipeline;

pub use backend::{ObjectReader, ObjectStorage, ObjectStoreBackend, StorageError};
pub use manifest::{ManifestLine, ManifestReader};
pub use pipeline::{DeletionPipeline, PurgeError, PurgeFailure, PurgeOptions, PurgeSummary};
