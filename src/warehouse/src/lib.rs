//! Warehouse table maintenance: expiration propagation, sharded-table
//! export and prefix cleanup, on top of pluggable catalog clients.

pub mod catalog;
pub mod cleanup;
pub mod expiration;
pub mod export;
pub mod shard;

pub use catalog::{
    CatalogError, DatasetRef, ExportService, InMemoryCatalog, RestCatalog, TableCatalog,
    TableMetadata, TableRef,
};
pub use cleanup::{CleanupError, TableJanitor};
pub use expiration::{ExpirationPropagator, PropagationOptions, PropagationReport};
pub use export::{ExportFailure, ExportRequest, ShardedTableExporter};
