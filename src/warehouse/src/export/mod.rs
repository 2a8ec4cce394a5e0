//! Export of expired date-sharded tables to object storage.

pub mod config;
pub mod orchestrator;
pub mod target;

use thiserror::Error;

use crate::catalog::{CatalogError, TerminalStatus};
use crate::shard::DateSuffixError;

pub use config::{ExportDestination, ExportLimits, ExportOptions, TABLE_ID_PLACEHOLDER};
pub use orchestrator::{ExportRequest, JobCallback, ShardedTableExporter};
pub use target::{ShardedTableTarget, is_shard_expired};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("invalid export destination: {0}")]
    InvalidDestination(String),

    #[error("failed to list tables of dataset {dataset}")]
    Listing {
        dataset: String,
        #[source]
        source: CatalogError,
    },

    #[error("cannot match table {table_id}")]
    InvalidTableName {
        table_id: String,
        #[source]
        source: DateSuffixError,
    },

    #[error("failed to read metadata of table {table_id}")]
    Metadata {
        table_id: String,
        #[source]
        source: CatalogError,
    },

    #[error("table count limit of {limit} reached before exporting {table_id}")]
    TableCountLimit { table_id: String, limit: u64 },

    #[error(
        "table size limit of {limit} bytes reached: exporting {table_id} would bring the total to {attempted} bytes"
    )]
    TableSizeLimit {
        table_id: String,
        limit: u64,
        attempted: u64,
    },

    #[error("failed to submit export of table {table_id}")]
    Submit {
        table_id: String,
        #[source]
        source: CatalogError,
    },

    #[error("failed to wait for export job {job_id} of table {table_id}")]
    Wait {
        table_id: String,
        job_id: String,
        #[source]
        source: CatalogError,
    },

    #[error("export job {job_id} of table {table_id} ended {status}")]
    JobFailed {
        table_id: String,
        job_id: String,
        status: TerminalStatus,
    },
}

impl ExportError {
    /// Whether the run stopped on a configured limit rather than a failure.
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            ExportError::TableCountLimit { .. } | ExportError::TableSizeLimit { .. }
        )
    }
}

/// A run that stopped early, with the tables exported before it stopped.
#[derive(Error, Debug)]
#[error("export stopped after {} table(s)", .exported.len())]
pub struct ExportFailure {
    pub exported: Vec<String>,
    #[source]
    pub source: ExportError,
}
