//! Collaborator contracts for the warehouse metadata, listing and export APIs.
//!
//! The services in this crate only talk to the warehouse through the
//! [`TableCatalog`] and [`ExportService`] traits. Two implementations exist:
//!
//! - [`memory::InMemoryCatalog`]: deterministic, used by tests and local runs
//! - [`rest::RestCatalog`]: the warehouse REST v2 JSON API over HTTPS

pub mod memory;
pub mod rest;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use thiserror::Error;

pub use memory::InMemoryCatalog;
pub use rest::RestCatalog;

/// Identifies a dataset inside a project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetRef {
    pub project_id: String,
    pub dataset_id: String,
}

impl DatasetRef {
    pub fn new(project_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
        }
    }

    /// Reference to a table of this dataset.
    pub fn table(&self, table_id: impl Into<String>) -> TableRef {
        TableRef {
            project_id: self.project_id.clone(),
            dataset_id: self.dataset_id.clone(),
            table_id: table_id.into(),
        }
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project_id, self.dataset_id)
    }
}

/// Identifies a table. The table id of a date-sharded table ends in `YYYYMMDD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRef {
    pub fn dataset(&self) -> DatasetRef {
        DatasetRef::new(self.project_id.clone(), self.dataset_id.clone())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Table kind as reported by the metadata API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableKind {
    /// Materialized table
    Regular,
    View,
    MaterializedView,
    External,
    Snapshot,
    Other(String),
}

impl TableKind {
    /// Map the API's `type` field.
    pub fn from_api(value: &str) -> Self {
        match value {
            "TABLE" => TableKind::Regular,
            "VIEW" => TableKind::View,
            "MATERIALIZED_VIEW" => TableKind::MaterializedView,
            "EXTERNAL" => TableKind::External,
            "SNAPSHOT" => TableKind::Snapshot,
            other => TableKind::Other(other.to_string()),
        }
    }

    pub fn as_api(&self) -> &str {
        match self {
            TableKind::Regular => "TABLE",
            TableKind::View => "VIEW",
            TableKind::MaterializedView => "MATERIALIZED_VIEW",
            TableKind::External => "EXTERNAL",
            TableKind::Snapshot => "SNAPSHOT",
            TableKind::Other(other) => other,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_api())
    }
}

/// Time-partitioning descriptor of a partitioned table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimePartitioning {
    /// Partition granularity (DAY, HOUR, MONTH, YEAR).
    pub partition_type: String,
    /// Partitioning column; `None` means ingestion-time partitioning.
    pub field: Option<String>,
    /// Partition expiration. `None` means unset.
    pub expiration: Option<Duration>,
}

impl TimePartitioning {
    pub fn daily() -> Self {
        Self {
            partition_type: "DAY".to_string(),
            field: None,
            expiration: None,
        }
    }
}

/// Read-only snapshot of a table's metadata.
///
/// Becomes stale as soon as anyone else updates the table; updates are
/// made conditional on [`TableMetadata::etag`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableMetadata {
    pub table_id: String,
    pub kind: TableKind,
    pub creation_time: DateTime<Utc>,
    pub last_modified_time: DateTime<Utc>,
    /// `None` means the table never expires.
    pub expiration_time: Option<DateTime<Utc>>,
    pub time_partitioning: Option<TimePartitioning>,
    pub num_bytes: u64,
    pub etag: String,
}

impl TableMetadata {
    /// A regular, unpartitioned table without expiration.
    pub fn regular(table_id: impl Into<String>, creation_time: DateTime<Utc>) -> Self {
        Self {
            table_id: table_id.into(),
            kind: TableKind::Regular,
            creation_time,
            last_modified_time: creation_time,
            expiration_time: None,
            time_partitioning: None,
            num_bytes: 0,
            etag: String::new(),
        }
    }

    pub fn with_kind(mut self, kind: TableKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_expiration(mut self, expiration_time: DateTime<Utc>) -> Self {
        self.expiration_time = Some(expiration_time);
        self
    }

    pub fn with_last_modified(mut self, last_modified_time: DateTime<Utc>) -> Self {
        self.last_modified_time = last_modified_time;
        self
    }

    pub fn with_partitioning(mut self, partitioning: TimePartitioning) -> Self {
        self.time_partitioning = Some(partitioning);
        self
    }

    pub fn with_num_bytes(mut self, num_bytes: u64) -> Self {
        self.num_bytes = num_bytes;
        self
    }
}

/// Dataset-level defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatasetMetadata {
    pub default_table_expiration: Option<Duration>,
    pub default_partition_expiration: Option<Duration>,
}

/// One page of a table listing.
#[derive(Debug, Clone, Default)]
pub struct TablePage {
    pub tables: Vec<TableRef>,
    /// Token for the next page; `None` on the last page.
    pub next_page_token: Option<String>,
}

/// A metadata patch. Only the named field is touched.
#[derive(Debug, Clone, PartialEq)]
pub enum TableUpdate {
    /// Set the whole-table expiration; `None` clears it.
    ExpirationTime(Option<DateTime<Utc>>),
    /// Replace the time-partitioning descriptor (carries the new partition expiration).
    TimePartitioning(TimePartitioning),
}

/// File format written by an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationFormat {
    #[default]
    Csv,
    NewlineDelimitedJson,
    Avro,
    Parquet,
}

impl DestinationFormat {
    pub fn as_api(&self) -> &'static str {
        match self {
            DestinationFormat::Csv => "CSV",
            DestinationFormat::NewlineDelimitedJson => "NEWLINE_DELIMITED_JSON",
            DestinationFormat::Avro => "AVRO",
            DestinationFormat::Parquet => "PARQUET",
        }
    }
}

impl FromStr for DestinationFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "" | "CSV" => Ok(DestinationFormat::Csv),
            "JSON" | "NEWLINE_DELIMITED_JSON" => Ok(DestinationFormat::NewlineDelimitedJson),
            "AVRO" => Ok(DestinationFormat::Avro),
            "PARQUET" => Ok(DestinationFormat::Parquet),
            other => Err(format!(
                "unknown destination format '{other}', expected CSV, NEWLINE_DELIMITED_JSON, AVRO or PARQUET"
            )),
        }
    }
}

/// Compression applied to exported files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Deflate,
    Snappy,
    Zstd,
}

impl Compression {
    pub fn as_api(&self) -> &'static str {
        match self {
            Compression::None => "NONE",
            Compression::Gzip => "GZIP",
            Compression::Deflate => "DEFLATE",
            Compression::Snappy => "SNAPPY",
            Compression::Zstd => "ZSTD",
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "" | "NONE" => Ok(Compression::None),
            "GZIP" => Ok(Compression::Gzip),
            "DEFLATE" => Ok(Compression::Deflate),
            "SNAPPY" => Ok(Compression::Snappy),
            "ZSTD" => Ok(Compression::Zstd),
            other => Err(format!(
                "unknown compression '{other}', expected NONE, GZIP, DEFLATE, SNAPPY or ZSTD"
            )),
        }
    }
}

/// Parameters of one table export job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractRequest {
    pub destination_uri: String,
    pub format: DestinationFormat,
    pub compression: Compression,
}

/// Handle of a submitted export job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    pub job_id: String,
    pub project_id: String,
    pub location: Option<String>,
}

/// End state of a job. Jobs never leave a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Done,
    Failed(String),
    Cancelled,
    Stopped,
}

impl TerminalStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TerminalStatus::Done)
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalStatus::Done => f.write_str("done"),
            TerminalStatus::Failed(reason) => write!(f, "failed: {reason}"),
            TerminalStatus::Cancelled => f.write_str("cancelled"),
            TerminalStatus::Stopped => f.write_str("stopped"),
        }
    }
}

/// Errors returned by catalog and export implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{resource} was modified concurrently (etag mismatch)")]
    Conflict { resource: String },

    #[error("warehouse API error {status} for {resource}: {message}")]
    Api {
        resource: String,
        status: u16,
        message: String,
    },

    #[error("request to warehouse API failed: {0}")]
    Transport(String),

    #[error("unexpected response for {resource}: {message}")]
    Decode { resource: String, message: String },
}

impl CatalogError {
    pub fn not_found(resource: impl fmt::Display) -> Self {
        CatalogError::NotFound {
            resource: resource.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CatalogError::NotFound { .. })
    }
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Table listing and metadata API.
#[async_trait]
pub trait TableCatalog: fmt::Debug + Send + Sync {
    /// Fetch dataset-level defaults.
    async fn dataset_metadata(&self, dataset: &DatasetRef) -> CatalogResult<DatasetMetadata>;

    /// Fetch one page of the dataset's tables. `None` requests the first page.
    async fn list_tables_page(
        &self,
        dataset: &DatasetRef,
        page_token: Option<String>,
    ) -> CatalogResult<TablePage>;

    /// Fetch a fresh metadata snapshot.
    async fn table_metadata(&self, table: &TableRef) -> CatalogResult<TableMetadata>;

    /// Apply `update` if the table's current etag still equals `etag`.
    async fn update_table(
        &self,
        table: &TableRef,
        update: TableUpdate,
        etag: &str,
    ) -> CatalogResult<TableMetadata>;

    async fn delete_table(&self, table: &TableRef) -> CatalogResult<()>;
}

/// Export job API.
#[async_trait]
pub trait ExportService: fmt::Debug + Send + Sync {
    /// Submit an export of `table` and return without waiting.
    async fn start_export(
        &self,
        table: &TableRef,
        request: &ExtractRequest,
    ) -> CatalogResult<ExportJob>;

    /// Block until the job reaches a terminal state.
    async fn wait_for_job(&self, job: &ExportJob) -> CatalogResult<TerminalStatus>;
}

/// Lazily walk every table of a dataset, one page request at a time.
///
/// Each call starts a fresh listing. A page error is yielded once and ends
/// the stream.
pub fn list_tables<'a>(
    catalog: &'a dyn TableCatalog,
    dataset: &'a DatasetRef,
) -> BoxStream<'a, CatalogResult<TableRef>> {
    Box::pin(async_stream::stream! {
        let mut page_token: Option<String> = None;
        loop {
            let page = match catalog.list_tables_page(dataset, page_token.take()).await {
                Ok(page) => page,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            for table in page.tables {
                yield Ok(table);
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[test]
    fn test_table_kind_mapping() {
        assert_eq!(TableKind::from_api("TABLE"), TableKind::Regular);
        assert_eq!(TableKind::from_api("VIEW"), TableKind::View);
        assert_eq!(TableKind::from_api("EXTERNAL"), TableKind::External);
        assert_eq!(
            TableKind::from_api("SOMETHING_NEW"),
            TableKind::Other("SOMETHING_NEW".to_string())
        );
        assert_eq!(TableKind::Regular.to_string(), "TABLE");
    }

    #[test]
    fn test_format_and_compression_parsing() {
        assert_eq!(
            "parquet".parse::<DestinationFormat>().unwrap(),
            DestinationFormat::Parquet
        );
        assert_eq!("".parse::<DestinationFormat>().unwrap(), DestinationFormat::Csv);
        assert!("xml".parse::<DestinationFormat>().is_err());

        assert_eq!("gzip".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("".parse::<Compression>().unwrap(), Compression::None);
        assert!("lz4".parse::<Compression>().is_err());
    }

    #[test]
    fn test_table_ref_display() {
        let table = DatasetRef::new("proj", "logs").table("events_20230101");
        assert_eq!(table.to_string(), "proj.logs.events_20230101");
        assert_eq!(table.dataset(), DatasetRef::new("proj", "logs"));
    }

    #[tokio::test]
    async fn test_list_tables_walks_every_page() {
        let dataset = DatasetRef::new("proj", "ds");
        let catalog = InMemoryCatalog::new().with_page_size(2);
        catalog.add_dataset(&dataset, None);
        for id in ["a", "b", "c", "d", "e"] {
            catalog.add_table(&dataset, TableMetadata::regular(id, Utc::now()));
        }

        let ids: Vec<String> = list_tables(&catalog, &dataset)
            .map_ok(|t| t.table_id)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(catalog.list_calls(), 3, "5 tables at 2 per page");
    }

    #[tokio::test]
    async fn test_list_tables_unknown_dataset_yields_error() {
        let catalog = InMemoryCatalog::new();
        let dataset = DatasetRef::new("proj", "missing");

        let result: CatalogResult<Vec<TableRef>> =
            list_tables(&catalog, &dataset).try_collect().await;

        assert!(matches!(result, Err(CatalogError::NotFound { .. })));
    }
}
