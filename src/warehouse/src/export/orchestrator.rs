use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, info};

use super::config::{ExportDestination, ExportLimits, ExportOptions};
use super::target::ShardedTableTarget;
use super::{ExportError, ExportFailure};
use crate::catalog::{DatasetRef, ExportService, TableCatalog, TableRef, list_tables};

/// Invoked with the job id right after each job is submitted.
pub type JobCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// One export run.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub dataset: DatasetRef,
    pub target: ShardedTableTarget,
    pub destination: ExportDestination,
    pub limits: ExportLimits,
    pub options: ExportOptions,
}

/// Exports the expired shards of a date-sharded table family.
///
/// Tables are processed sequentially in listing order. The run stops at
/// the first failure or exhausted limit, and always reports the tables
/// exported so far.
#[derive(Clone)]
pub struct ShardedTableExporter {
    catalog: Arc<dyn TableCatalog>,
    exporter: Arc<dyn ExportService>,
    on_job_submitted: Option<JobCallback>,
}

impl fmt::Debug for ShardedTableExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedTableExporter")
            .field("catalog", &self.catalog)
            .field("exporter", &self.exporter)
            .field("on_job_submitted", &self.on_job_submitted.is_some())
            .finish()
    }
}

impl ShardedTableExporter {
    pub fn new(catalog: Arc<dyn TableCatalog>, exporter: Arc<dyn ExportService>) -> Self {
        Self {
            catalog,
            exporter,
            on_job_submitted: None,
        }
    }

    pub fn with_job_callback(mut self, callback: JobCallback) -> Self {
        self.on_job_submitted = Some(callback);
        self
    }

    /// Run the export against the current time.
    pub async fn export(&self, request: &ExportRequest) -> Result<Vec<String>, ExportFailure> {
        self.export_at(request, Utc::now()).await
    }

    /// Run the export, judging shard age against `now`.
    pub async fn export_at(
        &self,
        request: &ExportRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, ExportFailure> {
        info!(
            dataset = %request.dataset,
            prefix = %request.target.prefix,
            expiration_days = request.target.expiration_days,
            destination = %request.destination.uri_template,
            dry_run = request.options.dry_run,
            "Exporting sharded tables"
        );

        let mut exported = Vec::new();
        match self.run(request, now, &mut exported).await {
            Ok(total_bytes) => {
                info!(
                    dataset = %request.dataset,
                    tables = exported.len(),
                    bytes = total_bytes,
                    "Export finished"
                );
                Ok(exported)
            }
            Err(source) => Err(ExportFailure { exported, source }),
        }
    }

    async fn run(
        &self,
        request: &ExportRequest,
        now: DateTime<Utc>,
        exported: &mut Vec<String>,
    ) -> Result<u64, ExportError> {
        let mut total_bytes: u64 = 0;
        let mut tables = list_tables(self.catalog.as_ref(), &request.dataset);

        while let Some(table) = tables.next().await {
            let table = table.map_err(|source| ExportError::Listing {
                dataset: request.dataset.to_string(),
                source,
            })?;

            let selected = request
                .target
                .matches(&table.table_id, now)
                .map_err(|source| ExportError::InvalidTableName {
                    table_id: table.table_id.clone(),
                    source,
                })?;
            if !selected {
                debug!(table = %table.table_id, "Not selected");
                continue;
            }

            if exported.len() as u64 >= request.limits.max_table_count {
                return Err(ExportError::TableCountLimit {
                    table_id: table.table_id,
                    limit: request.limits.max_table_count,
                });
            }

            if request.options.dry_run {
                info!(
                    table = %table.table_id,
                    destination = %request.destination.uri_for(&table.table_id),
                    "[DRY-RUN] Would export table"
                );
            } else {
                total_bytes = self.export_table(&table, request, total_bytes).await?;
            }
            exported.push(table.table_id);
        }

        Ok(total_bytes)
    }

    /// Export one table and return the new cumulative byte total.
    async fn export_table(
        &self,
        table: &TableRef,
        request: &ExportRequest,
        total_bytes: u64,
    ) -> Result<u64, ExportError> {
        let table_id = &table.table_id;

        let metadata = self
            .catalog
            .table_metadata(table)
            .await
            .map_err(|source| ExportError::Metadata {
                table_id: table_id.clone(),
                source,
            })?;

        let attempted = total_bytes.saturating_add(metadata.num_bytes);
        if attempted > request.limits.max_table_bytes {
            return Err(ExportError::TableSizeLimit {
                table_id: table_id.clone(),
                limit: request.limits.max_table_bytes,
                attempted,
            });
        }

        let extract = request.destination.request_for(table_id);
        let job = self
            .exporter
            .start_export(table, &extract)
            .await
            .map_err(|source| ExportError::Submit {
                table_id: table_id.clone(),
                source,
            })?;

        info!(
            table = %table_id,
            job_id = %job.job_id,
            destination = %extract.destination_uri,
            bytes = metadata.num_bytes,
            "Export job submitted"
        );

        if let Some(callback) = &self.on_job_submitted {
            callback(&job.job_id);
        }

        if request.options.wait {
            let status = self.exporter.wait_for_job(&job).await.map_err(|source| {
                ExportError::Wait {
                    table_id: table_id.clone(),
                    job_id: job.job_id.clone(),
                    source,
                }
            })?;

            if !status.is_success() {
                return Err(ExportError::JobFailed {
                    table_id: table_id.clone(),
                    job_id: job.job_id,
                    status,
                });
            }
            info!(table = %table_id, job_id = %job.job_id, "Export job completed");
        }

        Ok(attempted)
    }
}
