use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    CatalogError, CatalogResult, DatasetMetadata, DatasetRef, ExportJob, ExportService,
    ExtractRequest, TableCatalog, TableMetadata, TablePage, TableRef, TableUpdate, TerminalStatus,
};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// An export submitted to the [`InMemoryCatalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedExport {
    pub job_id: String,
    pub table: TableRef,
    pub request: ExtractRequest,
}

#[derive(Debug, Default)]
struct DatasetState {
    metadata: DatasetMetadata,
    tables: BTreeMap<String, TableMetadata>,
    /// Listed but absent, like a table deleted between listing and fetch.
    stale: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct CatalogState {
    datasets: HashMap<DatasetRef, DatasetState>,
    etag_counter: u64,
    list_calls: usize,
    update_calls: usize,
    deleted: Vec<TableRef>,
    exports: Vec<RecordedExport>,
    jobs: HashMap<String, TerminalStatus>,
    failing_exports: HashMap<String, TerminalStatus>,
}

impl CatalogState {
    fn next_etag(&mut self) -> String {
        self.etag_counter += 1;
        format!("etag-{}", self.etag_counter)
    }

    fn dataset(&self, dataset: &DatasetRef) -> CatalogResult<&DatasetState> {
        self.datasets
            .get(dataset)
            .ok_or_else(|| CatalogError::not_found(format!("dataset {dataset}")))
    }

    fn dataset_mut(&mut self, dataset: &DatasetRef) -> CatalogResult<&mut DatasetState> {
        self.datasets
            .get_mut(dataset)
            .ok_or_else(|| CatalogError::not_found(format!("dataset {dataset}")))
    }
}

/// Deterministic in-process catalog and export service.
///
/// Listing is ordered by table id and paginated with numeric offset tokens.
/// Every stored table gets a fresh etag on insert and on update, so
/// conditional updates behave like the real API.
#[derive(Debug)]
pub struct InMemoryCatalog {
    page_size: usize,
    state: Mutex<CatalogState>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            state: Mutex::new(CatalogState::default()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_dataset(
        &self,
        dataset: &DatasetRef,
        default_table_expiration: Option<std::time::Duration>,
    ) {
        let mut state = self.state();
        let entry = state.datasets.entry(dataset.clone()).or_default();
        entry.metadata.default_table_expiration = default_table_expiration;
    }

    /// Insert or replace a table. The stored copy gets a fresh etag, which is returned.
    pub fn add_table(&self, dataset: &DatasetRef, mut metadata: TableMetadata) -> String {
        let mut state = self.state();
        let etag = state.next_etag();
        metadata.etag = etag.clone();
        let entry = state.datasets.entry(dataset.clone()).or_default();
        entry.stale.remove(&metadata.table_id);
        entry.tables.insert(metadata.table_id.clone(), metadata);
        etag
    }

    /// List `table_id` without storing it, so fetching it reports not-found.
    pub fn add_stale_listing_entry(&self, dataset: &DatasetRef, table_id: impl Into<String>) {
        let mut state = self.state();
        let entry = state.datasets.entry(dataset.clone()).or_default();
        entry.stale.insert(table_id.into());
    }

    /// Simulate a concurrent writer: bump the table's etag.
    pub fn touch_table(&self, table: &TableRef) -> Option<String> {
        let mut state = self.state();
        let etag = state.next_etag();
        let stored = state
            .datasets
            .get_mut(&table.dataset())?
            .tables
            .get_mut(&table.table_id)?;
        stored.etag = etag.clone();
        Some(etag)
    }

    /// Make every export of `table_id` end in `status`.
    pub fn fail_exports_for(&self, table_id: impl Into<String>, status: TerminalStatus) {
        self.state().failing_exports.insert(table_id.into(), status);
    }

    /// Current stored copy of a table.
    pub fn table(&self, table: &TableRef) -> Option<TableMetadata> {
        self.state()
            .datasets
            .get(&table.dataset())?
            .tables
            .get(&table.table_id)
            .cloned()
    }

    pub fn table_ids(&self, dataset: &DatasetRef) -> Vec<String> {
        self.state()
            .datasets
            .get(dataset)
            .map(|d| d.tables.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn update_calls(&self) -> usize {
        self.state().update_calls
    }

    pub fn deleted(&self) -> Vec<TableRef> {
        self.state().deleted.clone()
    }

    pub fn exports(&self) -> Vec<RecordedExport> {
        self.state().exports.clone()
    }
}

#[async_trait]
impl TableCatalog for InMemoryCatalog {
    async fn dataset_metadata(&self, dataset: &DatasetRef) -> CatalogResult<DatasetMetadata> {
        Ok(self.state().dataset(dataset)?.metadata.clone())
    }

    async fn list_tables_page(
        &self,
        dataset: &DatasetRef,
        page_token: Option<String>,
    ) -> CatalogResult<TablePage> {
        let mut state = self.state();
        state.list_calls += 1;

        let offset = match page_token.as_deref() {
            None | Some("") => 0,
            Some(token) => token.parse::<usize>().map_err(|_| CatalogError::Api {
                resource: format!("dataset {dataset}"),
                status: 400,
                message: format!("invalid page token '{token}'"),
            })?,
        };

        let entry = state.dataset(dataset)?;
        let ids: BTreeSet<&String> = entry.tables.keys().chain(entry.stale.iter()).collect();
        let total = ids.len();
        let tables = ids
            .into_iter()
            .skip(offset)
            .take(self.page_size)
            .map(|id| dataset.table(id.clone()))
            .collect::<Vec<_>>();

        let next = offset + tables.len();
        let next_page_token = (next < total).then(|| next.to_string());

        Ok(TablePage {
            tables,
            next_page_token,
        })
    }

    async fn table_metadata(&self, table: &TableRef) -> CatalogResult<TableMetadata> {
        self.state()
            .dataset(&table.dataset())?
            .tables
            .get(&table.table_id)
            .cloned()
            .ok_or_else(|| CatalogError::not_found(format!("table {table}")))
    }

    async fn update_table(
        &self,
        table: &TableRef,
        update: TableUpdate,
        etag: &str,
    ) -> CatalogResult<TableMetadata> {
        let mut state = self.state();
        state.update_calls += 1;
        let next_etag = state.next_etag();

        let stored = state
            .dataset_mut(&table.dataset())?
            .tables
            .get_mut(&table.table_id)
            .ok_or_else(|| CatalogError::not_found(format!("table {table}")))?;

        if stored.etag != etag {
            return Err(CatalogError::Conflict {
                resource: format!("table {table}"),
            });
        }

        match update {
            TableUpdate::ExpirationTime(expiration) => stored.expiration_time = expiration,
            TableUpdate::TimePartitioning(partitioning) => {
                if stored.time_partitioning.is_none() {
                    return Err(CatalogError::Api {
                        resource: format!("table {table}"),
                        status: 400,
                        message: "cannot set partition expiration on an unpartitioned table"
                            .to_string(),
                    });
                }
                stored.time_partitioning = Some(partitioning);
            }
        }

        stored.etag = next_etag;
        stored.last_modified_time = Utc::now();
        Ok(stored.clone())
    }

    async fn delete_table(&self, table: &TableRef) -> CatalogResult<()> {
        let mut state = self.state();
        let removed = state
            .dataset_mut(&table.dataset())?
            .tables
            .remove(&table.table_id);

        match removed {
            Some(_) => {
                state.deleted.push(table.clone());
                Ok(())
            }
            None => Err(CatalogError::not_found(format!("table {table}"))),
        }
    }
}

#[async_trait]
impl ExportService for InMemoryCatalog {
    async fn start_export(
        &self,
        table: &TableRef,
        request: &ExtractRequest,
    ) -> CatalogResult<ExportJob> {
        let mut state = self.state();
        let exists = state
            .dataset(&table.dataset())?
            .tables
            .contains_key(&table.table_id);
        if !exists {
            return Err(CatalogError::not_found(format!("table {table}")));
        }

        let job_id = format!("job_{}", uuid::Uuid::new_v4().simple());
        let status = state
            .failing_exports
            .get(&table.table_id)
            .cloned()
            .unwrap_or(TerminalStatus::Done);

        state.jobs.insert(job_id.clone(), status);
        state.exports.push(RecordedExport {
            job_id: job_id.clone(),
            table: table.clone(),
            request: request.clone(),
        });

        Ok(ExportJob {
            job_id,
            project_id: table.project_id.clone(),
            location: None,
        })
    }

    async fn wait_for_job(&self, job: &ExportJob) -> CatalogResult<TerminalStatus> {
        self.state()
            .jobs
            .get(&job.job_id)
            .cloned()
            .ok_or_else(|| CatalogError::not_found(format!("job {}", job.job_id)))
    }
}
