//! Bulk deletion of tables by id prefix.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::{CatalogError, DatasetRef, TableCatalog, list_tables};

#[derive(Error, Debug)]
pub enum CleanupError {
    #[error("refusing to delete tables without a prefix")]
    EmptyPrefix,

    #[error("failed to list tables of dataset {dataset}")]
    Listing {
        dataset: String,
        #[source]
        source: CatalogError,
    },

    #[error("failed to delete table {table_id}")]
    Delete {
        table_id: String,
        #[source]
        source: CatalogError,
    },
}

/// Deletes every table of a dataset whose id starts with a prefix.
#[derive(Debug, Clone)]
pub struct TableJanitor {
    catalog: Arc<dyn TableCatalog>,
}

impl TableJanitor {
    pub fn new(catalog: Arc<dyn TableCatalog>) -> Self {
        Self { catalog }
    }

    /// Returns the ids of the deleted tables (or, in dry-run, those that
    /// would be deleted). Tables already gone are skipped.
    pub async fn delete_tables_by_prefix(
        &self,
        dataset: &DatasetRef,
        prefix: &str,
        dry_run: bool,
    ) -> Result<Vec<String>, CleanupError> {
        if prefix.is_empty() {
            return Err(CleanupError::EmptyPrefix);
        }

        let mut deleted = Vec::new();
        let mut tables = list_tables(self.catalog.as_ref(), dataset);
        while let Some(table) = tables.next().await {
            let table = table.map_err(|source| CleanupError::Listing {
                dataset: dataset.to_string(),
                source,
            })?;
            if !table.table_id.starts_with(prefix) {
                continue;
            }

            if dry_run {
                info!(table = %table.table_id, "[DRY-RUN] Would delete table");
                deleted.push(table.table_id);
                continue;
            }

            match self.catalog.delete_table(&table).await {
                Ok(()) => {
                    info!(table = %table.table_id, "Deleted table");
                    deleted.push(table.table_id);
                }
                Err(e) if e.is_not_found() => {
                    warn!(table = %table.table_id, "Table already deleted, skipping");
                }
                Err(source) => {
                    return Err(CleanupError::Delete {
                        table_id: table.table_id,
                        source,
                    });
                }
            }
        }

        info!(dataset = %dataset, prefix, tables = deleted.len(), dry_run, "Prefix cleanup finished");
        Ok(deleted)
    }
}
