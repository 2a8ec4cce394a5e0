use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tracing::{info, warn};

use super::config::{ExpirationPolicy, ExpirationValue, PropagationOptions};
use super::policy::{Decision, ExpirationError, SkipReason, decide};
use crate::catalog::{CatalogError, DatasetRef, TableCatalog, TableRef, list_tables};

/// What happened to one listed table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableAction {
    Updated(Decision),
    /// Dry run: the update that would have been applied.
    WouldUpdate(Decision),
    Skipped(SkipReason),
    /// Listed, but gone by the time it was fetched or updated.
    NotFound,
    /// Excluded by the table prefix filter.
    Filtered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOutcome {
    pub table_id: String,
    pub action: TableAction,
}

/// Per-table log of a propagation run, in listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationReport {
    pub dataset: DatasetRef,
    pub expiration: ExpirationValue,
    pub dry_run: bool,
    pub outcomes: Vec<TableOutcome>,
}

impl PropagationReport {
    /// Ids of the tables whose metadata was actually changed.
    pub fn applied_table_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.action, TableAction::Updated(_)))
            .map(|o| o.table_id.as_str())
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&TableAction) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.action)).count()
    }
}

#[derive(Error, Debug)]
pub enum PropagationError {
    #[error("dataset {dataset} has no default table expiration to propagate")]
    MissingDefaultExpiration { dataset: String },

    #[error("failed to read metadata of dataset {dataset}")]
    Dataset {
        dataset: String,
        #[source]
        source: CatalogError,
    },

    #[error("failed to list tables of dataset {dataset}")]
    Listing {
        dataset: String,
        #[source]
        source: CatalogError,
    },

    #[error("cannot compute expiration for table {table_id}")]
    Decision {
        table_id: String,
        #[source]
        source: ExpirationError,
    },

    #[error("failed to update table {table_id}")]
    Table {
        table_id: String,
        #[source]
        source: CatalogError,
    },
}

/// A run that stopped early, with the outcomes of the tables visited before it stopped.
#[derive(Error, Debug)]
#[error("expiration propagation stopped after {} table(s)", .outcomes.len())]
pub struct PropagationFailure {
    pub outcomes: Vec<TableOutcome>,
    #[source]
    pub source: PropagationError,
}

/// Applies an expiration policy to every table of a dataset.
#[derive(Debug, Clone)]
pub struct ExpirationPropagator {
    catalog: Arc<dyn TableCatalog>,
}

impl ExpirationPropagator {
    pub fn new(catalog: Arc<dyn TableCatalog>) -> Self {
        Self { catalog }
    }

    /// Walk the dataset and apply the expiration to each table.
    ///
    /// Tables that disappear mid-run are skipped. Any other failure aborts
    /// the run; updates already made stay in place and their outcomes are
    /// returned with the error.
    pub async fn propagate(
        &self,
        dataset: &DatasetRef,
        options: &PropagationOptions,
    ) -> Result<PropagationReport, PropagationFailure> {
        let expiration = self
            .resolve_expiration(dataset, options)
            .await
            .map_err(|source| PropagationFailure {
                outcomes: Vec::new(),
                source,
            })?;
        let policy = options.policy(expiration);

        info!(
            dataset = %dataset,
            expiration = %expiration,
            base_date = %policy.base_date,
            overwrite = policy.overwrite_existing,
            dry_run = policy.dry_run,
            "Propagating table expiration"
        );

        let mut report = PropagationReport {
            dataset: dataset.clone(),
            expiration,
            dry_run: policy.dry_run,
            outcomes: Vec::new(),
        };

        if let Err(source) = self
            .visit(dataset, options, &policy, &mut report.outcomes)
            .await
        {
            warn!(
                dataset = %dataset,
                visited = report.outcomes.len(),
                error = %source,
                "Expiration propagation stopped"
            );
            return Err(PropagationFailure {
                outcomes: report.outcomes,
                source,
            });
        }

        info!(
            dataset = %dataset,
            updated = report.count(|a| matches!(a, TableAction::Updated(_))),
            would_update = report.count(|a| matches!(a, TableAction::WouldUpdate(_))),
            skipped = report.count(|a| matches!(a, TableAction::Skipped(_))),
            not_found = report.count(|a| matches!(a, TableAction::NotFound)),
            filtered = report.count(|a| matches!(a, TableAction::Filtered)),
            "Expiration propagation finished"
        );

        Ok(report)
    }

    async fn visit(
        &self,
        dataset: &DatasetRef,
        options: &PropagationOptions,
        policy: &ExpirationPolicy,
        outcomes: &mut Vec<TableOutcome>,
    ) -> Result<(), PropagationError> {
        let mut tables = list_tables(self.catalog.as_ref(), dataset);
        while let Some(table) = tables.next().await {
            let table = table.map_err(|source| PropagationError::Listing {
                dataset: dataset.to_string(),
                source,
            })?;
            let table_id = table.table_id.clone();

            let action = if !options.matches_prefix(&table_id) {
                info!(table = %table_id, "Filtered by table prefix");
                TableAction::Filtered
            } else {
                self.apply(&table, policy).await?
            };

            outcomes.push(TableOutcome { table_id, action });
        }
        Ok(())
    }

    async fn resolve_expiration(
        &self,
        dataset: &DatasetRef,
        options: &PropagationOptions,
    ) -> Result<ExpirationValue, PropagationError> {
        if let Some(expiration) = options.expiration {
            return Ok(expiration);
        }

        let metadata = self
            .catalog
            .dataset_metadata(dataset)
            .await
            .map_err(|source| PropagationError::Dataset {
                dataset: dataset.to_string(),
                source,
            })?;

        metadata
            .default_table_expiration
            .map(ExpirationValue::After)
            .ok_or_else(|| PropagationError::MissingDefaultExpiration {
                dataset: dataset.to_string(),
            })
    }

    async fn apply(
        &self,
        table: &TableRef,
        policy: &ExpirationPolicy,
    ) -> Result<TableAction, PropagationError> {
        let table_id = &table.table_id;
        let table_error = |source| PropagationError::Table {
            table_id: table_id.clone(),
            source,
        };

        let metadata = match self.catalog.table_metadata(table).await {
            Ok(metadata) => metadata,
            Err(e) if e.is_not_found() => {
                warn!(table = %table_id, "Table not found, skipping");
                return Ok(TableAction::NotFound);
            }
            Err(e) => return Err(table_error(e)),
        };

        let decision = decide(&metadata, policy).map_err(|source| PropagationError::Decision {
            table_id: table_id.clone(),
            source,
        })?;

        let update = match decision.to_update(&metadata) {
            Ok(update) => update,
            Err(reason) => {
                info!(table = %table_id, reason = %reason, "Skipping table");
                return Ok(TableAction::Skipped(reason));
            }
        };

        if policy.dry_run {
            info!(table = %table_id, "[DRY-RUN] Would {decision}");
            return Ok(TableAction::WouldUpdate(decision));
        }

        match self
            .catalog
            .update_table(table, update, &metadata.etag)
            .await
        {
            Ok(_) => {
                info!(table = %table_id, "Applied: {decision}");
                Ok(TableAction::Updated(decision))
            }
            Err(e) if e.is_not_found() => {
                warn!(table = %table_id, "Table disappeared before update, skipping");
                Ok(TableAction::NotFound)
            }
            Err(e) => Err(table_error(e)),
        }
    }
}
